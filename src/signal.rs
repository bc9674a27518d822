use nix::sys::signal::Signal as RawSignal;

/// POSIX signals the lifecycle manager can install a handler for.
///
/// Deliberately excludes signals that cannot be caught (`SIGKILL`), that
/// dump core by default (`SIGQUIT`), or that indicate an unrecoverable
/// process fault (`SIGSEGV`) — mirroring the exclusions a self-pipe signal
/// handler in the wider ecosystem makes for the same reasons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    Hup,
    Int,
    Term,
    Usr1,
    Usr2,
}

impl Signal {
    pub fn raw(self) -> i32 {
        let signal: RawSignal = match self {
            Signal::Hup => RawSignal::SIGHUP,
            Signal::Int => RawSignal::SIGINT,
            Signal::Term => RawSignal::SIGTERM,
            Signal::Usr1 => RawSignal::SIGUSR1,
            Signal::Usr2 => RawSignal::SIGUSR2,
        };
        signal as i32
    }

    pub fn from_raw(raw: i32) -> Option<Signal> {
        match RawSignal::try_from(raw).ok()? {
            RawSignal::SIGHUP => Some(Signal::Hup),
            RawSignal::SIGINT => Some(Signal::Int),
            RawSignal::SIGTERM => Some(Signal::Term),
            RawSignal::SIGUSR1 => Some(Signal::Usr1),
            RawSignal::SIGUSR2 => Some(Signal::Usr2),
            _ => None,
        }
    }

    /// The `tokio::signal::unix::SignalKind` used to actually listen for
    /// this signal.
    pub(crate) fn kind(self) -> tokio::signal::unix::SignalKind {
        tokio::signal::unix::SignalKind::from_raw(self.raw())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_round_trips_through_from_raw() {
        for signal in [Signal::Hup, Signal::Int, Signal::Term, Signal::Usr1, Signal::Usr2] {
            assert_eq!(Signal::from_raw(signal.raw()), Some(signal));
        }
    }

    #[test]
    fn unhandled_raw_value_is_none() {
        assert_eq!(Signal::from_raw(0), None);
    }
}
