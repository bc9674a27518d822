use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info, instrument};

use vimchannel::{
    AcceptServer, Channel, ChannelDelegate, Command, Config, ConnectionManager, Message, Signal,
    StdioBackend,
};

/// The demo delegate from spec §8 scenario 1: every request is echoed back
/// as the reply body, and every reply to a command we sent is just logged.
struct EchoDelegate;

#[async_trait::async_trait]
impl ChannelDelegate for EchoDelegate {
    async fn on_message(&self, channel: &Channel, message: Message) {
        info!(id = message.id, body = %message.body, "echoing request");
        channel.respond_to(&message, message.body.clone()).await;
    }

    async fn on_response_to_command(&self, _channel: &Channel, response: Message, command: Command) {
        info!(?command, body = %response.body, "received response to our command");
    }
}

fn setup_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "vimchannel=debug,info".to_string()))
        .init();
}

/// Parses `--socket [PORT]`. The flag alone (no value, or at the end of
/// argv) selects the default port; its absence selects the stdio backend.
fn socket_port_from_args() -> Option<u16> {
    let args: Vec<String> = std::env::args().collect();
    let flag_index = args.iter().position(|a| a == "--socket")?;
    match args.get(flag_index + 1).and_then(|a| a.parse::<u16>().ok()) {
        Some(port) => Some(port),
        None => Some(1337),
    }
}

#[instrument]
#[tokio::main]
async fn main() -> Result<()> {
    setup_logging();
    info!("starting vimchannel reference server");

    let mut config = Config::load()?;
    let delegate: Arc<dyn ChannelDelegate> = Arc::new(EchoDelegate);

    match socket_port_from_args() {
        Some(port) => {
            config.server.port = port;
            run_socket_server(config, delegate).await
        }
        None => run_stdio_channel(delegate).await,
    }
}

async fn run_stdio_channel(delegate: Arc<dyn ChannelDelegate>) -> Result<()> {
    // Kept alive for the process's lifetime: `Channel::new` only registers a
    // weak handle in the process-wide registry `run_forever` starts from.
    let _channel = Channel::new(Arc::new(StdioBackend::new()), delegate);
    Channel::run_forever().await;
    Ok(())
}

async fn run_socket_server(config: Config, delegate: Arc<dyn ChannelDelegate>) -> Result<()> {
    let connections = Arc::new(ConnectionManager::new(config.server.resource_limits.clone()));
    let server = AcceptServer::new(connections, delegate);

    let lifecycle = server.lifecycle().clone();
    lifecycle.on_failure(|| error!("server reported a failure"));

    let stop_server = server.clone();
    lifecycle.install_signal(Signal::Int, move || stop_server.stop());
    let stop_server = server.clone();
    lifecycle.install_signal(Signal::Term, move || stop_server.stop());

    let result = server.run(&config.server).await;
    if let Err(err) = &result {
        error!(%err, "reference server exited with an error");
        std::process::exit(1);
    }
    Ok(())
}
