use serde_json::Value;

use crate::error::{Error, Result};

/// An outgoing command we send to Vim. Encodings are bit-exact per spec §6.
///
/// `Expr` and `Call` may carry a negative correlation id; when they do, the
/// channel retains the command in its pending-replies table until the
/// matching response arrives (spec §3, §4.8).
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Redraw { forced: bool },
    Ex(String),
    Normal(String),
    Expr { expr: String, id: Option<i64> },
    Call { func: String, args: Vec<Value>, id: Option<i64> },
}

impl Command {
    /// The correlation id this command expects a reply under, if any.
    pub fn id(&self) -> Option<i64> {
        match self {
            Command::Expr { id, .. } | Command::Call { id, .. } => *id,
            _ => None,
        }
    }

    pub fn encode(&self) -> Value {
        match self {
            Command::Redraw { forced } => {
                serde_json::json!(["redraw", if *forced { "force" } else { "" }])
            }
            Command::Ex(text) => serde_json::json!(["ex", text]),
            Command::Normal(text) => serde_json::json!(["normal", text]),
            Command::Expr { expr, id: Some(id) } => serde_json::json!(["expr", expr, id]),
            Command::Expr { expr, id: None } => serde_json::json!(["expr", expr]),
            Command::Call { func, args, id: Some(id) } => {
                serde_json::json!(["call", func, args, id])
            }
            Command::Call { func, args, id: None } => {
                serde_json::json!(["call", func, args])
            }
        }
    }

    pub fn encode_bytes(&self) -> Result<Vec<u8>> {
        let mut bytes = serde_json::to_vec(&self.encode())?;
        bytes.push(b'\n');
        Ok(bytes)
    }
}

impl TryFrom<&[Value]> for Command {
    type Error = Error;

    fn try_from(arr: &[Value]) -> Result<Self> {
        let invalid = |what: &str| Error::Framing(format!("invalid {} in channel command", what));

        match arr.first().and_then(Value::as_str) {
            Some("redraw") => {
                let forced = arr.get(1).and_then(Value::as_str) == Some("force");
                Ok(Command::Redraw { forced })
            }
            Some("ex") => {
                let text = arr.get(1).and_then(Value::as_str).ok_or_else(|| invalid("ex text"))?;
                Ok(Command::Ex(text.to_string()))
            }
            Some("normal") => {
                let text = arr
                    .get(1)
                    .and_then(Value::as_str)
                    .ok_or_else(|| invalid("normal keys"))?;
                Ok(Command::Normal(text.to_string()))
            }
            Some("expr") => {
                let expr = arr.get(1).and_then(Value::as_str).ok_or_else(|| invalid("expr"))?;
                let id = arr.get(2).and_then(Value::as_i64);
                Ok(Command::Expr { expr: expr.to_string(), id })
            }
            Some("call") => {
                let func = arr.get(1).and_then(Value::as_str).ok_or_else(|| invalid("call func"))?;
                let args = arr
                    .get(2)
                    .and_then(Value::as_array)
                    .ok_or_else(|| invalid("call args"))?
                    .clone();
                let id = arr.get(3).and_then(Value::as_i64);
                Ok(Command::Call { func: func.to_string(), args, id })
            }
            _ => Err(Error::Framing("unrecognized channel command".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn redraw_encodes_force_and_no_force() {
        assert_eq!(Command::Redraw { forced: true }.encode(), json!(["redraw", "force"]));
        assert_eq!(Command::Redraw { forced: false }.encode(), json!(["redraw", ""]));
    }

    #[test]
    fn ex_normal_encode_as_two_element_arrays() {
        assert_eq!(Command::Ex("set number".into()).encode(), json!(["ex", "set number"]));
        assert_eq!(Command::Normal("ggVG".into()).encode(), json!(["normal", "ggVG"]));
    }

    #[test]
    fn expr_with_and_without_id() {
        let with_id = Command::Expr { expr: "line('$')".into(), id: Some(-2) };
        assert_eq!(with_id.encode(), json!(["expr", "line('$')", -2]));
        assert_eq!(with_id.id(), Some(-2));

        let without_id = Command::Expr { expr: "line('$')".into(), id: None };
        assert_eq!(without_id.encode(), json!(["expr", "line('$')"]));
        assert_eq!(without_id.id(), None);
    }

    #[test]
    fn call_with_and_without_id() {
        let with_id = Command::Call {
            func: "setline".into(),
            args: vec![json!("$"), json!(["a", "b", "c"])],
            id: Some(-5),
        };
        assert_eq!(
            with_id.encode(),
            json!(["call", "setline", ["$", ["a", "b", "c"]], -5])
        );

        let without_id = Command::Call { func: "setline".into(), args: vec![json!(1)], id: None };
        assert_eq!(without_id.encode(), json!(["call", "setline", [1]]));
    }

    #[test]
    fn parse_round_trips_through_encode() {
        let commands = vec![
            Command::Redraw { forced: true },
            Command::Ex("echo 'hi'".into()),
            Command::Normal("dd".into()),
            Command::Expr { expr: "1+1".into(), id: Some(-1) },
            Command::Call { func: "f".into(), args: vec![json!(1), json!(2)], id: None },
        ];
        for command in commands {
            let encoded = command.encode();
            let arr = encoded.as_array().unwrap().clone();
            let parsed = Command::try_from(arr.as_slice()).unwrap();
            assert_eq!(parsed, command);
        }
    }

    #[test]
    fn unrecognized_command_is_a_framing_error() {
        let arr = vec![json!("frobnicate")];
        let err = Command::try_from(arr.as_slice()).unwrap_err();
        assert!(matches!(err, Error::Framing(_)));
    }
}
