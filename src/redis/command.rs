use super::resp::RespValue;

/// The Redis command subset a regional counter store understands.
///
/// - **Reads**: GET (counter), PFCOUNT (unique estimate)
/// - **Writes**: INCR (counter), PFADD (unique estimator)
/// - **Liveness**: PING, ECHO
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCommand {
    Ping(Option<Vec<u8>>),
    Echo(Vec<u8>),
    Get(String),
    Incr(String),
    PfAdd(String, Vec<String>),
    PfCount(String),
}

impl StoreCommand {
    pub fn from_resp(value: &RespValue) -> Result<StoreCommand, String> {
        let elements = match value {
            RespValue::Array(Some(elements)) if !elements.is_empty() => elements,
            _ => return Err("expected a non-empty command array".to_string()),
        };

        let mut args = Vec::with_capacity(elements.len());
        for element in elements {
            match element {
                RespValue::BulkString(Some(data)) => args.push(data.clone()),
                _ => return Err("command arguments must be bulk strings".to_string()),
            }
        }

        let name = String::from_utf8_lossy(&args[0]).to_ascii_uppercase();
        let rest = &args[1..];

        match name.as_str() {
            "PING" => match rest {
                [] => Ok(StoreCommand::Ping(None)),
                [message] => Ok(StoreCommand::Ping(Some(message.clone()))),
                _ => Err(wrong_arity("ping")),
            },
            "ECHO" => match rest {
                [message] => Ok(StoreCommand::Echo(message.clone())),
                _ => Err(wrong_arity("echo")),
            },
            "GET" => match rest {
                [key] => Ok(StoreCommand::Get(utf8(key))),
                _ => Err(wrong_arity("get")),
            },
            "INCR" => match rest {
                [key] => Ok(StoreCommand::Incr(utf8(key))),
                _ => Err(wrong_arity("incr")),
            },
            "PFADD" => match rest {
                [key, members @ ..] => Ok(StoreCommand::PfAdd(
                    utf8(key),
                    members.iter().map(|m| utf8(m)).collect(),
                )),
                [] => Err(wrong_arity("pfadd")),
            },
            "PFCOUNT" => match rest {
                [key] => Ok(StoreCommand::PfCount(utf8(key))),
                _ => Err(wrong_arity("pfcount")),
            },
            _ => Err(format!("unknown command '{}'", name)),
        }
    }

    /// Wire form of this command, as a client sends it.
    pub fn to_resp(&self) -> RespValue {
        match self {
            StoreCommand::Ping(None) => RespValue::command(&["PING"]),
            StoreCommand::Ping(Some(message)) => RespValue::Array(Some(vec![
                RespValue::bulk("PING"),
                RespValue::bulk(message.clone()),
            ])),
            StoreCommand::Echo(message) => RespValue::Array(Some(vec![
                RespValue::bulk("ECHO"),
                RespValue::bulk(message.clone()),
            ])),
            StoreCommand::Get(key) => RespValue::command(&["GET", key.as_str()]),
            StoreCommand::Incr(key) => RespValue::command(&["INCR", key.as_str()]),
            StoreCommand::PfAdd(key, members) => {
                let mut parts = vec!["PFADD", key.as_str()];
                parts.extend(members.iter().map(String::as_str));
                RespValue::command(&parts)
            }
            StoreCommand::PfCount(key) => RespValue::command(&["PFCOUNT", key.as_str()]),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            StoreCommand::Ping(_) => "PING",
            StoreCommand::Echo(_) => "ECHO",
            StoreCommand::Get(_) => "GET",
            StoreCommand::Incr(_) => "INCR",
            StoreCommand::PfAdd(..) => "PFADD",
            StoreCommand::PfCount(_) => "PFCOUNT",
        }
    }
}

fn utf8(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

fn wrong_arity(command: &str) -> String {
    format!("wrong number of arguments for '{}' command", command)
}
