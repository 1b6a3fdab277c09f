use std::time::{Duration, SystemTime};

use bytes::Bytes;

use crate::{config::Config, error::CommandError, resp_value::RespValue, store::Store};

#[derive(Debug, PartialEq)]
pub enum Command {
    Ping(Option<Bytes>),
    Echo(Bytes),
    Get(String),
    Set {
        key: String,
        value: Bytes,
        expiry: Option<Duration>,
    },
    Del(Vec<String>),
    Keys(String),
    Info(Vec<String>),
    Config(Vec<Bytes>),
}

impl Command {
    /// Parses a request, which must be an array of bulk strings.
    pub fn parse(request: RespValue) -> Result<Self, CommandError> {
        let RespValue::Array(elements) = request else {
            return Err(CommandError::Protocol);
        };
        let mut args = elements
            .into_iter()
            .map(|element| match element {
                RespValue::BulkString(b) => Ok(b),
                _ => Err(CommandError::Protocol),
            })
            .collect::<Result<Vec<_>, _>>()?;
        if args.is_empty() {
            return Err(CommandError::Protocol);
        }
        let name = lossy(&args.remove(0));

        match name.to_ascii_lowercase().as_str() {
            "ping" => match args.len() {
                0 => Ok(Command::Ping(None)),
                1 => Ok(Command::Ping(args.pop())),
                _ => Err(CommandError::WrongArity("ping")),
            },
            "echo" => match <[Bytes; 1]>::try_from(args) {
                Ok([message]) => Ok(Command::Echo(message)),
                Err(_) => Err(CommandError::WrongArity("echo")),
            },
            "get" => match <[Bytes; 1]>::try_from(args) {
                Ok([key]) => Ok(Command::Get(lossy(&key))),
                Err(_) => Err(CommandError::WrongArity("get")),
            },
            "set" => parse_set(args),
            "del" => {
                if args.is_empty() {
                    return Err(CommandError::WrongArity("del"));
                }
                Ok(Command::Del(args.iter().map(|key| lossy(key)).collect()))
            }
            "keys" => match <[Bytes; 1]>::try_from(args) {
                Ok([pattern]) => Ok(Command::Keys(lossy(&pattern))),
                Err(_) => Err(CommandError::WrongArity("keys")),
            },
            "info" => Ok(Command::Info(
                args.iter().map(|s| lossy(s).to_ascii_lowercase()).collect(),
            )),
            // Arguments are validated on execution, see `config_get`
            "config" => Ok(Command::Config(args)),
            _ => Err(CommandError::UnknownCommand(name)),
        }
    }

    /// Runs the command. `info` holds the replication fields reported by INFO.
    pub fn execute(
        self,
        store: &Store,
        config: &Config,
        info: &[(&str, String)],
    ) -> RespValue {
        match self {
            Command::Ping(None) => RespValue::SimpleString("PONG".into()),
            Command::Ping(Some(message)) | Command::Echo(message) => {
                RespValue::BulkString(message)
            }
            Command::Get(key) => match store.get(&key) {
                Some(entry) => RespValue::BulkString(entry.value),
                None => RespValue::NullBulkString,
            },
            Command::Set { key, value, expiry } => {
                let expires_at = match expiry.map(deadline).transpose() {
                    Ok(expires_at) => expires_at,
                    Err(e) => return RespValue::SimpleError(e.to_string()),
                };
                store.set(key, value, expires_at);
                RespValue::SimpleString("OK".into())
            }
            Command::Del(keys) => {
                let removed = keys.iter().filter(|key| store.delete(key)).count();
                RespValue::Integer(removed as i64)
            }
            Command::Keys(pattern) => RespValue::Array(
                store
                    .keys()
                    .into_iter()
                    .filter(|key| glob_match(pattern.as_bytes(), key.as_bytes()))
                    .map(RespValue::bulk)
                    .collect(),
            ),
            Command::Info(sections) => {
                if sections.is_empty() || sections.iter().any(|s| s == "replication") {
                    let mut lines = vec!["# Replication".to_string()];
                    lines.extend(info.iter().map(|(key, value)| format!("{key}:{value}")));
                    RespValue::bulk(lines.join("\r\n"))
                } else {
                    RespValue::bulk("")
                }
            }
            Command::Config(args) => config_get(config, &args)
                .unwrap_or_else(|e| RespValue::SimpleError(e.to_string())),
        }
    }
}

/// `CONFIG GET <name>`: `args` excludes the leading `CONFIG`.
pub fn config_get(config: &Config, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let [subcommand, name] = args else {
        return Err(CommandError::WrongArity("config get"));
    };
    let subcommand = lossy(subcommand);
    if !subcommand.eq_ignore_ascii_case("get") {
        return Err(CommandError::UnknownCommand(subcommand));
    }
    match config.get(&lossy(name)) {
        Some(value) => Ok(RespValue::Array(vec![
            RespValue::BulkString(name.clone()),
            RespValue::bulk(value),
        ])),
        None => Ok(RespValue::NullBulkString),
    }
}

fn parse_set(args: Vec<Bytes>) -> Result<Command, CommandError> {
    let mut args = args.into_iter();
    let (Some(key), Some(value)) = (args.next(), args.next()) else {
        return Err(CommandError::WrongArity("set"));
    };

    let mut expiry = None;
    while let Some(option) = args.next() {
        let unit = lossy(&option).to_ascii_lowercase();
        let to_duration: fn(u64) -> Duration = match unit.as_str() {
            "ex" => Duration::from_secs,
            "px" => Duration::from_millis,
            _ => return Err(CommandError::Syntax),
        };
        if expiry.is_some() {
            return Err(CommandError::Syntax);
        }
        let amount = args.next().ok_or(CommandError::Syntax)?;
        let amount = lossy(&amount)
            .parse::<u64>()
            .map_err(|_| CommandError::NotAnInteger)?;
        if amount == 0 {
            return Err(CommandError::InvalidExpireTime("set"));
        }
        let duration = to_duration(amount);
        deadline(duration)?;
        expiry = Some(duration);
    }

    Ok(Command::Set {
        key: lossy(&key),
        value,
        expiry,
    })
}

/// Absolute expiry for a relative SET timeout, refusing ones past the clock's range.
fn deadline(expiry: Duration) -> Result<SystemTime, CommandError> {
    SystemTime::now()
        .checked_add(expiry)
        .ok_or(CommandError::InvalidExpireTime("set"))
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

/// Glob matching with `*` and `?`, enough for KEYS.
fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    let (mut p, mut t) = (0, 0);
    let mut backtrack = None;
    while t < text.len() {
        match pattern.get(p) {
            Some(&b'*') => {
                backtrack = Some((p, t));
                p += 1;
            }
            Some(&c) if c == b'?' || c == text[t] => {
                p += 1;
                t += 1;
            }
            _ => match backtrack {
                Some((star, matched)) => {
                    p = star + 1;
                    t = matched + 1;
                    backtrack = Some((star, matched + 1));
                }
                None => return false,
            },
        }
    }
    pattern[p..].iter().all(|&c| c == b'*')
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, SystemTime};

    use bytes::Bytes;

    use super::{config_get, glob_match, Command};
    use crate::{config::Config, error::CommandError, resp_value::RespValue, store::Store};

    fn request(parts: &[&str]) -> RespValue {
        RespValue::Array(parts.iter().map(|p| RespValue::bulk(p.to_string())).collect())
    }

    fn run(store: &Store, config: &Config, parts: &[&str]) -> RespValue {
        match Command::parse(request(parts)) {
            Ok(command) => command.execute(store, config, &[("role", "master".to_string())]),
            Err(e) => RespValue::SimpleError(e.to_string()),
        }
    }

    fn args(parts: &[&str]) -> Vec<Bytes> {
        parts.iter().map(|p| Bytes::from(p.to_string())).collect()
    }

    #[test]
    fn config_get_known_name() {
        let config = Config::new();
        config.set("dir", "/tmp/redis-files");
        assert_eq!(
            config_get(&config, &args(&["get", "dir"])),
            Ok(RespValue::Array(vec![
                RespValue::bulk("dir"),
                RespValue::bulk("/tmp/redis-files"),
            ]))
        );
    }

    #[test]
    fn config_get_argument_errors() {
        let config = Config::new();
        assert_eq!(
            config_get(&config, &args(&["GET"])),
            Err(CommandError::WrongArity("config get"))
        );
        assert_eq!(
            config_get(&config, &args(&["GET", "dir", "extra"])),
            Err(CommandError::WrongArity("config get"))
        );
        assert_eq!(
            config_get(&config, &args(&["SET", "dir"])),
            Err(CommandError::UnknownCommand("SET".into()))
        );
        assert_eq!(
            config_get(&config, &args(&["GET", "nonexistent"])),
            Ok(RespValue::NullBulkString)
        );
    }

    #[test]
    fn config_command_reply() {
        let (store, config) = (Store::new(), Config::new());
        config.set("dbfilename", "dump.rdb");
        assert_eq!(
            run(&store, &config, &["CONFIG", "GET", "dbfilename"]),
            RespValue::Array(vec![RespValue::bulk("dbfilename"), RespValue::bulk("dump.rdb")])
        );
        assert_eq!(
            run(&store, &config, &["CONFIG", "GET"]),
            RespValue::SimpleError(
                "ERR wrong number of arguments for 'config get' command".into()
            )
        );
    }

    #[test]
    fn ping_and_echo() {
        let (store, config) = (Store::new(), Config::new());
        assert_eq!(
            run(&store, &config, &["PING"]),
            RespValue::SimpleString("PONG".into())
        );
        assert_eq!(run(&store, &config, &["echo", "hey"]), RespValue::bulk("hey"));
        assert_eq!(
            run(&store, &config, &["ECHO"]),
            RespValue::SimpleError("ERR wrong number of arguments for 'echo' command".into())
        );
    }

    #[test]
    fn set_get_del() {
        let (store, config) = (Store::new(), Config::new());
        assert_eq!(
            run(&store, &config, &["SET", "k", "v"]),
            RespValue::SimpleString("OK".into())
        );
        assert_eq!(run(&store, &config, &["GET", "k"]), RespValue::bulk("v"));
        assert_eq!(
            run(&store, &config, &["DEL", "k", "missing"]),
            RespValue::Integer(1)
        );
        assert_eq!(run(&store, &config, &["GET", "k"]), RespValue::NullBulkString);
    }

    #[test]
    fn set_with_expiry() {
        let command = Command::parse(request(&["set", "k", "v", "PX", "100"])).unwrap();
        assert_eq!(
            command,
            Command::Set {
                key: "k".into(),
                value: Bytes::from_static(b"v"),
                expiry: Some(Duration::from_millis(100)),
            }
        );

        let store = Store::new();
        Command::parse(request(&["set", "k", "v", "px", "1"]))
            .unwrap()
            .execute(&store, &Config::new(), &[]);
        assert!(store
            .get_at("k", SystemTime::now() + Duration::from_millis(50))
            .is_none());
    }

    #[test]
    fn set_option_errors() {
        let parse = |parts: &[&str]| Command::parse(request(parts)).unwrap_err();
        assert_eq!(parse(&["SET", "k"]), CommandError::WrongArity("set"));
        assert_eq!(parse(&["SET", "k", "v", "XX"]), CommandError::Syntax);
        assert_eq!(parse(&["SET", "k", "v", "PX"]), CommandError::Syntax);
        assert_eq!(parse(&["SET", "k", "v", "EX", "soon"]), CommandError::NotAnInteger);
        assert_eq!(
            parse(&["SET", "k", "v", "EX", "0"]),
            CommandError::InvalidExpireTime("set")
        );
        assert_eq!(
            parse(&["SET", "k", "v", "EX", "18446744073709551615"]),
            CommandError::InvalidExpireTime("set")
        );
        assert_eq!(
            parse(&["SET", "k", "v", "EX", "1", "PX", "1"]),
            CommandError::Syntax
        );
    }

    #[test]
    fn unknown_and_malformed_requests() {
        assert_eq!(
            Command::parse(request(&["FLUSHALL"])).unwrap_err(),
            CommandError::UnknownCommand("FLUSHALL".into())
        );
        assert_eq!(
            Command::parse(RespValue::SimpleString("PING".into())).unwrap_err(),
            CommandError::Protocol
        );
        assert_eq!(
            Command::parse(RespValue::Array(vec![RespValue::Integer(1)])).unwrap_err(),
            CommandError::Protocol
        );
    }

    #[test]
    fn keys_pattern() {
        let (store, config) = (Store::new(), Config::new());
        store.set("foo", "1", None);
        store.set("bar", "2", None);
        let RespValue::Array(mut keys) = run(&store, &config, &["KEYS", "*"]) else {
            panic!("expected an array");
        };
        keys.sort_by_key(|k| format!("{:?}", k));
        assert_eq!(keys, vec![RespValue::bulk("bar"), RespValue::bulk("foo")]);

        assert_eq!(
            run(&store, &config, &["KEYS", "f?o"]),
            RespValue::Array(vec![RespValue::bulk("foo")])
        );
    }

    #[test]
    fn info_replication() {
        let (store, config) = (Store::new(), Config::new());
        assert_eq!(
            run(&store, &config, &["INFO", "replication"]),
            RespValue::bulk("# Replication\r\nrole:master")
        );
        assert_eq!(run(&store, &config, &["INFO", "memory"]), RespValue::bulk(""));
    }

    #[test]
    fn glob() {
        assert!(glob_match(b"*", b""));
        assert!(glob_match(b"*", b"anything"));
        assert!(glob_match(b"h?llo", b"hello"));
        assert!(glob_match(b"h*llo", b"heeeello"));
        assert!(glob_match(b"*b*c", b"abxbc"));
        assert!(!glob_match(b"h?llo", b"hllo"));
        assert!(!glob_match(b"abc", b"abcd"));
    }
}
