//! Coordinator command grammar.
//!
//! Commands are space-separated tokens sent as plain UTF-8 text datagrams,
//! e.g. `register alice 127.0.0.1 4310 4311` or `setup-dht 3 alice`.

use std::net::IpAddr;
use thiserror::Error;

/// A parsed coordinator command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Register {
        username: String,
        ip: IpAddr,
        accept_port: u16,
        query_port: u16,
    },
    Deregister {
        username: String,
    },
    SetupDht {
        n: usize,
        leader: String,
    },
    DhtComplete {
        username: String,
    },
    QueryDht {
        username: String,
    },
    JoinDht {
        username: String,
    },
    LeaveDht {
        username: String,
    },
    DhtRebuilt {
        username: String,
        new_leader: Option<String>,
    },
    TeardownDht {
        username: String,
    },
    TeardownComplete {
        username: String,
    },
    DisplayUsers,
    DisplayDht,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("empty command")]
    Empty,
    #[error("unknown command `{0}`")]
    Unknown(String),
    #[error("`{command}` expects {expected}")]
    Arity {
        command: &'static str,
        expected: &'static str,
    },
    #[error("`{value}` is not a valid {what}")]
    BadValue { what: &'static str, value: String },
}

impl Command {
    pub fn parse(line: &str) -> Result<Command, CommandError> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let Some((&command, args)) = tokens.split_first() else {
            return Err(CommandError::Empty);
        };

        match command {
            "register" => {
                let [username, ip, accept_port, query_port] =
                    expect("register", args, "<user> <ip> <acceptPort> <queryPort>")?;
                Ok(Command::Register {
                    username: username.to_string(),
                    ip: parse_value(ip, "IP address")?,
                    accept_port: parse_value(accept_port, "port")?,
                    query_port: parse_value(query_port, "port")?,
                })
            }
            "deregister" => {
                let [username] = expect("deregister", args, "<user>")?;
                Ok(Command::Deregister {
                    username: username.to_string(),
                })
            }
            "setup-dht" => {
                let [n, leader] = expect("setup-dht", args, "<n> <leaderUser>")?;
                Ok(Command::SetupDht {
                    n: parse_value(n, "ring size")?,
                    leader: leader.to_string(),
                })
            }
            "dht-complete" => {
                let [username] = expect("dht-complete", args, "<user>")?;
                Ok(Command::DhtComplete {
                    username: username.to_string(),
                })
            }
            "query-dht" => {
                let [username] = expect("query-dht", args, "<user>")?;
                Ok(Command::QueryDht {
                    username: username.to_string(),
                })
            }
            "join-dht" => {
                let [username] = expect("join-dht", args, "<user>")?;
                Ok(Command::JoinDht {
                    username: username.to_string(),
                })
            }
            "leave-dht" => {
                let [username] = expect("leave-dht", args, "<user>")?;
                Ok(Command::LeaveDht {
                    username: username.to_string(),
                })
            }
            "dht-rebuilt" => match args {
                [username] => Ok(Command::DhtRebuilt {
                    username: username.to_string(),
                    new_leader: None,
                }),
                [username, new_leader] => Ok(Command::DhtRebuilt {
                    username: username.to_string(),
                    new_leader: Some(new_leader.to_string()),
                }),
                _ => Err(CommandError::Arity {
                    command: "dht-rebuilt",
                    expected: "<user> [<newLeader>]",
                }),
            },
            "teardown-dht" => {
                let [username] = expect("teardown-dht", args, "<user>")?;
                Ok(Command::TeardownDht {
                    username: username.to_string(),
                })
            }
            "teardown-complete" => {
                let [username] = expect("teardown-complete", args, "<user>")?;
                Ok(Command::TeardownComplete {
                    username: username.to_string(),
                })
            }
            "display-users" => Ok(Command::DisplayUsers),
            "display-dht" => Ok(Command::DisplayDht),
            other => Err(CommandError::Unknown(other.to_string())),
        }
    }
}

fn expect<'a, const N: usize>(
    command: &'static str,
    args: &[&'a str],
    expected: &'static str,
) -> Result<[&'a str; N], CommandError> {
    <[&str; N]>::try_from(args).map_err(|_| CommandError::Arity { command, expected })
}

fn parse_value<T: std::str::FromStr>(token: &str, what: &'static str) -> Result<T, CommandError> {
    token.parse().map_err(|_| CommandError::BadValue {
        what,
        value: token.to_string(),
    })
}
