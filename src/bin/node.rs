use anyhow::Result;
use ring_dht::node::{NodeConfig, NodeService};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};

const HELP: &str = "\
Commands:
  register                 register this user with the coordinator
  setup-dht <n>            build a ring of n members with this user as leader
  query <long name...>     look a record up through the ring
  join-dht                 join the existing ring
  leave-dht                leave the ring
  teardown-dht             delete the ring (leader only)
  deregister               remove this user and exit
  check-node               print this node's topology view
  check-nodes              circulate a topology dump around the ring
  display-users            list registered users on the coordinator
  display-dht              list the current ring on the coordinator
  help                     show this text";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args: Vec<String> = std::env::args().collect();

    let mut username: Option<String> = None;
    let mut coordinator: Option<SocketAddr> = None;
    let mut bind_ip: Option<IpAddr> = None;
    let mut accept_port: u16 = 0;
    let mut query_port: u16 = 0;
    let mut egress_port: u16 = 0;
    let mut dataset: Option<PathBuf> = None;
    let mut key_field = "Long Name".to_string();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--name" => {
                username = Some(args[i + 1].clone());
                i += 2;
            }
            "--coordinator" => {
                coordinator = Some(args[i + 1].parse()?);
                i += 2;
            }
            "--bind" => {
                bind_ip = Some(args[i + 1].parse()?);
                i += 2;
            }
            "--accept-port" => {
                accept_port = args[i + 1].parse()?;
                i += 2;
            }
            "--query-port" => {
                query_port = args[i + 1].parse()?;
                i += 2;
            }
            "--egress-port" => {
                egress_port = args[i + 1].parse()?;
                i += 2;
            }
            "--data" => {
                dataset = Some(PathBuf::from(&args[i + 1]));
                i += 2;
            }
            "--key-field" => {
                key_field = args[i + 1].clone();
                i += 2;
            }
            _ => {
                i += 1;
            }
        }
    }

    let (Some(username), Some(coordinator), Some(bind_ip), Some(dataset)) =
        (username, coordinator, bind_ip, dataset)
    else {
        eprintln!(
            "Usage: {} --name <user> --coordinator <addr:port> --bind <ip> \
             --accept-port <p> --query-port <p> --egress-port <p> --data <csv> [--key-field <column>]",
            args[0]
        );
        eprintln!(
            "Example: {} --name alice --coordinator 127.0.0.1:5000 --bind 127.0.0.1 \
             --accept-port 4310 --query-port 4311 --egress-port 4312 --data StatsCountry.csv",
            args[0]
        );
        std::process::exit(1);
    };

    let config = NodeConfig {
        username: username.clone(),
        coordinator,
        bind_ip,
        accept_port,
        query_port,
        egress_port,
        dataset,
        key_field,
    };

    let service = NodeService::bind(config).await?;
    service.clone().start().await;

    tracing::info!("node `{}` ready; coordinator at {}", username, coordinator);
    tracing::info!("enter a command (`help` lists them)");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let Some(&command) = tokens.first() else {
            continue;
        };

        let result = match command {
            "register" => {
                let accept = service.accept_addr()?;
                let query = service.query_addr()?;
                service
                    .submit(format!(
                        "register {} {} {} {}",
                        username,
                        bind_ip,
                        accept.port(),
                        query.port()
                    ))
                    .await
            }
            "setup-dht" => match tokens.get(1) {
                Some(n) => service.submit(format!("setup-dht {} {}", n, username)).await,
                None => {
                    eprintln!("setup-dht needs a ring size, e.g. `setup-dht 3`");
                    continue;
                }
            },
            "query" => {
                if tokens.len() < 2 {
                    eprintln!("query needs a key, e.g. `query Aruba`");
                    continue;
                }
                service.run_query(tokens[1..].join(" ")).await
            }
            "join-dht" | "leave-dht" | "teardown-dht" | "deregister" => {
                service.submit(format!("{} {}", command, username)).await
            }
            "display-users" | "display-dht" => service.submit(line.clone()).await,
            "check-node" => {
                println!("{}", service.node_info().await);
                continue;
            }
            "check-nodes" => match service.start_check_nodes().await {
                Ok(()) => continue,
                Err(error) => Err(error),
            },
            "help" => {
                println!("{}", HELP);
                continue;
            }
            _ => {
                eprintln!("unknown command `{}`; `help` lists the valid ones", command);
                continue;
            }
        };

        match result {
            Ok(true) => {}
            Ok(false) => break,
            Err(error) => tracing::error!("command failed: {:#}", error),
        }
    }

    Ok(())
}
