use anyhow::Result;
use ring_dht::coordinator::CoordinatorService;
use std::net::SocketAddr;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args: Vec<String> = std::env::args().collect();

    let mut bind_addr: Option<SocketAddr> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--bind" => {
                bind_addr = Some(args[i + 1].parse()?);
                i += 2;
            }
            _ => {
                i += 1;
            }
        }
    }

    let Some(bind_addr) = bind_addr else {
        eprintln!("Usage: {} --bind <addr:port>", args[0]);
        eprintln!("Example: {} --bind 127.0.0.1:5000", args[0]);
        std::process::exit(1);
    };

    let service = CoordinatorService::bind(bind_addr).await?;
    tracing::info!("coordinator listening on {}", service.local_addr()?);

    service.run().await
}
