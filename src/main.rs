use peermap::core::context::CoreBuilder;
use peermap::core::peer::PeerAddr;
use peermap::net_table::table::ChunkBackend;
use peermap::table::descriptor::TableDescriptor;

use std::net::SocketAddr;
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 3 {
        eprintln!("Usage: {} --bind <addr:port> [options]", args[0]);
        eprintln!("Options:");
        eprintln!("  --peer <addr:port>           known peer; repeatable, first one seeds the ring");
        eprintln!("  --table <name>               table to serve (default: map)");
        eprintln!("  --fields <n>                 row arity of the table (default: 1)");
        eprintln!("  --raft                       use the raft chunk backend");
        eprintln!("  --stabilize-interval-ms <n>  ring stabilization interval (default: 50)");
        eprintln!("Example: {} --bind 127.0.0.1:5000", args[0]);
        eprintln!(
            "Example: {} --bind 127.0.0.1:5001 --peer 127.0.0.1:5000 --raft",
            args[0]
        );
        std::process::exit(1);
    }

    let mut bind_addr: Option<SocketAddr> = None;
    let mut peers: Vec<PeerAddr> = vec![];
    let mut table_name = "map".to_string();
    let mut field_count = 1usize;
    let mut backend = ChunkBackend::Broadcast;
    let mut stabilize_interval = Duration::from_millis(50);

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--bind" => {
                bind_addr = Some(args[i + 1].parse()?);
                i += 2;
            }
            "--peer" => {
                peers.push(PeerAddr::new(args[i + 1].clone()));
                i += 2;
            }
            "--table" => {
                table_name = args[i + 1].clone();
                i += 2;
            }
            "--fields" => {
                field_count = args[i + 1].parse()?;
                i += 2;
            }
            "--raft" => {
                backend = ChunkBackend::Raft;
                i += 1;
            }
            "--stabilize-interval-ms" => {
                stabilize_interval = Duration::from_millis(args[i + 1].parse()?);
                i += 2;
            }
            _ => {
                i += 1;
            }
        }
    }

    let bind_addr = bind_addr.expect("--bind is required");

    tracing::info!("Starting node on {}", bind_addr);
    if peers.is_empty() {
        tracing::info!("Starting as founding node");
    } else {
        tracing::info!("Known peers: {:?}", peers);
    }

    let core = CoreBuilder::new(PeerAddr::from(bind_addr))
        .stabilize_interval(stabilize_interval)
        .build();

    core.join_directory(peers.first().cloned());

    let table = core.create_table(TableDescriptor::new(&table_name, field_count), backend);
    tracing::info!(
        "Serving table {} with {} backend",
        table.name(),
        match backend {
            ChunkBackend::Broadcast => "broadcast",
            ChunkBackend::Raft => "raft",
        }
    );

    let app = core.router();

    tracing::info!("RPC endpoint listening on {}", bind_addr);
    tracing::info!("Press Ctrl+C to shutdown");

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;

    tokio::select! {
        result = axum::serve(listener, app) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down");
            core.shutdown();
        }
    }

    Ok(())
}
