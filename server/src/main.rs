use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use log::{info, warn};
use tokio::net::TcpListener;
use tokio::sync::watch;

use server::auth::MemorySessions;
use server::map::{MapData, DEFAULT_MAP_HEIGHT, DEFAULT_MAP_WIDTH};
use server::network::Hub;
use server::tick;
use server::world::World;

// Command line arguments
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server IP address to bind to
    #[clap(short = 'H', long, default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on
    #[clap(short, long, env = "PORT", default_value = "8080")]
    port: u16,

    /// Tick period in milliseconds
    #[clap(short, long, env = "TICK_MS", default_value = "50")]
    tick_ms: u64,

    /// Map file to load; the built-in grid is used when it cannot be read
    #[clap(short, long, env = "MAP_PATH", default_value = "maps/basic.json")]
    map_path: String,

    /// Pre-provisioned sessions as user:token pairs
    #[clap(short, long, env = "SESSIONS", value_delimiter = ',')]
    session: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::init();

    // Print a message about setting RUST_LOG if not set
    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Warning: RUST_LOG environment variable not set. Set it to display logs!");
        eprintln!("Recommended: RUST_LOG=info cargo run");
    }

    let args = Args::parse();
    let addr = format!("{}:{}", args.host, args.port);
    let tick_period = Duration::from_millis(args.tick_ms);

    let map = match MapData::load(&args.map_path) {
        Ok(map) => map,
        Err(err) => {
            warn!(
                "map load failed ({}): {}, using the default grid",
                args.map_path, err
            );
            MapData::default_grid(DEFAULT_MAP_WIDTH, DEFAULT_MAP_HEIGHT)
        }
    };
    info!("map loaded: {}x{}", map.width, map.height);

    let sessions = Arc::new(MemorySessions::new());
    for entry in &args.session {
        match entry.split_once(':') {
            Some((user, token)) if !user.is_empty() && !token.is_empty() => {
                sessions.insert(token, user);
                info!("seeded session for {}", user);
            }
            _ => warn!("ignoring malformed session entry {:?}", entry),
        }
    }

    let world = Arc::new(World::new(map));
    let hub = Arc::new(Hub::new(world.clone(), sessions.clone()));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Tick driver: advance the simulation, broadcast only on changes.
    let loop_world = world.clone();
    let loop_hub = hub.clone();
    let ticker = tokio::spawn(tick::Loop::new(tick_period).run(
        shutdown_rx.clone(),
        move |tick, delta| {
            loop_world.step(delta);
            if loop_world.drain_dirty() {
                loop_hub.broadcast_state(tick);
            }
        },
    ));

    let listener = TcpListener::bind(&addr).await?;
    info!(
        "game server listening on {} (tick {}ms)",
        addr, args.tick_ms
    );

    let acceptor = tokio::spawn(hub.clone().serve(listener, shutdown_rx));

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    let _ = acceptor.await;
    let _ = ticker.await;
    hub.shutdown().await;
    info!("server stopped");

    Ok(())
}
