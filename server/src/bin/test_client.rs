//! Manual test client: connects with a token, walks one tile east, and
//! prints the packets it sees along the way.

use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use shared::{
    MoveIntent, Packet, StateDelta, StateSnapshot, Welcome, PACKET_MOVE_INTENT,
    PACKET_STATE_DELTA, PACKET_STATE_SNAPSHOT, PACKET_WELCOME, TILE_WORLD,
};

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server address
    #[clap(short, long, default_value = "127.0.0.1:8080")]
    addr: String,

    /// Session token to authenticate with
    #[clap(short, long)]
    token: String,

    /// Maximum number of packets to read before giving up
    #[clap(long, default_value = "200")]
    max_packets: usize,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let url = format!("ws://{}/ws?token={}", args.addr, args.token);

    println!("Connecting to {}", args.addr);
    let (ws, _) = connect_async(url).await?;
    let (mut sink, mut stream) = ws.split();

    let mut my_id = None;
    let mut goal: Option<(i64, i64)> = None;

    for _ in 0..args.max_packets {
        let Some(message) = stream.next().await else {
            println!("Server closed the connection");
            break;
        };

        let text = match message? {
            Message::Text(text) => text,
            Message::Close(_) => {
                println!("Server closed the connection");
                break;
            }
            _ => continue,
        };

        let packet: Packet = serde_json::from_str(&text)?;
        match packet.packet_type.as_str() {
            PACKET_WELCOME => {
                let welcome: Welcome = packet.decode_payload()?;
                println!("Welcome, {}", welcome.id);
                my_id = Some(welcome.id);
            }
            PACKET_STATE_SNAPSHOT => {
                let snapshot: StateSnapshot = packet.decode_payload()?;
                println!(
                    "Snapshot at tick {}: {} players",
                    snapshot.tick,
                    snapshot.players.len()
                );

                // Ask to walk one tile east of wherever we spawned.
                let me = my_id.as_deref().and_then(|id| {
                    snapshot.players.iter().find(|player| player.id == id)
                });
                if let (Some(me), None) = (me, goal) {
                    let target = (me.x + TILE_WORLD, me.y);
                    println!("At ({}, {}), walking to ({}, {})", me.x, me.y, target.0, target.1);

                    let intent = Packet::new(
                        PACKET_MOVE_INTENT,
                        &MoveIntent {
                            x: target.0,
                            y: target.1,
                        },
                    )?;
                    sink.send(Message::Text(serde_json::to_string(&intent)?))
                        .await?;
                    goal = Some(target);
                }
            }
            PACKET_STATE_DELTA => {
                let delta: StateDelta = packet.decode_payload()?;
                for player in &delta.players {
                    println!(
                        "Tick {}: {} at ({}, {})",
                        delta.tick, player.id, player.x, player.y
                    );
                }
                for id in &delta.removed {
                    println!("Tick {}: {} left", delta.tick, id);
                }

                let arrived = match (&my_id, goal) {
                    (Some(id), Some(target)) => delta
                        .players
                        .iter()
                        .any(|player| &player.id == id && (player.x, player.y) == target),
                    _ => false,
                };
                if arrived {
                    println!("Arrived, closing");
                    break;
                }
            }
            other => {
                println!("Ignoring unknown packet type {:?}", other);
            }
        }
    }

    sink.close().await?;
    Ok(())
}
