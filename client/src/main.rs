use clap::Parser;
use client::config::{ClaimPolicy, GameConfig};
use client::coordinator::GameEvent;
use client::network::{self, UdpTransport};
use client::session::Session;
use log::{error, info, warn};
use shared::{Quat, Vec3, DEFAULT_PORT};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::interval;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Relay address to connect to
    #[arg(short = 's', long, default_value_t = format!("127.0.0.1:{}", DEFAULT_PORT))]
    server: String,

    /// Session ticks per second
    #[arg(short = 't', long, default_value = "30")]
    tick_rate: u32,

    /// Countdown before the first round, in seconds
    #[arg(long, default_value = "3")]
    countdown: f32,

    /// Prelude length, in seconds
    #[arg(long, default_value = "5")]
    prelude: f32,

    /// Postlude length, in seconds
    #[arg(long, default_value = "5")]
    postlude: f32,

    /// Pause between rounds, in seconds
    #[arg(long, default_value = "3")]
    interval: f32,

    /// Side of the square the target is placed in
    #[arg(long, default_value = "2.0")]
    target_radius: f32,

    /// Resolve concurrent master claims in favour of the lowest peer id
    #[arg(long)]
    lowest_id_wins: bool,
}

impl Args {
    fn game_config(&self) -> Result<GameConfig, Box<dyn std::error::Error>> {
        Ok(GameConfig {
            countdown: Duration::try_from_secs_f32(self.countdown)?,
            prelude: Duration::try_from_secs_f32(self.prelude)?,
            postlude: Duration::try_from_secs_f32(self.postlude)?,
            round_interval: Duration::try_from_secs_f32(self.interval)?,
            target_spawn_radius: self.target_radius,
            claim_policy: if self.lowest_id_wins {
                ClaimPolicy::LowestPeerId
            } else {
                ClaimPolicy::FirstClaim
            },
        })
    }
}

/// Applies one console command. Returns false when the user asked to quit.
fn handle_command(session: &mut Session<UdpTransport>, line: &str) -> bool {
    let mut words = line.split_whitespace();

    match words.next() {
        Some("claim") => {
            if !session.claim_master() {
                warn!("Master already claimed by {}", session.coordinator().master_id());
            }
        }
        Some("start") => {
            session.play_game(Instant::now());
        }
        Some("reach") => match words.next().map(str::parse::<i64>) {
            Some(Ok(peer_id)) => {
                session.target_reached(peer_id);
            }
            Some(Err(e)) => warn!("Invalid peer id: {}", e),
            None => {
                session.reach_target();
            }
        },
        Some("gallery") => session.show_gallery(),
        Some("lobby") => session.show_lobby(),
        Some("status") => {
            let coordinator = session.coordinator();
            info!(
                "Peer {} | master {} | {:?} | round {}/{} | alive {:?}",
                session.local_peer_id(),
                coordinator.master_id(),
                coordinator.phase(),
                coordinator.rounds_completed(),
                coordinator.rounds_total(),
                coordinator.alive()
            );
        }
        Some("quit") => return false,
        Some(other) => {
            warn!("Unknown command '{}'", other);
            info!("Commands: claim, start, reach [peer], gallery, lobby, status, quit");
        }
        None => {}
    }

    true
}

fn report(event: &GameEvent, local_peer_id: i64) {
    match event {
        GameEvent::PlayerSafe { peer_id } if *peer_id == local_peer_id => info!("You're safe!"),
        GameEvent::PlayerEliminated { peer_id } if *peer_id == local_peer_id => info!("Dead"),
        GameEvent::PlayerSurvived { peer_id } if *peer_id == local_peer_id => info!("Survived"),
        other => info!("{:?}", other),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let config = args.game_config()?;

    info!("Starting participant...");
    info!("Connecting to: {}", args.server);
    info!("Commands: claim, start, reach [peer], gallery, lobby, status, quit");

    let (transport, link) = network::connect(&args.server).await?;
    let link_handle = tokio::spawn(async move {
        if let Err(e) = link.run().await {
            error!("Relay link failed: {}", e);
        }
    });

    let mut session = Session::new(transport, config);
    let mut tick_interval = interval(Duration::from_secs(1) / args.tick_rate.clamp(1, 1000));
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let started = Instant::now();

    loop {
        tokio::select! {
            _ = tick_interval.tick() => {
                let now = Instant::now();
                session.poll(now);

                // Headless stand-in for a tracked head: a slow circle
                let t = started.elapsed().as_secs_f32();
                session.update_local_pose(
                    Vec3::new(t.cos(), 1.6, t.sin()),
                    Quat::from_yaw_degrees(t.to_degrees()),
                );

                session.tick(now);

                let local = session.local_peer_id();
                for event in session.drain_events() {
                    report(&event, local);
                }
            },

            line = stdin.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        if !handle_command(&mut session, &line) {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        error!("Error reading command: {}", e);
                        break;
                    }
                }
            },
        }
    }

    info!("Leaving session");
    drop(session);
    if let Err(e) = link_handle.await {
        error!("Relay link task panicked: {}", e);
    }

    Ok(())
}
