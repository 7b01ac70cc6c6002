use clap::Parser;
use log::{error, info};
use server::collab::{InMemoryUserDirectory, LoggingResultStore, ResultStore, UserDirectory};
use server::gateway::Gateway;
use server::registry::SessionRegistry;
use server::scheduler::{Scheduler, SchedulerConfig};
use std::sync::Arc;
use std::time::Duration;

/// Parses command-line arguments, wires the registry, scheduler, and
/// gateway together, and runs until interrupted.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    #[derive(Parser, Debug)]
    #[clap(author, version, about)]
    struct Args {
        /// Server IP address to bind to
        #[clap(short = 'H', long, default_value = "127.0.0.1")]
        host: String,
        /// Server port to listen on
        #[clap(short, long, default_value = "8080")]
        port: u16,
        /// Game tick rate (simulation updates per second)
        #[clap(short, long, default_value = "60")]
        tick_rate: u32,
        /// Seconds between matchmaking passes over the wait queue
        #[clap(short, long, default_value = "3")]
        matchmaking_interval: u64,
        /// Maximum number of players in the matchmaking queue
        #[clap(short, long, default_value = "64")]
        queue_capacity: usize,
        /// Maximum number of concurrent connections
        #[clap(short = 'c', long, default_value = "256")]
        max_connections: usize,
    }

    env_logger::init();
    let args = Args::parse();

    let registry = Arc::new(SessionRegistry::new(args.queue_capacity));
    let directory: Arc<dyn UserDirectory> = Arc::new(InMemoryUserDirectory::new());
    let results: Arc<dyn ResultStore> = Arc::new(LoggingResultStore);

    let address = format!("{}:{}", args.host, args.port);
    let mut gateway = Gateway::new(
        &address,
        Arc::clone(&registry),
        directory,
        Arc::clone(&results),
        args.max_connections,
    )
    .await?;

    let scheduler = Scheduler::spawn(
        registry,
        results,
        gateway.outbound_sender(),
        SchedulerConfig {
            game_tick: Duration::from_secs_f64(1.0 / args.tick_rate.max(1) as f64),
            matchmaking_tick: Duration::from_secs(args.matchmaking_interval.max(1)),
        },
    );

    tokio::select! {
        result = gateway.run() => {
            if let Err(e) = result {
                error!("gateway failed: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received ctrl-c, shutting down gracefully");
        }
    }

    scheduler.shutdown().await;
    Ok(())
}
