//! Tandem sync server.
//!
//! Runs the authoritative WebSocket server that sequences shape edits for
//! every connected client.
//!
//! ```text
//! tandem-server --bind 0.0.0.0:9090 --journal-cap 500 --log-level debug
//! ```

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tandem_collab::server::{ServerConfig, SyncServer};

#[derive(Debug, Parser)]
#[command(name = "tandem-server", about = "Authoritative sync server for Tandem")]
struct Cli {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:9090")]
    bind: String,

    /// Milliseconds between periodic checkpoints
    #[arg(long, default_value_t = 30_000)]
    checkpoint_interval_ms: u64,

    /// Journal length that forces a checkpoint
    #[arg(long, default_value_t = 500)]
    journal_cap: usize,

    /// Shape ids reserved per client
    #[arg(long, default_value_t = 1_000_000)]
    id_block_size: u64,

    /// Outgoing messages buffered per client before it is dropped
    #[arg(long, default_value_t = 1024)]
    queue_capacity: usize,

    /// Seconds between stats log lines (0 disables)
    #[arg(long, default_value_t = 60)]
    stats_interval_secs: u64,

    /// Log level (trace, debug, info, warn, error); RUST_LOG wins if set
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Cli {
    fn server_config(&self) -> ServerConfig {
        ServerConfig {
            bind_addr: self.bind.clone(),
            checkpoint_interval: Duration::from_millis(self.checkpoint_interval_ms.max(1)),
            max_journal_len: self.journal_cap.max(1),
            id_block_size: self.id_block_size.max(1),
            client_queue_capacity: self.queue_capacity.max(1),
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&cli.log_level))
        .init();

    let config = cli.server_config();
    log::info!(
        "Starting tandem-server on {} (journal cap {}, checkpoint every {:?})",
        config.bind_addr,
        config.max_journal_len,
        config.checkpoint_interval
    );
    let server = Arc::new(SyncServer::new(config));

    if cli.stats_interval_secs > 0 {
        let server = server.clone();
        let period = Duration::from_secs(cli.stats_interval_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let stats = server.stats().await;
                log::info!(
                    "{} online, seq {}, journal {}, {} accepted / {} rejected, {} checkpoints, {} evictions",
                    stats.active_connections,
                    stats.head_seq,
                    stats.journal_len,
                    stats.accepted_ops,
                    stats.rejected_ops,
                    stats.checkpoints,
                    stats.evictions
                );
            }
        });
    }

    if let Err(e) = server.run().await {
        log::error!("Server stopped: {e}");
        std::process::exit(1);
    }
}
