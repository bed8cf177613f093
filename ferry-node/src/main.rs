// ferry: rendezvous tracker, seeder, and leecher roles in one binary.

mod config;
mod direct;
mod leecher;
mod net;
mod seeder;
mod tracker;

use tracing::info;
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const USAGE: &str = "usage: ferry tracker | ferry seed | ferry fetch <file_id>";

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.iter().any(|a| a == "--version" || a == "-V") {
        println!("ferry {}", VERSION);
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cfg = config::load();
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let role = async {
            match args.first().map(String::as_str) {
                Some("tracker") => tracker::run_tracker(&cfg).await,
                Some("seed") => seeder::run_seeder(&cfg).await,
                Some("fetch") => match args.get(1) {
                    Some(file_id) => leecher::run_leecher(&cfg, file_id.clone()).await,
                    None => anyhow::bail!("fetch needs a file id\n{USAGE}"),
                },
                _ => anyhow::bail!("{USAGE}"),
            }
        };
        tokio::select! {
            result = role => result,
            _ = shutdown_signal() => {
                info!("shutting down");
                Ok(())
            }
        }
    })
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
