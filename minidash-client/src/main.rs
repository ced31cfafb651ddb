#![forbid(unsafe_code)]

use std::time::Duration;

use argh::FromArgs;
use log::LevelFilter;
use minidash_client::{
    HttpSource, Poller, PollerConfig, ScheduleMode,
    poller::{DEFAULT_ENDPOINT, DEFAULT_HISTORY_CAPACITY},
};
use simple_logger::SimpleLogger;
use time::UtcOffset;
use tokio::sync::mpsc;

mod render;

#[derive(FromArgs, Debug)]
#[argh(description = "A terminal viewer for a minidash metrics endpoint.")]
struct ViewerConfig {
    #[argh(
        option,
        short = 'e',
        default = "DEFAULT_ENDPOINT.to_string()",
        description = "base URL of the metrics endpoint"
    )]
    pub endpoint: String,
    #[argh(option, default = "5", description = "seconds between two polls")]
    pub interval: u64,
    #[argh(
        option,
        default = "10",
        description = "seconds before a poll is given up"
    )]
    pub timeout: u64,
    #[argh(
        option,
        default = "DEFAULT_HISTORY_CAPACITY",
        description = "number of samples kept for the trend line"
    )]
    pub history: usize,
    #[argh(
        switch,
        description = "wait for a poll to settle before scheduling the next one"
    )]
    pub single_flight: bool,
    #[argh(
        switch,
        description = "keep the history when switching to another endpoint"
    )]
    pub keep_history: bool,
    #[argh(
        switch,
        short = '6',
        description = "prefer IPv6 when resolving the endpoint"
    )]
    pub prefer_ipv6: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // only readable while the process is single-threaded
    let utc_offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);

    SimpleLogger::new()
        .with_level(LevelFilter::Info)
        .env()
        .init()?;

    let cfg: ViewerConfig = argh::from_env();
    log::debug!("Viewer config: {cfg:#?}");
    anyhow::ensure!(cfg.interval > 0, "interval must be at least one second");
    anyhow::ensure!(cfg.timeout > 0, "timeout must be at least one second");

    let source = HttpSource::new(Duration::from_secs(cfg.timeout), cfg.prefer_ipv6);
    let mut poller = Poller::new(
        source,
        PollerConfig {
            endpoint: cfg.endpoint,
            interval: Duration::from_secs(cfg.interval),
            history_capacity: cfg.history,
            schedule: if cfg.single_flight {
                ScheduleMode::SingleFlight
            } else {
                ScheduleMode::FixedInterval
            },
            clear_history_on_reconfigure: !cfg.keep_history,
            utc_offset,
        },
    );
    let mut dashboard = poller.dashboard();
    let mut endpoints = spawn_endpoint_reader();

    poller.start();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = dashboard.changed() => {
                if !changed {
                    break;
                }
                println!("{}", render::render(&dashboard.view().await));
            }
            Some(endpoint) = endpoints.recv() => poller.configure(endpoint).await,
        }
    }

    log::info!("shutting down");
    poller.shutdown().await;
    Ok(())
}

/// Every non-empty line typed on stdin replaces the endpoint.
///
/// Blocking stdin reads cannot be cancelled, so they live on a detached thread.
fn spawn_endpoint_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lines() {
            match line {
                Ok(line) if line.trim().is_empty() => {}
                Ok(line) => {
                    if tx.send(line.trim().to_owned()).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    log::warn!("unable to read stdin: {e}");
                    break;
                }
            }
        }
    });
    rx
}
