//! # sluice
//!
//! User-space priority traffic shaper. Packets diverted into an IPv4
//! NFQUEUE are scored by a chain of pluggable modules, buffered by
//! priority, and released at the configured byte rate.
//!
//! ## Usage
//!
//! ```bash
//! sluice /etc/sluice.conf
//! ```
//!
//! Exit status is 0 after a clean SIGTERM/SIGINT shutdown, non-zero on
//! startup failure. Packets still buffered at shutdown receive no
//! verdict; the kernel queue drains them.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Context;
use clap::Parser;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use sluice_engine::score::ScoreChain;
use sluice_stats::recorder::Recorder;

use sluice_daemon::config::Config;
use sluice_daemon::state::State;
use sluice_daemon::verdict::VerdictSink;
use sluice_daemon::{ingress, nfq, release, ticker};

/// User-space priority traffic shaper.
#[derive(Parser, Debug)]
#[command(name = "sluice", about = "User-space priority traffic shaper")]
struct Cli {
    /// Path to the configuration file.
    config: PathBuf,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config).context("reading configuration")?;

    if config.limit == 0 {
        warn!("limit is 0 — all traffic will be blocked");
    }

    // ── Scoring chain ───────────────────────────────────────────
    let mut chain = ScoreChain::standard();
    for d in &config.module_directives {
        if !chain.configure(&d.module, &d.p1, &d.p2) {
            debug!(directive = d.module, "ignoring unclaimed config directive");
        }
    }
    chain.finalize();

    // ── Statistics ──────────────────────────────────────────────
    let recorder = if config.stat {
        if config.statdir.as_os_str().is_empty() {
            warn!("'statdir' is not set, statistics disabled");
            Recorder::disabled()
        } else {
            let names = chain.names().iter().map(|n| n.to_string()).collect();
            Recorder::new(
                config.statdir.clone(),
                config.keep_stat,
                names,
                config.wchart,
            )
        }
    } else {
        Recorder::disabled()
    };

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("system clock before epoch")?
        .as_secs() as i64;
    let shared = State::new(config.limit, config.packets, chain.len(), now, recorder).shared();

    // ── Packet source ───────────────────────────────────────────
    let (mut reader, verdicts) =
        nfq::bind(config.queue, config.nfqlen).context("binding nfqueue")?;
    let verdicts: Arc<dyn VerdictSink> = Arc::new(verdicts);

    // ── Shutdown flag ───────────────────────────────────────────
    let done = Arc::new(AtomicBool::new(false));
    {
        let done = done.clone();
        ctrlc::set_handler(move || {
            done.store(true, Ordering::Relaxed);
        })
        .context("installing signal handler")?;
    }

    // ── Workers ─────────────────────────────────────────────────
    let release_handle = {
        let shared = shared.clone();
        let verdicts = verdicts.clone();
        let done = done.clone();
        thread::Builder::new()
            .name("release".into())
            .spawn(move || release::run(shared, verdicts, done))
            .context("spawning release thread")?
    };
    let ticker_handle = {
        let shared = shared.clone();
        let done = done.clone();
        thread::Builder::new()
            .name("ticker".into())
            .spawn(move || ticker::run(shared, done))
            .context("spawning ticker thread")?
    };

    info!(
        queue = config.queue,
        limit = config.limit,
        packets = config.packets,
        nfqlen = config.nfqlen,
        stat = config.stat,
        "sluice started"
    );

    // ── Ingress loop ────────────────────────────────────────────
    while !done.load(Ordering::Relaxed) {
        match reader.recv() {
            Ok(Some(pkt)) => ingress::handle_packet(&shared, &mut chain, verdicts.as_ref(), pkt),
            Ok(None) => {}
            Err(e) => {
                error!(
                    error = %e,
                    nfqlen = config.nfqlen,
                    "queue receive failed — queue full? consider raising 'nfqlen'"
                );
            }
        }
    }

    if ticker_handle.join().is_err() {
        error!("ticker thread panicked");
    }
    if release_handle.join().is_err() {
        error!("release thread panicked");
    }
    sluice_daemon::state::lock(&shared).recorder.close();

    info!("sluice stopped");
    Ok(())
}
