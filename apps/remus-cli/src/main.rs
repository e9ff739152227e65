use anyhow::{anyhow, Context, Result};
use clap::Parser;
use futures_channel::mpsc;
use futures_util::StreamExt;
use remus_core::{LegDevice, LegSpec, MirrorEvent, MirrorOptions, MirrorSet, StatusKind};
use remus_devices::{FileLeg, SectorCopier};
use remus_region_log::MemoryRegionLog;
use std::{path::PathBuf, sync::Arc, time::Duration};
use tokio::signal;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "remus-cli")]
#[command(about = "Userspace mirrored block target over file-backed legs", long_about = None)]
struct Args {
    /// Mirror leg as PATH or PATH:OFFSET (offset in sectors). Give at
    /// least two.
    #[arg(long = "leg", value_name = "PATH[:OFFSET]", required = true, num_args = 1)]
    legs: Vec<String>,
    /// Region size in sectors; must be a power of two
    #[arg(long, default_value_t = 1024)]
    region_size: u64,
    /// Target length in sectors; defaults to the largest length every leg
    /// can address
    #[arg(long)]
    target_len: Option<u64>,
    /// Surface I/O errors to callers and re-elect the primary on failure
    #[arg(long, default_value_t = false)]
    handle_errors: bool,
    /// Treat the legs as already synchronized and skip the initial resync
    #[arg(long, default_value_t = false)]
    assume_sync: bool,
    /// Issue verification reads against the first and last sector once the
    /// mirror is in sync
    #[arg(long, default_value_t = false)]
    verify: bool,
    /// Seconds between status reports
    #[arg(long, default_value_t = 10)]
    status_interval: u64,
}

/// Split a leg argument into its path and sector offset. The offset is
/// the suffix after the last `:` when that suffix is numeric, so paths
/// containing colons still parse.
fn parse_leg(arg: &str) -> (PathBuf, u64) {
    if let Some((path, offset)) = arg.rsplit_once(':') {
        if let Ok(offset) = offset.parse::<u64>() {
            return (PathBuf::from(path), offset);
        }
    }
    (PathBuf::from(arg), 0)
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    if args.legs.len() < 2 {
        return Err(anyhow!("a mirror needs at least two --leg arguments"));
    }

    let mut specs = Vec::with_capacity(args.legs.len());
    for arg in &args.legs {
        let (path, offset) = parse_leg(arg);
        let leg = FileLeg::open(&path)
            .await
            .with_context(|| format!("open leg {}", path.display()))?;
        info!(path = %path.display(), offset, sectors = leg.total_sectors(), "opened leg");
        specs.push(LegSpec {
            device: Arc::new(leg) as Arc<dyn LegDevice>,
            offset,
        });
    }

    let target_len = match args.target_len {
        Some(len) => len,
        None => specs
            .iter()
            .map(|spec| spec.device.total_sectors().saturating_sub(spec.offset))
            .min()
            .unwrap_or(0),
    };

    let tracker = Arc::new(
        MemoryRegionLog::for_target(args.region_size, target_len, args.assume_sync)
            .context("create region log")?,
    );
    let (events_tx, mut events_rx) = mpsc::unbounded();
    let mirror = MirrorSet::create(
        specs,
        target_len,
        tracker,
        Arc::new(SectorCopier::new()),
        MirrorOptions {
            handle_errors: args.handle_errors,
            events: Some(events_tx),
        },
    )
    .context("create mirror set")?;

    let worker = tokio::spawn(mirror.worker().run());
    mirror.wake();
    info!(
        target_len,
        region_size = args.region_size,
        handle_errors = args.handle_errors,
        "mirror running"
    );

    let event_mirror = Arc::clone(&mirror);
    tokio::spawn(async move {
        while let Some(event) = events_rx.next().await {
            match event {
                MirrorEvent::FullySynced => info!("mirror fully synchronized"),
                MirrorEvent::LegDegraded { leg, fault } => warn!(
                    leg,
                    device = event_mirror.leg(leg).name(),
                    ?fault,
                    "leg degraded"
                ),
                MirrorEvent::PrimaryChanged { from, to } => {
                    warn!(from, to, "primary re-elected")
                }
                MirrorEvent::AllLegsFailed => warn!("all mirror legs have failed"),
                MirrorEvent::LogFailed => warn!("region log failed; writes will block"),
            }
        }
    });

    if args.verify {
        let mirror = Arc::clone(&mirror);
        let last = target_len.saturating_sub(1);
        tokio::spawn(async move {
            while !mirror.in_sync() {
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
            for sector in [0, last] {
                match mirror.read(sector, 1).await {
                    Ok(outcome) if outcome.is_done() => {
                        info!(sector, "verification read ok")
                    }
                    _ => warn!(sector, "verification read failed"),
                }
            }
        });
    }

    let mut status = tokio::time::interval(Duration::from_secs(args.status_interval.max(1)));
    status.tick().await;
    loop {
        tokio::select! {
            _ = status.tick() => {
                info!(status = %mirror.status(StatusKind::Info), "mirror status");
            }
            _ = signal::ctrl_c() => {
                info!("shutdown requested");
                break;
            }
        }
    }

    mirror.suspend(false).await;
    info!(status = %mirror.status(StatusKind::Info), "final status");
    mirror.shutdown();
    let _ = worker.await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leg_arguments_parse_paths_and_offsets() {
        assert_eq!(parse_leg("/dev/loop0"), (PathBuf::from("/dev/loop0"), 0));
        assert_eq!(parse_leg("/tmp/a.img:2048"), (PathBuf::from("/tmp/a.img"), 2048));
        // a non-numeric suffix is part of the path
        assert_eq!(parse_leg("/tmp/odd:name"), (PathBuf::from("/tmp/odd:name"), 0));
    }
}
