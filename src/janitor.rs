use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};

use chrono::{DateTime, Utc};
use tokio::{
    task::JoinHandle,
    time::{Instant, MissedTickBehavior, interval_at},
};
use tracing::{debug, info, warn};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub removed: usize,
    pub kept: usize,
    pub failed: usize,
}

pub fn spawn_janitor(download_dir: PathBuf, ttl: Duration, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            "Cache janitor started for {:?} (ttl {}s, every {}s)",
            download_dir,
            ttl.as_secs(),
            every.as_secs()
        );

        let report = sweep_expired(&download_dir, ttl, SystemTime::now()).await;
        log_report(&report);

        let mut ticker = interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let report = sweep_expired(&download_dir, ttl, SystemTime::now()).await;
            log_report(&report);
        }
    })
}

fn log_report(report: &SweepReport) {
    if report.removed > 0 || report.failed > 0 {
        info!(
            "Cache sweep removed {} entr(ies), kept {}, failed {}",
            report.removed, report.kept, report.failed
        );
    } else {
        debug!("Cache sweep found nothing to evict ({} kept)", report.kept);
    }
}

pub async fn sweep_expired(download_dir: &Path, ttl: Duration, now: SystemTime) -> SweepReport {
    let mut report = SweepReport::default();

    let mut entries = match tokio::fs::read_dir(download_dir).await {
        Ok(entries) => entries,
        Err(error) => {
            if error.kind() != ErrorKind::NotFound {
                warn!("Could not open {:?} for cleanup: {error}", download_dir);
            }
            return report;
        }
    };

    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(error) => {
                warn!("Could not iterate {:?} for cleanup: {error}", download_dir);
                break;
            }
        };

        let path = entry.path();
        let metadata = match entry.metadata().await {
            Ok(metadata) => metadata,
            Err(error) => {
                warn!("Could not read metadata of {:?}: {error}", path);
                report.failed += 1;
                continue;
            }
        };

        let modified_at = match metadata.modified() {
            Ok(value) => value,
            Err(error) => {
                warn!("Could not read modification time of {:?}: {error}", path);
                report.failed += 1;
                continue;
            }
        };

        let age = now.duration_since(modified_at).unwrap_or_default();
        if age <= ttl {
            report.kept += 1;
            continue;
        }

        let removal = if metadata.is_dir() {
            tokio::fs::remove_dir(&path).await
        } else {
            tokio::fs::remove_file(&path).await
        };

        match removal {
            Ok(()) => {
                let modified: DateTime<Utc> = modified_at.into();
                info!(
                    "Evicted {:?} (last modified {})",
                    entry.file_name(),
                    modified.to_rfc3339()
                );
                report.removed += 1;
            }
            Err(error) if error.kind() == ErrorKind::NotFound => {
                debug!("{:?} vanished before eviction", path);
            }
            Err(error) => {
                warn!("Could not evict {:?}: {error}", path);
                report.failed += 1;
            }
        }
    }

    report
}
