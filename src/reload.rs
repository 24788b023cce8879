//! Zone file change watcher
//!
//! Polls the zone files on a jittered interval and compares SHA-512
//! digests. On a change the zone is re-parsed off to the side and swapped
//! in atomically; a failed parse keeps the previous record set serving.

use crate::zone::Zone;
use anyhow::Result;
use rand::Rng;
use sha2::{Digest, Sha512};
use std::sync::Arc;
use tokio::time::{sleep, Duration};

pub fn spawn(
    zones: Arc<Vec<Arc<Zone>>>,
    interval: Duration,
    mut jitter: Duration,
) -> tokio::task::JoinHandle<()> {
    if jitter > interval / 2 {
        jitter = interval / 2;
    }

    tracing::info!(
        "[reload] Watching zone files (Interval: {:?}, Jitter: {:?})",
        interval,
        jitter
    );

    tokio::spawn(async move {
        let mut hashes: Vec<Option<String>> = zones
            .iter()
            .map(|zone| zone.path().and_then(|p| hash_file(&p.display().to_string()).ok()))
            .collect();

        loop {
            sleep(jittered(interval, jitter)).await;

            for (i, zone) in zones.iter().enumerate() {
                let Some(path) = zone.path() else { continue };
                let path_str = path.display().to_string();

                match hash_file(&path_str) {
                    Ok(new_hash) => {
                        if hashes[i].as_deref() == Some(new_hash.as_str()) {
                            continue;
                        }
                        tracing::info!(
                            "[reload] Zone file change detected for '{}'! New SHA512: {}",
                            path_str,
                            new_hash
                        );
                        hashes[i] = Some(new_hash);

                        match zone.reload() {
                            Ok(()) => tracing::info!(
                                "[reload] Zone '{}' reloaded from '{}'",
                                zone.origin(),
                                path_str
                            ),
                            // 解析失败时旧数据继续服务
                            Err(e) => tracing::error!(
                                "[reload] Reload failed, keeping previous zone data: {:#}",
                                e
                            ),
                        }
                    }
                    Err(e) => {
                        tracing::error!("[reload] Failed to read zone file '{}': {}", path_str, e);
                    }
                }
            }
        }
    })
}

fn jittered(interval: Duration, jitter: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let j = rng.gen_range(0..=(jitter.as_millis() as u64 * 2));
    let offset = j as i64 - jitter.as_millis() as i64;

    if offset > 0 {
        interval + Duration::from_millis(offset as u64)
    } else {
        interval - Duration::from_millis(-offset as u64)
    }
}

fn hash_file(path: &str) -> Result<String> {
    let content = std::fs::read(path)?;
    let mut hasher = Sha512::new();
    hasher.update(&content);
    Ok(hex::encode(hasher.finalize()))
}
