use std::io;
use std::path::Path;
use log::{debug, warn};
use tokio::time::{sleep, Duration};
use crate::job::Candidate;

/// Pause before the single retry of a locked delete
const REMOVE_RETRY_DELAY: Duration = Duration::from_millis(250);

#[cfg(unix)]
const EBUSY: i32 = 16;

/// Outcome of choosing among candidates
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    /// None means the original is delivered
    pub chosen: Option<Candidate>,
    /// Every candidate that lost and must be deleted
    pub losers: Vec<Candidate>,
}

/// Smallest candidate strictly below `original_size`; ties keep production order.
pub fn select_best(candidates: Vec<Candidate>, original_size: u64) -> Selection {
    pick(candidates, |c| c.size_bytes < original_size)
}

/// Smallest candidate regardless of the original, for explicit format conversions
pub fn select_smallest(candidates: Vec<Candidate>) -> Selection {
    pick(candidates, |_| true)
}

fn pick<F>(candidates: Vec<Candidate>, eligible: F) -> Selection
where
    F: Fn(&Candidate) -> bool,
{
    let winner = candidates
        .iter()
        .enumerate()
        .filter(|(_, c)| eligible(*c))
        .min_by_key(|(i, c)| (c.size_bytes, *i))
        .map(|(i, _)| i);

    let mut chosen = None;
    let mut losers = Vec::with_capacity(candidates.len());
    for (i, c) in candidates.into_iter().enumerate() {
        if Some(i) == winner {
            chosen = Some(c);
        } else {
            losers.push(c);
        }
    }
    Selection { chosen, losers }
}

/// Re-stat candidates on disk, dropping any that vanished and refreshing sizes
pub async fn refresh_candidates(candidates: Vec<Candidate>) -> Vec<Candidate> {
    let mut present = Vec::with_capacity(candidates.len());
    for mut c in candidates {
        match tokio::fs::metadata(&c.path).await {
            Ok(meta) if meta.is_file() => {
                c.size_bytes = meta.len();
                present.push(c);
            }
            _ => warn!("Candidate {} disappeared before selection", c.path.display()),
        }
    }
    present
}

/// Delete a file, retrying once when the OS reports a transient lock.
/// A file that is already gone counts as removed.
pub async fn remove_with_retry(path: &Path) -> io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) if is_transient(&e) => {
            debug!("Delete of {} hit {}, retrying", path.display(), e);
            sleep(REMOVE_RETRY_DELAY).await;
            match tokio::fs::remove_file(path).await {
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                other => other,
            }
        }
        Err(e) => Err(e),
    }
}

fn is_transient(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::PermissionDenied | io::ErrorKind::WouldBlock) || is_busy(e)
}

#[cfg(unix)]
fn is_busy(e: &io::Error) -> bool {
    e.raw_os_error() == Some(EBUSY)
}

#[cfg(not(unix))]
fn is_busy(_e: &io::Error) -> bool {
    false
}

/// Delete every losing candidate; returns how many could not be removed
pub async fn cleanup(job_id: &str, losers: &[Candidate]) -> usize {
    let mut leftovers = 0;
    for c in losers {
        match remove_with_retry(&c.path).await {
            Ok(()) => debug!("Job {}: removed candidate {}", job_id, c.path.display()),
            Err(e) => {
                leftovers += 1;
                warn!("Job {}: failed to remove candidate {}: {}", job_id, c.path.display(), e);
            }
        }
    }
    leftovers
}
