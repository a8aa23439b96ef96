//! Staging store: lifecycle management for per-job scratch files.
//!
//! Each job gets a scratch slot (an input path and an output path) under a
//! dedicated staging root. Reservation is charged against a byte quota so
//! disk usage stays bounded by (max concurrent jobs x max input size).
//! Release is idempotent and never fails the caller; correctness of
//! downstream components must not depend on cleanup succeeding. A startup
//! sweep removes slots left behind by a crashed process.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::StagingError;

/// A reserved pair of scratch paths tied 1:1 to a job while it is active.
#[derive(Debug, Clone)]
pub struct ScratchSlot {
    pub job_id: Uuid,
    pub input_path: PathBuf,
    pub output_path: PathBuf,
}

struct SlotRecord {
    slot: ScratchSlot,
    reserved_bytes: u64,
}

pub struct StagingStore {
    root: PathBuf,
    quota_bytes: u64,
    slots: Mutex<HashMap<Uuid, SlotRecord>>,
    /// Monotonic counter folded into slot file names; keeps a fresh slot
    /// distinct from a same-id file still pending deletion.
    seq: AtomicU64,
}

impl StagingStore {
    pub fn new(root: impl Into<PathBuf>, quota_bytes: u64) -> std::io::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            quota_bytes,
            slots: Mutex::new(HashMap::new()),
            seq: AtomicU64::new(0),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn staged_bytes(slots: &HashMap<Uuid, SlotRecord>) -> u64 {
        slots.values().map(|r| r.reserved_bytes).sum()
    }

    /// Allocate a scratch slot for a job, charging `input_bytes` against the
    /// quota. Fails with `StorageExhausted` when the quota would be
    /// exceeded. Safe under concurrent reservation.
    pub fn reserve(
        &self,
        job_id: Uuid,
        input_bytes: u64,
        output_ext: &str,
    ) -> Result<ScratchSlot, StagingError> {
        let mut slots = self.slots.lock();

        let staged = Self::staged_bytes(&slots);
        if staged.saturating_add(input_bytes) > self.quota_bytes {
            warn!(
                "Staging quota exhausted: {} staged, {} requested, {} quota",
                staged, input_bytes, self.quota_bytes
            );
            return Err(StagingError::StorageExhausted {
                staged,
                quota: self.quota_bytes,
            });
        }

        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let slot = ScratchSlot {
            job_id,
            input_path: self.root.join(format!("{job_id}-{seq}.in")),
            output_path: self.root.join(format!("{job_id}-{seq}.out.{output_ext}")),
        };

        slots.insert(
            job_id,
            SlotRecord {
                slot: slot.clone(),
                reserved_bytes: input_bytes,
            },
        );

        debug!("Reserved scratch slot for job {}", job_id);
        Ok(slot)
    }

    /// Look up the slot reserved for a job.
    pub fn slot(&self, job_id: Uuid) -> Option<ScratchSlot> {
        self.slots.lock().get(&job_id).map(|r| r.slot.clone())
    }

    /// Delete a job's scratch files and free its quota share.
    ///
    /// Idempotent; deletion errors are logged, never surfaced. Called on
    /// every exit path: success, failure, cancellation, and the shutdown
    /// drain.
    pub fn release(&self, job_id: Uuid) {
        let record = self.slots.lock().remove(&job_id);
        let Some(record) = record else {
            return;
        };

        for path in [&record.slot.input_path, &record.slot.output_path] {
            if let Err(e) = std::fs::remove_file(path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Failed to delete scratch file {}: {}", path.display(), e);
                }
            }
        }
        debug!("Released scratch slot for job {}", job_id);
    }

    /// Startup recovery: delete on-disk slots whose job is neither currently
    /// reserved nor registered as in progress. Returns the number of files
    /// removed.
    pub fn sweep_orphans(&self, in_progress: &HashSet<Uuid>) -> usize {
        let live: HashSet<Uuid> = self.slots.lock().keys().copied().collect();

        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Failed to scan staging root: {}", e);
                return 0;
            }
        };

        let mut removed = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            let Some(job_id) = slot_owner(&path) else {
                // Not one of ours; leave it alone.
                continue;
            };
            if live.contains(&job_id) || in_progress.contains(&job_id) {
                continue;
            }
            match std::fs::remove_file(&path) {
                Ok(()) => {
                    removed += 1;
                }
                Err(e) => warn!("Failed to remove orphan {}: {}", path.display(), e),
            }
        }

        if removed > 0 {
            info!("Orphan sweep removed {} stale scratch files", removed);
        }
        removed
    }
}

/// Parse the owning job id out of a scratch file name
/// (`<uuid>-<seq>.in` / `<uuid>-<seq>.out.<ext>`).
fn slot_owner(path: &Path) -> Option<Uuid> {
    let name = path.file_name()?.to_str()?;
    let uuid_part = name.get(..36)?;
    if name.as_bytes().get(36) != Some(&b'-') {
        return None;
    }
    Uuid::parse_str(uuid_part).ok()
}
