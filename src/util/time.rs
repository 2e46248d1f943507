//! Small time helpers shared by the write path and the orphan reconciler.
use chrono::{DateTime, Utc};

/// Cutoff used by OrphanReconciler: records newer than this might still be
/// mid-write and are skipped for the current scan.
pub fn quiescence_cutoff() -> DateTime<Utc> {
	Utc::now() - chrono::Duration::hours(1)
}

pub fn now() -> DateTime<Utc> {
	Utc::now()
}
