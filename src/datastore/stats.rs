use serde_derive::Serialize;

pub const SHARDED_MEMORY: &str = "sharded_memory";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StorageStats {
    pub total_tasks: usize,
    pub completed_tasks: usize,
    pub incomplete_tasks: usize,
    pub max_tasks: usize,
    pub available: usize,
    pub storage_type: &'static str,
}

/// Capacity view with per-shard occupancy, for diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StorageUsage {
    pub current_tasks: usize,
    pub max_tasks: usize,
    pub usage_percent: f64,
    pub available: usize,
    pub shard_count: usize,
    pub shard_distribution: Vec<usize>,
    pub storage_type: &'static str,
}

impl StorageUsage {
    pub fn percent(current: usize, max: usize) -> f64 {
        if max == 0 {
            return 0.0;
        }
        current as f64 / max as f64 * 100.0
    }
}
