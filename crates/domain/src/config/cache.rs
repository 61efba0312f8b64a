use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session cache
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Sessions idle longer than this are evicted by the cleanup sweep.
    #[serde(default = "d_retention_hours")]
    pub retention_hours: u64,
    /// How often the background cleanup sweep runs.
    #[serde(default = "d_cleanup_interval")]
    pub cleanup_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            retention_hours: d_retention_hours(),
            cleanup_interval_secs: d_cleanup_interval(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_retention_hours() -> u64 {
    24
}
fn d_cleanup_interval() -> u64 {
    3600
}
