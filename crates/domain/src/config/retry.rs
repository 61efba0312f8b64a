use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Durable sync retries
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Backoff attempts counted before the interval stops growing. Entries
    /// at the cap keep retrying at the capped interval.
    #[serde(default = "d_max_attempts")]
    pub max_attempts: u32,
    /// Base for the exponential backoff: `base * 2^attempts`.
    #[serde(default = "d_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// How often the background drain scans the queue.
    #[serde(default = "d_drain_interval")]
    pub drain_interval_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: d_max_attempts(),
            backoff_base_ms: d_backoff_base_ms(),
            drain_interval_secs: d_drain_interval(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_max_attempts() -> u32 {
    3
}
fn d_backoff_base_ms() -> u64 {
    1000
}
fn d_drain_interval() -> u64 {
    5
}
