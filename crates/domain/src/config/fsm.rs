use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Phase controller
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Bounds for the rolling reasoning-effectiveness score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FsmConfig {
    #[serde(default = "d_initial_effectiveness")]
    pub initial_effectiveness: f64,
    #[serde(default = "d_min_effectiveness")]
    pub min_effectiveness: f64,
    #[serde(default = "d_max_effectiveness")]
    pub max_effectiveness: f64,
}

impl Default for FsmConfig {
    fn default() -> Self {
        Self {
            initial_effectiveness: d_initial_effectiveness(),
            min_effectiveness: d_min_effectiveness(),
            max_effectiveness: d_max_effectiveness(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_initial_effectiveness() -> f64 {
    0.8
}
fn d_min_effectiveness() -> f64 {
    0.3
}
fn d_max_effectiveness() -> f64 {
    1.0
}
