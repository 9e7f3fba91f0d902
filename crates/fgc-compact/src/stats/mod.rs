//! Stats Module - Compaction Cycle Statistics
//!
//! Each call to `CompactionDriver::collect` returns a `CycleStats`
//! describing what the cycle did:
//! - Phase wall-clock times, in phase order
//! - Live data found by the marking oracle
//! - Objects and words moved, humongous moves, preserved marks
//! - Forwarding side-structure diagnostics (entries, scan lengths)

pub mod timer;

pub use timer::{duration_ms, GcTimer, ScopedTimer};

use crate::logging::Phase;
use indexmap::IndexMap;
use serde::Serialize;

/// CycleStats - summary of one compaction cycle
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleStats {
    /// Cycle number, starting at 1
    pub cycle: u64,

    /// `parallel` or `serial`
    pub style: String,

    /// Active forwarding encoding
    pub forwarding: String,

    /// Milliseconds per phase, in execution order
    pub phase_ms: IndexMap<String, f64>,

    /// Whole cycle, milliseconds
    pub total_ms: f64,

    pub live_objects: usize,
    pub live_words: usize,

    /// Objects given a new address by the forward phase
    pub forwarded_objects: usize,

    /// Objects whose address changed
    pub moved_objects: usize,

    /// Words copied for moved objects (post-move sizes)
    pub moved_words: usize,

    /// Objects that grew by an identity-hash word while moving
    pub grown_objects: usize,

    pub humongous_moved: usize,
    pub preserved_marks: usize,

    /// Region moves that went through a shadow buffer
    pub shadow_regions: usize,

    /// Leading regions exempted from moving
    pub dense_prefix_regions: usize,

    /// Regions that were in use before the cycle and are free after it
    pub freed_regions: usize,

    pub forwarding_entries: usize,
    pub max_scan: usize,
}

impl CycleStats {
    pub fn new(cycle: u64, style: &str, forwarding: &str) -> Self {
        Self {
            cycle,
            style: style.to_string(),
            forwarding: forwarding.to_string(),
            ..Default::default()
        }
    }

    /// Record a phase duration
    pub fn record_phase(&mut self, phase: Phase, ms: f64) {
        *self.phase_ms.entry(phase.as_str().to_string()).or_insert(0.0) += ms;
    }

    pub fn phase_ms(&self, phase: Phase) -> Option<f64> {
        self.phase_ms.get(phase.as_str()).copied()
    }

    /// Serialize to a JSON string
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_order_is_kept() {
        let mut stats = CycleStats::new(1, "parallel", "header");
        for phase in Phase::ALL {
            stats.record_phase(phase, 1.0);
        }
        let keys: Vec<_> = stats.phase_ms.keys().cloned().collect();
        assert_eq!(keys, vec!["mark", "plan", "forward", "adjust", "compact"]);
        assert_eq!(stats.phase_ms(Phase::Adjust), Some(1.0));
    }

    #[test]
    fn test_json_contains_counts() {
        let mut stats = CycleStats::new(2, "serial", "header");
        stats.moved_objects = 7;
        let json = stats.to_json();
        assert!(json.contains("\"moved_objects\":7"));
        assert!(json.contains("\"style\":\"serial\""));
    }
}
