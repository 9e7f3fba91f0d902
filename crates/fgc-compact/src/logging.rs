//! GC Logging and Tracing
//!
//! Structured events for compaction cycles, useful for:
//! - Phase timing analysis
//! - Debugging forwarding encodings
//! - Spotting shadow-region fallbacks under contention
//!
//! Log Levels:
//! - WARN: Shadow fallbacks
//! - INFO: Cycle start/end
//! - DEBUG: Phases, dense prefix
//! - TRACE: Forwarding and compaction counters
//!
//! Every event is also forwarded to the `log` facade, so embedders that
//! install a logger see the same stream without enabling console output.

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

/// Log level for GC operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

/// Compaction cycle phases, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Mark,
    Plan,
    Forward,
    Adjust,
    Compact,
}

impl Phase {
    pub const ALL: [Phase; 5] = [
        Phase::Mark,
        Phase::Plan,
        Phase::Forward,
        Phase::Adjust,
        Phase::Compact,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Mark => "mark",
            Phase::Plan => "plan",
            Phase::Forward => "forward",
            Phase::Adjust => "adjust",
            Phase::Compact => "compact",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// GC event types
#[derive(Debug, Clone)]
pub enum GcEvent {
    /// Compaction cycle started
    CycleStart {
        cycle: u64,
        style: String,
        forwarding: String,
    },

    /// Phase started
    PhaseStart { phase: Phase, cycle: u64 },

    /// Phase completed
    PhaseEnd {
        phase: Phase,
        duration_ms: f64,
        cycle: u64,
    },

    /// Compaction cycle completed
    CycleEnd {
        cycle: u64,
        duration_ms: f64,
        live_words: usize,
        freed_regions: usize,
    },

    /// Dense prefix decided by the plan phase
    DensePrefix { cycle: u64, regions: usize },

    /// Forwarding side-structure statistics
    ForwardingStats {
        mode: String,
        entries: usize,
        max_scan: usize,
        grows: usize,
    },

    /// Compaction statistics
    CompactionStats {
        moved_objects: usize,
        moved_words: usize,
        humongous_moved: usize,
        preserved_marks: usize,
    },

    /// A worker copied into a shadow buffer instead of waiting
    ShadowFallback {
        source_region: usize,
        dest_region: usize,
        words: usize,
    },
}

/// GC Logger configuration
#[derive(Debug, Clone)]
pub struct GcLoggerConfig {
    /// Minimum log level
    pub level: LogLevel,

    /// Enable console output
    pub console: bool,

    /// Enable JSON format
    pub json: bool,

    /// Enable timestamps
    pub timestamps: bool,
}

impl Default for GcLoggerConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            console: false,
            json: false,
            timestamps: true,
        }
    }
}

/// GC Logger - event sink owned by one compaction driver
pub struct GcLogger {
    config: GcLoggerConfig,
    events: Mutex<Vec<(Instant, GcEvent)>>,
    enabled: AtomicBool,
}

impl GcLogger {
    /// Create new GC logger
    pub fn new(config: GcLoggerConfig) -> Self {
        Self {
            config,
            events: Mutex::new(Vec::new()),
            enabled: AtomicBool::new(true),
        }
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Relaxed);
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Log a GC event
    pub fn log(&self, event: GcEvent) {
        if !self.is_enabled() {
            return;
        }

        let event_level = Self::event_level(&event);
        self.forward_to_facade(event_level, &event);
        if event_level > self.config.level {
            return;
        }

        if self.config.console {
            self.output_console(&event);
        }

        self.events.lock().push((Instant::now(), event));
    }

    fn event_level(event: &GcEvent) -> LogLevel {
        match event {
            GcEvent::ShadowFallback { .. } => LogLevel::Warn,
            GcEvent::CycleStart { .. } | GcEvent::CycleEnd { .. } => LogLevel::Info,
            GcEvent::PhaseStart { .. } | GcEvent::PhaseEnd { .. } | GcEvent::DensePrefix { .. } => {
                LogLevel::Debug
            },
            GcEvent::ForwardingStats { .. } | GcEvent::CompactionStats { .. } => LogLevel::Trace,
        }
    }

    fn forward_to_facade(&self, level: LogLevel, event: &GcEvent) {
        let level = match level {
            LogLevel::Error => log::Level::Error,
            LogLevel::Warn => log::Level::Warn,
            LogLevel::Info => log::Level::Info,
            LogLevel::Debug => log::Level::Debug,
            LogLevel::Trace => log::Level::Trace,
        };
        if log::log_enabled!(target: "fgc_compact::gc", level) {
            log::log!(target: "fgc_compact::gc", level, "{}", Self::human(event));
        }
    }

    fn output_console(&self, event: &GcEvent) {
        let line = if self.config.json {
            Self::json(event).to_string()
        } else {
            Self::human(event)
        };
        if self.config.timestamps {
            let now = chrono::Local::now();
            println!("[{}] {}", now.format("%Y-%m-%d %H:%M:%S%.3f"), line);
        } else {
            println!("{}", line);
        }
    }

    /// Human-readable rendering
    fn human(event: &GcEvent) -> String {
        match event {
            GcEvent::CycleStart {
                cycle,
                style,
                forwarding,
            } => format!(
                "[GC] Compaction {} started ({} style, {} forwarding)",
                cycle, style, forwarding
            ),
            GcEvent::PhaseStart { phase, cycle } => {
                format!("[GC] Compaction {}: {} phase started", cycle, phase)
            },
            GcEvent::PhaseEnd {
                phase,
                duration_ms,
                cycle,
            } => format!(
                "[GC] Compaction {}: {} phase completed ({:.2}ms)",
                cycle, phase, duration_ms
            ),
            GcEvent::CycleEnd {
                cycle,
                duration_ms,
                live_words,
                freed_regions,
            } => format!(
                "[GC] Compaction {} completed ({:.2}ms, {} live words, {} regions freed)",
                cycle, duration_ms, live_words, freed_regions
            ),
            GcEvent::DensePrefix { cycle, regions } => {
                format!("[GC] Compaction {}: dense prefix of {} regions", cycle, regions)
            },
            GcEvent::ForwardingStats {
                mode,
                entries,
                max_scan,
                grows,
            } => format!(
                "[GC] Forwarding ({}): {} entries, max scan {}, {} grows",
                mode, entries, max_scan, grows
            ),
            GcEvent::CompactionStats {
                moved_objects,
                moved_words,
                humongous_moved,
                preserved_marks,
            } => format!(
                "[GC] Moved {} objects ({} words), {} humongous, {} preserved marks",
                moved_objects, moved_words, humongous_moved, preserved_marks
            ),
            GcEvent::ShadowFallback {
                source_region,
                dest_region,
                words,
            } => format!(
                "[GC] Region {} -> {} copied through a shadow buffer ({} words)",
                source_region, dest_region, words
            ),
        }
    }

    /// JSON rendering
    fn json(event: &GcEvent) -> serde_json::Value {
        match event {
            GcEvent::CycleStart {
                cycle,
                style,
                forwarding,
            } => serde_json::json!({
                "type": "cycle_start",
                "cycle": cycle,
                "style": style,
                "forwarding": forwarding
            }),
            GcEvent::PhaseStart { phase, cycle } => serde_json::json!({
                "type": "phase_start",
                "cycle": cycle,
                "phase": phase.as_str()
            }),
            GcEvent::PhaseEnd {
                phase,
                duration_ms,
                cycle,
            } => serde_json::json!({
                "type": "phase_end",
                "cycle": cycle,
                "phase": phase.as_str(),
                "duration_ms": duration_ms
            }),
            GcEvent::CycleEnd {
                cycle,
                duration_ms,
                live_words,
                freed_regions,
            } => serde_json::json!({
                "type": "cycle_end",
                "cycle": cycle,
                "duration_ms": duration_ms,
                "live_words": live_words,
                "freed_regions": freed_regions
            }),
            GcEvent::DensePrefix { cycle, regions } => serde_json::json!({
                "type": "dense_prefix",
                "cycle": cycle,
                "regions": regions
            }),
            GcEvent::ForwardingStats {
                mode,
                entries,
                max_scan,
                grows,
            } => serde_json::json!({
                "type": "forwarding_stats",
                "mode": mode,
                "entries": entries,
                "max_scan": max_scan,
                "grows": grows
            }),
            GcEvent::CompactionStats {
                moved_objects,
                moved_words,
                humongous_moved,
                preserved_marks,
            } => serde_json::json!({
                "type": "compaction_stats",
                "moved_objects": moved_objects,
                "moved_words": moved_words,
                "humongous_moved": humongous_moved,
                "preserved_marks": preserved_marks
            }),
            GcEvent::ShadowFallback {
                source_region,
                dest_region,
                words,
            } => serde_json::json!({
                "type": "shadow_fallback",
                "source_region": source_region,
                "dest_region": dest_region,
                "words": words
            }),
        }
    }

    /// Get all events
    pub fn events(&self) -> Vec<(Instant, GcEvent)> {
        self.events.lock().clone()
    }

    /// Clear all events
    pub fn clear_events(&self) {
        self.events.lock().clear();
    }

    /// Get event count
    pub fn event_count(&self) -> usize {
        self.events.lock().len()
    }
}

impl Default for GcLogger {
    fn default() -> Self {
        Self::new(GcLoggerConfig::default())
    }
}
