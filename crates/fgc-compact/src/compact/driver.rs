//! Compaction Driver - One Full Cycle
//!
//! Runs the phases strictly one after another, every worker joined before
//! the next phase starts:
//!
//! ```text
//!   mark ──▶ plan ──▶ forward ──▶ adjust ──▶ compact
//!   oracle   summaries  addresses   references  bytes, tops, teardown
//! ```
//!
//! The driver owns everything that lives for the length of a cycle: the
//! liveness bitmap, the forwarding encoding, preserved marks and the event
//! logger. The heap, the object model, the marking oracle and the roots
//! belong to the caller.
//!
//! A cycle cannot be cancelled. Any broken invariant inside it is fatal.

use super::parallel::{ParallelCompactor, ParallelSettings};
use super::serial::SerialCompactor;
use crate::config::{CompactConfig, CompactionStyle, ConfigError};
use crate::error::Result;
use crate::forwarding::Forwarding;
use crate::heap::Heap;
use crate::logging::{GcEvent, GcLogger, GcLoggerConfig, LogLevel, Phase};
use crate::marker::{LivenessBitmap, MarkingOracle, RootSet};
use crate::object::{ObjectModel, PreservedMarks};
use crate::stats::{duration_ms, CycleStats, GcTimer, ScopedTimer};
use indexmap::IndexMap;

/// Forwarding label reported for serial cycles
const BLOCK_OFFSET_LABEL: &str = "block-offset";

/// CompactionDriver - runs compaction cycles over one heap
pub struct CompactionDriver {
    config: CompactConfig,
    forwarding: Forwarding,
    preserved: PreservedMarks,
    bitmap: LivenessBitmap,
    logger: GcLogger,
    cycles: u64,
}

impl CompactionDriver {
    /// Create a driver for `heap`
    ///
    /// # Errors
    /// `CompactError::Configuration` if `config` is invalid or describes a
    /// different heap than the one given.
    pub fn new(config: CompactConfig, heap: &Heap) -> Result<Self> {
        config.validate()?;

        let layout = heap.layout();
        crate::ensure!(
            layout.region_size_shift() == config.region_size_shift
                && layout.num_regions() == config.num_regions,
            ConfigError::HeapMismatch(format!(
                "heap has {} regions of 2^{} words, configuration asks for {} of 2^{}",
                layout.num_regions(),
                layout.region_size_shift(),
                config.num_regions,
                config.region_size_shift
            ))
        );
        crate::ensure!(
            heap.compact_headers() == config.compact_headers,
            ConfigError::HeapMismatch(format!(
                "heap compact headers: {}, configuration: {}",
                heap.compact_headers(),
                config.compact_headers
            ))
        );

        let forwarding = Forwarding::select(&config, layout);
        let logger = GcLogger::new(GcLoggerConfig {
            level: LogLevel::Trace,
            console: config.verbose,
            ..Default::default()
        });

        log::debug!(
            "Compaction driver ready: {} style, {} forwarding, {} workers",
            config.style,
            forwarding.mode(),
            config.worker_count()
        );

        Ok(Self {
            bitmap: LivenessBitmap::for_layout(layout),
            forwarding,
            preserved: PreservedMarks::new(),
            logger,
            cycles: 0,
            config,
        })
    }

    pub fn config(&self) -> &CompactConfig {
        &self.config
    }

    pub fn forwarding(&self) -> &Forwarding {
        &self.forwarding
    }

    pub fn logger(&self) -> &GcLogger {
        &self.logger
    }

    /// Completed cycles
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Run one compaction cycle
    ///
    /// On return every live object reachable from `roots` sits at its final
    /// address, every reference and root points there, and the regions
    /// left without data are free.
    pub fn collect(
        &mut self,
        heap: &Heap,
        model: &dyn ObjectModel,
        marker: &dyn MarkingOracle,
        roots: &RootSet,
    ) -> CycleStats {
        self.cycles += 1;
        let cycle = self.cycles;
        let label = match self.config.style {
            CompactionStyle::Parallel => self.forwarding.mode().as_str(),
            CompactionStyle::Serial => BLOCK_OFFSET_LABEL,
        };
        let mut stats = CycleStats::new(cycle, self.config.style.as_str(), label);
        self.logger.log(GcEvent::CycleStart {
            cycle,
            style: stats.style.clone(),
            forwarding: stats.forwarding.clone(),
        });

        let timer = GcTimer::new();
        let free_before = heap.free_region_count();

        self.bitmap.clear();
        let summary = run_phase(&self.logger, cycle, Phase::Mark, &mut stats, || {
            marker.mark(heap, model, roots, &self.bitmap)
        });
        stats.live_objects = summary.live_objects;
        stats.live_words = summary.live_words;

        match self.config.style {
            CompactionStyle::Parallel => self.collect_parallel(heap, model, roots, &mut stats, free_before),
            CompactionStyle::Serial => self.collect_serial(heap, model, roots, &mut stats, free_before),
        }

        stats.total_ms = timer.elapsed_ms();
        self.logger.log(GcEvent::CompactionStats {
            moved_objects: stats.moved_objects,
            moved_words: stats.moved_words,
            humongous_moved: stats.humongous_moved,
            preserved_marks: stats.preserved_marks,
        });
        self.logger.log(GcEvent::CycleEnd {
            cycle,
            duration_ms: stats.total_ms,
            live_words: stats.live_words,
            freed_regions: stats.freed_regions,
        });
        stats
    }

    fn collect_parallel(
        &mut self,
        heap: &Heap,
        model: &dyn ObjectModel,
        roots: &RootSet,
        stats: &mut CycleStats,
        free_before: usize,
    ) {
        let Self {
            config,
            forwarding,
            preserved,
            bitmap,
            logger,
            cycles,
        } = self;
        let cycle = *cycles;
        let settings = ParallelSettings {
            workers: config.worker_count(),
            regions_per_claim: config.regions_per_claim,
            shadow_regions: config.shadow_regions,
            shadow_spin_limit: config.shadow_spin_limit,
            release_free_regions: config.release_free_regions,
        };
        let compactor = ParallelCompactor::new(heap, model, bitmap, preserved, logger, settings);

        let plan = run_phase(logger, cycle, Phase::Plan, stats, || compactor.plan(forwarding));
        logger.log(GcEvent::DensePrefix {
            cycle,
            regions: plan.dense_prefix,
        });
        forwarding.grow_if_requested();

        let forwarded = run_phase(logger, cycle, Phase::Forward, stats, || {
            compactor.forward(forwarding, &plan)
        });
        if forwarding.grow_if_requested() {
            log::debug!("forwarding table grown after the forward phase");
        }
        let preserved_marks = preserved.len();

        run_phase(logger, cycle, Phase::Adjust, stats, || {
            compactor.adjust(forwarding, roots)
        });

        let (forwarding_stats, outcome) = run_phase(logger, cycle, Phase::Compact, stats, || {
            compactor.compact(forwarding, &plan);
            let forwarding_stats = forwarding.stats();
            let outcome = compactor.finish(forwarding, &plan, &forwarded.humongous, free_before);
            (forwarding_stats, outcome)
        });

        logger.log(GcEvent::ForwardingStats {
            mode: forwarding.mode().to_string(),
            entries: forwarding_stats.entries,
            max_scan: forwarding_stats.max_scan,
            grows: forwarding_stats.grows,
        });

        stats.forwarded_objects = forwarded.points.forwarded_objects + forwarded.humongous.len();
        stats.moved_objects = outcome.moved_objects;
        stats.moved_words = outcome.moved_words;
        stats.grown_objects = outcome.grown_objects;
        stats.humongous_moved = forwarded.humongous.len();
        stats.preserved_marks = preserved_marks;
        stats.shadow_regions = outcome.shadow_regions;
        stats.dense_prefix_regions = plan.dense_prefix;
        stats.freed_regions = outcome.freed_regions;
        stats.forwarding_entries = forwarding_stats.entries;
        stats.max_scan = forwarding_stats.max_scan;
    }

    fn collect_serial(
        &mut self,
        heap: &Heap,
        model: &dyn ObjectModel,
        roots: &RootSet,
        stats: &mut CycleStats,
        free_before: usize,
    ) {
        let cycle = self.cycles;
        let logger = &self.logger;
        let mut serial = SerialCompactor::new(heap, model, &self.bitmap, self.config.block_size_shift);

        let plan = run_phase(logger, cycle, Phase::Plan, stats, || serial.plan());
        logger.log(GcEvent::DensePrefix {
            cycle,
            regions: plan.dense_prefix,
        });

        let filled = run_phase(logger, cycle, Phase::Forward, stats, || serial.forward());
        log::debug!("serial compaction fills {} regions", filled);

        run_phase(logger, cycle, Phase::Adjust, stats, || {
            serial.adjust(roots, &self.preserved)
        });

        let release = self.config.release_free_regions;
        let outcome = run_phase(logger, cycle, Phase::Compact, stats, || {
            let moved = serial.compact();
            serial.finish(release);
            moved
        });

        stats.forwarded_objects = outcome.moved_objects;
        stats.moved_objects = outcome.moved_objects;
        stats.moved_words = outcome.moved_words;
        stats.dense_prefix_regions = plan.dense_prefix;
        stats.freed_regions = heap.free_region_count().saturating_sub(free_before);
    }

    /// Snapshot of the driver state for diagnostics output
    pub fn diagnostics(&self) -> IndexMap<String, String> {
        let mut diagnostics = IndexMap::new();
        diagnostics.insert("cycles".to_string(), self.cycles.to_string());
        diagnostics.insert("style".to_string(), self.config.style.to_string());
        diagnostics.insert(
            "forwarding".to_string(),
            self.forwarding.mode().to_string(),
        );
        diagnostics.insert(
            "workers".to_string(),
            self.config.worker_count().to_string(),
        );
        diagnostics.insert(
            "shadow_regions".to_string(),
            self.config.shadow_regions.to_string(),
        );
        diagnostics.insert(
            "logged_events".to_string(),
            self.logger.event_count().to_string(),
        );
        diagnostics
    }
}

/// Run one phase between its start and end events
fn run_phase<R>(
    logger: &GcLogger,
    cycle: u64,
    phase: Phase,
    stats: &mut CycleStats,
    f: impl FnOnce() -> R,
) -> R {
    logger.log(GcEvent::PhaseStart { phase, cycle });
    let _timer = ScopedTimer::new(|elapsed| {
        let ms = duration_ms(elapsed);
        stats.record_phase(phase, ms);
        logger.log(GcEvent::PhaseEnd {
            phase,
            duration_ms: ms,
            cycle,
        });
    });
    f()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ForwardingMode;
    use crate::error::CompactError;
    use crate::marker::TracingMarker;
    use crate::object::{ClassInfo, ClassTable};

    fn config() -> CompactConfig {
        CompactConfig {
            region_size_shift: 5,
            block_size_shift: 3,
            num_regions: 4,
            gc_threads: Some(2),
            ..Default::default()
        }
    }

    #[test]
    fn test_rejects_mismatched_heap() {
        let heap = Heap::new(&config()).unwrap();
        let other = CompactConfig {
            num_regions: 8,
            ..config()
        };
        let err = CompactionDriver::new(other, &heap).err().unwrap();
        assert!(matches!(
            err,
            CompactError::Configuration(ConfigError::HeapMismatch(_))
        ));

        let compact = CompactConfig {
            compact_headers: true,
            ..config()
        };
        assert!(CompactionDriver::new(compact, &heap).is_err());
    }

    #[test]
    fn test_cycle_reports_every_phase() {
        let heap = Heap::new(&config()).unwrap();
        let mut classes = ClassTable::new(false);
        let node = classes.register(ClassInfo::new("node", 4, &[2])).unwrap();
        let _garbage = classes.instantiate_in_region(&heap, 0, node).unwrap();
        let live = classes.instantiate_in_region(&heap, 1, node).unwrap();
        let roots = RootSet::new();
        let root = roots.add(live);

        let mut driver = CompactionDriver::new(
            CompactConfig {
                forwarding: Some(ForwardingMode::Dense),
                ..config()
            },
            &heap,
        )
        .unwrap();
        let stats = driver.collect(&heap, &classes, &TracingMarker, &roots);

        assert_eq!(driver.cycles(), 1);
        assert_eq!(stats.forwarding, "dense");
        assert_eq!(stats.live_objects, 1);
        assert_eq!(stats.phase_ms.len(), 5);
        assert_eq!(roots.get(root), heap.region(0).bottom());
        assert_eq!(stats.moved_objects, 1);
        assert!(heap.region(1).is_free());
        assert_eq!(driver.diagnostics()["cycles"], "1");
    }
}
