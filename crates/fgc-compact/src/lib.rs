//! # FGC Compact - Forwarding and Compaction Core
//!
//! The moving half of a mark-compact collector: given the live objects of a
//! region-based heap, decide where each one goes, record that decision, point
//! every reference at the new address and slide the bytes down.
//!
//! ## Overview
//!
//! - **Forwarding encodings**: full pointer in the header, sliding
//!   base-plus-offset in the header, a concurrent hash side table, or dense
//!   per-region side tables that leave headers untouched
//! - **Parallel compaction**: per-worker compaction points, work stealing over
//!   regions, shadow buffers for destinations that are still busy
//! - **Serial compaction**: a block offset table that computes destinations
//!   from the liveness bitmap
//! - **Humongous objects**: multi-region objects slide into free runs below
//!   them
//!
//! ## Quick Start
//!
//! ```rust
//! use fgc_compact::{ClassInfo, ClassTable, CompactConfig, CompactionDriver, Heap, RootSet, TracingMarker};
//!
//! fn main() -> fgc_compact::Result<()> {
//!     let config = CompactConfig {
//!         region_size_shift: 8,
//!         num_regions: 8,
//!         gc_threads: Some(2),
//!         ..Default::default()
//!     };
//!     let heap = Heap::new(&config)?;
//!
//!     let mut classes = ClassTable::new(config.compact_headers);
//!     let node = classes.register(ClassInfo::new("node", 4, &[2]))?;
//!     let _garbage = classes.instantiate_in_region(&heap, 0, node)?;
//!     let live = classes.instantiate_in_region(&heap, 3, node)?;
//!
//!     let roots = RootSet::new();
//!     let root = roots.add(live);
//!
//!     let mut driver = CompactionDriver::new(config, &heap)?;
//!     let stats = driver.collect(&heap, &classes, &TracingMarker, &roots);
//!
//!     assert_eq!(stats.moved_objects, 1);
//!     assert_eq!(roots.get(root), heap.region(0).bottom());
//!     Ok(())
//! }
//! ```
//!
//! ## Cycle
//!
//! ```text
//!  ┌──────┐   ┌──────┐   ┌─────────┐   ┌────────┐   ┌─────────┐
//!  │ mark │──▶│ plan │──▶│ forward │──▶│ adjust │──▶│ compact │
//!  └──────┘   └──────┘   └─────────┘   └────────┘   └─────────┘
//!   oracle     live per    new address   references    copy, tops,
//!              region      per object    and roots     restore marks
//! ```
//!
//! Every phase finishes on all workers before the next one starts. Objects
//! only ever move to lower addresses.
//!
//! ## Failure model
//!
//! Construction and allocation return `CompactError`. Inside a cycle there is
//! nothing to recover: a broken invariant means a corrupt heap, so it is
//! logged and the cycle panics (`fatal!`).

#[cfg(not(target_pointer_width = "64"))]
compile_error!("fgc-compact requires a 64-bit target");

// Core
pub mod config;
pub mod error;
pub mod logging;

// Heap and objects
pub mod heap;
pub mod marker;
pub mod object;

// Forwarding and compaction
pub mod compact;
pub mod forwarding;

// Monitoring
pub mod stats;

// Utilities
pub mod util;

// Re-export main types for convenience
pub use compact::CompactionDriver;
pub use config::{CompactConfig, CompactionStyle, ConfigError, ForwardingMode};
pub use error::{CompactError, Result};
pub use forwarding::Forwarding;
pub use heap::{Heap, HeapLayout, HeapRegion, RegionKind};
pub use marker::{LivenessBitmap, MarkingOracle, RootSet, TracingMarker};
pub use object::{ClassInfo, ClassTable, MarkWord, ObjectModel};
pub use stats::CycleStats;

/// Bytes per heap word
pub const WORD_SIZE: usize = 8;

/// log2 of `WORD_SIZE`
pub const LOG_WORD_SIZE: u32 = 3;

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
