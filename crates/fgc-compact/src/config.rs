//! Configuration Module - Compaction Tuning Parameters
//!
//! Read once when a `Heap` and a `CompactionDriver` are constructed and never
//! re-read during a cycle. The header layout (`compact_headers`) decides which
//! forwarding encoding is active unless `forwarding` overrides it.

use std::fmt;
use std::str::FromStr;

/// Smallest supported region: 16 words
pub const MIN_REGION_SIZE_SHIFT: u32 = 4;

/// Largest supported region: 2^23 words (the sliding offset field is 23 bits wide)
pub const MAX_REGION_SIZE_SHIFT: u32 = 23;

/// Default block size of the block-offset table: 64 words
pub const DEFAULT_BLOCK_SIZE_SHIFT: u32 = 6;

/// Default load factor of dense per-region forwarding tables
pub const DEFAULT_DENSE_LOAD_FACTOR: f64 = 0.9;

/// Forwarding encoding used to record `old address -> new address`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ForwardingMode {
    /// Full target pointer stored in the header word (classic headers only)
    Header,
    /// Two target bases per region plus an offset in the header word
    Sliding,
    /// Concurrent hash side table, first writer wins
    Hashed,
    /// Per-region open-addressing side tables sized by the plan phase
    Dense,
}

impl ForwardingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ForwardingMode::Header => "header",
            ForwardingMode::Sliding => "sliding",
            ForwardingMode::Hashed => "hashed",
            ForwardingMode::Dense => "dense",
        }
    }
}

impl fmt::Display for ForwardingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ForwardingMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "header" => Ok(ForwardingMode::Header),
            "sliding" => Ok(ForwardingMode::Sliding),
            "hashed" | "hash" => Ok(ForwardingMode::Hashed),
            "dense" => Ok(ForwardingMode::Dense),
            other => Err(ConfigError::InvalidValue {
                name: "forwarding",
                value: other.to_string(),
            }),
        }
    }
}

/// Which compaction algorithm the driver runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompactionStyle {
    /// Region compaction points, parallel workers, shadow regions
    Parallel,
    /// Single-threaded slide driven by a block-offset table
    Serial,
}

impl CompactionStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompactionStyle::Parallel => "parallel",
            CompactionStyle::Serial => "serial",
        }
    }
}

impl fmt::Display for CompactionStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompactionStyle {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "parallel" => Ok(CompactionStyle::Parallel),
            "serial" => Ok(CompactionStyle::Serial),
            other => Err(ConfigError::InvalidValue {
                name: "style",
                value: other.to_string(),
            }),
        }
    }
}

/// Main configuration for the compaction core
///
/// # Examples
///
/// ```rust
/// use fgc_compact::config::{CompactConfig, ForwardingMode};
///
/// let config = CompactConfig {
///     compact_headers: true,
///     forwarding: Some(ForwardingMode::Dense),
///     gc_threads: Some(4),
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct CompactConfig {
    /// Use the compact header layout
    ///
    /// Compact headers keep the class id in the mark word, so a full
    /// forwarding pointer no longer fits and `Sliding` becomes the default.
    ///
    /// Default: false
    pub compact_headers: bool,

    /// Force a forwarding encoding
    ///
    /// If None: classic headers use `Header`, compact headers use `Sliding`.
    ///
    /// Default: None
    pub forwarding: Option<ForwardingMode>,

    /// Compaction algorithm
    ///
    /// `Serial` requires classic headers: the block-offset table cannot
    /// account for objects growing by a hash word while they move.
    ///
    /// Default: Parallel
    pub style: CompactionStyle,

    /// Region size as a power of two, in words
    ///
    /// Range: 4..=23
    /// Default: 16 (64K words, 512KB)
    pub region_size_shift: u32,

    /// Number of regions in the heap
    ///
    /// Default: 64
    pub num_regions: usize,

    /// Block size of the block-offset table as a power of two, in words
    ///
    /// Must not exceed `region_size_shift`.
    /// Default: 6 (64 words)
    pub block_size_shift: u32,

    /// Load factor of dense per-region forwarding tables (0.5 - 1.0)
    ///
    /// Default: 0.9
    pub dense_load_factor: f64,

    /// Number of GC worker threads
    ///
    /// If None, uses all available CPUs.
    ///
    /// Default: None
    pub gc_threads: Option<usize>,

    /// Regions handed to a worker per claim during the forward phase
    ///
    /// Default: 4
    pub regions_per_claim: usize,

    /// Copy into a shadow buffer instead of waiting for a busy destination
    ///
    /// Default: true
    pub shadow_regions: bool,

    /// Spin/yield rounds before falling back to a shadow buffer
    ///
    /// Default: 64
    pub shadow_spin_limit: usize,

    /// Return the memory of regions that end a cycle free to the OS
    ///
    /// Default: false
    pub release_free_regions: bool,

    /// Print structured GC events to stdout
    ///
    /// Default: false
    pub verbose: bool,
}

impl Default for CompactConfig {
    fn default() -> Self {
        CompactConfig {
            // Headers
            compact_headers: false,
            forwarding: None,

            // Algorithm
            style: CompactionStyle::Parallel,

            // Layout
            region_size_shift: 16,
            num_regions: 64,
            block_size_shift: DEFAULT_BLOCK_SIZE_SHIFT,

            // Side tables
            dense_load_factor: DEFAULT_DENSE_LOAD_FACTOR,

            // Threading
            gc_threads: None,
            regions_per_claim: 4,
            shadow_regions: true,
            shadow_spin_limit: 64,

            // Debug
            release_free_regions: false,
            verbose: false,
        }
    }
}

impl CompactConfig {
    /// Validate configuration
    ///
    /// Checks ranges and rejects mode combinations the header layout cannot
    /// support.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use fgc_compact::config::{CompactConfig, ForwardingMode};
    ///
    /// let config = CompactConfig {
    ///     compact_headers: true,
    ///     forwarding: Some(ForwardingMode::Header),  // Invalid!
    ///     ..Default::default()
    /// };
    /// assert!(config.validate().is_err());
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Region validation
        if self.region_size_shift < MIN_REGION_SIZE_SHIFT
            || self.region_size_shift > MAX_REGION_SIZE_SHIFT
        {
            return Err(ConfigError::InvalidRegionSize(format!(
                "region_size_shift must be between {} and {}, got {}",
                MIN_REGION_SIZE_SHIFT, MAX_REGION_SIZE_SHIFT, self.region_size_shift
            )));
        }

        if self.num_regions == 0 {
            return Err(ConfigError::InvalidHeapSize(
                "num_regions must be > 0".to_string(),
            ));
        }

        if self.num_regions.checked_mul(self.region_bytes()).is_none() {
            return Err(ConfigError::InvalidHeapSize(
                "num_regions * region size overflows the address space".to_string(),
            ));
        }

        // Block validation
        if self.block_size_shift == 0 || self.block_size_shift > self.region_size_shift {
            return Err(ConfigError::InvalidBlockSize(format!(
                "block_size_shift must be between 1 and region_size_shift ({}), got {}",
                self.region_size_shift, self.block_size_shift
            )));
        }

        // Dense table validation
        if !(0.5..=1.0).contains(&self.dense_load_factor) {
            return Err(ConfigError::InvalidLoadFactor(format!(
                "dense_load_factor must be between 0.5 and 1.0, got {}",
                self.dense_load_factor
            )));
        }

        // GC threads validation
        if let Some(threads) = self.gc_threads {
            if threads == 0 {
                return Err(ConfigError::InvalidGcThreads(
                    "gc_threads must be > 0".to_string(),
                ));
            }
        }

        if self.regions_per_claim == 0 {
            return Err(ConfigError::InvalidGcThreads(
                "regions_per_claim must be > 0".to_string(),
            ));
        }

        // Mode compatibility
        if self.compact_headers && self.forwarding == Some(ForwardingMode::Header) {
            return Err(ConfigError::IncompatibleModes(
                "header forwarding needs a full pointer in the mark word; \
                 compact headers do not have room for one"
                    .to_string(),
            ));
        }

        if self.compact_headers && self.style == CompactionStyle::Serial {
            return Err(ConfigError::IncompatibleModes(
                "serial compaction cannot grow objects by a hash word; \
                 use classic headers or the parallel style"
                    .to_string(),
            ));
        }

        Ok(())
    }

    /// Build configuration from environment variables
    ///
    /// Overrides defaults with environment variables:
    /// - FGC_COMPACT_HEADERS
    /// - FGC_FORWARDING (header | sliding | hashed | dense)
    /// - FGC_COMPACTION_STYLE (parallel | serial)
    /// - FGC_REGION_SIZE_SHIFT
    /// - FGC_NUM_REGIONS
    /// - FGC_GC_THREADS
    /// - FGC_SHADOW_REGIONS
    /// - FGC_VERBOSE
    ///
    /// # Examples
    ///
    /// ```bash
    /// export FGC_COMPACT_HEADERS=1
    /// export FGC_FORWARDING=dense
    /// export FGC_GC_THREADS=8
    /// ```
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(val) = env_var("FGC_COMPACT_HEADERS") {
            config.compact_headers = parse_flag(&val);
        }

        if let Some(val) = env_var("FGC_FORWARDING") {
            match val.parse::<ForwardingMode>() {
                Ok(mode) => config.forwarding = Some(mode),
                Err(e) => log::warn!("ignoring FGC_FORWARDING: {}", e),
            }
        }

        if let Some(val) = env_var("FGC_COMPACTION_STYLE") {
            match val.parse::<CompactionStyle>() {
                Ok(style) => config.style = style,
                Err(e) => log::warn!("ignoring FGC_COMPACTION_STYLE: {}", e),
            }
        }

        if let Some(val) = env_var("FGC_REGION_SIZE_SHIFT") {
            if let Ok(shift) = val.parse::<u32>() {
                config.region_size_shift = shift;
            }
        }

        if let Some(val) = env_var("FGC_NUM_REGIONS") {
            if let Ok(regions) = val.parse::<usize>() {
                config.num_regions = regions;
            }
        }

        if let Some(val) = env_var("FGC_GC_THREADS") {
            if let Ok(threads) = val.parse::<usize>() {
                config.gc_threads = Some(threads);
            }
        }

        if let Some(val) = env_var("FGC_SHADOW_REGIONS") {
            config.shadow_regions = parse_flag(&val);
        }

        if let Some(val) = env_var("FGC_VERBOSE") {
            config.verbose = parse_flag(&val);
        }

        config
    }

    /// Forwarding encoding that will be active for this configuration
    pub fn forwarding_mode(&self) -> ForwardingMode {
        self.forwarding.unwrap_or(if self.compact_headers {
            ForwardingMode::Sliding
        } else {
            ForwardingMode::Header
        })
    }

    /// Number of worker threads used by the parallel phases
    pub fn worker_count(&self) -> usize {
        self.gc_threads.unwrap_or_else(num_cpus::get).max(1)
    }

    /// Region size in words
    pub fn region_words(&self) -> usize {
        1usize << self.region_size_shift
    }

    /// Region size in bytes
    pub fn region_bytes(&self) -> usize {
        self.region_words() * crate::WORD_SIZE
    }

    /// Total heap size in bytes
    pub fn heap_bytes(&self) -> usize {
        self.num_regions * self.region_bytes()
    }

    /// Smallest object the header layout allows, in words
    pub fn min_object_words(&self) -> usize {
        if self.compact_headers {
            1
        } else {
            2
        }
    }
}

/// Error types for configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid region size: {0}")]
    InvalidRegionSize(String),

    #[error("Invalid heap size: {0}")]
    InvalidHeapSize(String),

    #[error("Invalid block size: {0}")]
    InvalidBlockSize(String),

    #[error("Invalid load factor: {0}")]
    InvalidLoadFactor(String),

    #[error("Invalid GC threads: {0}")]
    InvalidGcThreads(String),

    #[error("Incompatible modes: {0}")]
    IncompatibleModes(String),

    #[error("Configuration does not match heap: {0}")]
    HeapMismatch(String),

    #[error("Invalid value for {name}: {value:?}")]
    InvalidValue { name: &'static str, value: String },
}

// ============================================================================
// HELPERS
// ============================================================================

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn parse_flag(val: &str) -> bool {
    val == "1" || val.eq_ignore_ascii_case("true") || val.eq_ignore_ascii_case("yes")
}
