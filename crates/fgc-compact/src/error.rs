//! Error Module - Compaction Error Types
//!
//! Two classes of failure exist in the compaction core:
//!
//! ## Recoverable errors (`CompactError`)
//! - `OutOfMemory` - allocation request cannot be satisfied
//! - `HeapInitialization` - the heap mapping could not be reserved
//! - `InvalidPointer` - address outside the managed heap
//! - `RegionAllocationFailed` - no free region run for a humongous object
//! - `InvalidArgument` - bad class layout or region index
//! - `Configuration` - rejected `CompactConfig`
//!
//! These only occur at the edges: heap construction, allocation, class
//! registration and driver construction.
//!
//! ## Fatal invariant violations (`fatal!` / `guarantee!`)
//! Dense table overflow, compaction sequence exhaustion, a third sliding
//! target region, arena exhaustion and inconsistent double forwarding mean
//! the heap is already corrupt. They are logged at `error` level and abort
//! the collection with a panic; there is no partial-cycle recovery.

use crate::config::ConfigError;
use thiserror::Error;

/// Main error type for all compaction-core operations
///
/// # Examples
///
/// ```rust
/// use fgc_compact::error::CompactError;
///
/// fn handle_error(err: CompactError) {
///     match err {
///         CompactError::OutOfMemory { requested, available } => {
///             eprintln!("OOM: requested {}, available {}", requested, available);
///         }
///         _ => eprintln!("Other error: {}", err),
///     }
/// }
/// ```
#[derive(Debug, Error)]
pub enum CompactError {
    /// Out of memory - heap exhaustion
    ///
    /// **When returned:** No region has room for the requested words
    ///
    /// **Recovery strategy:** Run a compaction cycle and retry the allocation
    #[error("Out of memory: requested {requested} words, available {available} words")]
    OutOfMemory { requested: usize, available: usize },

    /// Heap initialization failed
    ///
    /// **When returned:** The anonymous mapping backing the heap could not be created
    ///
    /// **Recovery strategy:** Cannot recover - terminate gracefully
    #[error("Heap initialization failed: {0}")]
    HeapInitialization(String),

    /// Invalid pointer address
    ///
    /// **When returned:** A root or object address lies outside the heap or is misaligned
    ///
    /// **Recovery strategy:** Skip the pointer, log warning
    #[error("Invalid pointer address: {address:#x}")]
    InvalidPointer { address: usize },

    /// Region allocation failed
    ///
    /// **When returned:** No contiguous run of free regions for a humongous object
    ///
    /// **Recovery strategy:** Compact the heap (humongous objects slide down) and retry
    #[error("Region allocation failed: {reason}")]
    RegionAllocationFailed { reason: String },

    /// Invalid argument
    ///
    /// **When returned:** Function argument fails validation
    ///
    /// **Example scenarios:**
    /// - Class smaller than its header
    /// - Reference offset inside the header
    /// - Region index past the end of the heap
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration error
    ///
    /// **When returned:** `CompactConfig::validate` rejected the configuration,
    /// or the configuration does not match the heap it is applied to
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    /// Internal error - indicates a bug in the compaction core
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CompactError {
    /// Check if this error is recoverable
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CompactError::OutOfMemory { .. } | CompactError::RegionAllocationFailed { .. }
        )
    }

    /// Check if this error indicates a bug in the code
    pub fn is_bug(&self) -> bool {
        matches!(self, CompactError::Internal(_))
    }
}

/// Result type alias for compaction-core operations
pub type Result<T> = std::result::Result<T, CompactError>;

/// Abort on a broken collector invariant.
///
/// Logs the message at `error` level before panicking so the diagnostic
/// survives even when the panic is caught by a worker scope.
#[macro_export]
macro_rules! fatal {
    ($($arg:tt)*) => {{
        let message = format!($($arg)*);
        ::log::error!("fatal: {}", message);
        panic!("{}", message)
    }};
}

/// Check a collector invariant, aborting with [`fatal!`] when it does not hold.
#[macro_export]
macro_rules! guarantee {
    ($cond:expr, $($arg:tt)*) => {
        if !$cond {
            $crate::fatal!($($arg)*);
        }
    };
}

/// Ensure condition is true, otherwise return error
#[macro_export]
macro_rules! ensure {
    ($cond:expr, $err:expr) => {
        if !$cond {
            return Err($err.into());
        }
    };
}
