//! Compact Module - Moving Live Objects Down
//!
//! Two algorithms share the forward/adjust/compact structure:
//!
//! - **Parallel** (`parallel`): regions are claimed by workers, each worker
//!   slides objects through its own `CompactionPoint`, forwardings go through
//!   the `Forwarding` facade, and blocked destinations are bypassed with
//!   shadow buffers.
//! - **Serial** (`serial`): one thread, no forwarding state at all; a
//!   `BlockOffsetTable` derives every destination from the liveness bitmap.
//!
//! `CompactionDriver` picks one per `CompactionStyle` and runs the cycle.

pub mod adjust;
pub mod block_offset;
pub mod copy;
pub mod driver;
pub mod humongous;
pub mod parallel;
pub mod plan;
pub mod point;
pub mod serial;
pub mod shadow;
pub mod task;

pub use block_offset::{BlockOffsetTable, CompactionSpace};
pub use copy::{MoveRecord, ObjectCopier};
pub use driver::CompactionDriver;
pub use humongous::HumongousMove;
pub use parallel::{ParallelCompactor, ParallelSettings};
pub use plan::{CompactionPlan, RegionSummary};
pub use point::{CompactionPoint, ForwardContext, Placement, PointState};
pub use serial::SerialCompactor;
pub use shadow::ShadowRegion;
pub use task::{RegionClaimer, TaskQueue};
