//! 核心层：错误与恢复、工具并发调度、关闭信号、组件装配

pub mod builder;
pub mod error;
pub mod recovery;
pub mod shutdown;
pub mod task_scheduler;

pub use builder::PlannerBuilder;
pub use error::{PlanningError, RecoveryAction};
pub use recovery::{PlanningFault, RecoveryEngine};
pub use shutdown::{ShutdownManager, ShutdownReason};
pub use task_scheduler::TaskScheduler;
