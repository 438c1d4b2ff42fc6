//! 同步模型：命令、事件、聚合快照与回执
//!
mod acknowledgment;
mod aggregate;
mod command;
mod event;
mod ids;

pub use acknowledgment::Acknowledgment;
pub use aggregate::Aggregate;
pub use command::{Command, Operation, RawCommand};
pub use event::Event;
pub use ids::{AggregateId, RequestId};
