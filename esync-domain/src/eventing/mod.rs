//! 事件子系统（eventing）
//!
//! 提供总线消息与发布/订阅的基础抽象与实现：
//! - `BusMessage`/`IdempotencyKey`：统一线上形态与幂等发布键；
//! - `EventBus`：按主题发布/订阅，投递需显式确认；
//! - `InMemoryEventBus`：进程内实现；
//! - `EventHandler`/`EventDispatcher`：下游事件消费与去重分发。
//!
//! 该模块仅定义协议与进程内实现，不绑定具体传输，可对接任意消息系统。
//!
pub mod bus;
mod bus_inmemory;
mod delivery;
pub mod dispatcher;
pub mod handler;
mod message;

pub use bus::{EventBus, PublishReceipt};
pub use bus_inmemory::InMemoryEventBus;
pub use delivery::{Acknowledger, Delivery};
pub use dispatcher::EventDispatcher;
pub use handler::{EventHandler, HandledAggregateType};
pub use message::{BusMessage, IdempotencyKey};
