//! Durable work queue and worker pool

pub mod broker;
pub mod store;
pub mod worker;

pub use broker::WorkBroker;
pub use store::{QueueError, WorkQueue, WorkTicket};
pub use worker::spawn_workers;
