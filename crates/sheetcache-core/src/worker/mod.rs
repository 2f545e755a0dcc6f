//! Background formula worker.
//!
//! [`RequestHandler`] holds the per-request logic and is usable on its own.
//! [`Worker::spawn`] moves a handler onto a dedicated thread, and
//! [`PendingRequests`] tracks outstanding ids on the caller's side.

mod handler;
mod pending;
mod thread;

pub use handler::RequestHandler;
pub use pending::PendingRequests;
pub use thread::{Worker, WorkerHandle, WorkerMessage, WorkerSender};
