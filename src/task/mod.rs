//! Locked tasks, the per-task service and the handler seam.

pub mod handler;
pub mod model;
pub mod service;

pub use handler::{ExternalTaskHandler, HandlerFn, handler_fn};
pub use model::ExternalTask;
pub use service::TaskService;
