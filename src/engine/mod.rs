//! Remote engine access: wire types, the `EngineClient` seam and its HTTP implementation.

pub mod client;
pub mod dto;
pub mod interceptor;

pub use client::{EngineClient, HttpEngineClient};
pub use dto::*;
pub use interceptor::{BasicAuthProvider, RequestInterceptor};
