//! HTTP façade: a thin axum adapter over the orchestrator
//!
//! Handlers validate and translate; the orchestrator and executor own the
//! semantics. The SSE endpoint reads the store only and never shares
//! mutable state with the worker pool.

pub mod error;
pub mod models;
pub mod request_id;
pub mod server;
pub mod services;
pub mod sse;
pub mod state;

pub use error::ApiError;
pub use server::{build_state, router, run, run_worker};
pub use state::AppState;
