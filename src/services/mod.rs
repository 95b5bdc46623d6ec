//! Engine components, leaves first: the remote API clients, the lease and
//! registry stores, then the orchestration layers built on them.

pub mod api;
pub mod auth;
pub mod endpoint;
pub mod media_types;
pub mod upload_client;
pub mod gateway;
pub mod error;
pub mod lock_manager;
pub mod registry;
pub mod reaper;
pub mod orchestrator;
pub mod batch;
pub mod rewriter;
pub mod engine;
pub mod supervisor;
