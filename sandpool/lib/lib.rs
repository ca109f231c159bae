//! `sandpool` is an orchestration service for ephemeral, per-session compute sandboxes.
//!
//! # Overview
//!
//! sandpool sits in front of an external sandbox provisioner and owns everything
//! the provisioner cannot be trusted with:
//! - Admission control (hourly rate window + per-kind concurrency ceilings)
//! - Run lifecycle (a monotonic state machine per provisioning attempt)
//! - Warm-pool acquisition with reconciliation against observed truth
//! - Live progress distribution (per-run replay buffer + SSE fan-out)
//! - Time-bounded auto-cleanup of expired sandboxes
//! - Durable run history
//!
//! # Architecture
//!
//! sandpool consists of several key components:
//!
//! - **RateLimiter**: atomic admission gate over shared counters
//! - **LifecycleRegistry**: authoritative in-memory run table and state machine
//! - **PoolCoordinator**: warm acquisition, serialized creation, metric reconciliation
//! - **EventBus**: per-run publish/subscribe with replay-on-connect
//! - **CleanupScheduler**: periodic expiry sweep with a shutdown hook
//! - **HistoryStore**: best-effort durable record of terminal runs
//! - **Server**: thin axum HTTP/SSE surface composing the above
//!
//! # Usage Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use sandpool::{
//!     config::OrchestratorConfig,
//!     orchestration::Orchestrator,
//!     pool::HttpProvider,
//!     registry::RunKind,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = OrchestratorConfig::from_env()?;
//!     let provider = Arc::new(HttpProvider::new("http://provisioner.local", None)?);
//!     let history = sandpool::history::HistoryStore::open_default().await?;
//!     let orchestrator = Arc::new(Orchestrator::new(config, provider, history));
//!
//!     let (run_id, stream_url) = orchestrator.launch(RunKind::Cold, "python", true).await?;
//!     println!("launched {run_id}, events at {stream_url}");
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! - [`config`] - Configuration types, defaults and environment loading
//! - [`events`] - Run events and the replaying event bus
//! - [`history`] - Durable run history and rate-window persistence
//! - [`limiter`] - Rate and concurrency admission control
//! - [`orchestration`] - Orchestrator context and background schedulers
//! - [`pool`] - Provider boundary and warm-pool coordination
//! - [`registry`] - Run model and lifecycle state machine
//! - [`server`] - HTTP/SSE surface
//! - [`utils`] - Common utilities and helpers

#![warn(missing_docs)]

mod error;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub mod config;
pub mod events;
pub mod history;
pub mod limiter;
pub mod orchestration;
pub mod pool;
pub mod registry;
pub mod server;
pub mod utils;

pub use error::*;

#[cfg(test)]
pub(crate) mod testing;
