//! # periscope-core
//!
//! Core library for periscope - a terminal client for monitoring and
//! steering a long-running remote agent backend.
//!
//! This library provides:
//! - The synchronization engine: poll loop, snapshot reconciliation,
//!   optimistic ledger, session/notification tracking
//! - The HTTP request gateway (and the trait seam to mock it)
//! - Configuration management
//! - Logging infrastructure
//!
//! ## Architecture
//!
//! Three sources of truth conflict and must be reconciled: locally-issued
//! messages the server has not acknowledged, server-pushed incremental
//! deltas that can arrive out of order, and full-state resets when the
//! backend's log identity changes. The engine resolves them with one
//! rule set: the server owns every positioned slot, versions only move
//! forward, and speculative entries live in their own collection that is
//! merged with the authoritative log at the read boundary only.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use periscope_core::{Config, HttpGateway, SyncEngine};
//!
//! # async fn demo() -> periscope_core::Result<()> {
//! let config = Config::load()?;
//! let gateway = Arc::new(HttpGateway::new(&config.server)?);
//! let engine = Arc::new(SyncEngine::new(gateway, &config));
//!
//! Arc::clone(&engine).start();
//! engine.send_message("status report, please", Vec::new()).await?;
//! // ... render engine.snapshot() until done ...
//! engine.stop();
//! # Ok(())
//! # }
//! ```

// Re-export commonly used items at the crate root
pub use config::Config;
pub use engine::{ApplyOutcome, CycleOutcome, EngineSnapshot, SyncEngine};
pub use error::{Error, Result};
pub use gateway::{Gateway, HttpGateway};
pub use types::*;

// Public modules
pub mod config;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod types;
