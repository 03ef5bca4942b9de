//! # vasco-tap
//!
//! Remote job service binding for the chunk orchestrator.
//!
//! This crate provides:
//! - [`TapClient`], a [`JobService`](vasco_core::JobService) over the IVOA
//!   TAP async (UWS) and sync endpoints
//! - VOTable encoding of chunk positions for `TAP_UPLOAD`
//! - Endpoint configuration from TOML or the environment
//! - A scripted in-memory service for tests (feature `mock`)
//!
//! # Feature Flags
//!
//! - `mock`: Enable [`mock::MockJobService`]
//!
//! # Example
//!
//! ```rust,no_run
//! use vasco_core::{ChunkUnit, JobService};
//! use vasco_tap::{TapClient, TapConfig};
//!
//! #[tokio::main]
//! async fn main() -> vasco_core::Result<()> {
//!     let client = TapClient::new(TapConfig::from_env()?)?;
//!     let chunk = ChunkUnit::from_input("chunks/positions_chunk_00001.csv")?;
//!     let handle = client.submit(&chunk).await?;
//!     println!("{}", client.phase(&handle).await?);
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod votable;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use client::TapClient;
pub use config::{TapConfig, DEFAULT_QUERY};
pub use votable::positions_to_votable;
