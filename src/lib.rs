//! # rbatch - Bounded-Concurrency Batch Runner for Network Devices
//!
//! `rbatch` runs a batch of independent work items (typically "connect to this
//! device, run these commands") with a fixed number of concurrent slots. A
//! failing, hanging or panicking item never aborts the batch: its failure is
//! classified and stored in the report next to the results of its siblings.
//!
//! ## Features
//!
//! - **Admission Control**: At most `max_concurrency` items run at once; the rest queue
//! - **Failure Isolation**: Errors, timeouts and panics are captured per item
//! - **Ordered Reports**: Results come back in submission order with timing and counts
//! - **Cancellation**: A batch-level token stops dispatching queued items
//! - **Recording & Replay**: JSONL batch recordings that can be replayed offline
//! - **Device Fan-out**: JSON inventories and an SSH executor for common CLI platforms
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rbatch::batch::{ItemContext, WorkItem, run_batch};
//! use rbatch::error::OperationError;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let items = ["Router-HQ", "Switch-Access-1", "Firewall-DMZ"]
//!         .into_iter()
//!         .map(|name| {
//!             WorkItem::from_fn(name, 3usize, |ctx: ItemContext<usize>| async move {
//!                 tokio::time::sleep(Duration::from_millis(50)).await;
//!                 Ok::<_, OperationError>(format!(
//!                     "Configured {} with {} commands.",
//!                     ctx.id, ctx.payload
//!                 ))
//!             })
//!         })
//!         .collect::<Vec<_>>();
//!
//!     let report = run_batch(items, 2, Some(Duration::from_secs(5))).await?;
//!     for line in report.lines() {
//!         println!("{line}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Main Components
//!
//! - [`batch::BatchRunner`] - Runs work items with bounded concurrency
//! - [`batch::BatchReport`] - Per-item outcomes in submission order
//! - [`device::SshExecutor`] - Connect, run, disconnect executor for network devices
//! - [`error::BatchError`] / [`error::OperationError`] - Runner and per-item errors
//! - [`config`] - Runner defaults and SSH algorithm preferences

pub mod batch;
pub mod config;
pub mod device;
pub mod error;
