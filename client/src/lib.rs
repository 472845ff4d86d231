//! # Predicting Client Library
//!
//! This library provides the client half of a server-authoritative movement
//! system. The client samples one input per local tick, applies it to its own
//! character immediately, and streams it to the server. Authoritative results
//! come back one per consumed input.
//!
//! ## Architecture Overview
//!
//! ### Client-Side Prediction
//! Every sampled input is appended to an unconfirmed log and the whole log is
//! replayed on top of the last authoritative state. The player sees the
//! outcome of its input on the same tick it was pressed.
//!
//! ### Server Reconciliation
//! Each result is adopted verbatim as the new baseline. Inputs up to the
//! result's tick are retired and the rest are replayed with the same motor and
//! step length the server uses, so a matching simulation produces no visible
//! correction and a divergent one snaps back in a single step.
//!
//! ### Flow Control
//! Results also report how many inputs are still queued on the server. A
//! hysteresis controller speeds the local tick up when that queue runs dry and
//! slows it down when it grows, keeping the server fed without adding latency.
//!
//! ## Module Organization
//!
//! ### Prediction Module (`prediction`)
//! - Unconfirmed input log with strictly increasing ticks
//! - Baseline adoption, purge and replay
//!
//! ### Flow Control Module (`flow_control`)
//! - Three-state hysteresis machine over the reported queue depth
//! - Local cadence derived from the nominal update rate
//!
//! ### Input Module (`input`)
//! - `InputSource` trait plus scripted and seeded random generators
//!
//! ### Game Module (`game`)
//! - `LocalPlayer`, the per-tick sample, predict and send step
//!
//! ### Network Module (`network`)
//! - TCP handshake and the adaptive-cadence tick loop
//! - Optional simulated latency that preserves ordering
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::input::ScriptedInput;
//! use client::network::{Client, ClientOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let mut client = Client::connect(
//!         "127.0.0.1:8080",
//!         Box::new(ScriptedInput::patrol()),
//!         ClientOptions::default(),
//!     )
//!     .await?;
//!
//!     let stats = client.run().await?;
//!     println!("{} corrections", stats.corrections);
//!     Ok(())
//! }
//! ```

pub mod flow_control;
pub mod game;
pub mod input;
pub mod network;
pub mod prediction;
