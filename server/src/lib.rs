//! # Authority Server Library
//!
//! This library provides the authoritative half of a predicted character
//! movement system. Clients stream one input per local tick; the server
//! queues them per connection, consumes them at a fixed cadence, and answers
//! every consumed input with the resulting authoritative state plus the
//! number of inputs still waiting in that connection's queue.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Simulation
//! The server runs the definitive character step. Clients adopt every
//! result verbatim and replay their unacknowledged inputs on top of it.
//!
//! ### Input Queueing
//! Each connection owns a FIFO input buffer. The simulation consumes at most
//! one input per connection per sub-step, so the reported queue depth is a
//! direct measure of how far ahead of the server a client is running. Clients
//! feed that depth into their flow-rate controller.
//!
//! ### Connection Lifecycle
//! Connections are accepted, registered on handshake, and removed on
//! disconnect or timeout. Removing a connection discards its queued inputs
//! immediately; no result is ever produced for them.
//!
//! ## Module Organization
//!
//! ### Input Buffer Module (`input_buffer`)
//! - Per-connection FIFO with optional hard length cap
//!
//! ### Authority Module (`authority`)
//! - Entity registry keyed by connection id
//! - Tick/update-rate scheduling with whole sub-steps per tick
//! - The per-sub-step consume, advance, batch-simulate, report cycle
//!
//! ### Client Manager Module (`client_manager`)
//! - Connection id assignment and capacity limits
//! - Outbound queues and idle timeout detection
//!
//! ### Network Module (`network`)
//! - TCP listener with per-connection reader and writer tasks
//! - The single-task main loop that owns all simulation state
//!
//! ## Timing Model
//!
//! The server loop wakes at the update rate. Every `update_rate / tick_rate`
//! wake-ups it executes that many sub-steps back to back, each sub-step
//! advancing the world by `1 / update_rate` seconds. With the defaults of
//! 30 Hz tick and 60 Hz update this is two sub-steps every other wake-up.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::Server;
//! use shared::{KinematicMotor, SimulationConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let mut server = Server::new(
//!         "127.0.0.1:8080",
//!         SimulationConfig::default(),
//!         Box::new(KinematicMotor::default()),
//!         32,
//!     )
//!     .await?;
//!
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod authority;
pub mod client_manager;
pub mod input_buffer;
pub mod network;
