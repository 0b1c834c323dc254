//! # loglink - application log mirroring for serial display devices
//!
//! loglink keeps an in-memory log of an application's entries and mirrors it
//! onto a small display device over a half-duplex serial protocol built from
//! ASCII control octets. The device drives the view: it can scroll live
//! entries, page through history, or expand a single entry to its long text.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use loglink::bridge::DeviceLog;
//! use loglink::config::Config;
//! use loglink::link::SerialTransport;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     let transport = SerialTransport::open(&config.serial)?;
//!     let link = DeviceLog::start(transport, config.link)?;
//!
//!     let log = link.handle();
//!     log.warn("disk", "low space", "3% free on /data");
//!
//!     link.shutdown();
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`bridge`] - `DeviceLog` lifecycle and the cloneable `LogHandle`
//! - [`link`] - protocol engine, frame codec, receive buffer and transports
//! - [`store`] - log entries and the append-only store
//! - [`display`] - device view state and the outgoing queue
//! - [`logger`] - `log` backend that mirrors records onto the device
//! - [`config`] - configuration management and validation
//! - [`metrics`] - per-link counters
//!
//! ## Architecture
//!
//! ```text
//! app threads ──append──▶ LinkState (store + view + queue) ◀──┐
//!                                                             │
//!   serial reader thread ──push──▶ ReceiveBuffer ──read──▶ engine thread ──write──▶ device
//! ```
//!
//! One engine thread owns the protocol; application threads only take the
//! shared state lock for the duration of an append.
pub mod bridge;
pub mod config;
pub mod display;
pub mod link;
pub mod logger;
pub mod logutil;
pub mod metrics;
pub mod store;
