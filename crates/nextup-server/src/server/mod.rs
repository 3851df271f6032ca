//! HTTP and WebSocket transport for the ticket coordinator.
//!
//! ## Structure
//!
//! - [`config`] - command line and environment settings.
//! - [`ledger`] - SQLite persistence for allocation records.
//! - [`routes`] - router, identity extraction, HTTP handlers.
//! - [`socket`] - ticket and board WebSocket loops.
//! - [`state`] - shared handles and startup restore.
//! - [`telemetry`] - logging, OpenTelemetry export, metric helpers.

pub mod config;
pub mod ledger;
pub mod routes;
pub mod socket;
pub mod state;
pub mod telemetry;
