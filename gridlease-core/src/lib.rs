//! # gridlease-core
//!
//! Reservation and sale coordination for a shared grid of cells.
//! Clients take short-lived locks on cells, renew them while they check
//! out, and finalize them into permanent sales. All coordination runs
//! through compare-and-swap on a single versioned document, so any store
//! that can do an atomic conditional write can back the grid.

pub mod client;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod finalize;
pub mod heartbeat;
pub mod infrastructure;
#[cfg(feature = "http")]
#[path = "infrastructure_http.rs"]
pub mod infrastructure_http;
#[path = "infrastructure_in_memory.rs"]
pub mod infrastructure_in_memory;
#[cfg(feature = "sqlite")]
#[path = "infrastructure_sqlite.rs"]
pub mod infrastructure_sqlite;
pub mod reconciler;
pub mod retry;
pub mod state;
pub mod types;
pub mod validation;

pub use client::{GridClient, ReservationApi};
pub use error::{GridError, GridResult};

#[cfg(test)]
mod state_test;
#[cfg(test)]
mod reconciler_test;
