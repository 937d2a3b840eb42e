//! Core domain model for the Encore booking engine.
//!
//! This crate holds everything the infrastructure crates agree on and
//! nothing they disagree on: the seat and reservation state machines, the
//! error taxonomy shared by every reservation strategy, the outbound event
//! types, and the cache key scheme. It performs no I/O.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   ┌───────────────┐   ┌────────────────┐
//! │ encore-redis │   │ encore-       │   │ encore-        │
//! │ (admission,  │   │ postgres      │   │ redpanda       │
//! │  locks)      │   │ (inventory)   │   │ (events)       │
//! └──────┬───────┘   └──────┬────────┘   └──────┬─────────┘
//!        │                  │                   │
//!        └──────────┬───────┴───────────────────┘
//!                   ▼
//!            ┌─────────────┐
//!            │ encore-core │◄── shared vocabulary
//!            └─────────────┘
//! ```
//!
//! The relational rows owned by `encore-postgres` are the source of truth
//! for seat and reservation state; the cache-resident structures keyed by
//! [`keys`] are secondary, TTL-bounded mirrors.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod domain;
pub mod error;
pub mod events;
pub mod keys;

pub use domain::{ReservationStatus, SeatStatus};
pub use error::{BookingError, Result, StatusClass};
pub use events::{CancelReason, ReservationCancelled, ReservationCompleted};
