//! ombaro-booking - Booking lifecycle and therapist-assignment engine
//!
//! The hard core of a spa/wellness marketplace:
//! - Capacity model with tentative holds and firm reservations
//! - Booking state machine with an append-only status history
//! - Assignment resolver matching confirmed bookings to therapists
//! - Per-resource concurrency coordination (vendor, therapist)
//! - A single façade exposed over HTTP with axum
//!
//! Identity, payments, notifications, and the service catalog are
//! external collaborators consumed at trait boundaries.

pub mod api;
pub mod assignment;
pub mod booking;
pub mod capacity;
pub mod catalog;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod notify;
pub mod service;
pub mod types;

pub use error::{Error, Result};
