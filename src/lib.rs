//! Tollbooth - Per-tenant API Rate Limiting Service
//!
//! This crate implements a rate limiter that counts requests per
//! (organization, user, endpoint, window) over calendar-aligned windows,
//! rolls windows over lazily, and keeps an append-only audit trail of every
//! accounted request. Absence of a configured limit always fails open.

pub mod api;
pub mod config;
pub mod error;
pub mod ratelimit;
pub mod store;
