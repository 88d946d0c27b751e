//! Tollgate - Request Admission Limiter
//!
//! This crate implements fixed-window request admission for an HTTP API.
//! Each named policy counts requests per caller identifier inside a window
//! anchored at the caller's first request, rejecting once the count exceeds
//! the policy quota. Entries live in an in-process map or in a shared Redis
//! instance so that several server processes can enforce one quota.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
