//! # hypnos-server
//!
//! HTTP server library for the hypnos timetable peripheral.
//!
//! This library provides the API handlers, logging set-up and state
//! management for the daemon. Protocol logic lives in `hypnos-core`.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod api;
pub mod logging;
pub mod state;
