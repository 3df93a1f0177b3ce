//! # beaconscan-server
//!
//! HTTP server library for beaconscan.
//!
//! This library provides the API handlers, collaborator selection and state
//! management used by the `beaconscan-server` binary.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod api;
pub mod backend;
pub mod logging;
pub mod state;
