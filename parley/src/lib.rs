//! Parley terminal client library.

pub mod config;
pub mod net;
