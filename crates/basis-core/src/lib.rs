//! Core control plane for the Basis bot.
//!
//! This crate is intentionally transport-agnostic. Discord lives behind the
//! ports in [`ports`], implemented by the adapter crate.

pub mod commands;
pub mod config;
pub mod domain;
pub mod errors;
pub mod events;
pub mod export;
pub mod logging;
pub mod ports;
pub mod presence;
pub mod reporting;
pub mod shutdown;
pub mod utils;

pub use errors::{DeliveryError, Error, Result};
