//! Powermap - Organizational Power-Map Engine
//!
//! Models the informal power structure of an organization: normalizes
//! communication metadata into relationship signals, maintains a
//! per-tenant weighted influence graph with decay, computes centrality
//! and brokerage metrics, and composes ranked insight reports. Sensitive
//! notes are protected with field-level encryption.

pub mod cli;
pub mod config;
pub mod crypto;
pub mod error;
pub mod graph;
pub mod insight;
pub mod metrics;
pub mod normalizer;
pub mod tenant;

pub use error::{PowerMapError, Result};
