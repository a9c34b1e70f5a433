//! HTTP surface of the exporter
//!
//! Serves the metrics endpoint alongside health and landing metadata.

pub mod handlers;
