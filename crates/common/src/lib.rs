//! Common utilities for ds-oc
//!
//! This crate provides functionality shared by the daemon and its tests:
//! error handling, logging setup, and the async channel bridge between the
//! Tokio runtime and the USB worker thread.

pub mod channel;
pub mod error;
pub mod logging;

pub use channel::{TunerBridge, TunerCommand, TunerEvent, TunerWorker, create_tuner_bridge};
pub use error::{Error, Result};
pub use logging::setup_logging;
