//! dvbtune library - Linux DVB frontend tuning and demux filtering
//!
//! This library drives a DVB adapter through either the legacy
//! (`FE_SET_FRONTEND`) or the property (`FE_SET_PROPERTY`) tuning protocol,
//! waits for a stable lock, manages PES and section filters on the demux,
//! and reads the resulting transport stream from the DVR device.

pub mod config;
pub mod device;
pub mod driver;
pub mod error;
pub mod filter;
pub mod frontend;
pub mod manager;
mod reader;
pub mod session;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use config::{ConfigError, TunerConfig};
pub use device::{AdapterProvider, BrokerProvider, DescriptorProvider, DeviceKind};
pub use driver::{FrontendDriver, FrontendType, LinuxDvb};
pub use error::{Result, TunerError};
pub use filter::{FilterType, PAT_PID};
pub use frontend::{
    intermediate_frequency, DeliverySystem, LegacyModulation, PendingTune, SatelliteTune,
    TuneOutcome,
};
pub use manager::DvbManager;
pub use session::TunerSession;
