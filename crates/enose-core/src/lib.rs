//! # E-Nose Core Library
//!
//! Host side of the E-Nose gas sensor array.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - Device discovery and identification over serial ports
//! - A managed session with keep-alive, a background reader and dispatcher
//! - A rolling buffer of recent samples for live display
//! - CSV recording of sensor samples
//! - A simulated device for running without hardware
//!
//! ## Example
//!
//! ```rust,ignore
//! use enose_core::prelude::*;
//!
//! let mut session = SessionManager::new(SessionConfig::default());
//! session.connect()?;
//!
//! let log = session.start_recording(None)?;
//! println!("recording to {}", log.display());
//!
//! // Later, from a UI timer
//! let snapshot = session.snapshot();
//! println!("{} samples buffered", snapshot.len());
//!
//! session.stop_recording()?;
//! session.disconnect();
//! ```

pub mod datalog;
pub mod demo;
pub mod protocol;
pub mod session;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::datalog::{BufferSnapshot, RecordingSummary, SensorSample};
    pub use crate::demo::{DemoBackend, DemoOptions};
    pub use crate::protocol::{DeviceSettings, PortBackend, PortInfo, ProtocolError};
    pub use crate::session::{
        SessionConfig, SessionEvent, SessionManager, SessionState, StopReason,
    };
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
