//! An M-Bus (EN 13757-3) master over TCP.
//!
//! Builds REQ_UD1/REQ_UD2 short frames, validates and parses the long
//! frames slaves answer with, and decodes their Variable Data
//! Structure: a Fixed Data Header followed by a sequence of DIF/VIF
//! encoded data records. [`master::Master`] is the entry point; the
//! other modules are usable standalone for offline decoding of
//! previously captured frames.

pub mod codec;
pub mod dif;
pub mod error;
pub mod fdh;
pub mod frame;
pub mod master;
pub mod record;
pub mod transport;
pub mod vif;

pub use error::MasterError;
pub use fdh::{FixedDataHeader, Medium, Status};
pub use master::{BusState, Master, MasterConfig, Readout, RequestOptions, ScanOptions};
pub use record::{DataRecord, Value};
pub use transport::ConnectionState;
