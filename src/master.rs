//! Master facade (spec.md §4.9).
//!
//! Ties [`crate::transport`], [`crate::frame`], [`crate::fdh`] and
//! [`crate::record`] together into the two operations a caller actually
//! wants: read one slave's data records, or scan a bus for primary
//! addresses that answer.

use std::time::Duration;

use log::{info, warn};

use crate::error::{MasterError, StateError};
use crate::fdh::{decode_fdh, FixedDataHeader};
use crate::frame::{build_req_ud2, parse_response, Response, VALID_RESPONSE_CONTROL_CODES};
use crate::record::{parse_records, DataRecord, DecodeOptions};
use crate::transport::{ConnectionState, Transport};

/// Connection/config parameters for a [`Master`] (spec.md §6).
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MasterConfig {
    pub host: String,
    pub port: u16,
    /// Display name, used only in log lines (spec.md §6).
    pub name: String,
    pub read_timeout: Duration,
    pub max_retries: u32,
    /// Connect immediately in [`Master::new`] (spec.md §6, §4.8;
    /// `examples/original_source/pymbus/MbusTcpMaster.py`'s
    /// `__init__`/`auto_connect`). A failed auto-connect is logged, not
    /// raised: `connect()` itself never panics or aborts construction.
    pub auto_connect: bool,
}

impl Default for MasterConfig {
    fn default() -> Self {
        MasterConfig {
            host: "localhost".to_string(),
            port: 10001,
            name: String::new(),
            read_timeout: Duration::from_secs(3),
            max_retries: 3,
            auto_connect: true,
        }
    }
}

/// Per-call options for [`Master::get_all_fields`] (spec.md §6, §3).
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RequestOptions {
    pub extensive_mode: bool,
    pub scale_results: bool,
    /// Stop after decoding the Fixed Data Header; don't parse data
    /// records (spec.md §6). Used by [`Master::scan_slaves_primary`] so
    /// a reachable-but-garbled slave can't fail the whole scan on a
    /// record it was never asked to decode.
    pub header_only: bool,
}

impl Default for RequestOptions {
    fn default() -> Self {
        RequestOptions {
            extensive_mode: false,
            scale_results: true,
            header_only: false,
        }
    }
}

/// Per-call options for [`Master::scan_slaves_primary`] (spec.md §6,
/// §4.9).
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScanOptions {
    /// Socket read timeout used for the duration of the scan, restored
    /// to the master's configured timeout on exit (spec.md §4.9).
    pub scan_timeout: Duration,
    /// Stop scanning once this many slaves have answered.
    pub stop_at: usize,
}

impl Default for ScanOptions {
    fn default() -> Self {
        ScanOptions {
            scan_timeout: Duration::from_secs_f64(1.0),
            stop_at: 250,
        }
    }
}

/// Bus-interaction state, distinct from the transport's connection
/// state (spec.md §3): tracks what the master is doing with an already
/// open connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BusState {
    Idle,
    Sending,
    Receiving,
    Retrying,
}

/// One slave's full readout (spec.md §3).
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Readout {
    pub header: FixedDataHeaderSummary,
    pub records: Vec<DataRecord>,
}

/// Plain-data mirror of [`FixedDataHeader`] minus the `Medium`/`Status`
/// enums, so `Readout` can derive `serde` without making those enums
/// carry a stable wire representation they don't need elsewhere.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FixedDataHeaderSummary {
    pub identification: String,
    pub manufacturer: String,
    pub version: u8,
    pub medium: String,
    pub access_number: u8,
    pub status: String,
    pub signature_hex: String,
}

impl From<FixedDataHeader> for FixedDataHeaderSummary {
    fn from(f: FixedDataHeader) -> Self {
        FixedDataHeaderSummary {
            identification: f.identification,
            manufacturer: f.manufacturer,
            version: f.version,
            medium: f.medium.to_string(),
            access_number: f.access_number,
            status: format!("{:?}", f.status),
            signature_hex: f.signature_hex,
        }
    }
}

/// Entry point for talking to an M-Bus TCP gateway (spec.md §4.9).
pub struct Master {
    transport: Transport,
    bus_state: BusState,
}

impl Master {
    /// Construct a master and, if `config.auto_connect` is set, connect
    /// immediately (spec.md §6). Never fails: a failed auto-connect is
    /// logged and leaves the master disconnected, matching
    /// `examples/original_source/pymbus/MbusTcpMaster.py`'s `connect()`,
    /// which returns `False` on failure rather than raising.
    pub fn new(config: MasterConfig) -> Self {
        let name = config.name.clone();
        let mut master = Master {
            transport: Transport::new(config.host, config.port, config.read_timeout, config.max_retries),
            bus_state: BusState::Idle,
        };
        if config.auto_connect {
            if let Err(e) = master.connect() {
                warn!("{}-- auto_connect failed: {}", name, e);
            }
        }
        master
    }

    pub fn connect(&mut self) -> Result<(), MasterError> {
        self.transport.connect()?;
        Ok(())
    }

    pub fn bus_state(&self) -> BusState {
        self.bus_state
    }

    fn require_connected(&self) -> Result<(), MasterError> {
        if self.transport.state() != ConnectionState::Connected {
            return Err(StateError(self.transport.state()).into());
        }
        Ok(())
    }

    /// Send REQ_UD2 to `slave_address` and decode the Fixed Data Header
    /// plus every data record in the response (spec.md §4.9).
    pub fn get_all_fields(&mut self, slave_address: u8, options: RequestOptions) -> Result<Readout, MasterError> {
        self.require_connected()?;

        self.bus_state = BusState::Sending;
        let req = build_req_ud2(slave_address);
        if let Err(e) = self.transport.send(&req) {
            self.bus_state = BusState::Retrying;
            return Err(e.into());
        }

        self.bus_state = BusState::Receiving;
        // A first read of just the header is enough to learn the
        // declared length; re-read the rest once it's known (spec.md
        // §4.7/§4.8).
        let prefix = self.transport.recv_response_start(4)?;
        if prefix.len() == 1 {
            // Single-char ack where a long frame was expected.
            warn!("slave {} acked instead of answering REQ_UD2", slave_address);
            self.bus_state = BusState::Idle;
            return Err(crate::error::FrameError::BadStartByte(prefix[0]).into());
        }
        let declared_len = prefix[1] as usize;
        let total_len = declared_len + 6;
        let remaining = self.transport.recv_exact(total_len - prefix.len())?;

        let mut full = prefix;
        full.extend_from_slice(&remaining);

        let response = parse_response(&full)?;
        self.bus_state = BusState::Idle;

        let envelope = match response {
            Response::Long(env) => env,
            Response::Ack => {
                return Err(crate::error::FrameError::BadStartByte(0xE5).into());
            }
        };

        if !VALID_RESPONSE_CONTROL_CODES.contains(&envelope.control) {
            return Err(crate::error::ProtocolError::UnexpectedControlCode(envelope.control).into());
        }
        if !crate::frame::CI_VARIABLE_DATA.contains(&envelope.control_information) {
            if envelope.control_information == crate::frame::CI_APPLICATION_ERROR {
                return Err(crate::error::Unimplemented::ApplicationError.into());
            }
            return Err(crate::error::ProtocolError::UnsupportedControlInformation(envelope.control_information).into());
        }

        let header = decode_fdh(&envelope.payload)?;
        if options.header_only {
            return Ok(Readout {
                header: header.into(),
                records: Vec::new(),
            });
        }

        let records = parse_records(
            &envelope.payload,
            DecodeOptions {
                extensive_mode: options.extensive_mode,
                scale_results: options.scale_results,
            },
        )?;

        Ok(Readout {
            header: header.into(),
            records,
        })
    }

    /// Probe every primary address `0..=250` and return those that
    /// answer (spec.md §4.9). Temporarily lowers the socket read
    /// timeout to `options.scan_timeout` for the duration of the scan,
    /// restoring the master's configured timeout on every exit path.
    ///
    /// Each probe uses `header_only`, so a slave that answers with a
    /// record the decoder can't resolve still counts as present: only
    /// the FDH needs to parse cleanly. A timeout (no reply at all)
    /// means "no slave at this address" and is swallowed; any other
    /// error aborts the scan (spec.md §4.9). Stops early once `stop_at`
    /// slaves have been found.
    pub fn scan_slaves_primary(&mut self, options: ScanOptions) -> Result<Vec<u8>, MasterError> {
        self.require_connected()?;
        let original_timeout = self.transport.read_timeout();
        self.transport.set_read_timeout(options.scan_timeout)?;

        let result = self.run_scan(options.stop_at);

        if let Err(e) = self.transport.set_read_timeout(original_timeout) {
            warn!("failed to restore read timeout after scan: {}", e);
        }
        result
    }

    fn run_scan(&mut self, stop_at: usize) -> Result<Vec<u8>, MasterError> {
        let mut found = Vec::new();
        for address in 0..=250u8 {
            let options = RequestOptions {
                header_only: true,
                ..RequestOptions::default()
            };
            match self.get_all_fields(address, options) {
                Ok(_) => {
                    info!("slave {} answered scan", address);
                    found.push(address);
                    if found.len() >= stop_at {
                        break;
                    }
                }
                Err(MasterError::Transport(e)) if e.is_timeout() => continue,
                Err(MasterError::Frame(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(found)
    }

    pub fn close(&mut self) {
        self.transport.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::build_long;
    use std::net::TcpListener;

    fn fdh_stub() -> [u8; 12] {
        [
            0x78, 0x56, 0x34, 0x12, 0x65, 0x32, 0x01, 0x07, 0x55, 0x00, 0x00, 0x00,
        ]
    }

    fn spawn_slave(mut payload_for_each_request: impl FnMut() -> Vec<u8> + Send + 'static) -> (u16, std::thread::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = std::thread::spawn(move || {
            use std::io::{Read, Write};
            let (mut stream, _) = listener.accept().unwrap();
            let mut req = [0u8; 5];
            if stream.read_exact(&mut req).is_err() {
                return;
            }
            let wire = payload_for_each_request();
            let _ = stream.write_all(&wire);
        });
        (port, handle)
    }

    fn test_master(port: u16) -> Master {
        Master::new(MasterConfig {
            host: "127.0.0.1".to_string(),
            port,
            read_timeout: Duration::from_secs(2),
            max_retries: 1,
            ..MasterConfig::default()
        })
    }

    #[test]
    fn auto_connect_default_connects_on_new() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = std::thread::spawn(move || {
            let _ = listener.accept().unwrap();
        });

        let master = test_master(port);
        assert_eq!(master.bus_state(), BusState::Idle);
        assert!(master.transport.state() == ConnectionState::Connected);
        handle.join().unwrap();
    }

    #[test]
    fn auto_connect_false_leaves_master_disconnected() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let master = Master::new(MasterConfig {
            host: "127.0.0.1".to_string(),
            port,
            auto_connect: false,
            ..MasterConfig::default()
        });
        assert_eq!(master.transport.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn get_all_fields_header_only_skips_records() {
        let mut payload = fdh_stub().to_vec();
        payload.extend_from_slice(&[0x04, 0x07, 0x10, 0x27, 0x00, 0x00]);
        let (port, handle) = spawn_slave(move || build_long(0x08, 0x01, 0x72, &payload));

        let mut master = test_master(port);
        let readout = master
            .get_all_fields(
                0x01,
                RequestOptions {
                    header_only: true,
                    ..RequestOptions::default()
                },
            )
            .unwrap();
        assert_eq!(readout.header.manufacturer, "LSE");
        assert!(readout.records.is_empty());
        handle.join().unwrap();
    }

    #[test]
    fn scan_survives_slave_present_but_garbled_response() {
        // DIF 0x04 (INT32), VIF 0x7B: reachable slave, but a record the
        // decoder can't resolve (UnknownVif). header_only means the
        // scan never reaches the record loop that would trip over it.
        let mut payload = fdh_stub().to_vec();
        payload.extend_from_slice(&[0x04, 0x7B, 0x00, 0x00, 0x00, 0x00]);
        let (port, handle) = spawn_slave(move || build_long(0x08, 0x01, 0x72, &payload));

        let mut master = test_master(port);
        let found = master
            .scan_slaves_primary(ScanOptions {
                scan_timeout: Duration::from_millis(100),
                stop_at: 1,
            })
            .unwrap();
        assert_eq!(found, vec![0x00]);
        handle.join().unwrap();
    }

    #[test]
    fn scan_restores_original_read_timeout() {
        let (port, handle) = spawn_slave(move || build_long(0x08, 0x01, 0x72, &fdh_stub()));
        let mut master = test_master(port);
        let original = master.transport.read_timeout();

        master
            .scan_slaves_primary(ScanOptions {
                scan_timeout: Duration::from_millis(50),
                stop_at: 1,
            })
            .unwrap();

        assert_eq!(master.transport.read_timeout(), original);
        handle.join().unwrap();
    }

    #[test]
    fn require_connected_rejects_operations_before_connect() {
        let mut master = Master::new(MasterConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            auto_connect: false,
            ..MasterConfig::default()
        });
        let err = master.get_all_fields(0x01, RequestOptions::default()).unwrap_err();
        assert!(matches!(err, MasterError::State(_)));
    }
}
