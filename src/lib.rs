//! An implementation of the [Modbus](http://modbus.org/) TCP protocol
//! providing both a client (master) and a server (slave).
//!
//! # Features
//!
//! * Panic-free parsing of the full mandatory function code set
//! * Read Device Identification (basic category)
//! * Single-threaded, poll-driven server reactor with a pluggable backend
//! * Blocking client with per-request response timeouts
//! * Injectable logging sink, backed by [`tracing`](https://docs.rs/tracing)
//!   by default
//!
//! # Supported functions
//!
//! * Read Coils (0x01)
//! * Read Discrete Inputs (0x02)
//! * Read Holding Registers (0x03)
//! * Read Input Registers (0x04)
//! * Write Single Coil (0x05)
//! * Write Single Register (0x06)
//! * Write Multiple Coils (0x0F)
//! * Write Multiple Registers (0x10)
//! * Mask Write Register (0x16)
//! * Read/Write Multiple Registers (0x17)
//! * Read Device Identification (0x2B / MEI 0x0E)
//!
//! # Example client
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use polbus::client::ModbusTcpClient;
//! use polbus::net::IpVersion;
//!
//! fn main() -> Result<(), polbus::error::Error> {
//!     let mut client = ModbusTcpClient::new();
//!     client.connect_to_server(
//!         "localhost",
//!         "502",
//!         IpVersion::Any,
//!         Some(Duration::from_secs(1)),
//!     )?;
//!     client.set_response_timeout(Some(Duration::from_secs(1)));
//!
//!     let coils = client.read_coils(0x0000, 8)?;
//!     for (i, value) in coils.iter().enumerate() {
//!         println!("coil {i}: {value}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Example server
//!
//! ```no_run
//! use std::thread;
//!
//! use polbus::error::Error;
//! use polbus::server::{ModbusTcpServer, ServerHandler};
//!
//! struct CoilsOnlyHandler {
//!     coils: [bool; 16],
//! }
//!
//! impl ServerHandler for CoilsOnlyHandler {
//!     fn read_coils(&mut self, addr: u16, cnt: u16) -> Result<Vec<bool>, Error> {
//!         let start = addr as usize;
//!         let end = start + cnt as usize;
//!         match self.coils.get(start..end) {
//!             Some(slice) => Ok(slice.to_vec()),
//!             None => Err(polbus::error::ExceptionCode::IllegalDataAddress.into()),
//!         }
//!     }
//! }
//!
//! fn main() -> Result<(), Error> {
//!     let mut server = ModbusTcpServer::new()?;
//!     server.set_server_addr(Some("localhost"), "502", polbus::net::IpVersion::Any);
//!     server.set_backend(Box::new(CoilsOnlyHandler { coils: [false; 16] }));
//!
//!     let handle = server.handle();
//!     thread::spawn(move || server.run());
//!
//!     // ... later, from any thread:
//!     handle.shutdown()?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![deny(
    non_camel_case_types,
    non_snake_case,
    non_upper_case_globals,
    trivial_casts,
    trivial_numeric_casts,
    unreachable_pub,
    unused_import_braces,
    unused_qualifications,
    clippy::all
)]

/// client API
pub mod client;
/// public constant values related to the Modbus specification
pub mod constants;
/// error types produced by clients and servers
pub mod error;
/// injectable logging capability
pub mod logging;
/// endpoint resolution types
pub mod net;
/// server API
pub mod server;
/// types used in requests and responses
pub mod types;
/// static vendor / product / version information
pub mod version;

// internal modules
mod common;

pub use crate::error::{Error, ExceptionCode};
pub use crate::types::{ClientId, DeviceIdentification, UnitId};
