use std::net::SocketAddr;

use crate::error::{Error, ExceptionCode};
use crate::net::EndpointAddr;
use crate::types::{ClientId, DeviceIdentification};

/// Backend capability implemented by the user to process requests received
/// by the server.
///
/// The server owns the handler exclusively and invokes it synchronously on
/// the reactor thread only, so implementations must not block for extended
/// periods.
///
/// Data operations return either a success value, a Modbus exception
/// ([`Error::Exception`]) which is transmitted to the peer, or any other
/// error kind which causes the connection to be dropped. All data
/// operations default to [`ExceptionCode::IllegalFunction`].
pub trait ServerHandler: Send {
    /// Decide whether an accepted connection may proceed. The peer is given
    /// both in textual and in raw socket address form.
    fn authorize(&mut self, _id: ClientId, _peer: &EndpointAddr, _addr: &SocketAddr) -> bool {
        true
    }

    /// Advisory notification that a client connection was closed
    fn disconnect(&mut self, _id: ClientId) {}

    /// Advisory notification that a client completed a request
    fn alive(&mut self, _id: ClientId) {}

    /// Invoked approximately once a second on the reactor thread.
    ///
    /// May be overridden to implement individual inactivity timeouts for
    /// clients, or to provide some kind of health monitoring.
    fn ticker(&mut self) {}

    /// Read `cnt` coils starting at `addr`
    fn read_coils(&mut self, _addr: u16, _cnt: u16) -> Result<Vec<bool>, Error> {
        Err(ExceptionCode::IllegalFunction.into())
    }

    /// Read `cnt` discrete inputs starting at `addr`
    fn read_discrete_inputs(&mut self, _addr: u16, _cnt: u16) -> Result<Vec<bool>, Error> {
        Err(ExceptionCode::IllegalFunction.into())
    }

    /// Read `cnt` holding registers starting at `addr`
    fn read_holding_registers(&mut self, _addr: u16, _cnt: u16) -> Result<Vec<u16>, Error> {
        Err(ExceptionCode::IllegalFunction.into())
    }

    /// Read `cnt` input registers starting at `addr`
    fn read_input_registers(&mut self, _addr: u16, _cnt: u16) -> Result<Vec<u16>, Error> {
        Err(ExceptionCode::IllegalFunction.into())
    }

    /// Write a contiguous run of coils starting at `addr`
    fn write_coils(&mut self, _addr: u16, _values: &[bool]) -> Result<(), Error> {
        Err(ExceptionCode::IllegalFunction.into())
    }

    /// Write a contiguous run of holding registers starting at `addr`
    fn write_holding_registers(&mut self, _addr: u16, _values: &[u16]) -> Result<(), Error> {
        Err(ExceptionCode::IllegalFunction.into())
    }

    /// Write one run of holding registers, then read another. The write
    /// must be performed before the read, and the combination must be
    /// atomic with respect to other operations on the data store.
    fn write_read_holding_registers(
        &mut self,
        _write_addr: u16,
        _values: &[u16],
        _read_addr: u16,
        _read_cnt: u16,
    ) -> Result<Vec<u16>, Error> {
        Err(ExceptionCode::IllegalFunction.into())
    }

    /// The three basic device identification objects. Defaults to the
    /// identity of this library.
    fn get_basic_device_identification(&mut self) -> Result<DeviceIdentification, Error> {
        Ok(DeviceIdentification::library_default())
    }
}

/// The backend installed until [`set_backend`](super::ModbusTcpServer::set_backend)
/// is called: accepts every connection and answers every data operation
/// with an illegal function exception.
pub(crate) struct DefaultHandler;

impl ServerHandler for DefaultHandler {}
