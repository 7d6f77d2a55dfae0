//! Blocking Modbus TCP client.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::{Duration, Instant};

use crate::common::cursor::WriteCursor;
use crate::common::frame::{self, constants::MAX_ADU_SIZE, constants::MBAP_HEADER_SIZE, MbapHeader};
use crate::common::function::FunctionCode;
use crate::error::{AduParseError, Error};
use crate::logging;
use crate::net::{self, EndpointAddr, EndpointUsage, IpVersion};
use crate::types::{DeviceIdentification, UnitId};

mod codec;

/// A synchronous Modbus TCP client (master).
///
/// Every operation blocks the calling thread until the transaction
/// completes, the configured response timeout expires, or the connection
/// fails. Operations are not reentrant; the client is owned by one thread
/// at a time.
pub struct ModbusTcpClient {
    stream: Option<TcpStream>,
    response_timeout: Option<Duration>,
    transaction_id: u16,
    unit_id: UnitId,
    buffer: [u8; MAX_ADU_SIZE],
    // set when an exchange timed out and its response may still arrive
    abandoned_exchange: bool,
}

impl Default for ModbusTcpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ModbusTcpClient {
    /// Create a disconnected client with no response timeout and the default
    /// unit id
    pub fn new() -> Self {
        Self {
            stream: None,
            response_timeout: None,
            transaction_id: 0,
            unit_id: UnitId::default(),
            buffer: [0; MAX_ADU_SIZE],
            abandoned_exchange: false,
        }
    }

    /// Maximum time to wait for a response before an operation fails with
    /// [`Error::ResponseTimeout`]. `None` disables the timeout.
    pub fn set_response_timeout(&mut self, timeout: Option<Duration>) {
        self.response_timeout = timeout;
    }

    /// Unit identifier placed in the MBAP header of subsequent requests
    pub fn set_unit_id(&mut self, unit_id: UnitId) {
        self.unit_id = unit_id;
    }

    /// Connect to a server, trying each resolved endpoint in order.
    ///
    /// An empty `service` selects the default Modbus port. The timeout
    /// applies per endpoint; `None` leaves the connect timeout to the
    /// operating system.
    pub fn connect_to_server(
        &mut self,
        host: &str,
        service: &str,
        ip_version: IpVersion,
        timeout: Option<Duration>,
    ) -> Result<(), Error> {
        let service = if service.is_empty() {
            net::SERVER_DEFAULT_PORT
        } else {
            service
        };

        let endpoints =
            net::resolve_endpoint(Some(host), service, ip_version, EndpointUsage::ActiveOpen)?;

        for endpoint in endpoints {
            let result = match timeout {
                Some(timeout) => TcpStream::connect_timeout(&endpoint, timeout),
                None => TcpStream::connect(endpoint),
            };
            match result {
                Ok(stream) => {
                    if let Err(err) = stream.set_nodelay(true) {
                        logging::warning(&format!("unable to enable TCP_NODELAY: {err}"));
                    }
                    logging::info(&format!(
                        "connected to {}",
                        EndpointAddr::from_socket_addr(&endpoint)
                    ));
                    self.stream = Some(stream);
                    self.abandoned_exchange = false;
                    return Ok(());
                }
                Err(err) => {
                    let addr = EndpointAddr::from_socket_addr(&endpoint);
                    logging::error(&format!("failed to connect to {addr}: {err}"));
                }
            }
        }
        Err(Error::ActiveOpen)
    }

    /// Close the connection. Safe to call when already disconnected.
    pub fn disconnect(&mut self) {
        self.stream = None;
        self.abandoned_exchange = false;
    }

    /// Read `cnt` coils starting at `addr` (function code 0x01)
    pub fn read_coils(&mut self, addr: u16, cnt: u16) -> Result<Vec<bool>, Error> {
        let pdu_size = self.serialize(|cursor| {
            codec::serialize_read_bits_request(cursor, FunctionCode::ReadCoils, addr, cnt)
        })?;
        let rsp_size = self.transact(pdu_size)?;
        self.finish(|rsp| codec::parse_read_bits_response(rsp, FunctionCode::ReadCoils, cnt), rsp_size)
    }

    /// Read `cnt` discrete inputs starting at `addr` (function code 0x02)
    pub fn read_discrete_inputs(&mut self, addr: u16, cnt: u16) -> Result<Vec<bool>, Error> {
        let pdu_size = self.serialize(|cursor| {
            codec::serialize_read_bits_request(cursor, FunctionCode::ReadDiscreteInputs, addr, cnt)
        })?;
        let rsp_size = self.transact(pdu_size)?;
        self.finish(
            |rsp| codec::parse_read_bits_response(rsp, FunctionCode::ReadDiscreteInputs, cnt),
            rsp_size,
        )
    }

    /// Read `cnt` holding registers starting at `addr` (function code 0x03)
    pub fn read_holding_registers(&mut self, addr: u16, cnt: u16) -> Result<Vec<u16>, Error> {
        let pdu_size = self.serialize(|cursor| {
            codec::serialize_read_registers_request(
                cursor,
                FunctionCode::ReadHoldingRegisters,
                addr,
                cnt,
            )
        })?;
        let rsp_size = self.transact(pdu_size)?;
        self.finish(
            |rsp| codec::parse_read_registers_response(rsp, FunctionCode::ReadHoldingRegisters, cnt),
            rsp_size,
        )
    }

    /// Read `cnt` input registers starting at `addr` (function code 0x04)
    pub fn read_input_registers(&mut self, addr: u16, cnt: u16) -> Result<Vec<u16>, Error> {
        let pdu_size = self.serialize(|cursor| {
            codec::serialize_read_registers_request(
                cursor,
                FunctionCode::ReadInputRegisters,
                addr,
                cnt,
            )
        })?;
        let rsp_size = self.transact(pdu_size)?;
        self.finish(
            |rsp| codec::parse_read_registers_response(rsp, FunctionCode::ReadInputRegisters, cnt),
            rsp_size,
        )
    }

    /// Switch a single coil on or off (function code 0x05)
    pub fn write_single_coil(&mut self, addr: u16, value: bool) -> Result<(), Error> {
        let pdu_size =
            self.serialize(|cursor| codec::serialize_write_single_coil_request(cursor, addr, value))?;
        let rsp_size = self.transact(pdu_size)?;
        self.finish(|rsp| codec::parse_write_single_coil_response(rsp, addr, value), rsp_size)
    }

    /// Write a single holding register (function code 0x06)
    pub fn write_single_register(&mut self, addr: u16, value: u16) -> Result<(), Error> {
        let pdu_size = self
            .serialize(|cursor| codec::serialize_write_single_register_request(cursor, addr, value))?;
        let rsp_size = self.transact(pdu_size)?;
        self.finish(
            |rsp| codec::parse_write_single_register_response(rsp, addr, value),
            rsp_size,
        )
    }

    /// Write a contiguous run of coils (function code 0x0F)
    pub fn write_multiple_coils(&mut self, addr: u16, values: &[bool]) -> Result<(), Error> {
        let pdu_size = self
            .serialize(|cursor| codec::serialize_write_multiple_coils_request(cursor, addr, values))?;
        let rsp_size = self.transact(pdu_size)?;
        self.finish(
            |rsp| {
                codec::parse_write_multiple_response(
                    rsp,
                    FunctionCode::WriteMultipleCoils,
                    addr,
                    values.len() as u16,
                )
            },
            rsp_size,
        )
    }

    /// Write a contiguous run of holding registers (function code 0x10)
    pub fn write_multiple_registers(&mut self, addr: u16, values: &[u16]) -> Result<(), Error> {
        let pdu_size = self.serialize(|cursor| {
            codec::serialize_write_multiple_registers_request(cursor, addr, values)
        })?;
        let rsp_size = self.transact(pdu_size)?;
        self.finish(
            |rsp| {
                codec::parse_write_multiple_response(
                    rsp,
                    FunctionCode::WriteMultipleRegisters,
                    addr,
                    values.len() as u16,
                )
            },
            rsp_size,
        )
    }

    /// Modify a holding register atomically on the server (function code
    /// 0x16): `new = (current & and_mask) | (or_mask & !and_mask)`
    pub fn mask_write_register(
        &mut self,
        addr: u16,
        and_mask: u16,
        or_mask: u16,
    ) -> Result<(), Error> {
        let pdu_size = self.serialize(|cursor| {
            codec::serialize_mask_write_register_request(cursor, addr, and_mask, or_mask)
        })?;
        let rsp_size = self.transact(pdu_size)?;
        self.finish(
            |rsp| codec::parse_mask_write_register_response(rsp, addr, and_mask, or_mask),
            rsp_size,
        )
    }

    /// Write one run of holding registers and read another in a single
    /// transaction (function code 0x17). The server performs the write
    /// before the read, atomically.
    pub fn read_write_multiple_registers(
        &mut self,
        read_addr: u16,
        read_cnt: u16,
        write_addr: u16,
        values: &[u16],
    ) -> Result<Vec<u16>, Error> {
        let pdu_size = self.serialize(|cursor| {
            codec::serialize_read_write_multiple_registers_request(
                cursor, read_addr, read_cnt, write_addr, values,
            )
        })?;
        let rsp_size = self.transact(pdu_size)?;
        self.finish(
            |rsp| codec::parse_read_write_multiple_registers_response(rsp, read_cnt),
            rsp_size,
        )
    }

    /// Retrieve the basic device identification objects (function code 0x2B,
    /// MEI type 0x0E)
    pub fn read_device_identification(&mut self) -> Result<DeviceIdentification, Error> {
        let pdu_size = self.serialize(codec::serialize_read_device_identification_request)?;
        let rsp_size = self.transact(pdu_size)?;
        self.finish(codec::parse_read_device_identification_response, rsp_size)
    }

    /// Serialize a request PDU into the working buffer behind the header
    /// slot, returning the PDU size
    fn serialize(
        &mut self,
        f: impl FnOnce(&mut WriteCursor) -> Result<(), Error>,
    ) -> Result<usize, Error> {
        let mut cursor = WriteCursor::new(&mut self.buffer[MBAP_HEADER_SIZE..]);
        f(&mut cursor)?;
        Ok(cursor.written())
    }

    /// Run one request/response exchange. On success the response PDU is in
    /// the working buffer and its size is returned.
    ///
    /// The stream is discarded when the peer closed the connection or the
    /// byte stream is presumed out of sync (framing or echo errors). It is
    /// retained across a response timeout: the exchange is then marked
    /// abandoned and whatever the server still sends for it is discarded
    /// before the next request goes out. That recovery is best effort (a
    /// reply can arrive between the discard and the next response read), so
    /// reconnecting remains the reliable path when consistency matters.
    fn transact(&mut self, pdu_size: usize) -> Result<usize, Error> {
        let stream = match self.stream.take() {
            Some(stream) => stream,
            None => return Err(Error::NoConnection),
        };

        let result = self.run_exchange(&stream, pdu_size);
        match &result {
            Err(Error::ConnectionClosed) => {}
            Err(err) if err.is_parse_error() => {}
            Err(Error::ResponseTimeout) => {
                self.abandoned_exchange = true;
                self.stream = Some(stream);
            }
            _ => self.stream = Some(stream),
        }
        result
    }

    fn run_exchange(&mut self, stream: &TcpStream, pdu_size: usize) -> Result<usize, Error> {
        if self.abandoned_exchange {
            discard_abandoned_input(stream)?;
            self.abandoned_exchange = false;
        }

        self.transaction_id = self.transaction_id.wrapping_add(1);
        let header = MbapHeader::new(self.transaction_id, self.unit_id, pdu_size);
        {
            let mut cursor = WriteCursor::new(&mut self.buffer[..MBAP_HEADER_SIZE]);
            frame::serialize_mbap_header(&mut cursor, &header)?;
        }

        self.exchange(stream, pdu_size)
    }

    fn exchange(&mut self, stream: &TcpStream, pdu_size: usize) -> Result<usize, Error> {
        send_all(stream, &self.buffer[..MBAP_HEADER_SIZE + pdu_size])?;

        let deadline = self.response_timeout.map(|timeout| Instant::now() + timeout);

        let mut header_buf = [0u8; MBAP_HEADER_SIZE];
        recv_all(stream, &mut header_buf, deadline)?;
        let rsp_header = frame::parse_mbap_header(&header_buf)?;

        let rsp_size = rsp_header.pdu_size();
        recv_all(stream, &mut self.buffer[..rsp_size], deadline)?;

        if rsp_header.transaction_id != self.transaction_id || rsp_header.unit_id != self.unit_id {
            return Err(AduParseError::ReplyEchoMismatch.into());
        }

        Ok(rsp_size)
    }

    /// Apply a response parser, discarding the stream if it reports
    /// malformed data
    fn finish<T>(
        &mut self,
        parse: impl FnOnce(&[u8]) -> Result<T, Error>,
        rsp_size: usize,
    ) -> Result<T, Error> {
        let result = parse(&self.buffer[..rsp_size]);
        if let Err(err) = &result {
            if err.is_parse_error() {
                self.stream = None;
            }
        }
        result
    }
}

/// Read off whatever a timed-out exchange left behind so that the next
/// response parsed belongs to the next request
fn discard_abandoned_input(mut stream: &TcpStream) -> Result<(), Error> {
    let mut scratch = [0u8; 256];
    stream.set_nonblocking(true)?;
    let result = loop {
        match stream.read(&mut scratch) {
            Ok(0) => break Err(Error::ConnectionClosed),
            Ok(_) => continue,
            Err(err) => match err.kind() {
                std::io::ErrorKind::WouldBlock => break Ok(()),
                std::io::ErrorKind::Interrupted => continue,
                std::io::ErrorKind::ConnectionReset | std::io::ErrorKind::ConnectionAborted => {
                    break Err(Error::ConnectionClosed)
                }
                kind => break Err(Error::Io(kind)),
            },
        }
    };
    stream.set_nonblocking(false)?;
    result
}

fn send_all(mut stream: &TcpStream, data: &[u8]) -> Result<(), Error> {
    match stream.write_all(data) {
        Ok(()) => Ok(()),
        Err(err) => match err.kind() {
            std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted => Err(Error::ConnectionClosed),
            kind => Err(Error::Io(kind)),
        },
    }
}

/// Fill `buf` completely, honoring an absolute deadline across partial reads
fn recv_all(
    mut stream: &TcpStream,
    buf: &mut [u8],
    deadline: Option<Instant>,
) -> Result<(), Error> {
    let mut filled = 0;
    while filled < buf.len() {
        let timeout = match deadline {
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return Err(Error::ResponseTimeout);
                }
                Some(remaining)
            }
            None => None,
        };
        stream.set_read_timeout(timeout)?;

        match stream.read(&mut buf[filled..]) {
            Ok(0) => return Err(Error::ConnectionClosed),
            Ok(count) => filled += count,
            Err(err) => match err.kind() {
                std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut => {
                    return Err(Error::ResponseTimeout)
                }
                std::io::ErrorKind::Interrupted => continue,
                std::io::ErrorKind::ConnectionReset | std::io::ErrorKind::ConnectionAborted => {
                    return Err(Error::ConnectionClosed)
                }
                kind => return Err(Error::Io(kind)),
            },
        }
    }
    Ok(())
}
