use std::fmt::{Display, Formatter};

pub(crate) mod constants {
    pub(crate) const ILLEGAL_FUNCTION: u8 = 0x01;
    pub(crate) const ILLEGAL_DATA_ADDRESS: u8 = 0x02;
    pub(crate) const ILLEGAL_DATA_VALUE: u8 = 0x03;
    pub(crate) const SERVER_DEVICE_FAILURE: u8 = 0x04;
    pub(crate) const ACKNOWLEDGE: u8 = 0x05;
    pub(crate) const SERVER_DEVICE_BUSY: u8 = 0x06;
    pub(crate) const NEGATIVE_ACKNOWLEDGE: u8 = 0x07;
    pub(crate) const MEMORY_PARITY_ERROR: u8 = 0x08;
    pub(crate) const GATEWAY_PATH_UNAVAILABLE: u8 = 0x0A;
    pub(crate) const GATEWAY_TARGET_DEVICE_FAILED_TO_RESPOND: u8 = 0x0B;
}

/// Exception codes defined in the Modbus specification.
///
/// A server transmits these inside an exception response; a client re-raises
/// a received exception as the failure of the corresponding operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ExceptionCode {
    /// The function code received in the query is not an allowable action for the server
    IllegalFunction,
    /// The data address received in the query is not an allowable address for the server
    IllegalDataAddress,
    /// A value contained in the request is not an allowable value for the server
    IllegalDataValue,
    /// An unrecoverable error occurred while the server was attempting to perform the
    /// requested action
    ServerDeviceFailure,
    /// The server has accepted the request and is processing it
    Acknowledge,
    /// The server is engaged in processing a long-duration command, try again later
    ServerDeviceBusy,
    /// The server cannot perform the program function received in the query
    NegativeAcknowledge,
    /// The server attempted to read a record file, but detected a parity error in the memory
    MemoryParityError,
    /// The gateway was unable to allocate an internal communication path for the request
    GatewayPathUnavailable,
    /// No response was obtained from the target device behind the gateway
    GatewayTargetDeviceFailedToRespond,
}

impl ExceptionCode {
    /// Map a wire value to an exception code. Returns `None` for values the
    /// standard does not define, which the client codec turns into a parse
    /// error.
    pub fn from_u8(value: u8) -> Option<ExceptionCode> {
        match value {
            constants::ILLEGAL_FUNCTION => Some(ExceptionCode::IllegalFunction),
            constants::ILLEGAL_DATA_ADDRESS => Some(ExceptionCode::IllegalDataAddress),
            constants::ILLEGAL_DATA_VALUE => Some(ExceptionCode::IllegalDataValue),
            constants::SERVER_DEVICE_FAILURE => Some(ExceptionCode::ServerDeviceFailure),
            constants::ACKNOWLEDGE => Some(ExceptionCode::Acknowledge),
            constants::SERVER_DEVICE_BUSY => Some(ExceptionCode::ServerDeviceBusy),
            constants::NEGATIVE_ACKNOWLEDGE => Some(ExceptionCode::NegativeAcknowledge),
            constants::MEMORY_PARITY_ERROR => Some(ExceptionCode::MemoryParityError),
            constants::GATEWAY_PATH_UNAVAILABLE => Some(ExceptionCode::GatewayPathUnavailable),
            constants::GATEWAY_TARGET_DEVICE_FAILED_TO_RESPOND => {
                Some(ExceptionCode::GatewayTargetDeviceFailedToRespond)
            }
            _ => None,
        }
    }

    /// Wire value of the exception code
    pub fn to_u8(self) -> u8 {
        match self {
            ExceptionCode::IllegalFunction => constants::ILLEGAL_FUNCTION,
            ExceptionCode::IllegalDataAddress => constants::ILLEGAL_DATA_ADDRESS,
            ExceptionCode::IllegalDataValue => constants::ILLEGAL_DATA_VALUE,
            ExceptionCode::ServerDeviceFailure => constants::SERVER_DEVICE_FAILURE,
            ExceptionCode::Acknowledge => constants::ACKNOWLEDGE,
            ExceptionCode::ServerDeviceBusy => constants::SERVER_DEVICE_BUSY,
            ExceptionCode::NegativeAcknowledge => constants::NEGATIVE_ACKNOWLEDGE,
            ExceptionCode::MemoryParityError => constants::MEMORY_PARITY_ERROR,
            ExceptionCode::GatewayPathUnavailable => constants::GATEWAY_PATH_UNAVAILABLE,
            ExceptionCode::GatewayTargetDeviceFailedToRespond => {
                constants::GATEWAY_TARGET_DEVICE_FAILED_TO_RESPOND
            }
        }
    }
}

impl std::error::Error for ExceptionCode {}

impl Display for ExceptionCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ExceptionCode::IllegalFunction => f.write_str("function code received in the query is not an allowable action for the server"),
            ExceptionCode::IllegalDataAddress => f.write_str("data address received in the query is not an allowable address for the server"),
            ExceptionCode::IllegalDataValue => f.write_str("value contained in the request is not an allowable value for the server"),
            ExceptionCode::ServerDeviceFailure => f.write_str("unrecoverable error occurred while the server was attempting to perform the requested action"),
            ExceptionCode::Acknowledge => f.write_str("server has accepted the request and is processing it"),
            ExceptionCode::ServerDeviceBusy => f.write_str("server is engaged in processing a long-duration program command, try again later"),
            ExceptionCode::NegativeAcknowledge => f.write_str("server cannot perform the program function received in the query"),
            ExceptionCode::MemoryParityError => f.write_str("server attempted to read a record file, but detected a parity error in the memory"),
            ExceptionCode::GatewayPathUnavailable => f.write_str("gateway was unable to allocate an internal communication path for processing the request"),
            ExceptionCode::GatewayTargetDeviceFailedToRespond => f.write_str("gateway did not receive a response from the target device"),
        }
    }
}

/// errors that occur while parsing an MBAP header off a stream
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameParseError {
    /// Not enough bytes for a complete MBAP header
    InsufficientBytes,
    /// Received a frame with a non-Modbus protocol id
    UnknownProtocolId(u16),
    /// The length field is outside the range allowed by the specification
    LengthFieldOutOfRange(u16),
}

impl std::error::Error for FrameParseError {}

impl Display for FrameParseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameParseError::InsufficientBytes => {
                f.write_str("insufficient bytes for MBAP header")
            }
            FrameParseError::UnknownProtocolId(id) => {
                write!(f, "received frame with non-Modbus protocol id: {id}")
            }
            FrameParseError::LengthFieldOutOfRange(length) => {
                write!(f, "MBAP length field out of range: {length}")
            }
        }
    }
}

/// errors that occur while parsing a request or response PDU
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AduParseError {
    /// the PDU ended before every field of the message was read
    UnexpectedEnd,
    /// bytes remained after the final field of the PDU
    ExtraBytes(usize),
    /// byte count field doesn't match what is expected based on the request
    ByteCountMismatch,
    /// a parameter expected to be echoed in the reply did not match
    ReplyEchoMismatch,
    /// an unknown response function code was received
    UnknownResponseFunction(u8),
    /// an exception response carried a code not defined in the standard
    UnknownExceptionCode(u8),
    /// bad value for the coil state
    UnknownCoilState(u16),
    /// the device identification object stream deviates from basic conformance
    DeviceInfoObjectsInvalid,
    /// a device identification object was not valid ASCII
    InvalidDeviceInfoString,
}

impl std::error::Error for AduParseError {}

impl Display for AduParseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            AduParseError::UnexpectedEnd => {
                f.write_str("PDU ended before every field of the message was read")
            }
            AduParseError::ExtraBytes(count) => {
                write!(f, "{count} bytes remained after the final field of the PDU")
            }
            AduParseError::ByteCountMismatch => {
                f.write_str("byte count doesn't match what is expected based on the request")
            }
            AduParseError::ReplyEchoMismatch => {
                f.write_str("a parameter expected to be echoed in the reply did not match")
            }
            AduParseError::UnknownResponseFunction(fc) => {
                write!(f, "received unknown response function code: {fc}")
            }
            AduParseError::UnknownExceptionCode(code) => {
                write!(f, "received undefined exception code: {code}")
            }
            AduParseError::UnknownCoilState(value) => {
                write!(f, "received coil state with unspecified value: {value:#06X}")
            }
            AduParseError::DeviceInfoObjectsInvalid => {
                f.write_str("device identification objects deviate from basic conformance")
            }
            AduParseError::InvalidDeviceInfoString => {
                f.write_str("device identification object is not valid ASCII")
            }
        }
    }
}

/// errors that result from bad request arguments
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InvalidRequest {
    /// request contains a count of zero
    CountOfZero,
    /// the count exceeds the maximum allowed for this request type
    CountTooLargeForType(u16, u16), // count / max
}

impl std::error::Error for InvalidRequest {}

impl Display for InvalidRequest {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            InvalidRequest::CountOfZero => f.write_str("request contains a count of zero"),
            InvalidRequest::CountTooLargeForType(count, max) => write!(
                f,
                "request count of {count} exceeds the maximum allowed count of {max} for this type"
            ),
        }
    }
}

/// errors that should only occur if there is a logic error in the library or
/// a backend violates its contract
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InternalError {
    /// A field did not fit into the space left in the output buffer
    WriteOverflow {
        /// size of the field that was being stored
        requested: usize,
        /// bytes left in the buffer
        available: usize,
    },
    /// Byte count would exceed the maximum representable value
    BadByteCount(usize),
    /// A backend returned a different number of values than requested
    BadResultCount(usize, usize), // actual / expected
    /// We expected a None to be Some
    NoneError,
}

impl std::error::Error for InternalError {}

impl Display for InternalError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            InternalError::WriteOverflow {
                requested,
                available,
            } => write!(
                f,
                "field of {requested} bytes does not fit into the {available} bytes left in the buffer"
            ),
            InternalError::BadByteCount(count) => {
                write!(f, "byte count exceeds the maximum representable value: {count}")
            }
            InternalError::BadResultCount(actual, expected) => write!(
                f,
                "backend returned {actual} values where {expected} were requested"
            ),
            InternalError::NoneError => f.write_str("expected a Some value"),
        }
    }
}

/// The primary error type returned by every fallible operation in the library
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
    /// A Modbus exception, either produced by a backend or received from a server
    Exception(ExceptionCode),
    /// A request could not be built because an argument is out of range
    BadRequest(InvalidRequest),
    /// Data on the wire could not be framed
    BadFrame(FrameParseError),
    /// A PDU could not be parsed
    BadResponse(AduParseError),
    /// An internal invariant was violated
    Internal(InternalError),
    /// Host name or service resolution failed
    AddrResolution,
    /// None of the resolved local endpoints could be bound and listened on
    PassiveOpen,
    /// None of the resolved remote endpoints accepted a connection
    ActiveOpen,
    /// The peer failed to respond within the configured timeout
    ResponseTimeout,
    /// No connection exists to the peer
    NoConnection,
    /// The connection was closed by the peer
    ConnectionClosed,
    /// An uncategorized error from the operating system
    Io(std::io::ErrorKind),
}

impl Error {
    /// Whether this error is a Modbus protocol exception.
    ///
    /// The server uses this predicate to decide whether a backend failure is
    /// serialized as an exception response or terminates the connection; the
    /// client codec uses it to decide whether a received exception response
    /// carries a valid code.
    pub fn is_exception(&self) -> bool {
        matches!(self, Error::Exception(_))
    }

    /// Whether this error indicates malformed wire data.
    pub(crate) fn is_parse_error(&self) -> bool {
        matches!(self, Error::BadFrame(_) | Error::BadResponse(_))
    }
}

impl std::error::Error for Error {}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Exception(code) => write!(f, "Modbus exception: {code}"),
            Error::BadRequest(err) => write!(f, "invalid request: {err}"),
            Error::BadFrame(err) => write!(f, "framing error: {err}"),
            Error::BadResponse(err) => write!(f, "parse error: {err}"),
            Error::Internal(err) => write!(f, "internal error: {err}"),
            Error::AddrResolution => f.write_str("address resolution failed"),
            Error::PassiveOpen => f.write_str("failed to bind to any resolved endpoint"),
            Error::ActiveOpen => f.write_str("failed to connect to any resolved endpoint"),
            Error::ResponseTimeout => {
                f.write_str("timeout occurred before receiving a response from the server")
            }
            Error::NoConnection => f.write_str("no connection exists to the peer"),
            Error::ConnectionClosed => f.write_str("the connection was closed by the peer"),
            Error::Io(kind) => write!(f, "I/O error: {kind:?}"),
        }
    }
}

impl From<ExceptionCode> for Error {
    fn from(code: ExceptionCode) -> Self {
        Error::Exception(code)
    }
}

impl From<FrameParseError> for Error {
    fn from(err: FrameParseError) -> Self {
        Error::BadFrame(err)
    }
}

impl From<AduParseError> for Error {
    fn from(err: AduParseError) -> Self {
        Error::BadResponse(err)
    }
}

impl From<InvalidRequest> for Error {
    fn from(err: InvalidRequest) -> Self {
        Error::BadRequest(err)
    }
}

impl From<InternalError> for Error {
    fn from(err: InternalError) -> Self {
        Error::Internal(err)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.kind())
    }
}
