//! Serialization of request PDUs and parsing of response PDUs.
//!
//! Argument validation happens in the serializers; everything a response
//! echoes back is validated by the parsers.

use crate::common::bits;
use crate::common::cursor::{ReadCursor, WriteCursor};
use crate::common::function::{self, FunctionCode};
use crate::constants::{coil, limits};
use crate::error::{AduParseError, Error, ExceptionCode, InvalidRequest};
use crate::types::DeviceIdentification;

fn validate_count(count: u16, max: u16) -> Result<(), InvalidRequest> {
    if count == 0 {
        return Err(InvalidRequest::CountOfZero);
    }
    if count > max {
        return Err(InvalidRequest::CountTooLargeForType(count, max));
    }
    Ok(())
}

fn count_of(len: usize, max: u16) -> Result<u16, InvalidRequest> {
    if len == 0 {
        return Err(InvalidRequest::CountOfZero);
    }
    if len > max as usize {
        return Err(InvalidRequest::CountTooLargeForType(len.min(u16::MAX as usize) as u16, max));
    }
    Ok(len as u16)
}

pub(crate) fn serialize_read_bits_request(
    cursor: &mut WriteCursor,
    function: FunctionCode,
    addr: u16,
    cnt: u16,
) -> Result<(), Error> {
    validate_count(cnt, limits::MAX_READ_BITS_COUNT)?;
    cursor.store_u8(function.get_value())?;
    cursor.store_u16_be(addr)?;
    cursor.store_u16_be(cnt)?;
    Ok(())
}

pub(crate) fn serialize_read_registers_request(
    cursor: &mut WriteCursor,
    function: FunctionCode,
    addr: u16,
    cnt: u16,
) -> Result<(), Error> {
    validate_count(cnt, limits::MAX_READ_REGISTERS_COUNT)?;
    cursor.store_u8(function.get_value())?;
    cursor.store_u16_be(addr)?;
    cursor.store_u16_be(cnt)?;
    Ok(())
}

pub(crate) fn serialize_write_single_coil_request(
    cursor: &mut WriteCursor,
    addr: u16,
    value: bool,
) -> Result<(), Error> {
    cursor.store_u8(FunctionCode::WriteSingleCoil.get_value())?;
    cursor.store_u16_be(addr)?;
    cursor.store_u16_be(if value { coil::ON } else { coil::OFF })?;
    Ok(())
}

pub(crate) fn serialize_write_single_register_request(
    cursor: &mut WriteCursor,
    addr: u16,
    value: u16,
) -> Result<(), Error> {
    cursor.store_u8(FunctionCode::WriteSingleRegister.get_value())?;
    cursor.store_u16_be(addr)?;
    cursor.store_u16_be(value)?;
    Ok(())
}

pub(crate) fn serialize_write_multiple_coils_request(
    cursor: &mut WriteCursor,
    addr: u16,
    values: &[bool],
) -> Result<(), Error> {
    let cnt = count_of(values.len(), limits::MAX_WRITE_COILS_COUNT)?;
    cursor.store_u8(FunctionCode::WriteMultipleCoils.get_value())?;
    cursor.store_u16_be(addr)?;
    cursor.store_u16_be(cnt)?;
    cursor.store_u8(bits::num_bytes_for_bits(cnt) as u8)?;
    bits::serialize_bits(cursor, values)?;
    Ok(())
}

pub(crate) fn serialize_write_multiple_registers_request(
    cursor: &mut WriteCursor,
    addr: u16,
    values: &[u16],
) -> Result<(), Error> {
    let cnt = count_of(values.len(), limits::MAX_WRITE_REGISTERS_COUNT)?;
    cursor.store_u8(FunctionCode::WriteMultipleRegisters.get_value())?;
    cursor.store_u16_be(addr)?;
    cursor.store_u16_be(cnt)?;
    cursor.store_u8((cnt * 2) as u8)?;
    bits::serialize_registers(cursor, values)?;
    Ok(())
}

pub(crate) fn serialize_mask_write_register_request(
    cursor: &mut WriteCursor,
    addr: u16,
    and_mask: u16,
    or_mask: u16,
) -> Result<(), Error> {
    cursor.store_u8(FunctionCode::MaskWriteRegister.get_value())?;
    cursor.store_u16_be(addr)?;
    cursor.store_u16_be(and_mask)?;
    cursor.store_u16_be(or_mask)?;
    Ok(())
}

pub(crate) fn serialize_read_write_multiple_registers_request(
    cursor: &mut WriteCursor,
    read_addr: u16,
    read_cnt: u16,
    write_addr: u16,
    values: &[u16],
) -> Result<(), Error> {
    validate_count(read_cnt, limits::MAX_READ_WRITE_READ_COUNT)?;
    let write_cnt = count_of(values.len(), limits::MAX_READ_WRITE_WRITE_COUNT)?;
    cursor.store_u8(FunctionCode::ReadWriteMultipleRegisters.get_value())?;
    cursor.store_u16_be(read_addr)?;
    cursor.store_u16_be(read_cnt)?;
    cursor.store_u16_be(write_addr)?;
    cursor.store_u16_be(write_cnt)?;
    cursor.store_u8((write_cnt * 2) as u8)?;
    bits::serialize_registers(cursor, values)?;
    Ok(())
}

pub(crate) fn serialize_read_device_identification_request(
    cursor: &mut WriteCursor,
) -> Result<(), Error> {
    cursor.store_u8(FunctionCode::ReadDeviceIdentification.get_value())?;
    cursor.store_u8(function::MEI_TYPE_READ_DEVICE_ID)?;
    cursor.store_u8(function::READ_DEVICE_ID_BASIC)?;
    cursor.store_u8(function::OBJECT_ID_VENDOR_NAME)?;
    Ok(())
}

/// Detect an exception response and re-raise the carried code.
///
/// An exception PDU is exactly two bytes with the high bit of the function
/// code set. A mismatched function echo or an undefined exception code is a
/// parse error instead.
fn check_for_exception(rsp: &[u8], function: FunctionCode) -> Result<(), Error> {
    let [fc_rsp, exception_code] = *rsp else {
        return Ok(());
    };

    if fc_rsp & 0x80 == 0 {
        return Ok(());
    }

    if fc_rsp & 0x7F != function.get_value() {
        return Err(AduParseError::UnknownResponseFunction(fc_rsp).into());
    }

    match ExceptionCode::from_u8(exception_code) {
        Some(code) => Err(code.into()),
        None => Err(AduParseError::UnknownExceptionCode(exception_code).into()),
    }
}

fn expect_function_echo(cursor: &mut ReadCursor, function: FunctionCode) -> Result<(), Error> {
    let fc_rsp = cursor.fetch_u8()?;
    if fc_rsp != function.get_value() {
        return Err(AduParseError::UnknownResponseFunction(fc_rsp).into());
    }
    Ok(())
}

fn expect_u16_echo(cursor: &mut ReadCursor, expected: u16) -> Result<(), Error> {
    if cursor.fetch_u16_be()? != expected {
        return Err(AduParseError::ReplyEchoMismatch.into());
    }
    Ok(())
}

pub(crate) fn parse_read_bits_response(
    rsp: &[u8],
    function: FunctionCode,
    cnt: u16,
) -> Result<Vec<bool>, Error> {
    check_for_exception(rsp, function)?;

    let mut cursor = ReadCursor::new(rsp);
    expect_function_echo(&mut cursor, function)?;
    let byte_cnt = cursor.fetch_u8()?;
    if byte_cnt as usize != bits::num_bytes_for_bits(cnt) {
        return Err(AduParseError::ByteCountMismatch.into());
    }
    let values = bits::parse_bits(&mut cursor, cnt)?;
    cursor.ensure_consumed()?;
    Ok(values)
}

pub(crate) fn parse_read_registers_response(
    rsp: &[u8],
    function: FunctionCode,
    cnt: u16,
) -> Result<Vec<u16>, Error> {
    check_for_exception(rsp, function)?;

    let mut cursor = ReadCursor::new(rsp);
    expect_function_echo(&mut cursor, function)?;
    let byte_cnt = cursor.fetch_u8()?;
    if byte_cnt as usize != 2 * cnt as usize {
        return Err(AduParseError::ByteCountMismatch.into());
    }
    let values = bits::parse_registers(&mut cursor, cnt)?;
    cursor.ensure_consumed()?;
    Ok(values)
}

pub(crate) fn parse_write_single_coil_response(
    rsp: &[u8],
    addr: u16,
    value: bool,
) -> Result<(), Error> {
    check_for_exception(rsp, FunctionCode::WriteSingleCoil)?;

    let mut cursor = ReadCursor::new(rsp);
    expect_function_echo(&mut cursor, FunctionCode::WriteSingleCoil)?;
    expect_u16_echo(&mut cursor, addr)?;
    let raw = cursor.fetch_u16_be()?;
    let echoed = match raw {
        coil::ON => true,
        coil::OFF => false,
        _ => return Err(AduParseError::UnknownCoilState(raw).into()),
    };
    if echoed != value {
        return Err(AduParseError::ReplyEchoMismatch.into());
    }
    cursor.ensure_consumed()?;
    Ok(())
}

pub(crate) fn parse_write_single_register_response(
    rsp: &[u8],
    addr: u16,
    value: u16,
) -> Result<(), Error> {
    check_for_exception(rsp, FunctionCode::WriteSingleRegister)?;

    let mut cursor = ReadCursor::new(rsp);
    expect_function_echo(&mut cursor, FunctionCode::WriteSingleRegister)?;
    expect_u16_echo(&mut cursor, addr)?;
    expect_u16_echo(&mut cursor, value)?;
    cursor.ensure_consumed()?;
    Ok(())
}

pub(crate) fn parse_write_multiple_response(
    rsp: &[u8],
    function: FunctionCode,
    addr: u16,
    cnt: u16,
) -> Result<(), Error> {
    check_for_exception(rsp, function)?;

    let mut cursor = ReadCursor::new(rsp);
    expect_function_echo(&mut cursor, function)?;
    expect_u16_echo(&mut cursor, addr)?;
    expect_u16_echo(&mut cursor, cnt)?;
    cursor.ensure_consumed()?;
    Ok(())
}

pub(crate) fn parse_mask_write_register_response(
    rsp: &[u8],
    addr: u16,
    and_mask: u16,
    or_mask: u16,
) -> Result<(), Error> {
    check_for_exception(rsp, FunctionCode::MaskWriteRegister)?;

    let mut cursor = ReadCursor::new(rsp);
    expect_function_echo(&mut cursor, FunctionCode::MaskWriteRegister)?;
    expect_u16_echo(&mut cursor, addr)?;
    expect_u16_echo(&mut cursor, and_mask)?;
    expect_u16_echo(&mut cursor, or_mask)?;
    cursor.ensure_consumed()?;
    Ok(())
}

pub(crate) fn parse_read_write_multiple_registers_response(
    rsp: &[u8],
    read_cnt: u16,
) -> Result<Vec<u16>, Error> {
    check_for_exception(rsp, FunctionCode::ReadWriteMultipleRegisters)?;

    let mut cursor = ReadCursor::new(rsp);
    expect_function_echo(&mut cursor, FunctionCode::ReadWriteMultipleRegisters)?;
    let byte_cnt = cursor.fetch_u8()?;
    if byte_cnt as usize != 2 * read_cnt as usize {
        return Err(AduParseError::ByteCountMismatch.into());
    }
    let values = bits::parse_registers(&mut cursor, read_cnt)?;
    cursor.ensure_consumed()?;
    Ok(values)
}

fn parse_device_info_object(cursor: &mut ReadCursor, object_id: u8) -> Result<String, Error> {
    if cursor.fetch_u8()? != object_id {
        return Err(AduParseError::DeviceInfoObjectsInvalid.into());
    }
    let len = cursor.fetch_u8()?;
    let raw = cursor.fetch_bytes(len as usize)?;
    if !raw.is_ascii() {
        return Err(AduParseError::InvalidDeviceInfoString.into());
    }
    match std::str::from_utf8(raw) {
        Ok(value) => Ok(value.to_owned()),
        Err(_) => Err(AduParseError::InvalidDeviceInfoString.into()),
    }
}

pub(crate) fn parse_read_device_identification_response(
    rsp: &[u8],
) -> Result<DeviceIdentification, Error> {
    check_for_exception(rsp, FunctionCode::ReadDeviceIdentification)?;

    let mut cursor = ReadCursor::new(rsp);
    expect_function_echo(&mut cursor, FunctionCode::ReadDeviceIdentification)?;
    if cursor.fetch_u8()? != function::MEI_TYPE_READ_DEVICE_ID {
        return Err(AduParseError::ReplyEchoMismatch.into());
    }
    if cursor.fetch_u8()? != function::READ_DEVICE_ID_BASIC {
        return Err(AduParseError::ReplyEchoMismatch.into());
    }

    // the conformity level is echoed but not acted upon
    let _conformity_level = cursor.fetch_u8()?;

    // basic conformance fits in a single response
    if cursor.fetch_u8()? != 0x00 {
        return Err(AduParseError::DeviceInfoObjectsInvalid.into());
    }
    let _next_object_id = cursor.fetch_u8()?;
    if cursor.fetch_u8()? != 3 {
        return Err(AduParseError::DeviceInfoObjectsInvalid.into());
    }

    let vendor = parse_device_info_object(&mut cursor, function::OBJECT_ID_VENDOR_NAME)?;
    let product = parse_device_info_object(&mut cursor, function::OBJECT_ID_PRODUCT_CODE)?;
    let version = parse_device_info_object(&mut cursor, function::OBJECT_ID_MAJOR_MINOR_REVISION)?;
    cursor.ensure_consumed()?;

    Ok(DeviceIdentification {
        vendor,
        product,
        version,
    })
}
