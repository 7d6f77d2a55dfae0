//! Server-side PDU codec: parse a request, invoke the backend, serialize
//! the response or exception into the caller's buffer.

use crate::common::bits;
use crate::common::cursor::{ReadCursor, WriteCursor};
use crate::common::function::{self, FunctionCode};
use crate::constants::{coil, limits};
use crate::error::{Error, ExceptionCode, InternalError};
use crate::server::handler::ServerHandler;

/// Process one request PDU against the backend.
///
/// Returns the size of the response PDU written to `rsp`. Modbus exceptions
/// from range validation or the backend become exception responses; a parse
/// error or any other backend failure is returned as `Err` and terminates
/// the connection.
pub(crate) fn server_engine(
    handler: &mut dyn ServerHandler,
    req: &[u8],
    rsp: &mut [u8],
) -> Result<usize, Error> {
    let mut cursor = ReadCursor::new(req);
    let raw_function = cursor.fetch_u8()?;

    let function = match FunctionCode::get(raw_function) {
        Some(function) => function,
        None => {
            return serialize_exception(rsp, raw_function | 0x80, ExceptionCode::IllegalFunction)
        }
    };

    match function {
        FunctionCode::ReadCoils | FunctionCode::ReadDiscreteInputs => {
            process_read_bits(handler, function, &mut cursor, rsp)
        }
        FunctionCode::ReadHoldingRegisters | FunctionCode::ReadInputRegisters => {
            process_read_registers(handler, function, &mut cursor, rsp)
        }
        FunctionCode::WriteSingleCoil => process_write_single_coil(handler, &mut cursor, rsp),
        FunctionCode::WriteSingleRegister => {
            process_write_single_register(handler, &mut cursor, rsp)
        }
        FunctionCode::WriteMultipleCoils => process_write_multiple_coils(handler, &mut cursor, rsp),
        FunctionCode::WriteMultipleRegisters => {
            process_write_multiple_registers(handler, &mut cursor, rsp)
        }
        FunctionCode::MaskWriteRegister => process_mask_write_register(handler, &mut cursor, rsp),
        FunctionCode::ReadWriteMultipleRegisters => {
            process_read_write_multiple_registers(handler, &mut cursor, rsp)
        }
        FunctionCode::ReadDeviceIdentification => {
            process_read_device_identification(handler, &mut cursor, rsp)
        }
    }
}

/// `error_function` must already carry the error flag in its high bit
fn serialize_exception(
    rsp: &mut [u8],
    error_function: u8,
    code: ExceptionCode,
) -> Result<usize, Error> {
    let mut cursor = WriteCursor::new(rsp);
    cursor.store_u8(error_function)?;
    cursor.store_u8(code.to_u8())?;
    Ok(cursor.written())
}

/// Unwrap a backend result: an exception becomes an exception response,
/// any other failure aborts the connection
macro_rules! backend_call {
    ($result:expr, $function:expr, $rsp:expr) => {
        match $result {
            Ok(value) => value,
            Err(Error::Exception(code)) => {
                return serialize_exception($rsp, $function.as_error(), code)
            }
            Err(err) => return Err(err),
        }
    };
}

fn process_read_bits(
    handler: &mut dyn ServerHandler,
    function: FunctionCode,
    cursor: &mut ReadCursor,
    rsp: &mut [u8],
) -> Result<usize, Error> {
    let addr = cursor.fetch_u16_be()?;
    let cnt = cursor.fetch_u16_be()?;
    cursor.ensure_consumed()?;

    if !(1..=limits::MAX_READ_BITS_COUNT).contains(&cnt) {
        return serialize_exception(rsp, function.as_error(), ExceptionCode::IllegalDataValue);
    }

    let result = if function == FunctionCode::ReadCoils {
        handler.read_coils(addr, cnt)
    } else {
        handler.read_discrete_inputs(addr, cnt)
    };
    let values = backend_call!(result, function, rsp);

    if values.len() != cnt as usize {
        return Err(InternalError::BadResultCount(values.len(), cnt as usize).into());
    }

    let mut out = WriteCursor::new(rsp);
    out.store_u8(function.get_value())?;
    out.store_u8(bits::num_bytes_for_bits(cnt) as u8)?;
    bits::serialize_bits(&mut out, &values)?;
    Ok(out.written())
}

fn process_read_registers(
    handler: &mut dyn ServerHandler,
    function: FunctionCode,
    cursor: &mut ReadCursor,
    rsp: &mut [u8],
) -> Result<usize, Error> {
    let addr = cursor.fetch_u16_be()?;
    let cnt = cursor.fetch_u16_be()?;
    cursor.ensure_consumed()?;

    if !(1..=limits::MAX_READ_REGISTERS_COUNT).contains(&cnt) {
        return serialize_exception(rsp, function.as_error(), ExceptionCode::IllegalDataValue);
    }

    let result = if function == FunctionCode::ReadHoldingRegisters {
        handler.read_holding_registers(addr, cnt)
    } else {
        handler.read_input_registers(addr, cnt)
    };
    let values = backend_call!(result, function, rsp);

    if values.len() != cnt as usize {
        return Err(InternalError::BadResultCount(values.len(), cnt as usize).into());
    }

    let mut out = WriteCursor::new(rsp);
    out.store_u8(function.get_value())?;
    out.store_u8((2 * cnt) as u8)?;
    bits::serialize_registers(&mut out, &values)?;
    Ok(out.written())
}

fn process_write_single_coil(
    handler: &mut dyn ServerHandler,
    cursor: &mut ReadCursor,
    rsp: &mut [u8],
) -> Result<usize, Error> {
    let function = FunctionCode::WriteSingleCoil;
    let addr = cursor.fetch_u16_be()?;
    let raw = cursor.fetch_u16_be()?;
    cursor.ensure_consumed()?;

    let value = match raw {
        coil::ON => true,
        coil::OFF => false,
        _ => {
            return serialize_exception(rsp, function.as_error(), ExceptionCode::IllegalDataValue)
        }
    };

    backend_call!(handler.write_coils(addr, &[value]), function, rsp);

    let mut out = WriteCursor::new(rsp);
    out.store_u8(function.get_value())?;
    out.store_u16_be(addr)?;
    out.store_u16_be(raw)?;
    Ok(out.written())
}

fn process_write_single_register(
    handler: &mut dyn ServerHandler,
    cursor: &mut ReadCursor,
    rsp: &mut [u8],
) -> Result<usize, Error> {
    let function = FunctionCode::WriteSingleRegister;
    let addr = cursor.fetch_u16_be()?;
    let value = cursor.fetch_u16_be()?;
    cursor.ensure_consumed()?;

    backend_call!(handler.write_holding_registers(addr, &[value]), function, rsp);

    let mut out = WriteCursor::new(rsp);
    out.store_u8(function.get_value())?;
    out.store_u16_be(addr)?;
    out.store_u16_be(value)?;
    Ok(out.written())
}

fn process_write_multiple_coils(
    handler: &mut dyn ServerHandler,
    cursor: &mut ReadCursor,
    rsp: &mut [u8],
) -> Result<usize, Error> {
    let function = FunctionCode::WriteMultipleCoils;
    let addr = cursor.fetch_u16_be()?;
    let cnt = cursor.fetch_u16_be()?;
    let byte_cnt = cursor.fetch_u8()?;

    if !(1..=limits::MAX_WRITE_COILS_COUNT).contains(&cnt)
        || byte_cnt as usize != bits::num_bytes_for_bits(cnt)
    {
        return serialize_exception(rsp, function.as_error(), ExceptionCode::IllegalDataValue);
    }

    let values = bits::parse_bits(cursor, cnt)?;
    cursor.ensure_consumed()?;

    backend_call!(handler.write_coils(addr, &values), function, rsp);

    let mut out = WriteCursor::new(rsp);
    out.store_u8(function.get_value())?;
    out.store_u16_be(addr)?;
    out.store_u16_be(cnt)?;
    Ok(out.written())
}

fn process_write_multiple_registers(
    handler: &mut dyn ServerHandler,
    cursor: &mut ReadCursor,
    rsp: &mut [u8],
) -> Result<usize, Error> {
    let function = FunctionCode::WriteMultipleRegisters;
    let addr = cursor.fetch_u16_be()?;
    let cnt = cursor.fetch_u16_be()?;
    let byte_cnt = cursor.fetch_u8()?;

    if !(1..=limits::MAX_WRITE_REGISTERS_COUNT).contains(&cnt)
        || byte_cnt as usize != 2 * cnt as usize
    {
        return serialize_exception(rsp, function.as_error(), ExceptionCode::IllegalDataValue);
    }

    let values = bits::parse_registers(cursor, cnt)?;
    cursor.ensure_consumed()?;

    backend_call!(handler.write_holding_registers(addr, &values), function, rsp);

    let mut out = WriteCursor::new(rsp);
    out.store_u8(function.get_value())?;
    out.store_u16_be(addr)?;
    out.store_u16_be(cnt)?;
    Ok(out.written())
}

fn process_mask_write_register(
    handler: &mut dyn ServerHandler,
    cursor: &mut ReadCursor,
    rsp: &mut [u8],
) -> Result<usize, Error> {
    let function = FunctionCode::MaskWriteRegister;
    let addr = cursor.fetch_u16_be()?;
    let and_mask = cursor.fetch_u16_be()?;
    let or_mask = cursor.fetch_u16_be()?;
    cursor.ensure_consumed()?;

    let registers = backend_call!(handler.read_holding_registers(addr, 1), function, rsp);
    let current = match registers.as_slice() {
        [value] => *value,
        _ => return Err(InternalError::BadResultCount(registers.len(), 1).into()),
    };

    let value = (current & and_mask) | (or_mask & !and_mask);
    backend_call!(handler.write_holding_registers(addr, &[value]), function, rsp);

    let mut out = WriteCursor::new(rsp);
    out.store_u8(function.get_value())?;
    out.store_u16_be(addr)?;
    out.store_u16_be(and_mask)?;
    out.store_u16_be(or_mask)?;
    Ok(out.written())
}

fn process_read_write_multiple_registers(
    handler: &mut dyn ServerHandler,
    cursor: &mut ReadCursor,
    rsp: &mut [u8],
) -> Result<usize, Error> {
    let function = FunctionCode::ReadWriteMultipleRegisters;
    let read_addr = cursor.fetch_u16_be()?;
    let read_cnt = cursor.fetch_u16_be()?;
    let write_addr = cursor.fetch_u16_be()?;
    let write_cnt = cursor.fetch_u16_be()?;
    let byte_cnt = cursor.fetch_u8()?;

    if !(1..=limits::MAX_READ_WRITE_READ_COUNT).contains(&read_cnt)
        || !(1..=limits::MAX_READ_WRITE_WRITE_COUNT).contains(&write_cnt)
        || byte_cnt as usize != 2 * write_cnt as usize
    {
        return serialize_exception(rsp, function.as_error(), ExceptionCode::IllegalDataValue);
    }

    let values = bits::parse_registers(cursor, write_cnt)?;
    cursor.ensure_consumed()?;

    let result = handler.write_read_holding_registers(write_addr, &values, read_addr, read_cnt);
    let read_values = backend_call!(result, function, rsp);

    if read_values.len() != read_cnt as usize {
        return Err(InternalError::BadResultCount(read_values.len(), read_cnt as usize).into());
    }

    let mut out = WriteCursor::new(rsp);
    out.store_u8(function.get_value())?;
    out.store_u8((2 * read_cnt) as u8)?;
    bits::serialize_registers(&mut out, &read_values)?;
    Ok(out.written())
}

fn write_device_info_object(
    cursor: &mut WriteCursor,
    object_id: u8,
    value: &str,
) -> Result<(), Error> {
    let len = match u8::try_from(value.len()) {
        Ok(len) => len,
        Err(_) => return Err(InternalError::BadByteCount(value.len()).into()),
    };
    cursor.store_u8(object_id)?;
    cursor.store_u8(len)?;
    cursor.store_bytes(value.as_bytes())?;
    Ok(())
}

fn process_read_device_identification(
    handler: &mut dyn ServerHandler,
    cursor: &mut ReadCursor,
    rsp: &mut [u8],
) -> Result<usize, Error> {
    let function = FunctionCode::ReadDeviceIdentification;
    let mei_type = cursor.fetch_u8()?;
    let read_device_id_code = cursor.fetch_u8()?;
    let object_id = cursor.fetch_u8()?;
    cursor.ensure_consumed()?;

    if mei_type != function::MEI_TYPE_READ_DEVICE_ID
        || read_device_id_code != function::READ_DEVICE_ID_BASIC
    {
        return serialize_exception(rsp, function.as_error(), ExceptionCode::IllegalDataValue);
    }
    if object_id != function::OBJECT_ID_VENDOR_NAME {
        return serialize_exception(rsp, function.as_error(), ExceptionCode::IllegalDataAddress);
    }

    let info = backend_call!(handler.get_basic_device_identification(), function, rsp);

    let mut out = WriteCursor::new(rsp);
    out.store_u8(function.get_value())?;
    out.store_u8(function::MEI_TYPE_READ_DEVICE_ID)?;
    out.store_u8(function::READ_DEVICE_ID_BASIC)?;
    out.store_u8(function::READ_DEVICE_ID_BASIC)?; // conformity level: basic
    out.store_u8(0x00)?; // more follows: no
    out.store_u8(0x00)?; // next object id
    out.store_u8(0x03)?; // number of objects
    write_device_info_object(&mut out, function::OBJECT_ID_VENDOR_NAME, &info.vendor)?;
    write_device_info_object(&mut out, function::OBJECT_ID_PRODUCT_CODE, &info.product)?;
    write_device_info_object(
        &mut out,
        function::OBJECT_ID_MAJOR_MINOR_REVISION,
        &info.version,
    )?;
    Ok(out.written())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::frame::constants::MAX_PDU_SIZE;
    use crate::error::AduParseError;
    use crate::types::DeviceIdentification;

    /// fixed-data backend recording every write it receives
    #[derive(Default)]
    struct TestHandler {
        coils: Vec<bool>,
        discrete_inputs: Vec<bool>,
        holding_registers: Vec<u16>,
        input_registers: Vec<u16>,
        coil_writes: Vec<(u16, Vec<bool>)>,
        register_writes: Vec<(u16, Vec<u16>)>,
        error: Option<Error>,
    }

    impl ServerHandler for TestHandler {
        fn read_coils(&mut self, _addr: u16, cnt: u16) -> Result<Vec<bool>, Error> {
            if let Some(err) = self.error {
                return Err(err);
            }
            Ok(self.coils.iter().copied().cycle().take(cnt as usize).collect())
        }

        fn read_discrete_inputs(&mut self, _addr: u16, cnt: u16) -> Result<Vec<bool>, Error> {
            Ok(self
                .discrete_inputs
                .iter()
                .copied()
                .cycle()
                .take(cnt as usize)
                .collect())
        }

        fn read_holding_registers(&mut self, _addr: u16, cnt: u16) -> Result<Vec<u16>, Error> {
            if let Some(err) = self.error {
                return Err(err);
            }
            Ok(self
                .holding_registers
                .iter()
                .copied()
                .cycle()
                .take(cnt as usize)
                .collect())
        }

        fn read_input_registers(&mut self, _addr: u16, cnt: u16) -> Result<Vec<u16>, Error> {
            Ok(self
                .input_registers
                .iter()
                .copied()
                .cycle()
                .take(cnt as usize)
                .collect())
        }

        fn write_coils(&mut self, addr: u16, values: &[bool]) -> Result<(), Error> {
            if let Some(err) = self.error {
                return Err(err);
            }
            self.coil_writes.push((addr, values.to_vec()));
            Ok(())
        }

        fn write_holding_registers(&mut self, addr: u16, values: &[u16]) -> Result<(), Error> {
            self.register_writes.push((addr, values.to_vec()));
            Ok(())
        }

        fn write_read_holding_registers(
            &mut self,
            write_addr: u16,
            values: &[u16],
            _read_addr: u16,
            read_cnt: u16,
        ) -> Result<Vec<u16>, Error> {
            self.register_writes.push((write_addr, values.to_vec()));
            Ok(self
                .holding_registers
                .iter()
                .copied()
                .cycle()
                .take(read_cnt as usize)
                .collect())
        }

        fn get_basic_device_identification(&mut self) -> Result<DeviceIdentification, Error> {
            Ok(DeviceIdentification {
                vendor: "acme".to_owned(),
                product: "pb".to_owned(),
                version: "1.2.3".to_owned(),
            })
        }
    }

    fn serve(handler: &mut TestHandler, req: &[u8]) -> Result<Vec<u8>, Error> {
        let mut rsp = [0u8; MAX_PDU_SIZE];
        let size = server_engine(handler, req, &mut rsp)?;
        Ok(rsp[..size].to_vec())
    }

    #[test]
    fn serves_read_coils() {
        let mut handler = TestHandler {
            coils: vec![
                true, false, true, true, false, false, true, true, //
                true, true, false, true, false, true, true, false, //
                true, false, true,
            ],
            ..Default::default()
        };
        let rsp = serve(&mut handler, &[0x01, 0x00, 0x13, 0x00, 0x13]).unwrap();
        assert_eq!(rsp, vec![0x01, 0x03, 0xCD, 0x6B, 0x05]);
    }

    #[test]
    fn serves_read_discrete_inputs() {
        let mut handler = TestHandler {
            discrete_inputs: vec![
                false, false, true, true, false, true, false, true, //
                true, true, false, true, true, false, true, true, //
                true, false, true, false, true, true,
            ],
            ..Default::default()
        };
        let rsp = serve(&mut handler, &[0x02, 0x00, 0xC4, 0x00, 0x16]).unwrap();
        assert_eq!(rsp, vec![0x02, 0x03, 0xAC, 0xDB, 0x35]);
    }

    #[test]
    fn serves_read_holding_registers() {
        let mut handler = TestHandler {
            holding_registers: vec![0x022B, 0x0000, 0x0064],
            ..Default::default()
        };
        let rsp = serve(&mut handler, &[0x03, 0x00, 0x6B, 0x00, 0x03]).unwrap();
        assert_eq!(rsp, vec![0x03, 0x06, 0x02, 0x2B, 0x00, 0x00, 0x00, 0x64]);
    }

    #[test]
    fn serves_read_input_registers() {
        let mut handler = TestHandler {
            input_registers: vec![0x000A],
            ..Default::default()
        };
        let rsp = serve(&mut handler, &[0x04, 0x00, 0x08, 0x00, 0x01]).unwrap();
        assert_eq!(rsp, vec![0x04, 0x02, 0x00, 0x0A]);
    }

    #[test]
    fn read_quantity_limits_produce_illegal_data_value() {
        let mut handler = TestHandler {
            coils: vec![false],
            holding_registers: vec![0],
            ..Default::default()
        };
        // count of zero
        assert_eq!(
            serve(&mut handler, &[0x01, 0x00, 0x00, 0x00, 0x00]).unwrap(),
            vec![0x81, 0x03]
        );
        // one past the maximum
        assert_eq!(
            serve(&mut handler, &[0x01, 0x00, 0x00, 0x07, 0xD1]).unwrap(),
            vec![0x81, 0x03]
        );
        assert_eq!(
            serve(&mut handler, &[0x03, 0x00, 0x00, 0x00, 0x7E]).unwrap(),
            vec![0x83, 0x03]
        );
        // the maxima themselves are served
        assert_eq!(
            serve(&mut handler, &[0x01, 0x00, 0x00, 0x07, 0xD0]).unwrap()[..2],
            [0x01, 0xFA]
        );
        assert_eq!(
            serve(&mut handler, &[0x03, 0x00, 0x00, 0x00, 0x7D]).unwrap()[..2],
            [0x03, 0xFA]
        );
    }

    #[test]
    fn serves_write_single_coil_with_echo() {
        let mut handler = TestHandler::default();
        let req = [0x05, 0x00, 0xAC, 0xFF, 0x00];
        let rsp = serve(&mut handler, &req).unwrap();
        assert_eq!(rsp, req.to_vec());
        assert_eq!(handler.coil_writes, vec![(0x00AC, vec![true])]);

        let req = [0x05, 0x00, 0xAC, 0x00, 0x00];
        let rsp = serve(&mut handler, &req).unwrap();
        assert_eq!(rsp, req.to_vec());
        assert_eq!(handler.coil_writes[1], (0x00AC, vec![false]));
    }

    #[test]
    fn write_single_coil_rejects_unspecified_values() {
        let mut handler = TestHandler::default();
        let rsp = serve(&mut handler, &[0x05, 0x00, 0xAC, 0x12, 0x34]).unwrap();
        assert_eq!(rsp, vec![0x85, 0x03]);
        assert!(handler.coil_writes.is_empty());
    }

    #[test]
    fn serves_write_single_register_with_echo() {
        let mut handler = TestHandler::default();
        let req = [0x06, 0x00, 0x01, 0x00, 0x03];
        let rsp = serve(&mut handler, &req).unwrap();
        assert_eq!(rsp, req.to_vec());
        assert_eq!(handler.register_writes, vec![(0x0001, vec![0x0003])]);
    }

    #[test]
    fn serves_write_multiple_coils() {
        let mut handler = TestHandler::default();
        let req = [0x0F, 0x00, 0x13, 0x00, 0x0A, 0x02, 0xCD, 0x01];
        let rsp = serve(&mut handler, &req).unwrap();
        assert_eq!(rsp, vec![0x0F, 0x00, 0x13, 0x00, 0x0A]);
        assert_eq!(
            handler.coil_writes,
            vec![(
                0x0013,
                vec![true, false, true, true, false, false, true, true, true, false]
            )]
        );
    }

    #[test]
    fn write_multiple_coils_validates_byte_count_consistency() {
        let mut handler = TestHandler::default();
        // 10 coils require 2 bytes, not 3
        let rsp = serve(&mut handler, &[0x0F, 0x00, 0x13, 0x00, 0x0A, 0x03, 0xCD, 0x01, 0x00])
            .unwrap();
        assert_eq!(rsp, vec![0x8F, 0x03]);
        // quantity above the limit
        let rsp = serve(&mut handler, &[0x0F, 0x00, 0x00, 0x07, 0xB1, 0xF7]).unwrap();
        assert_eq!(rsp, vec![0x8F, 0x03]);
        assert!(handler.coil_writes.is_empty());
    }

    #[test]
    fn serves_write_multiple_registers() {
        let mut handler = TestHandler::default();
        let req = [0x10, 0x00, 0x01, 0x00, 0x02, 0x04, 0x00, 0x0A, 0x01, 0x02];
        let rsp = serve(&mut handler, &req).unwrap();
        assert_eq!(rsp, vec![0x10, 0x00, 0x01, 0x00, 0x02]);
        assert_eq!(handler.register_writes, vec![(0x0001, vec![0x000A, 0x0102])]);
    }

    #[test]
    fn write_multiple_registers_validates_byte_count_consistency() {
        let mut handler = TestHandler::default();
        let rsp = serve(&mut handler, &[0x10, 0x00, 0x01, 0x00, 0x02, 0x03, 0x00, 0x0A, 0x01])
            .unwrap();
        assert_eq!(rsp, vec![0x90, 0x03]);
        let rsp = serve(&mut handler, &[0x10, 0x00, 0x00, 0x00, 0x7C, 0xF8]).unwrap();
        assert_eq!(rsp, vec![0x90, 0x03]);
        assert!(handler.register_writes.is_empty());
    }

    #[test]
    fn mask_write_register_reads_modifies_and_writes() {
        let mut handler = TestHandler {
            holding_registers: vec![0x0012],
            ..Default::default()
        };
        let req = [0x16, 0x00, 0x04, 0x00, 0xF2, 0x00, 0x25];
        let rsp = serve(&mut handler, &req).unwrap();
        assert_eq!(rsp, req.to_vec());
        // (0x0012 & 0x00F2) | (0x0025 & !0x00F2) == 0x0017
        assert_eq!(handler.register_writes, vec![(0x0004, vec![0x0017])]);
    }

    #[test]
    fn mask_write_semantics_hold_for_arbitrary_masks() {
        for (current, and_mask, or_mask) in
            [(0xFFFFu16, 0x0000u16, 0xAAAAu16), (0x1234, 0xFFFF, 0x0000), (0x0F0F, 0x3333, 0xCCCC)]
        {
            let mut handler = TestHandler {
                holding_registers: vec![current],
                ..Default::default()
            };
            let mut req = vec![0x16, 0x00, 0x00];
            req.extend_from_slice(&and_mask.to_be_bytes());
            req.extend_from_slice(&or_mask.to_be_bytes());
            serve(&mut handler, &req).unwrap();
            let expected = (current & and_mask) | (or_mask & !and_mask);
            assert_eq!(handler.register_writes, vec![(0x0000, vec![expected])]);
        }
    }

    #[test]
    fn serves_read_write_multiple_registers() {
        let mut handler = TestHandler {
            holding_registers: vec![0x00FE, 0x0ACD, 0x0001, 0x0003, 0x000D, 0x00FF],
            ..Default::default()
        };
        let req = [
            0x17, 0x00, 0x03, 0x00, 0x06, 0x00, 0x0E, 0x00, 0x03, 0x06, 0x00, 0xFF, 0x00, 0xFF,
            0x00, 0xFF,
        ];
        let rsp = serve(&mut handler, &req).unwrap();
        assert_eq!(
            rsp,
            vec![
                0x17, 0x0C, 0x00, 0xFE, 0x0A, 0xCD, 0x00, 0x01, 0x00, 0x03, 0x00, 0x0D, 0x00, 0xFF
            ]
        );
        // the write happened, and before the read returned
        assert_eq!(
            handler.register_writes,
            vec![(0x000E, vec![0x00FF, 0x00FF, 0x00FF])]
        );
    }

    #[test]
    fn read_write_multiple_registers_validates_both_quantities() {
        let mut handler = TestHandler::default();
        // read count above the limit
        let rsp = serve(
            &mut handler,
            &[0x17, 0x00, 0x00, 0x00, 0x7E, 0x00, 0x00, 0x00, 0x01, 0x02, 0x00, 0x00],
        )
        .unwrap();
        assert_eq!(rsp, vec![0x97, 0x03]);
        // write count above the limit
        let mut req = vec![0x17, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x7A, 0xF4];
        req.extend_from_slice(&[0u8; 244]);
        let rsp = serve(&mut handler, &req).unwrap();
        assert_eq!(rsp, vec![0x97, 0x03]);
        // write byte count inconsistent
        let rsp = serve(
            &mut handler,
            &[0x17, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x03, 0x00, 0x00, 0x00],
        )
        .unwrap();
        assert_eq!(rsp, vec![0x97, 0x03]);
    }

    #[test]
    fn serves_basic_device_identification() {
        let mut handler = TestHandler::default();
        let rsp = serve(&mut handler, &[0x2B, 0x0E, 0x01, 0x00]).unwrap();
        assert_eq!(
            rsp,
            vec![
                0x2B, 0x0E, 0x01, 0x01, 0x00, 0x00, 0x03, //
                0x00, 0x04, b'a', b'c', b'm', b'e', //
                0x01, 0x02, b'p', b'b', //
                0x02, 0x05, b'1', b'.', b'2', b'.', b'3',
            ]
        );
    }

    #[test]
    fn device_identification_validates_mei_code_and_object() {
        let mut handler = TestHandler::default();
        // wrong MEI type
        assert_eq!(
            serve(&mut handler, &[0x2B, 0x0D, 0x01, 0x00]).unwrap(),
            vec![0xAB, 0x03]
        );
        // unsupported conformance category
        assert_eq!(
            serve(&mut handler, &[0x2B, 0x0E, 0x02, 0x00]).unwrap(),
            vec![0xAB, 0x03]
        );
        // starting object other than vendor name
        assert_eq!(
            serve(&mut handler, &[0x2B, 0x0E, 0x01, 0x01]).unwrap(),
            vec![0xAB, 0x02]
        );
    }

    #[test]
    fn unknown_function_code_yields_illegal_function() {
        let mut handler = TestHandler::default();
        let rsp = serve(&mut handler, &[0x07, 0x00]).unwrap();
        assert_eq!(rsp, vec![0x87, 0x01]);
    }

    #[test]
    fn backend_exceptions_become_exception_responses() {
        let mut handler = TestHandler {
            error: Some(Error::Exception(ExceptionCode::ServerDeviceBusy)),
            ..Default::default()
        };
        let rsp = serve(&mut handler, &[0x01, 0x00, 0x00, 0x00, 0x01]).unwrap();
        assert_eq!(rsp, vec![0x81, 0x06]);
    }

    #[test]
    fn backend_transport_errors_abort_the_connection() {
        let mut handler = TestHandler {
            error: Some(Error::Io(std::io::ErrorKind::Other)),
            ..Default::default()
        };
        let err = serve(&mut handler, &[0x01, 0x00, 0x00, 0x00, 0x01]).unwrap_err();
        assert_eq!(err, Error::Io(std::io::ErrorKind::Other));
    }

    #[test]
    fn truncated_requests_are_parse_errors() {
        let mut handler = TestHandler::default();
        assert_eq!(
            serve(&mut handler, &[0x01, 0x00, 0x00, 0x00]).unwrap_err(),
            Error::BadResponse(AduParseError::UnexpectedEnd)
        );
        assert_eq!(
            serve(&mut handler, &[]).unwrap_err(),
            Error::BadResponse(AduParseError::UnexpectedEnd)
        );
    }

    #[test]
    fn oversized_requests_are_parse_errors() {
        let mut handler = TestHandler::default();
        assert_eq!(
            serve(&mut handler, &[0x01, 0x00, 0x00, 0x00, 0x01, 0xFF]).unwrap_err(),
            Error::BadResponse(AduParseError::ExtraBytes(1))
        );
    }
}
