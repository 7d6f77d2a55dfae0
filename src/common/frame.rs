use crate::common::cursor::{ReadCursor, WriteCursor};
use crate::error::{FrameParseError, InternalError};
use crate::types::UnitId;

pub(crate) mod constants {
    /// the shortest PDU is a 2-byte exception response
    pub(crate) const MIN_PDU_SIZE: usize = 2;
    pub(crate) const MAX_PDU_SIZE: usize = 253;
    pub(crate) const MBAP_HEADER_SIZE: usize = 7;
    pub(crate) const MAX_ADU_SIZE: usize = MBAP_HEADER_SIZE + MAX_PDU_SIZE;
    // the length field counts the unit identifier plus the PDU
    pub(crate) const MIN_LENGTH_FIELD: u16 = (MIN_PDU_SIZE + 1) as u16;
    pub(crate) const MAX_LENGTH_FIELD: u16 = (MAX_PDU_SIZE + 1) as u16;
}

/// The 7-byte MBAP transport header prefixed to every PDU
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct MbapHeader {
    pub(crate) transaction_id: u16,
    pub(crate) protocol_id: u16,
    pub(crate) length: u16,
    pub(crate) unit_id: UnitId,
}

impl MbapHeader {
    pub(crate) fn new(transaction_id: u16, unit_id: UnitId, pdu_size: usize) -> Self {
        Self {
            transaction_id,
            protocol_id: 0,
            length: (pdu_size + 1) as u16,
            unit_id,
        }
    }

    pub(crate) fn pdu_size(&self) -> usize {
        self.length as usize - 1
    }

    pub(crate) fn adu_size(&self) -> usize {
        constants::MBAP_HEADER_SIZE + self.pdu_size()
    }
}

/// Parse an MBAP header, enforcing the protocol id and length invariants
pub(crate) fn parse_mbap_header(src: &[u8]) -> Result<MbapHeader, FrameParseError> {
    let short = |_| FrameParseError::InsufficientBytes;

    let mut cursor = ReadCursor::new(src);
    let transaction_id = cursor.fetch_u16_be().map_err(short)?;
    let protocol_id = cursor.fetch_u16_be().map_err(short)?;
    let length = cursor.fetch_u16_be().map_err(short)?;
    let unit_id = UnitId::new(cursor.fetch_u8().map_err(short)?);

    if protocol_id != 0 {
        return Err(FrameParseError::UnknownProtocolId(protocol_id));
    }

    if !(constants::MIN_LENGTH_FIELD..=constants::MAX_LENGTH_FIELD).contains(&length) {
        return Err(FrameParseError::LengthFieldOutOfRange(length));
    }

    Ok(MbapHeader {
        transaction_id,
        protocol_id,
        length,
        unit_id,
    })
}

/// Write the 7 header bytes at the cursor's current position
pub(crate) fn serialize_mbap_header(
    cursor: &mut WriteCursor,
    header: &MbapHeader,
) -> Result<(), InternalError> {
    cursor.store_u16_be(header.transaction_id)?;
    cursor.store_u16_be(header.protocol_id)?;
    cursor.store_u16_be(header.length)?;
    cursor.store_u8(header.unit_id.value)
}
