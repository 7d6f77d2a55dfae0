use crate::error::{AduParseError, InternalError};

/// Decodes big-endian wire fields out of a borrowed buffer, tracking how
/// far parsing has progressed.
pub(crate) struct ReadCursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

/// Encodes big-endian wire fields into a borrowed buffer. Every store goes
/// through a single bounds check, so a field lands either completely or
/// not at all.
pub(crate) struct WriteCursor<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> ReadCursor<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> ReadCursor<'a> {
        ReadCursor { buf, pos: 0 }
    }

    pub(crate) fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// A parser must account for every byte of its PDU; anything left after
    /// the last field is a protocol violation.
    pub(crate) fn ensure_consumed(&self) -> Result<(), AduParseError> {
        match self.remaining() {
            0 => Ok(()),
            count => Err(AduParseError::ExtraBytes(count)),
        }
    }

    pub(crate) fn fetch_bytes(&mut self, count: usize) -> Result<&'a [u8], AduParseError> {
        let end = self.pos.saturating_add(count);
        match self.buf.get(self.pos..end) {
            Some(field) => {
                self.pos = end;
                Ok(field)
            }
            None => Err(AduParseError::UnexpectedEnd),
        }
    }

    pub(crate) fn fetch_u8(&mut self) -> Result<u8, AduParseError> {
        Ok(self.fetch_bytes(1)?[0])
    }

    pub(crate) fn fetch_u16_be(&mut self) -> Result<u16, AduParseError> {
        let field = self.fetch_bytes(2)?;
        Ok(u16::from_be_bytes([field[0], field[1]]))
    }
}

impl<'a> WriteCursor<'a> {
    pub(crate) fn new(buf: &'a mut [u8]) -> WriteCursor<'a> {
        WriteCursor { buf, pos: 0 }
    }

    /// Number of bytes stored so far
    pub(crate) fn written(&self) -> usize {
        self.pos
    }

    pub(crate) fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn put(&mut self, field: &[u8]) -> Result<(), InternalError> {
        let end = self.pos.saturating_add(field.len());
        match self.buf.get_mut(self.pos..end) {
            Some(dst) => {
                dst.copy_from_slice(field);
                self.pos = end;
                Ok(())
            }
            None => Err(InternalError::WriteOverflow {
                requested: field.len(),
                available: self.buf.len() - self.pos,
            }),
        }
    }

    pub(crate) fn store_u8(&mut self, value: u8) -> Result<(), InternalError> {
        self.put(&[value])
    }

    pub(crate) fn store_u16_be(&mut self, value: u16) -> Result<(), InternalError> {
        self.put(&value.to_be_bytes())
    }

    pub(crate) fn store_bytes(&mut self, bytes: &[u8]) -> Result<(), InternalError> {
        self.put(bytes)
    }
}
