//! Forward-only byte reader over the command stream
//!
//! Reads past the end return `None` and leave the cursor at the end, so a
//! truncated stream simply stops the command loop.

#[derive(Debug, Clone)]
pub struct ByteCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    pub fn new(data: &'a [u8], pos: usize) -> Self {
        ByteCursor {
            data,
            pos: pos.min(data.len()),
        }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    #[cfg(test)]
    pub fn is_at_end(&self) -> bool {
        self.pos >= self.data.len()
    }

    pub fn read_u8(&mut self) -> Option<u8> {
        let byte = *self.data.get(self.pos)?;
        self.pos += 1;
        Some(byte)
    }

    /// Register/value operand pair
    pub fn read_pair(&mut self) -> Option<(u8, u8)> {
        let pair = self.data.get(self.pos..self.pos + 2)?;
        self.pos += 2;
        Some((pair[0], pair[1]))
    }

    pub fn read_u32_le(&mut self) -> Option<u32> {
        let bytes = self.data.get(self.pos..self.pos + 4)?;
        self.pos += 4;
        Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Skip `count` bytes, clamping at the end
    pub fn skip(&mut self, count: usize) {
        self.pos = self.pos.saturating_add(count).min(self.data.len());
    }
}
