//! Bounds-checked read cursor over an immutable captured unit.
//!
//! Every decoder in this crate reads through [`ByteCursor`]. A cursor is a
//! borrowed view (start offset + length) over the backing buffer; reads past
//! its declared length fail with [`OutOfBounds`] instead of panicking or
//! reading stale bytes. Sub-slicing produces another cursor borrowing the
//! same buffer, carrying the absolute base offset so anomaly byte ranges
//! stay meaningful after nesting.
//!
//! Network byte order (big-endian) is the default; the `_le` accessors
//! cover protocols that declare little-endian fields (the key/value
//! protocol's opaque field).

use crate::error::OutOfBounds;

/// Immutable, bounds-known view over a captured unit.
///
/// Pure function of buffer and offset: no accessor has side effects.
#[derive(Debug, Clone, Copy)]
pub struct ByteCursor<'data> {
    data: &'data [u8],
    /// Absolute offset of `data[0]` within the original captured unit.
    base: usize,
}

impl<'data> ByteCursor<'data> {
    /// Wrap a whole captured unit (base offset 0).
    pub fn new(data: &'data [u8]) -> Self {
        Self { data, base: 0 }
    }

    /// Length of this view in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True if this view covers no bytes.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Absolute offset of this view's first byte in the original unit.
    pub fn base(&self) -> usize {
        self.base
    }

    /// The raw bytes of this view.
    pub fn bytes(&self) -> &'data [u8] {
        self.data
    }

    /// Absolute byte range covered by `offset..offset+len` within this view.
    pub fn abs_range(&self, offset: usize, len: usize) -> std::ops::Range<usize> {
        self.base + offset..self.base + offset + len
    }

    fn check(&self, offset: usize, requested: usize) -> Result<(), OutOfBounds> {
        if offset.checked_add(requested).is_some_and(|end| end <= self.data.len()) {
            Ok(())
        } else {
            Err(OutOfBounds {
                offset: self.base + offset,
                requested,
                available: self.data.len().saturating_sub(offset),
            })
        }
    }

    /// Read one byte at `offset`.
    pub fn read_u8(&self, offset: usize) -> Result<u8, OutOfBounds> {
        self.check(offset, 1)?;
        Ok(self.data[offset])
    }

    /// Read a big-endian u16 at `offset`.
    pub fn read_u16(&self, offset: usize) -> Result<u16, OutOfBounds> {
        self.check(offset, 2)?;
        Ok(u16::from_be_bytes([self.data[offset], self.data[offset + 1]]))
    }

    /// Read a big-endian 24-bit value at `offset`, widened to u32.
    pub fn read_u24(&self, offset: usize) -> Result<u32, OutOfBounds> {
        self.check(offset, 3)?;
        Ok(u32::from(self.data[offset]) << 16
            | u32::from(self.data[offset + 1]) << 8
            | u32::from(self.data[offset + 2]))
    }

    /// Read a big-endian u32 at `offset`.
    pub fn read_u32(&self, offset: usize) -> Result<u32, OutOfBounds> {
        self.check(offset, 4)?;
        let mut buf = [0u8; 4];
        buf.copy_from_slice(&self.data[offset..offset + 4]);
        Ok(u32::from_be_bytes(buf))
    }

    /// Read a big-endian u64 at `offset`.
    pub fn read_u64(&self, offset: usize) -> Result<u64, OutOfBounds> {
        self.check(offset, 8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&self.data[offset..offset + 8]);
        Ok(u64::from_be_bytes(buf))
    }

    /// Read a little-endian u16 at `offset`.
    pub fn read_u16_le(&self, offset: usize) -> Result<u16, OutOfBounds> {
        self.check(offset, 2)?;
        Ok(u16::from_le_bytes([self.data[offset], self.data[offset + 1]]))
    }

    /// Read a little-endian u32 at `offset`.
    pub fn read_u32_le(&self, offset: usize) -> Result<u32, OutOfBounds> {
        self.check(offset, 4)?;
        let mut buf = [0u8; 4];
        buf.copy_from_slice(&self.data[offset..offset + 4]);
        Ok(u32::from_le_bytes(buf))
    }

    /// Read a little-endian u64 at `offset`.
    pub fn read_u64_le(&self, offset: usize) -> Result<u64, OutOfBounds> {
        self.check(offset, 8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&self.data[offset..offset + 8]);
        Ok(u64::from_le_bytes(buf))
    }

    /// Borrow `len` raw bytes starting at `offset`.
    pub fn slice(&self, offset: usize, len: usize) -> Result<&'data [u8], OutOfBounds> {
        self.check(offset, len)?;
        Ok(&self.data[offset..offset + len])
    }

    /// Narrow to a sub-view of `len` bytes starting at `offset`.
    ///
    /// The sub-view borrows the same backing buffer and carries the
    /// absolute base offset forward.
    pub fn subrange(&self, offset: usize, len: usize) -> Result<ByteCursor<'data>, OutOfBounds> {
        self.check(offset, len)?;
        Ok(ByteCursor {
            data: &self.data[offset..offset + len],
            base: self.base + offset,
        })
    }

    /// Narrow to everything from `offset` to the end of this view.
    pub fn tail(&self, offset: usize) -> Result<ByteCursor<'data>, OutOfBounds> {
        self.subrange(offset, self.data.len().saturating_sub(offset.min(self.data.len())))
    }
}
