//! Bounds-checked, zero-copy views over packet bytes.
//!
//! A [`ByteCursor`] is a window into the packet buffer described by an
//! absolute start offset, the number of bytes actually captured inside the
//! window, and the number of bytes the protocol says existed on the wire
//! (the reported length). The reported length may exceed the captured
//! length when the capture was taken with a snapshot length; such windows
//! are representable and only reads past the captured bytes fail.
//!
//! All offsets taken by cursor methods are relative to the window start.
//! [`ByteCursor::absolute_offset`] converts them to offsets into the
//! original packet buffer, which is what field tree nodes record.

mod checksum;

pub use checksum::{ChecksumAlgorithm, ChecksumStatus};

use crate::error::{DissectError, Result};

/// Byte order of a multi-byte field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Endianness {
    #[default]
    Big,
    Little,
}

/// Read-only view over a region of packet bytes.
#[derive(Debug, Clone, Copy)]
pub struct ByteCursor<'a> {
    /// Captured bytes of the whole packet.
    buf: &'a [u8],
    /// Absolute offset of this window in `buf`.
    start: usize,
    /// Bytes physically present in this window.
    captured: usize,
    /// Bytes the protocol claims for this window (>= captured).
    reported: usize,
}

/// A sub-view whose requested length may run past the captured bytes.
#[derive(Debug, Clone, Copy)]
pub struct PartialView<'a> {
    /// The view itself; its reported length is the requested length.
    pub cursor: ByteCursor<'a>,
    /// Requested bytes that were not captured. Non-zero means partial data.
    pub missing: usize,
}

impl<'a> PartialView<'a> {
    /// Whether some of the requested bytes are missing from the capture.
    pub fn is_partial(&self) -> bool {
        self.missing > 0
    }
}

impl<'a> ByteCursor<'a> {
    /// Create a root cursor over a captured buffer.
    ///
    /// `reported_len` smaller than the buffer is raised to the buffer length.
    pub fn new(buf: &'a [u8], reported_len: usize) -> Self {
        Self {
            buf,
            start: 0,
            captured: buf.len(),
            reported: reported_len.max(buf.len()),
        }
    }

    /// Root cursor with no truncation.
    pub fn from_slice(buf: &'a [u8]) -> Self {
        Self::new(buf, buf.len())
    }

    /// Bytes physically present in the window.
    #[inline]
    pub fn captured_len(&self) -> usize {
        self.captured
    }

    /// Bytes the protocol claims exist in the window.
    #[inline]
    pub fn reported_len(&self) -> usize {
        self.reported
    }

    /// Whether the window holds no captured bytes.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.captured == 0
    }

    /// Whether the window was cut short by the capture.
    #[inline]
    pub fn is_truncated(&self) -> bool {
        self.reported > self.captured
    }

    /// Absolute offset of the window start in the packet buffer.
    #[inline]
    pub fn start(&self) -> usize {
        self.start
    }

    /// Convert a window-relative offset to a packet-absolute one.
    #[inline]
    pub fn absolute_offset(&self, offset: usize) -> usize {
        self.start + offset
    }

    /// Captured bytes available from `offset` to the end of the window.
    pub fn remaining_captured(&self, offset: usize) -> usize {
        self.captured.saturating_sub(offset)
    }

    /// Reported bytes from `offset` to the end of the window.
    pub fn remaining_reported(&self, offset: usize) -> usize {
        self.reported.saturating_sub(offset)
    }

    /// All captured bytes of the window.
    pub fn as_slice(&self) -> &'a [u8] {
        if self.captured == 0 {
            return &[];
        }
        &self.buf[self.start..self.start + self.captured]
    }

    /// Borrow `len` captured bytes at `offset`.
    pub fn bytes(&self, offset: usize, len: usize) -> Result<&'a [u8]> {
        let end = offset
            .checked_add(len)
            .filter(|end| *end <= self.captured)
            .ok_or(DissectError::Truncated {
                offset,
                needed: len,
                captured: self.captured,
            })?;
        if len == 0 {
            return Ok(&[]);
        }
        Ok(&self.buf[self.start + offset..self.start + end])
    }

    /// Strict sub-view: the whole range must be captured.
    ///
    /// The child window is always a subrange of this one.
    pub fn sub_view(&self, offset: usize, length: usize) -> Result<ByteCursor<'a>> {
        // Bounds check doubles as the containment check.
        self.bytes(offset, length)?;
        Ok(ByteCursor {
            buf: self.buf,
            start: self.start + offset,
            captured: length,
            reported: length,
        })
    }

    /// Sub-view that only has to fit the reported length.
    ///
    /// Bytes past the captured end are reported through
    /// [`PartialView::missing`] instead of failing, so callers can decode
    /// what is present. A range past the reported length is malformed.
    pub fn sub_view_partial(&self, offset: usize, length: usize) -> Result<PartialView<'a>> {
        let end = offset.checked_add(length).ok_or_else(|| {
            DissectError::malformed(format!("length {length} at offset {offset} overflows"))
        })?;
        if end > self.reported {
            return Err(DissectError::malformed(format!(
                "{length} bytes at offset {offset} exceed the {} reported bytes of the enclosing window",
                self.reported
            )));
        }

        let captured = length.min(self.captured.saturating_sub(offset));
        Ok(PartialView {
            cursor: ByteCursor {
                buf: self.buf,
                start: self.start + offset,
                captured,
                reported: length,
            },
            missing: length - captured,
        })
    }

    /// Remainder of the window from `offset`, keeping the reported length.
    pub fn tail(&self, offset: usize) -> Result<ByteCursor<'a>> {
        if offset > self.captured {
            return Err(DissectError::Truncated {
                offset,
                needed: 0,
                captured: self.captured,
            });
        }
        Ok(ByteCursor {
            buf: self.buf,
            start: self.start + offset,
            captured: self.captured - offset,
            reported: self.reported - offset,
        })
    }

    // === Unsigned readers ===

    #[inline]
    pub fn read_u8(&self, offset: usize) -> Result<u8> {
        Ok(self.bytes(offset, 1)?[0])
    }

    pub fn read_u16_be(&self, offset: usize) -> Result<u16> {
        let b = self.bytes(offset, 2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn read_u16_le(&self, offset: usize) -> Result<u16> {
        let b = self.bytes(offset, 2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn read_u24_be(&self, offset: usize) -> Result<u32> {
        let b = self.bytes(offset, 3)?;
        Ok(u32::from_be_bytes([0, b[0], b[1], b[2]]))
    }

    pub fn read_u24_le(&self, offset: usize) -> Result<u32> {
        let b = self.bytes(offset, 3)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], 0]))
    }

    pub fn read_u32_be(&self, offset: usize) -> Result<u32> {
        let b = self.bytes(offset, 4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_u32_le(&self, offset: usize) -> Result<u32> {
        let b = self.bytes(offset, 4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_u64_be(&self, offset: usize) -> Result<u64> {
        let b = self.bytes(offset, 8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(u64::from_be_bytes(arr))
    }

    /// Read an unsigned integer of `width` bytes (1 to 4) in the given order.
    pub fn read_uint(&self, offset: usize, width: usize, order: Endianness) -> Result<u32> {
        match (width, order) {
            (1, _) => self.read_u8(offset).map(u32::from),
            (2, Endianness::Big) => self.read_u16_be(offset).map(u32::from),
            (2, Endianness::Little) => self.read_u16_le(offset).map(u32::from),
            (3, Endianness::Big) => self.read_u24_be(offset),
            (3, Endianness::Little) => self.read_u24_le(offset),
            (4, Endianness::Big) => self.read_u32_be(offset),
            (4, Endianness::Little) => self.read_u32_le(offset),
            _ => Err(DissectError::invariant(format!(
                "integer width must be 1 to 4 bytes, got {width}"
            ))),
        }
    }

    // === Signed readers ===

    #[inline]
    pub fn read_i8(&self, offset: usize) -> Result<i8> {
        self.read_u8(offset).map(|v| v as i8)
    }

    pub fn read_i16_be(&self, offset: usize) -> Result<i16> {
        self.read_u16_be(offset).map(|v| v as i16)
    }

    pub fn read_i16_le(&self, offset: usize) -> Result<i16> {
        self.read_u16_le(offset).map(|v| v as i16)
    }

    pub fn read_i24_be(&self, offset: usize) -> Result<i32> {
        self.read_u24_be(offset).map(sign_extend_24)
    }

    pub fn read_i24_le(&self, offset: usize) -> Result<i32> {
        self.read_u24_le(offset).map(sign_extend_24)
    }

    pub fn read_i32_be(&self, offset: usize) -> Result<i32> {
        self.read_u32_be(offset).map(|v| v as i32)
    }

    pub fn read_i32_le(&self, offset: usize) -> Result<i32> {
        self.read_u32_le(offset).map(|v| v as i32)
    }

    // === Packed fields ===

    /// Extract `width` bits (1 to 32) starting `bit_offset` bits into the window.
    ///
    /// Bits are numbered MSB-first; the field may straddle byte boundaries.
    /// The result is shifted down and masked to `width` bits.
    pub fn read_bits(&self, bit_offset: usize, width: u32) -> Result<u32> {
        if width == 0 || width > 32 {
            return Err(DissectError::invariant(format!(
                "bit field width must be 1 to 32, got {width}"
            )));
        }

        let first = bit_offset / 8;
        let shift = bit_offset % 8;
        let span = (shift + width as usize + 7) / 8;
        let bytes = self.bytes(first, span)?;

        let acc = bytes.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b));
        let trailing = span * 8 - shift - width as usize;
        let mask = (1u64 << width) - 1;
        Ok(((acc >> trailing) & mask) as u32)
    }

    /// Decode a one- or two-octet length indicator.
    ///
    /// When the top bit of the first octet is clear the length is the
    /// remaining 7 bits. When set, the 7 low bits of the first octet are the
    /// low part and the second octet supplies bits 7..15.
    ///
    /// Returns `(length, octets consumed)`.
    ///
    /// Typical use is an information-element header of type, length
    /// indicator, then value:
    ///
    /// ```rust
    /// use dissect_core::ByteCursor;
    ///
    /// // IE type 0x1d, two-octet length 0x85 0x01 = 133, value follows
    /// let ie = [0x1d, 0x85, 0x01];
    /// let cursor = ByteCursor::new(&ie, 3 + 133);
    /// let (length, octets) = cursor.read_length_indicator(1).unwrap();
    /// assert_eq!((length, octets), (133, 2));
    /// let value = cursor.sub_view_partial(1 + octets, length).unwrap();
    /// assert_eq!(value.missing, 133);
    /// ```
    pub fn read_length_indicator(&self, offset: usize) -> Result<(usize, usize)> {
        let first = self.read_u8(offset)?;
        if first & 0x80 == 0 {
            return Ok((first as usize, 1));
        }
        let second = self.read_u8(offset + 1)?;
        Ok((((first & 0x7f) as usize) | ((second as usize) << 7), 2))
    }

    // === Text helpers ===

    /// Offset of the first `needle` at or after `offset`, within captured bytes.
    pub fn find_byte(&self, offset: usize, needle: u8) -> Option<usize> {
        let haystack = self.as_slice().get(offset..)?;
        haystack
            .iter()
            .position(|b| *b == needle)
            .map(|pos| offset + pos)
    }

    /// One text line starting at `offset`, without its CR/LF terminator.
    ///
    /// Returns `(line, next_offset)`. An unterminated last line extends to the
    /// captured end.
    pub fn ascii_line(&self, offset: usize) -> Result<(&'a [u8], usize)> {
        if offset > self.captured {
            return Err(DissectError::Truncated {
                offset,
                needed: 1,
                captured: self.captured,
            });
        }
        let (end, next) = match self.find_byte(offset, b'\n') {
            Some(lf) => (lf, lf + 1),
            None => (self.captured, self.captured),
        };
        let mut line = self.bytes(offset, end - offset)?;
        if let Some(stripped) = line.strip_suffix(b"\r") {
            line = stripped;
        }
        Ok((line, next))
    }

    // === Checksums ===

    /// Verify a checksum over `[offset, offset + length)` against a value stored at `stored_at`.
    ///
    /// Returns [`ChecksumStatus::NotComputed`] when either range is not fully
    /// captured; that outcome never means the checksum is wrong.
    pub fn verify_checksum(
        &self,
        offset: usize,
        length: usize,
        stored_at: usize,
        algorithm: ChecksumAlgorithm,
        order: Endianness,
    ) -> ChecksumStatus {
        let Ok(data) = self.bytes(offset, length) else {
            return ChecksumStatus::NotComputed;
        };
        let Ok(stored) = self.read_uint(stored_at, algorithm.width(), order) else {
            return ChecksumStatus::NotComputed;
        };

        let computed = algorithm.compute(data);
        if computed == stored {
            ChecksumStatus::Valid
        } else {
            ChecksumStatus::Invalid {
                expected: computed,
                actual: stored,
            }
        }
    }
}

fn sign_extend_24(v: u32) -> i32 {
    ((v << 8) as i32) >> 8
}
