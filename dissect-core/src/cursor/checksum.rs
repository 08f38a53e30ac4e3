//! Checksum and frame-check-sequence helpers.

/// Supported checksum algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumAlgorithm {
    /// RFC 1071 ones' complement sum (IP, UDP, TCP, GRE).
    Internet,
    /// CRC-16/X-25 as used by HDLC-family frame check sequences (LAPD, LAPB, PPP).
    Crc16Ccitt,
    /// CRC-32 (IEEE 802.3).
    Crc32,
}

impl ChecksumAlgorithm {
    /// Width of the stored value in bytes.
    pub fn width(&self) -> usize {
        match self {
            ChecksumAlgorithm::Internet | ChecksumAlgorithm::Crc16Ccitt => 2,
            ChecksumAlgorithm::Crc32 => 4,
        }
    }

    /// Compute the checksum over `data`.
    pub fn compute(&self, data: &[u8]) -> u32 {
        match self {
            ChecksumAlgorithm::Internet => u32::from(internet_checksum(data)),
            ChecksumAlgorithm::Crc16Ccitt => u32::from(crc16_x25(data)),
            ChecksumAlgorithm::Crc32 => crc32_ieee(data),
        }
    }

    /// Return a string representation of the algorithm.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChecksumAlgorithm::Internet => "internet",
            ChecksumAlgorithm::Crc16Ccitt => "crc16-ccitt",
            ChecksumAlgorithm::Crc32 => "crc32",
        }
    }
}

/// Outcome of a checksum verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumStatus {
    /// The stored value matches the computed one.
    Valid,
    /// The stored value (`actual`) differs from the computed one (`expected`).
    Invalid { expected: u32, actual: u32 },
    /// Not enough captured bytes to compute or read the checksum.
    NotComputed,
}

impl ChecksumStatus {
    /// Return a string representation of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChecksumStatus::Valid => "valid",
            ChecksumStatus::Invalid { .. } => "invalid",
            ChecksumStatus::NotComputed => "not_computed",
        }
    }
}

/// RFC 1071 internet checksum.
fn internet_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut chunks = data.chunks_exact(2);

    for word in &mut chunks {
        sum += u16::from_be_bytes([word[0], word[1]]) as u32;
    }

    // Odd trailing byte is padded with zero
    if let [last] = chunks.remainder() {
        sum += (*last as u32) << 8;
    }

    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }

    !sum as u16
}

/// CRC-16/X-25: reflected polynomial 0x1021, init and xorout 0xFFFF.
fn crc16_x25(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for byte in data {
        crc ^= *byte as u16;
        for _ in 0..8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ 0x8408
            } else {
                crc >> 1
            };
        }
    }
    !crc
}

/// CRC-32/ISO-HDLC: reflected polynomial 0x04C11DB7, init and xorout 0xFFFFFFFF.
fn crc32_ieee(data: &[u8]) -> u32 {
    let mut crc: u32 = 0xFFFF_FFFF;
    for byte in data {
        crc ^= *byte as u32;
        for _ in 0..8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ 0xEDB8_8320
            } else {
                crc >> 1
            };
        }
    }
    !crc
}
