//! Checksummed binary format for embedding matrices and flat indexes.
//!
//! Layout (all integers little-endian):
//! - 4 bytes: magic (`CGEV` for cached embeddings, `CGIX` for indexes)
//! - 1 byte:  version
//! - 3 bytes: reserved (zero)
//! - 8 bytes: dimension
//! - 8 bytes: row count
//! - 8 bytes: CRC-64/XZ of the payload
//! - payload: `rows * dimension` `f32` values, row-major

/// Format version written to new files.
pub const MATRIX_VERSION: u8 = 1;

/// Fixed header size in bytes.
pub const HEADER_SIZE: usize = 32;

/// Which artifact a matrix file holds. Each has its own magic so an index
/// file can never be mistaken for cached embeddings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatrixKind {
    Embeddings,
    Index,
}

impl MatrixKind {
    #[must_use]
    pub const fn magic(self) -> [u8; 4] {
        match self {
            Self::Embeddings => *b"CGEV",
            Self::Index => *b"CGIX",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("invalid magic bytes: expected {expected:?}, got {actual:?}")]
    InvalidMagic { expected: [u8; 4], actual: [u8; 4] },

    #[error("unsupported matrix format version {0}: maximum supported is {MATRIX_VERSION}")]
    UnsupportedVersion(u8),

    #[error("unexpected end of matrix data")]
    UnexpectedEof,

    #[error("payload length {actual} does not match {rows} rows x {dim} dims")]
    LengthMismatch { rows: u64, dim: u64, actual: usize },

    #[error("matrix data is corrupted: CRC mismatch: expected {expected:#018x}, got {actual:#018x}")]
    ChecksumMismatch { expected: u64, actual: u64 },
}

/// Decoded matrix payload.
#[derive(Debug, Clone, PartialEq)]
pub struct RawMatrix {
    pub dim: usize,
    pub rows: usize,
    pub data: Vec<f32>,
}

/// CRC-64/XZ (reflected ECMA-182 polynomial), table-less.
#[must_use]
pub fn checksum(data: &[u8]) -> u64 {
    const POLY: u64 = 0xC96C_5795_D787_0F42;
    let mut crc: u64 = u64::MAX;
    for &byte in data {
        crc ^= u64::from(byte);
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ POLY;
            } else {
                crc >>= 1;
            }
        }
    }
    !crc
}

/// Encode `rows` rows of `dim` values.
#[must_use]
pub fn encode_matrix(kind: MatrixKind, dim: usize, data: &[f32]) -> Vec<u8> {
    let rows = if dim == 0 { 0 } else { data.len() / dim };

    let mut payload = Vec::with_capacity(data.len() * 4);
    for value in data {
        payload.extend_from_slice(&value.to_le_bytes());
    }

    let mut out = Vec::with_capacity(HEADER_SIZE + payload.len());
    out.extend_from_slice(&kind.magic());
    out.push(MATRIX_VERSION);
    out.extend_from_slice(&[0u8; 3]);
    out.extend_from_slice(&(dim as u64).to_le_bytes());
    out.extend_from_slice(&(rows as u64).to_le_bytes());
    out.extend_from_slice(&checksum(&payload).to_le_bytes());
    debug_assert_eq!(out.len(), HEADER_SIZE);
    out.extend_from_slice(&payload);
    out
}

fn read_u64(data: &[u8], at: usize) -> Result<u64, CodecError> {
    data.get(at..at + 8)
        .and_then(|slice| <[u8; 8]>::try_from(slice).ok())
        .map(u64::from_le_bytes)
        .ok_or(CodecError::UnexpectedEof)
}

/// Decode and verify a matrix file.
///
/// # Errors
///
/// Returns [`CodecError`] if the magic, version, length, or checksum is wrong.
pub fn decode_matrix(kind: MatrixKind, data: &[u8]) -> Result<RawMatrix, CodecError> {
    if data.len() < HEADER_SIZE {
        return Err(CodecError::UnexpectedEof);
    }

    let mut magic = [0u8; 4];
    magic.copy_from_slice(&data[0..4]);
    if magic != kind.magic() {
        return Err(CodecError::InvalidMagic {
            expected: kind.magic(),
            actual: magic,
        });
    }

    let version = data[4];
    if version > MATRIX_VERSION {
        return Err(CodecError::UnsupportedVersion(version));
    }

    let dim = read_u64(data, 8)?;
    let rows = read_u64(data, 16)?;
    let stored_crc = read_u64(data, 24)?;

    let payload = &data[HEADER_SIZE..];
    let expected_len = rows
        .checked_mul(dim)
        .and_then(|n| n.checked_mul(4))
        .and_then(|n| usize::try_from(n).ok());
    if expected_len != Some(payload.len()) {
        return Err(CodecError::LengthMismatch {
            rows,
            dim,
            actual: payload.len(),
        });
    }

    let actual_crc = checksum(payload);
    if actual_crc != stored_crc {
        return Err(CodecError::ChecksumMismatch {
            expected: stored_crc,
            actual: actual_crc,
        });
    }

    let values = payload
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();

    Ok(RawMatrix {
        dim: dim as usize,
        rows: rows as usize,
        data: values,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<f32> {
        vec![1.0, 0.0, 0.0, 0.6, 0.8, 0.0]
    }

    #[test]
    fn checksum_matches_crc64_xz_check_value() {
        assert_eq!(checksum(b"123456789"), 0x995D_C9BB_DF19_39FA);
    }

    #[test]
    fn checksum_single_bit_flip() {
        let data = b"vectors";
        let mut flipped = data.to_vec();
        flipped[0] ^= 1;
        assert_ne!(checksum(data), checksum(&flipped));
    }

    #[test]
    fn encode_decode_preserves_shape_and_values() {
        let bytes = encode_matrix(MatrixKind::Embeddings, 3, &sample());
        assert_eq!(bytes.len(), HEADER_SIZE + 6 * 4);
        let decoded = decode_matrix(MatrixKind::Embeddings, &bytes).expect("decode");
        assert_eq!(decoded.dim, 3);
        assert_eq!(decoded.rows, 2);
        assert_eq!(decoded.data, sample());
    }

    #[test]
    fn empty_matrix_keeps_dimension() {
        let bytes = encode_matrix(MatrixKind::Index, 8, &[]);
        let decoded = decode_matrix(MatrixKind::Index, &bytes).expect("decode");
        assert_eq!(decoded.dim, 8);
        assert_eq!(decoded.rows, 0);
    }

    #[test]
    fn kinds_are_not_interchangeable() {
        let bytes = encode_matrix(MatrixKind::Index, 3, &sample());
        let err = decode_matrix(MatrixKind::Embeddings, &bytes).expect_err("wrong magic");
        assert!(matches!(err, CodecError::InvalidMagic { .. }));
    }

    #[test]
    fn future_version_is_rejected() {
        let mut bytes = encode_matrix(MatrixKind::Embeddings, 3, &sample());
        bytes[4] = 99;
        let err = decode_matrix(MatrixKind::Embeddings, &bytes).expect_err("version");
        assert_eq!(err, CodecError::UnsupportedVersion(99));
    }

    #[test]
    fn flipped_payload_byte_is_detected() {
        let mut bytes = encode_matrix(MatrixKind::Embeddings, 3, &sample());
        bytes[HEADER_SIZE + 5] ^= 0xFF;
        let err = decode_matrix(MatrixKind::Embeddings, &bytes).expect_err("crc");
        assert!(matches!(err, CodecError::ChecksumMismatch { .. }));
    }

    #[test]
    fn truncation_is_detected() {
        let bytes = encode_matrix(MatrixKind::Embeddings, 3, &sample());
        let err = decode_matrix(MatrixKind::Embeddings, &bytes[..bytes.len() - 4])
            .expect_err("truncated");
        assert!(matches!(err, CodecError::LengthMismatch { .. }));
        assert_eq!(
            decode_matrix(MatrixKind::Embeddings, &bytes[..10]),
            Err(CodecError::UnexpectedEof)
        );
    }
}
