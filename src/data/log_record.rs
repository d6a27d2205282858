use crc32fast::Hasher;
use integer_encoding::VarInt;

use crate::error::{Error, Result};

/// `crc(4) + type(1) + 2 * max-varint32(5)`.
pub const MAX_LOG_RECORD_HEADER_SIZE: usize = 4 + 1 + 5 + 5;

/// What kind of entry a `LogRecord` encodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LogRecordType {
    Normal = 0,
    Deleted = 1,
    /// Sentinel closing out a write-batch commit; its key carries the
    /// sequence number the batch was committed under and its value is empty.
    TxnFinished = 2,
}

impl LogRecordType {
    fn from_u8(v: u8) -> Result<Self> {
        match v {
            0 => Ok(LogRecordType::Normal),
            1 => Ok(LogRecordType::Deleted),
            2 => Ok(LogRecordType::TxnFinished),
            _ => Err(Error::CorruptedLogRecord),
        }
    }
}

/// A single key/value entry as written to a data file.
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub record_type: LogRecordType,
}

impl LogRecord {
    pub fn normal(key: Vec<u8>, value: Vec<u8>) -> Self {
        Self { key, value, record_type: LogRecordType::Normal }
    }

    pub fn tombstone(key: Vec<u8>) -> Self {
        Self { key, value: Vec::new(), record_type: LogRecordType::Deleted }
    }

    pub fn txn_finished(seq_key: Vec<u8>) -> Self {
        Self { key: seq_key, value: Vec::new(), record_type: LogRecordType::TxnFinished }
    }

    /// Encodes the record into its wire format:
    /// `crc32(LE) | type | varint(key_len) | varint(value_len) | key | value`.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(MAX_LOG_RECORD_HEADER_SIZE + self.key.len() + self.value.len());
        buf.extend_from_slice(&[0u8; 4]);
        buf.push(self.record_type as u8);
        buf.extend_from_slice(&(self.key.len() as i64).encode_var_vec());
        buf.extend_from_slice(&(self.value.len() as i64).encode_var_vec());
        buf.extend_from_slice(&self.key);
        buf.extend_from_slice(&self.value);

        let crc = crc_over(&buf[4..]);
        buf[..4].copy_from_slice(&crc.to_le_bytes());
        buf
    }
}

fn crc_over(bytes: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(bytes);
    hasher.finalize()
}

/// CRC of `type | varint(key_len) | varint(value_len) | key | value`, the
/// same bytes `LogRecord::encode` hashes, recomputed from a decoded header
/// plus the payload for verification after a separate header/body read.
pub fn crc_of(record_type: LogRecordType, key: &[u8], value: &[u8]) -> u32 {
    let mut buf = Vec::with_capacity(1 + 10 + key.len() + value.len());
    buf.push(record_type as u8);
    buf.extend_from_slice(&(key.len() as i64).encode_var_vec());
    buf.extend_from_slice(&(value.len() as i64).encode_var_vec());
    buf.extend_from_slice(key);
    buf.extend_from_slice(value);
    crc_over(&buf)
}

#[derive(Debug, Clone, Copy)]
pub struct LogRecordHeader {
    pub crc: u32,
    pub record_type: LogRecordType,
    pub key_size: usize,
    pub value_size: usize,
}

/// Decodes a record header from the start of `buf`. Returns `Ok(None)` when
/// `buf` is too short to contain a full header (clean end-of-file boundary);
/// returns `Err` for an unrecognized record type, which indicates real
/// corruption rather than a short read.
pub fn decode_header(buf: &[u8]) -> Result<Option<(LogRecordHeader, usize)>> {
    if buf.len() <= 4 {
        return Ok(None);
    }
    let crc = u32::from_le_bytes(buf[..4].try_into().expect("4 bytes"));
    let record_type = LogRecordType::from_u8(buf[4])?;

    let rest = &buf[5..];
    let Some((key_size, key_len_bytes)) = i64::decode_var(rest) else {
        return Ok(None);
    };
    let Some((value_size, value_len_bytes)) = i64::decode_var(&rest[key_len_bytes..]) else {
        return Ok(None);
    };
    let header_len = 5 + key_len_bytes + value_len_bytes;
    Ok(Some((
        LogRecordHeader {
            crc,
            record_type,
            key_size: key_size as usize,
            value_size: value_size as usize,
        },
        header_len,
    )))
}

/// A record's physical location: which file, at what offset, and how many
/// bytes it occupies on disk (key to reclaim-size accounting).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogRecordPos {
    pub file_id: u32,
    pub offset: i64,
    pub size: u32,
}

impl LogRecordPos {
    /// Encodes as three signed varints, in order: fid, offset, size.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(self.file_id as i64).encode_var_vec());
        buf.extend_from_slice(&self.offset.encode_var_vec());
        buf.extend_from_slice(&(self.size as i64).encode_var_vec());
        buf
    }

    pub fn decode(buf: &[u8]) -> Option<Self> {
        let (file_id, n1) = i64::decode_var(buf)?;
        let (offset, n2) = i64::decode_var(&buf[n1..])?;
        let (size, _n3) = i64::decode_var(&buf[n1 + n2..])?;
        Some(Self { file_id: file_id as u32, offset, size: size as u32 })
    }
}

/// A record staged during recovery while its write-batch is still open.
pub struct TransactionRecord {
    pub record: LogRecord,
    pub pos: LogRecordPos,
}

/// Prefixes `key` with the sequence number it was committed under.
/// `seq = 0` marks a non-transactional write.
pub fn log_record_key_with_seq(key: &[u8], seq: u64) -> Vec<u8> {
    let mut buf = (seq as i64).encode_var_vec();
    buf.extend_from_slice(key);
    buf
}

/// Splits a framed log key back into its sequence number and the original
/// user-visible key.
pub fn parse_log_record_key(key: &[u8]) -> (Vec<u8>, u64) {
    let (seq, n) = i64::decode_var(key).unwrap_or((0, 0));
    (key[n..].to_vec(), seq as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_then_decode_header_roundtrips() {
        let record = LogRecord::normal(b"key".to_vec(), b"value".to_vec());
        let encoded = record.encode();

        let (header, header_len) = decode_header(&encoded).unwrap().unwrap();
        assert_eq!(header.key_size, 3);
        assert_eq!(header.value_size, 5);
        assert_eq!(header.record_type, LogRecordType::Normal);

        let key = &encoded[header_len..header_len + header.key_size];
        let value = &encoded[header_len + header.key_size..];
        assert_eq!(key, b"key");
        assert_eq!(value, b"value");
        assert_eq!(crc_of(header.record_type, key, value), header.crc);
    }

    #[test]
    fn tombstone_has_empty_value() {
        let record = LogRecord::tombstone(b"key".to_vec());
        let encoded = record.encode();
        let (header, header_len) = decode_header(&encoded).unwrap().unwrap();
        assert_eq!(header.record_type, LogRecordType::Deleted);
        assert_eq!(header.value_size, 0);
        assert_eq!(&encoded[header_len..], b"key");
    }

    #[test]
    fn tampered_payload_fails_crc_check() {
        let record = LogRecord::normal(b"key".to_vec(), b"value".to_vec());
        let mut encoded = record.encode();
        let last = encoded.len() - 1;
        encoded[last] ^= 0xff;

        let (header, header_len) = decode_header(&encoded).unwrap().unwrap();
        let key = &encoded[header_len..header_len + header.key_size];
        let value = &encoded[header_len + header.key_size..];
        assert_ne!(
            crc_of(header.record_type, key, value),
            header.crc,
            "tampered record should fail CRC check, got bytes: {}",
            hex::encode(&encoded)
        );
    }

    #[test]
    fn short_buffer_is_not_a_header() {
        assert!(decode_header(&[0u8; 4]).unwrap().is_none());
        assert!(decode_header(&[]).unwrap().is_none());
    }

    #[test]
    fn unknown_record_type_is_corrupted() {
        let mut encoded = LogRecord::normal(b"k".to_vec(), b"v".to_vec()).encode();
        encoded[4] = 0x7f;
        assert!(matches!(decode_header(&encoded), Err(Error::CorruptedLogRecord)));
    }

    #[test]
    fn seq_framing_roundtrips_and_zero_is_non_transactional() {
        let framed = log_record_key_with_seq(b"hello", 42);
        let (key, seq) = parse_log_record_key(&framed);
        assert_eq!(key, b"hello");
        assert_eq!(seq, 42);

        let framed = log_record_key_with_seq(b"hello", NON_TRANSACTION_SEQ_NO);
        let (key, seq) = parse_log_record_key(&framed);
        assert_eq!(key, b"hello");
        assert_eq!(seq, 0);
    }

    const NON_TRANSACTION_SEQ_NO: u64 = 0;

    #[test]
    fn log_record_pos_encode_decode_roundtrips() {
        let pos = LogRecordPos { file_id: 7, offset: 1 << 20, size: 128 };
        let encoded = pos.encode();
        let decoded = LogRecordPos::decode(&encoded).unwrap();
        assert_eq!(pos, decoded);
    }
}
