//! Binary format definitions for LabStore WAL records
//!
//! Every record is a 32-byte ChunkHeader followed by a payload:
//!
//! ```text
//! operation(u8) + padding(u8) + depth(u16)
//!   + depth * (segment_len(u16) + segment_bytes)
//!   + key_len(u16) + value_len(u32) + key_bytes + value_bytes
//! ```
//!
//! `depth`/segments name the bucket the operation applies to, outermost
//! first. A transaction is a run of mutation records closed by a `Commit`
//! record; recovery discards any run that is not closed.

use crate::error::{LabError, LabResult};

/// Magic bytes identifying LabStore WAL entries: "LABS" in ASCII
pub const MAGIC_ARRAY: [u8; 4] = [0x4C, 0x41, 0x42, 0x53]; // 'L','A','B','S'

/// Header size in bytes
pub const HEADER_SIZE: usize = 32;

/// Largest key or path segment the record layout can carry.
pub const MAX_RECORD_KEY: usize = u16::MAX as usize;

/// WAL operation types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Operation {
    /// Insert or update a field inside the bucket at `path`
    Put = 1,
    /// Remove a field from the bucket at `path`
    Delete = 2,
    /// Create an empty child bucket `key` under `path`
    CreateBucket = 3,
    /// Remove child bucket `key` (and everything below it) from `path`
    DeleteBucket = 4,
    /// Closes a transaction; value holds the transaction id (u64 LE)
    Commit = 5,
    /// Discard everything replayed so far; opens a full snapshot batch
    Checkpoint = 6,
}

impl Operation {
    fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Operation::Put),
            2 => Some(Operation::Delete),
            3 => Some(Operation::CreateBucket),
            4 => Some(Operation::DeleteBucket),
            5 => Some(Operation::Commit),
            6 => Some(Operation::Checkpoint),
            _ => None,
        }
    }
}

/// Fixed-size header for each WAL record
/// Size: 32 bytes, alignment: 4
///
/// Layout:
///   [0..4]   magic:      [u8;4] - "LABS"
///   [4..8]   length:     u32    - payload length in bytes
///   [8..12]  checksum:   u32    - CRC32C of payload bytes
///   [12]     entry_type: u8     - operation type
///   [13..16] reserved:   [u8;3]
///   [16..32] padding:    [u8;16]
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct ChunkHeader {
    /// Magic bytes for record identification and corruption recovery
    pub magic: [u8; 4],
    /// Total length of the payload (excluding this header)
    pub length: u32,
    /// CRC32C checksum of the payload bytes
    pub checksum: u32,
    /// Operation type, duplicated from the payload for quick scans
    pub entry_type: u8,
    /// Reserved for future use, must be zero
    pub reserved: [u8; 3],
    /// Padding to reach 32 bytes
    pub _padding: [u8; 16],
}

impl ChunkHeader {
    /// Create a new header with the given parameters
    pub fn new(length: u32, checksum: u32, entry_type: Operation) -> Self {
        Self {
            magic: MAGIC_ARRAY,
            length,
            checksum,
            entry_type: entry_type as u8,
            reserved: [0; 3],
            _padding: [0; 16],
        }
    }

    /// Serialize header to bytes for writing
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.magic);
        buf[4..8].copy_from_slice(&self.length.to_le_bytes());
        buf[8..12].copy_from_slice(&self.checksum.to_le_bytes());
        buf[12] = self.entry_type;
        buf[13..16].copy_from_slice(&self.reserved);
        buf
    }

    /// Parse header from bytes
    pub fn from_bytes(bytes: &[u8; HEADER_SIZE]) -> Self {
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&bytes[0..4]);
        let mut padding = [0u8; 16];
        padding.copy_from_slice(&bytes[16..32]);

        Self {
            magic,
            length: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            checksum: u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
            entry_type: bytes[12],
            reserved: [bytes[13], bytes[14], bytes[15]],
            _padding: padding,
        }
    }
}

/// One logged mutation (or commit marker).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalRecord {
    pub operation: Operation,
    /// Bucket path from the root, outermost first. Empty for root-level buckets.
    pub path: Vec<Vec<u8>>,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl WalRecord {
    pub fn put(path: Vec<Vec<u8>>, key: &[u8], value: &[u8]) -> Self {
        Self {
            operation: Operation::Put,
            path,
            key: key.to_vec(),
            value: value.to_vec(),
        }
    }

    pub fn delete(path: Vec<Vec<u8>>, key: &[u8]) -> Self {
        Self {
            operation: Operation::Delete,
            path,
            key: key.to_vec(),
            value: Vec::new(),
        }
    }

    pub fn create_bucket(path: Vec<Vec<u8>>, key: &[u8]) -> Self {
        Self {
            operation: Operation::CreateBucket,
            path,
            key: key.to_vec(),
            value: Vec::new(),
        }
    }

    pub fn delete_bucket(path: Vec<Vec<u8>>, key: &[u8]) -> Self {
        Self {
            operation: Operation::DeleteBucket,
            path,
            key: key.to_vec(),
            value: Vec::new(),
        }
    }

    pub fn checkpoint() -> Self {
        Self {
            operation: Operation::Checkpoint,
            path: Vec::new(),
            key: Vec::new(),
            value: Vec::new(),
        }
    }

    pub fn commit(txid: u64) -> Self {
        Self {
            operation: Operation::Commit,
            path: Vec::new(),
            key: Vec::new(),
            value: txid.to_le_bytes().to_vec(),
        }
    }

    /// Transaction id carried by a commit marker.
    pub fn txid(&self) -> Option<u64> {
        if self.operation != Operation::Commit {
            return None;
        }
        let bytes: [u8; 8] = self.value.as_slice().try_into().ok()?;
        Some(u64::from_le_bytes(bytes))
    }
}

fn oversized(len: usize, max: usize, component: &str) -> LabError {
    LabError::OversizedEntry {
        entry_size: len as u64,
        max_size: max as u64,
        component: component.to_string(),
    }
}

/// Serialize a record into header + payload bytes.
pub fn serialize_record(record: &WalRecord) -> LabResult<Vec<u8>> {
    // Validate sizes before any allocation
    if record.key.len() > MAX_RECORD_KEY {
        return Err(oversized(record.key.len(), MAX_RECORD_KEY, "key"));
    }
    if record.value.len() > u32::MAX as usize {
        return Err(oversized(record.value.len(), u32::MAX as usize, "value"));
    }
    if record.path.len() > u16::MAX as usize {
        return Err(oversized(record.path.len(), u16::MAX as usize, "path depth"));
    }
    let mut path_bytes = 0usize;
    for segment in &record.path {
        if segment.len() > MAX_RECORD_KEY {
            return Err(oversized(segment.len(), MAX_RECORD_KEY, "path segment"));
        }
        path_bytes += 2 + segment.len();
    }

    let payload_size = 4 + path_bytes + 2 + 4 + record.key.len() + record.value.len();
    if payload_size > u32::MAX as usize {
        return Err(oversized(payload_size, u32::MAX as usize, "record"));
    }

    let mut payload = Vec::with_capacity(payload_size);
    payload.push(record.operation as u8);
    payload.push(0); // padding byte
    payload.extend_from_slice(&(record.path.len() as u16).to_le_bytes());
    for segment in &record.path {
        payload.extend_from_slice(&(segment.len() as u16).to_le_bytes());
        payload.extend_from_slice(segment);
    }
    payload.extend_from_slice(&(record.key.len() as u16).to_le_bytes());
    payload.extend_from_slice(&(record.value.len() as u32).to_le_bytes());
    payload.extend_from_slice(&record.key);
    payload.extend_from_slice(&record.value);

    let checksum = crc32c::crc32c(&payload);
    let header = ChunkHeader::new(payload.len() as u32, checksum, record.operation);

    let mut buffer = Vec::with_capacity(HEADER_SIZE + payload.len());
    buffer.extend_from_slice(&header.to_bytes());
    buffer.extend_from_slice(&payload);
    Ok(buffer)
}

fn corrupted(offset: usize, reason: impl Into<String>) -> LabError {
    LabError::WalCorrupted {
        path: std::path::PathBuf::from("<buffer>"),
        offset: offset as u64,
        reason: reason.into(),
    }
}

/// Little-endian reader over a payload slice; every read is bounds-checked.
struct PayloadReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> PayloadReader<'a> {
    fn take(&mut self, n: usize, what: &str) -> LabResult<&'a [u8]> {
        let end = self.pos.checked_add(n).filter(|&end| end <= self.buf.len());
        match end {
            Some(end) => {
                let out = &self.buf[self.pos..end];
                self.pos = end;
                Ok(out)
            }
            None => Err(corrupted(
                HEADER_SIZE + self.pos,
                format!(
                    "payload too short for {what}: need {n} bytes, have {}",
                    self.buf.len() - self.pos
                ),
            )),
        }
    }

    fn u16(&mut self, what: &str) -> LabResult<u16> {
        let b = self.take(2, what)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self, what: &str) -> LabResult<u32> {
        let b = self.take(4, what)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }
}

/// Deserialize a record from a byte slice holding header + payload.
pub fn deserialize_record(data: &[u8]) -> LabResult<WalRecord> {
    if data.len() < HEADER_SIZE {
        return Err(corrupted(0, format!(
            "Entry too short: {} bytes, need at least {}", data.len(), HEADER_SIZE
        )));
    }

    let mut header_bytes = [0u8; HEADER_SIZE];
    header_bytes.copy_from_slice(&data[..HEADER_SIZE]);
    let header = ChunkHeader::from_bytes(&header_bytes);

    if header.magic != MAGIC_ARRAY {
        return Err(LabError::NoMagicFound {
            path: std::path::PathBuf::from("<buffer>"),
            offset: 0,
            found_bytes: header.magic,
        });
    }

    let payload_end = HEADER_SIZE + header.length as usize;
    if data.len() < payload_end {
        return Err(LabError::TornWrite {
            path: std::path::PathBuf::from("<buffer>"),
            expected_size: header.length,
            available_bytes: (data.len() - HEADER_SIZE) as u64,
            offset: HEADER_SIZE as u64,
        });
    }

    let payload = &data[HEADER_SIZE..payload_end];
    let computed = crc32c::crc32c(payload);
    if computed != header.checksum {
        return Err(LabError::ChecksumMismatch {
            path: std::path::PathBuf::from("<buffer>"),
            expected: header.checksum,
            actual: computed,
            offset: HEADER_SIZE as u64,
        });
    }

    let mut reader = PayloadReader {
        buf: payload,
        pos: 0,
    };
    let op_byte = reader.take(2, "operation")?[0];
    let operation = Operation::from_u8(op_byte)
        .ok_or_else(|| corrupted(HEADER_SIZE, format!("Invalid operation type: {op_byte}")))?;

    let depth = reader.u16("path depth")? as usize;
    let mut path = Vec::with_capacity(depth);
    for _ in 0..depth {
        let len = reader.u16("segment length")? as usize;
        path.push(reader.take(len, "path segment")?.to_vec());
    }

    let key_len = reader.u16("key length")? as usize;
    let value_len = reader.u32("value length")? as usize;
    let key = reader.take(key_len, "key")?.to_vec();
    let value = reader.take(value_len, "value")?.to_vec();

    Ok(WalRecord {
        operation,
        path,
        key,
        value,
    })
}
