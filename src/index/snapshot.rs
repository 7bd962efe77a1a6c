//! Binary codec for the serialized index snapshot.
//!
//! Blob layout:
//!
//! Header (47 bytes):
//! - version: u8 (1)
//! - model_id: [u8; 32] (SHA256 hash of the embedding model name)
//! - dimensions: u16 (little-endian)
//! - entry_count: u64 (little-endian)
//! - checksum: u32 (CRC32 of the header bytes before this field)
//!
//! Entries (repeated `entry_count` times):
//! - id: u32 length (little-endian) + UTF-8 bytes
//! - title: u32 length (little-endian) + UTF-8 bytes
//! - url: u32 length (little-endian) + UTF-8 bytes
//! - vector: [f32; dimensions] (little-endian)
//!
//! Any decode failure means the snapshot cannot be trusted and the index
//! is rebuilt from the chunk store instead.

use super::IndexEntry;

/// Current blob format version
const FORMAT_VERSION: u8 = 1;

/// Header size in bytes: version(1) + model_id(32) + dimensions(2) + entry_count(8) + checksum(4)
const HEADER_SIZE: usize = 47;

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("invalid snapshot format: {0}")]
    InvalidFormat(String),

    #[error("version mismatch: snapshot version {0}, supported version {1}")]
    VersionMismatch(u8, u8),

    #[error("model mismatch: snapshot was built with a different model")]
    ModelMismatch,

    #[error("checksum mismatch: snapshot may be corrupted")]
    ChecksumMismatch,

    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
}

/// Serialize entries into a snapshot blob.
pub fn encode(entries: &[IndexEntry], model_id: &[u8; 32]) -> Result<Vec<u8>, SnapshotError> {
    let dimensions = entries.first().map(|e| e.vector.len()).unwrap_or(0);
    for entry in entries {
        if entry.vector.len() != dimensions {
            return Err(SnapshotError::DimensionMismatch {
                expected: dimensions,
                got: entry.vector.len(),
            });
        }
    }

    let mut blob = Vec::with_capacity(HEADER_SIZE + entries.len() * (dimensions * 4 + 64));

    let mut header = [0u8; HEADER_SIZE];
    header[0] = FORMAT_VERSION;
    header[1..33].copy_from_slice(model_id);
    header[33..35].copy_from_slice(&(dimensions as u16).to_le_bytes());
    header[35..43].copy_from_slice(&(entries.len() as u64).to_le_bytes());
    let checksum = crc32fast::hash(&header[0..43]);
    header[43..47].copy_from_slice(&checksum.to_le_bytes());
    blob.extend_from_slice(&header);

    for entry in entries {
        write_str(&mut blob, &entry.id);
        write_str(&mut blob, &entry.title);
        write_str(&mut blob, &entry.url);
        for &value in &entry.vector {
            blob.extend_from_slice(&value.to_le_bytes());
        }
    }

    Ok(blob)
}

/// Deserialize a snapshot blob, verifying version, checksum and model.
pub fn decode(blob: &[u8], expected_model_id: &[u8; 32]) -> Result<Vec<IndexEntry>, SnapshotError> {
    if blob.len() < HEADER_SIZE {
        return Err(SnapshotError::InvalidFormat("truncated header".into()));
    }

    let version = blob[0];
    if version > FORMAT_VERSION {
        return Err(SnapshotError::VersionMismatch(version, FORMAT_VERSION));
    }

    let stored_checksum = u32::from_le_bytes([blob[43], blob[44], blob[45], blob[46]]);
    if stored_checksum != crc32fast::hash(&blob[0..43]) {
        return Err(SnapshotError::ChecksumMismatch);
    }

    if blob[1..33] != expected_model_id[..] {
        return Err(SnapshotError::ModelMismatch);
    }

    let dimensions = u16::from_le_bytes([blob[33], blob[34]]) as usize;
    let entry_count = u64::from_le_bytes([
        blob[35], blob[36], blob[37], blob[38], blob[39], blob[40], blob[41], blob[42],
    ]) as usize;

    let mut cursor = HEADER_SIZE;
    let mut entries = Vec::with_capacity(entry_count);
    for _ in 0..entry_count {
        let id = read_str(blob, &mut cursor)?;
        let title = read_str(blob, &mut cursor)?;
        let url = read_str(blob, &mut cursor)?;
        let vector = read_vector(blob, &mut cursor, dimensions)?;
        entries.push(IndexEntry {
            id,
            title,
            url,
            vector,
        });
    }

    if cursor != blob.len() {
        return Err(SnapshotError::InvalidFormat("trailing bytes".into()));
    }

    Ok(entries)
}

fn write_str(blob: &mut Vec<u8>, s: &str) {
    blob.extend_from_slice(&(s.len() as u32).to_le_bytes());
    blob.extend_from_slice(s.as_bytes());
}

fn read_str(blob: &[u8], cursor: &mut usize) -> Result<String, SnapshotError> {
    let len_bytes = take(blob, cursor, 4)?;
    let len = u32::from_le_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]]) as usize;
    let bytes = take(blob, cursor, len)?;
    String::from_utf8(bytes.to_vec())
        .map_err(|_| SnapshotError::InvalidFormat("invalid utf-8 in entry".into()))
}

fn read_vector(blob: &[u8], cursor: &mut usize, dimensions: usize) -> Result<Vec<f32>, SnapshotError> {
    let bytes = take(blob, cursor, dimensions * 4)?;
    Ok(bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

fn take<'a>(blob: &'a [u8], cursor: &mut usize, len: usize) -> Result<&'a [u8], SnapshotError> {
    let end = cursor
        .checked_add(len)
        .filter(|&end| end <= blob.len())
        .ok_or_else(|| SnapshotError::InvalidFormat("truncated entry".into()))?;
    let slice = &blob[*cursor..end];
    *cursor = end;
    Ok(slice)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model_id() -> [u8; 32] {
        let mut id = [0u8; 32];
        id[0] = 0xAB;
        id[31] = 0xCD;
        id
    }

    fn fixture_entries() -> Vec<IndexEntry> {
        vec![
            IndexEntry {
                id: "b1".into(),
                title: "Första sidan".into(),
                url: "https://example.com/ä".into(),
                vector: vec![1.0, 0.0, -0.5],
            },
            IndexEntry {
                id: "b1".into(),
                title: "Första sidan".into(),
                url: "https://example.com/ä".into(),
                vector: vec![0.0, 1.0, 0.25],
            },
            IndexEntry {
                id: "b2".into(),
                title: "Plain".into(),
                url: "https://example.com/plain".into(),
                vector: vec![0.5, 0.5, 0.5],
            },
        ]
    }

    #[test]
    fn roundtrip_preserves_entries() {
        let entries = fixture_entries();
        let blob = encode(&entries, &model_id()).unwrap();
        let decoded = decode(&blob, &model_id()).unwrap();
        assert_eq!(decoded, entries);
    }

    #[test]
    fn empty_snapshot_roundtrips() {
        let blob = encode(&[], &model_id()).unwrap();
        assert_eq!(blob.len(), 47);
        assert!(decode(&blob, &model_id()).unwrap().is_empty());
    }

    #[test]
    fn different_model_is_rejected() {
        let blob = encode(&fixture_entries(), &model_id()).unwrap();

        let mut other = [0u8; 32];
        other[0] = 0xFF;
        assert!(matches!(
            decode(&blob, &other),
            Err(SnapshotError::ModelMismatch)
        ));
    }

    #[test]
    fn header_corruption_is_detected() {
        let mut blob = encode(&fixture_entries(), &model_id()).unwrap();
        blob[10] ^= 0xFF;
        assert!(matches!(
            decode(&blob, &model_id()),
            Err(SnapshotError::ChecksumMismatch)
        ));
    }

    #[test]
    fn truncated_blob_is_rejected() {
        let blob = encode(&fixture_entries(), &model_id()).unwrap();

        assert!(matches!(
            decode(&blob[..20], &model_id()),
            Err(SnapshotError::InvalidFormat(_))
        ));
        assert!(matches!(
            decode(&blob[..blob.len() - 3], &model_id()),
            Err(SnapshotError::InvalidFormat(_))
        ));
    }

    #[test]
    fn future_version_is_rejected() {
        let mut blob = encode(&fixture_entries(), &model_id()).unwrap();
        blob[0] = FORMAT_VERSION + 1;
        assert!(matches!(
            decode(&blob, &model_id()),
            Err(SnapshotError::VersionMismatch(_, _))
        ));
    }

    #[test]
    fn mixed_dimensions_cannot_be_encoded() {
        let mut entries = fixture_entries();
        entries[2].vector = vec![1.0];
        assert!(matches!(
            encode(&entries, &model_id()),
            Err(SnapshotError::DimensionMismatch { .. })
        ));
    }
}
