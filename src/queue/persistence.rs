use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::fix::FixRecord;

pub const FORMAT_VERSION: u32 = 3;
pub const MAXIMUM_ID_LEN: u64 = 30;

const DIGEST_LEN: usize = 16;
const HEADER_LEN: usize = 8;
// every fixed size field of a record, the identifier length included
const RECORD_LEN: usize = 6 * 8 + 2 * 4 + 1 + 3 * 8 + 8 + 4 + 4 * 4 + 8;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("cannot access the queue file: {0}")]
    Io(#[from] std::io::Error),
    #[error("the hash file {} is missing", .0.display())]
    MissingHash(PathBuf),
    #[error("unsupported queue file version {found} (expected {expected})")]
    Version { found: u32, expected: u32 },
    #[error("the queue file contains no fixes")]
    Empty,
    #[error("the queue file is truncated")]
    Truncated,
    #[error("a fix identifier of {0} bytes exceeds the maximum length")]
    IdentifierTooLong(u64),
    #[error("a fix identifier is not valid utf-8")]
    InvalidIdentifier,
    #[error("the digest of the queue file does not match the hash file")]
    HashMismatch,
}

/// # Explanation
/// The QueueFile is the on-disk form of the fixes that could not be sent before shutdown. It consists of
/// two files in the persistence directory: `<domain>.fix` holds the records and `<domain>.hash` holds the
/// MD5 digest of the exact bytes of the `.fix` file.
///
/// The `.fix` file is `[u32 version][u32 count]` followed by `count` records. Every record is written
/// field by field in little endian and ends with the identifier as `[u64 length][bytes]`.
#[derive(Debug, Clone)]
pub struct QueueFile {
    fix_path: PathBuf,
    hash_path: PathBuf,
}

impl QueueFile {
    pub fn new(directory: &Path, domain_name: &str) -> Self {
        QueueFile {
            fix_path: directory.join(format!("{}.fix", domain_name)),
            hash_path: directory.join(format!("{}.hash", domain_name)),
        }
    }

    pub fn fix_path(&self) -> &Path {
        &self.fix_path
    }

    pub fn hash_path(&self) -> &Path {
        &self.hash_path
    }

    pub fn exists(&self) -> bool {
        self.fix_path.exists()
    }

    pub fn write(&self, fixes: &[FixRecord]) -> Result<(), PersistenceError> {
        if fixes.is_empty() {
            return Ok(());
        }
        if let Some(directory) = self.fix_path.parent() {
            std::fs::create_dir_all(directory)?;
        }

        let (data, digest) = encode(fixes);
        std::fs::write(&self.fix_path, &data)?;
        std::fs::write(&self.hash_path, digest)?;
        log::info!(
            "{} fixes saved to {}",
            fixes.len(),
            self.fix_path.display()
        );
        Ok(())
    }

    /// # Explanation
    /// Reads the saved fixes back. Both files are deleted afterwards whatever the outcome, so a corrupt
    /// batch is discarded once and never read again. A missing `.fix` file is not an error.
    pub fn read(&self) -> Result<Vec<FixRecord>, PersistenceError> {
        if !self.exists() {
            return Ok(Vec::new());
        }

        let result = self.read_files();
        self.remove();
        result
    }

    fn read_files(&self) -> Result<Vec<FixRecord>, PersistenceError> {
        let digest = match std::fs::read(&self.hash_path) {
            Ok(digest) => digest,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(PersistenceError::MissingHash(self.hash_path.clone()))
            }
            Err(e) => return Err(e.into()),
        };
        let data = std::fs::read(&self.fix_path)?;
        decode(&data, &digest)
    }

    pub fn remove(&self) {
        for path in [&self.fix_path, &self.hash_path] {
            match std::fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => log::warn!("cannot delete {}: {}", path.display(), e),
            }
        }
    }
}

pub fn encode(fixes: &[FixRecord]) -> (Bytes, [u8; DIGEST_LEN]) {
    let mut buffer = BytesMut::with_capacity(HEADER_LEN + fixes.len() * (RECORD_LEN + 16));
    buffer.put_u32_le(FORMAT_VERSION);
    buffer.put_u32_le(fixes.len() as u32);

    for fix in fixes {
        buffer.put_f64_le(fix.latitude);
        buffer.put_f64_le(fix.longitude);
        buffer.put_f64_le(fix.altitude);
        buffer.put_f64_le(fix.heading);
        buffer.put_f64_le(fix.speed);
        buffer.put_f64_le(fix.accuracy);
        buffer.put_u32_le(fix.satellites);
        buffer.put_u32_le(fix.fix_validity);
        buffer.put_u8(fix.fix_type);
        buffer.put_f64_le(fix.pdop);
        buffer.put_f64_le(fix.hdop);
        buffer.put_f64_le(fix.vdop);
        buffer.put_u64_le(fix.timestamp_ms);
        buffer.put_i32_le(fix.total_distance_m);
        buffer.put_u32_le(fix.axles);
        buffer.put_u32_le(fix.train_weight);
        buffer.put_u32_le(fix.actual_weight);
        buffer.put_i32_le(fix.trailer_type);
        buffer.put_u64_le(fix.id.len() as u64);
        buffer.put_slice(fix.id.as_bytes());
    }

    let data = buffer.freeze();
    let digest = md5::compute(&data);
    (data, digest.0)
}

pub fn decode(data: &[u8], digest: &[u8]) -> Result<Vec<FixRecord>, PersistenceError> {
    let mut buffer = data;

    ensure(buffer, HEADER_LEN)?;
    let version = buffer.get_u32_le();
    if version != FORMAT_VERSION {
        return Err(PersistenceError::Version {
            found: version,
            expected: FORMAT_VERSION,
        });
    }
    let count = buffer.get_u32_le();
    if count == 0 {
        return Err(PersistenceError::Empty);
    }

    let mut fixes = Vec::new();
    for _ in 0..count {
        ensure(buffer, RECORD_LEN)?;
        let mut fix = FixRecord {
            latitude: buffer.get_f64_le(),
            longitude: buffer.get_f64_le(),
            altitude: buffer.get_f64_le(),
            heading: buffer.get_f64_le(),
            speed: buffer.get_f64_le(),
            accuracy: buffer.get_f64_le(),
            satellites: buffer.get_u32_le(),
            fix_validity: buffer.get_u32_le(),
            fix_type: buffer.get_u8(),
            pdop: buffer.get_f64_le(),
            hdop: buffer.get_f64_le(),
            vdop: buffer.get_f64_le(),
            timestamp_ms: buffer.get_u64_le(),
            total_distance_m: buffer.get_i32_le(),
            axles: buffer.get_u32_le(),
            train_weight: buffer.get_u32_le(),
            actual_weight: buffer.get_u32_le(),
            trailer_type: buffer.get_i32_le(),
            ..FixRecord::default()
        };

        let id_len = buffer.get_u64_le();
        if id_len > MAXIMUM_ID_LEN {
            return Err(PersistenceError::IdentifierTooLong(id_len));
        }
        let id_len = id_len as usize;
        ensure(buffer, id_len)?;
        fix.id = std::str::from_utf8(&buffer[..id_len])
            .map_err(|_| PersistenceError::InvalidIdentifier)?
            .to_string();
        buffer.advance(id_len);

        fixes.push(fix);
    }

    // only the bytes that were actually consumed are covered by the digest
    let consumed = data.len() - buffer.remaining();
    let mut context = md5::Context::new();
    context.consume(&data[..consumed]);
    if context.compute().0[..] != *digest {
        return Err(PersistenceError::HashMismatch);
    }

    Ok(fixes)
}

fn ensure(buffer: &[u8], len: usize) -> Result<(), PersistenceError> {
    if buffer.len() < len {
        Err(PersistenceError::Truncated)
    } else {
        Ok(())
    }
}
