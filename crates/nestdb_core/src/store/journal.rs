//! Append-only journal for collection catalog changes and committed batches.
//!
//! Each entry is one frame: a little-endian `u32` body length, a
//! little-endian CRC32 of the body, then the CBOR encoding of a
//! [`JournalEntry`]. A committed batch is always a single frame, so a torn
//! tail loses at most the last (unacknowledged) batch.

use crate::document::DocumentVariant;
use crate::error::{CoreError, CoreResult};
use crate::transaction::CollectionKind;
use fs2::FileExt;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;

/// Size of the frame header (length + checksum).
const FRAME_HEADER_SIZE: usize = 8;

const CRC32_TABLE: [u32; 256] = {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u32;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 == 0 { crc >> 1 } else { (crc >> 1) ^ 0xEDB8_8320 };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
};

/// CRC32 (IEEE) of a frame body.
#[must_use]
pub fn frame_checksum(body: &[u8]) -> u32 {
    !body.iter().fold(0xFFFF_FFFF_u32, |crc, &byte| {
        (crc >> 8) ^ CRC32_TABLE[((crc ^ u32::from(byte)) & 0xFF) as usize]
    })
}

/// One document write inside a committed batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalWrite {
    /// Target collection ID.
    pub collection: u32,
    /// Document or edge.
    pub variant: DocumentVariant,
    /// Encoded document bytes.
    pub document: Vec<u8>,
}

/// A journal entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JournalEntry {
    /// A collection was created.
    CreateCollection {
        /// Assigned collection ID.
        id: u32,
        /// Collection name.
        name: String,
        /// Collection kind.
        kind: CollectionKind,
    },
    /// A collection was dropped along with its documents.
    DropCollection {
        /// ID of the dropped collection.
        id: u32,
    },
    /// A top-level commit.
    Batch {
        /// Writes in staging order.
        writes: Vec<JournalWrite>,
    },
}

impl JournalEntry {
    /// Encodes the entry as a length-prefixed frame.
    ///
    /// # Errors
    ///
    /// Returns a codec error if the entry cannot be serialized or exceeds
    /// the frame size limit.
    pub fn to_frame(&self) -> CoreResult<Vec<u8>> {
        let mut body = Vec::new();
        ciborium::into_writer(self, &mut body).map_err(|e| CoreError::codec(e.to_string()))?;
        let len = u32::try_from(body.len())
            .map_err(|_| CoreError::codec(format!("journal entry too large: {} bytes", body.len())))?;

        let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + body.len());
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(&frame_checksum(&body).to_le_bytes());
        frame.extend_from_slice(&body);
        Ok(frame)
    }

    /// Decodes every complete frame in `bytes`.
    ///
    /// A truncated final frame is ignored.
    ///
    /// # Errors
    ///
    /// Returns a journal error if a complete frame does not decode.
    pub fn decode_all(bytes: &[u8]) -> CoreResult<Vec<Self>> {
        Self::decode_prefix(bytes).map(|(entries, _)| entries)
    }

    /// Decodes every complete frame in `bytes` and returns them together
    /// with the length of the valid prefix.
    ///
    /// Scanning stops at the first frame that is truncated or fails its
    /// checksum; everything from there on is the torn tail.
    ///
    /// # Errors
    ///
    /// Returns a journal error if a frame with a valid checksum does not
    /// decode.
    pub fn decode_prefix(bytes: &[u8]) -> CoreResult<(Vec<Self>, usize)> {
        let mut entries = Vec::new();
        let mut offset = 0usize;

        while offset < bytes.len() {
            let remaining = bytes.len() - offset;
            if remaining < FRAME_HEADER_SIZE {
                warn!(offset, remaining, "ignoring torn journal frame header");
                break;
            }

            let len = read_u32(bytes, offset) as usize;
            let checksum = read_u32(bytes, offset + 4);

            let start = offset + FRAME_HEADER_SIZE;
            if bytes.len() - start < len {
                warn!(offset, len, "ignoring torn journal frame");
                break;
            }

            let body = &bytes[start..start + len];
            if frame_checksum(body) != checksum {
                warn!(offset, len, "ignoring journal frame with bad checksum");
                break;
            }

            let entry: Self = ciborium::from_reader(body).map_err(|e| {
                CoreError::journal(format!("corrupt frame at offset {offset}: {e}"))
            })?;
            entries.push(entry);
            offset = start + len;
        }

        Ok((entries, offset))
    }
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&bytes[at..at + 4]);
    u32::from_le_bytes(word)
}

/// Byte sink that holds the journal.
///
/// Backends only store bytes; framing belongs to [`JournalEntry`].
pub trait JournalBackend: Send + Sync {
    /// Appends a frame, returning the offset it was written at.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails. Part of the frame may have been
    /// written; callers cut it off with [`truncate`](Self::truncate).
    fn append(&mut self, frame: &[u8]) -> CoreResult<u64>;

    /// Pushes appended bytes to the operating system.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    fn flush(&mut self) -> CoreResult<()>;

    /// Forces appended bytes to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails.
    fn sync(&mut self) -> CoreResult<()>;

    /// Reads the whole journal.
    ///
    /// # Errors
    ///
    /// Returns an error if the journal cannot be read.
    fn read_all(&self) -> CoreResult<Vec<u8>>;

    /// Cuts the journal back to `len` bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the journal cannot be shortened.
    fn truncate(&mut self, len: u64) -> CoreResult<()>;

    /// Returns the journal size in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> CoreResult<u64>;
}

#[derive(Debug, Default)]
struct MemoryJournalState {
    data: Vec<u8>,
    synced_len: usize,
    sync_count: usize,
}

/// An in-memory journal.
///
/// Clones share the same buffer, so a test can keep one clone while a store
/// owns the other and later reopen a new store over the same bytes.
#[derive(Debug, Clone, Default)]
pub struct MemoryJournal {
    state: Arc<RwLock<MemoryJournalState>>,
}

impl MemoryJournal {
    /// Creates an empty journal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a journal with pre-existing bytes.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        let synced_len = data.len();
        Self {
            state: Arc::new(RwLock::new(MemoryJournalState {
                data,
                synced_len,
                sync_count: 0,
            })),
        }
    }

    /// Returns a copy of all journal bytes.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.state.read().data.clone()
    }

    /// Returns how many bytes were covered by the last sync.
    #[must_use]
    pub fn synced_len(&self) -> usize {
        self.state.read().synced_len
    }

    /// Returns how many times the journal was synced.
    #[must_use]
    pub fn sync_count(&self) -> usize {
        self.state.read().sync_count
    }
}

impl JournalBackend for MemoryJournal {
    fn append(&mut self, frame: &[u8]) -> CoreResult<u64> {
        let mut state = self.state.write();
        let offset = state.data.len() as u64;
        state.data.extend_from_slice(frame);
        Ok(offset)
    }

    fn flush(&mut self) -> CoreResult<()> {
        Ok(())
    }

    fn sync(&mut self) -> CoreResult<()> {
        let mut state = self.state.write();
        state.synced_len = state.data.len();
        state.sync_count += 1;
        Ok(())
    }

    fn read_all(&self) -> CoreResult<Vec<u8>> {
        Ok(self.data())
    }

    fn truncate(&mut self, len: u64) -> CoreResult<()> {
        let mut state = self.state.write();
        let len = usize::try_from(len).unwrap_or(usize::MAX);
        state.data.truncate(len);
        state.synced_len = state.synced_len.min(state.data.len());
        Ok(())
    }

    fn size(&self) -> CoreResult<u64> {
        Ok(self.state.read().data.len() as u64)
    }
}

/// A journal stored in a single file.
///
/// The file is locked exclusively while the journal is open; a second open
/// of the same path fails until the first journal is dropped.
#[derive(Debug)]
pub struct FileJournal {
    path: PathBuf,
    file: File,
    size: u64,
}

impl FileJournal {
    /// Opens or creates the journal file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or is locked by another
    /// journal.
    pub fn open(path: &Path) -> CoreResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        if file.try_lock_exclusive().is_err() {
            return Err(CoreError::journal(format!(
                "journal is locked by another process: {}",
                path.display()
            )));
        }

        let size = file.metadata()?.len();
        Ok(Self {
            path: path.to_path_buf(),
            file,
            size,
        })
    }

    /// Returns the path to the journal file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl JournalBackend for FileJournal {
    fn append(&mut self, frame: &[u8]) -> CoreResult<u64> {
        let offset = self.size;
        if frame.is_empty() {
            return Ok(offset);
        }
        self.file.seek(SeekFrom::Start(offset))?;
        if let Err(err) = self.file.write_all(frame) {
            if let Err(cut) = self.file.set_len(offset) {
                warn!(offset, error = %cut, "could not cut partial journal frame");
            }
            return Err(err.into());
        }
        self.size += frame.len() as u64;
        Ok(offset)
    }

    fn flush(&mut self) -> CoreResult<()> {
        self.file.flush()?;
        Ok(())
    }

    fn sync(&mut self) -> CoreResult<()> {
        self.file.sync_data()?;
        Ok(())
    }

    fn read_all(&self) -> CoreResult<Vec<u8>> {
        let mut file = &self.file;
        file.seek(SeekFrom::Start(0))?;
        let mut buffer = Vec::with_capacity(self.size as usize);
        file.read_to_end(&mut buffer)?;
        Ok(buffer)
    }

    fn truncate(&mut self, len: u64) -> CoreResult<()> {
        if len > self.size {
            return Err(CoreError::journal(format!(
                "cannot truncate journal of {} bytes to {len}",
                self.size
            )));
        }
        // The file may hold a partial frame past `size`, so always cut.
        self.file.set_len(len)?;
        self.file.sync_data()?;
        self.size = len;
        Ok(())
    }

    fn size(&self) -> CoreResult<u64> {
        Ok(self.size)
    }
}
