use crate::buffer::Buffer;
use crate::*;
use binread::BinReaderExt;
use binwrite::BinWrite;
use num::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
/// An enum representing all possible errors when creating, storing or applying a patch
pub enum PatchError {
    #[error("Patch expects an original of {expected} bytes, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },
    #[error("Record at {offset:#x} (length {length:#x}) exceeds target size {target_size:#x}")]
    RecordOutOfBounds {
        offset: usize,
        length: usize,
        target_size: usize,
    },
    #[error("{0} does not fit in a patch file")]
    TooLarge(usize),
    #[error("Invalid {0} value: \"{1}\"")]
    InvalidData(String, String),
    #[error(transparent)]
    IOError(#[from] std::io::Error),
    #[error(transparent)]
    ParseError(#[from] binread::Error),
}

type Result<T> = core::result::Result<T, PatchError>;

/// Size = 0x10
#[derive(Debug, PartialEq, Eq, Copy, Clone, BinRead, BinWrite)]
struct PatchHeader {
    magic: [u8; 4],
    original_size: u32,
    target_size: u32,
    record_count: u32,
}

/// Size = 0x8, followed by `length` bytes
#[derive(Debug, PartialEq, Eq, Copy, Clone, BinRead, BinWrite)]
struct RecordHeader {
    offset: u32,
    length: u32,
}

fn wire(value: usize) -> Result<u32> {
    value.to_u32().ok_or(PatchError::TooLarge(value))
}

/// Tunables for patch generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatchOptions {
    /// Runs of at most this many equal bytes between two changes are folded
    /// into a single record
    pub merge_window: usize,
}

impl Default for PatchOptions {
    fn default() -> Self {
        PatchOptions { merge_window: 8 }
    }
}

impl PatchOptions {
    pub fn from_json(json: &str) -> serde_json::Result<PatchOptions> {
        serde_json::from_str(json)
    }
}

/// A replacement of `bytes.len()` bytes at `offset`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchRecord {
    offset: usize,
    bytes: Vec<u8>,
}

impl PatchRecord {
    pub fn new(offset: usize, bytes: Vec<u8>) -> PatchRecord {
        PatchRecord { offset, bytes }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Ordered, non-overlapping records turning one buffer into another
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Patch {
    original_size: usize,
    target_size: usize,
    records: Vec<PatchRecord>,
}

impl Patch {
    pub fn new(original_size: usize, target_size: usize, records: Vec<PatchRecord>) -> Patch {
        Patch {
            original_size,
            target_size,
            records,
        }
    }

    pub fn original_size(&self) -> usize {
        self.original_size
    }

    pub fn target_size(&self) -> usize {
        self.target_size
    }

    pub fn records(&self) -> &[PatchRecord] {
        &self.records
    }

    /// Returns true if applying the patch changes nothing
    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.original_size == self.target_size
    }

    /// Parses a patch file
    pub fn from_bytes(data: &[u8]) -> Result<Patch> {
        let mut reader = Cursor::new(data);
        let header: PatchHeader = reader.read_le()?;
        if header.magic != PATCH_MAGIC {
            return Err(PatchError::InvalidData(
                "NFSP magic".to_owned(),
                String::from_utf8_lossy(&header.magic).into_owned(),
            ));
        }

        let count = header.record_count as usize;
        let mut records = Vec::with_capacity(count.min(data.len() / 8));
        for i in 0..count {
            let record: RecordHeader = reader.read_le()?;
            let start = reader.position() as usize;
            let end = start + record.length as usize;
            let bytes = data.get(start..end).ok_or_else(|| {
                PatchError::InvalidData(format!("record {} length", i), record.length.to_string())
            })?;
            reader.set_position(end as u64);
            records.push(PatchRecord::new(record.offset as usize, bytes.to_vec()));
        }
        let trailing = data.len() - reader.position() as usize;
        if trailing != 0 {
            return Err(PatchError::InvalidData(
                "trailing byte count".to_owned(),
                trailing.to_string(),
            ));
        }

        Ok(Patch {
            original_size: header.original_size as usize,
            target_size: header.target_size as usize,
            records,
        })
    }

    /// Serializes the patch into the patch file format
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut opts = binwrite::WriterOption::default();
        opts.endian = binwrite::Endian::Little;
        let est_size = 0x10 + self.records.iter().map(|r| 0x8 + r.len()).sum::<usize>();
        let mut buf: Vec<u8> = Vec::with_capacity(est_size);

        PatchHeader {
            magic: PATCH_MAGIC,
            original_size: wire(self.original_size)?,
            target_size: wire(self.target_size)?,
            record_count: wire(self.records.len())?,
        }
        .write_options(&mut buf, &opts)?;
        for record in &self.records {
            RecordHeader {
                offset: wire(record.offset)?,
                length: wire(record.len())?,
            }
            .write_options(&mut buf, &opts)?;
            record.bytes.write_options(&mut buf, &opts)?;
        }
        Ok(buf)
    }

    pub fn read<P: AsRef<Path>>(path: P) -> Result<Patch> {
        Self::from_bytes(Buffer::read(path)?.as_slice())
    }

    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        Buffer::from(self.to_bytes()?).write(path)?;
        Ok(())
    }
}

/// Computes and applies byte-level patches
///
/// Holds configuration only; both operations are pure functions of their inputs.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Patcher {
    options: PatchOptions,
}

impl Patcher {
    pub fn new(options: PatchOptions) -> Patcher {
        Patcher { options }
    }

    pub fn options(&self) -> PatchOptions {
        self.options
    }

    /// Diffs `modified` against `original`
    ///
    /// Returns `None` if the buffers are identical.
    pub fn write_patch(&self, original: &Buffer, modified: &Buffer) -> Result<Option<Patch>> {
        let (old, new) = (original.as_slice(), modified.as_slice());
        wire(old.len())?;
        wire(new.len())?;

        let common = old.len().min(new.len());
        let window = self.options.merge_window;
        let mut records = vec![];
        let mut i = 0;
        while i < common {
            if old[i] == new[i] {
                i += 1;
                continue;
            }
            let start = i;
            let mut end = i + 1;
            let mut j = end;
            while j < common && j - end <= window {
                if old[j] != new[j] {
                    end = j + 1;
                }
                j += 1;
            }
            log::trace!("Change at {:#x}, {} bytes", start, end - start);
            records.push(PatchRecord::new(start, new[start..end].to_vec()));
            i = j;
        }
        if new.len() > old.len() {
            records.push(PatchRecord::new(old.len(), new[old.len()..].to_vec()));
        }

        let patch = Patch::new(old.len(), new.len(), records);
        if patch.is_empty() {
            log::debug!("No differences found, nothing to patch");
            return Ok(None);
        }
        log::debug!(
            "Created patch with {} records ({:#x} -> {:#x} bytes)",
            patch.records.len(),
            patch.original_size,
            patch.target_size
        );
        Ok(Some(patch))
    }

    /// Reconstructs the modified buffer from `original` and `patch`
    pub fn patch(&self, original: &Buffer, patch: &Patch) -> Result<Buffer> {
        if original.len() != patch.original_size {
            return Err(PatchError::SizeMismatch {
                expected: patch.original_size,
                actual: original.len(),
            });
        }
        for record in &patch.records {
            match record.offset.checked_add(record.len()) {
                Some(end) if end <= patch.target_size => {}
                _ => {
                    return Err(PatchError::RecordOutOfBounds {
                        offset: record.offset,
                        length: record.len(),
                        target_size: patch.target_size,
                    })
                }
            }
        }
        // Growth is only ever carried by a trailing append record
        if patch.target_size > patch.original_size {
            let tail = patch.records.last().map(|record| record.offset + record.len());
            if tail != Some(patch.target_size) {
                return Err(PatchError::InvalidData(
                    "target size".to_owned(),
                    format!("{:#x}", patch.target_size),
                ));
            }
        }

        let mut data = vec![0u8; patch.target_size];
        let keep = original.len().min(patch.target_size);
        data[..keep].copy_from_slice(&original.as_slice()[..keep]);
        for record in &patch.records {
            data[record.offset..record.offset + record.len()].copy_from_slice(&record.bytes);
        }
        log::debug!(
            "Applied {} records ({:#x} -> {:#x} bytes)",
            patch.records.len(),
            patch.original_size,
            patch.target_size
        );
        Ok(Buffer::from(data))
    }
}

/// Diffs two buffers with the default options
pub fn write_patch(original: &Buffer, modified: &Buffer) -> Result<Option<Patch>> {
    Patcher::default().write_patch(original, modified)
}

/// Applies a patch with the default options
pub fn patch(original: &Buffer, patch: &Patch) -> Result<Buffer> {
    Patcher::default().patch(original, patch)
}
