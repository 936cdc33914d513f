use binread::BinRead;
mod buffer;
mod filesystem;
mod narc;
mod nds;
mod patcher;
mod resource;
#[cfg(test)]
mod test_rom;
pub use buffer::{Buffer, BufferView};
pub use filesystem::{FileSystem, FileSystemError, FileSystemObject};
pub use narc::Narc;
pub use nds::{BannerLanguage, NdsBanner, NdsHeader};
pub use patcher::{patch, write_patch, Patch, PatchError, PatchOptions, PatchRecord, Patcher};
pub use resource::{ArchiveObject, ResourceHelper, ResourceInfo, ResourceType};

const NARC_MAGIC: [u8; 4] = *b"NARC";
const FATB_MAGIC: [u8; 4] = *b"BTAF";
const FNTB_MAGIC: [u8; 4] = *b"BTNF";
const FIMG_MAGIC: [u8; 4] = *b"GMIF";
const PATCH_MAGIC: [u8; 4] = *b"NFSP";

/// Directory ids in a sub-table carry this tag in their top nibble
const DIR_ID_TAG: u16 = 0xF000;

/// File allocation table entry, size = 0x8
#[derive(Debug, PartialEq, Eq, Copy, Clone, BinRead)]
#[br(little)]
struct FatEntry {
    start: u32,
    end: u32,
}

impl FatEntry {
    /// Unused slots are zeroed
    fn is_unused(&self) -> bool {
        self.start == 0 && self.end == 0
    }
}

/// File name table main entry, size = 0x8
#[derive(Debug, PartialEq, Eq, Copy, Clone, BinRead)]
#[br(little)]
struct FntDirEntry {
    subtable_offset: u32,
    first_file_id: u16,
    /// Directory count for the root, tagged parent id otherwise
    parent_id: u16,
}
