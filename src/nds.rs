use crate::buffer::Buffer;
use crate::filesystem::{FileSystemError, Result};
use binread::{BinRead, BinReaderExt};
use std::io::Cursor;

/// Parsed portion of the cartridge header, size = 0x88
#[derive(Debug, Clone, PartialEq, Eq, BinRead)]
#[br(little)]
pub struct NdsHeader {
    title: [u8; 12],
    pub game_code: [u8; 4],
    pub maker_code: [u8; 2],
    pub unit_code: u8,
    pub seed_select: u8,
    pub capacity: u8,
    #[br(pad_before = 8)]
    pub region: u8,
    pub rom_version: u8,
    pub autostart: u8,
    pub arm9_rom_offset: u32,
    pub arm9_entry_address: u32,
    pub arm9_ram_address: u32,
    pub arm9_size: u32,
    pub arm7_rom_offset: u32,
    pub arm7_entry_address: u32,
    pub arm7_ram_address: u32,
    pub arm7_size: u32,
    pub fnt_offset: u32,
    pub fnt_size: u32,
    pub fat_offset: u32,
    pub fat_size: u32,
    pub arm9_overlay_offset: u32,
    pub arm9_overlay_size: u32,
    pub arm7_overlay_offset: u32,
    pub arm7_overlay_size: u32,
    pub rom_control_normal: u32,
    pub rom_control_secure: u32,
    pub banner_offset: u32,
    pub secure_area_crc: u16,
    pub secure_transfer_timeout: u16,
    pub arm9_autoload: u32,
    pub arm7_autoload: u32,
    pub secure_disable: u64,
    pub rom_size: u32,
    pub header_size: u32,
}

impl NdsHeader {
    pub const SIZE: usize = 0x88;

    /// Reads the header at the start of `rom`
    pub fn parse(rom: &Buffer) -> Result<NdsHeader> {
        if rom.is_empty() {
            return Err(FileSystemError::NoRom);
        }
        if rom.len() < Self::SIZE {
            return Err(FileSystemError::OutOfBounds {
                what: "ROM header",
                offset: 0,
                length: Self::SIZE,
                size: rom.len(),
            });
        }
        Ok(Cursor::new(rom.as_slice()).read_le()?)
    }

    /// The game title with trailing padding removed
    pub fn title(&self) -> String {
        let end = self
            .title
            .iter()
            .position(|b| *b == 0)
            .unwrap_or(self.title.len());
        String::from_utf8_lossy(&self.title[..end]).into_owned()
    }

    pub fn game_code(&self) -> String {
        String::from_utf8_lossy(&self.game_code).into_owned()
    }
}

#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub enum BannerLanguage {
    Japanese,
    English,
    French,
    German,
    Italian,
    Spanish,
    Chinese,
    Korean,
}

const LANGUAGES: [BannerLanguage; 8] = [
    BannerLanguage::Japanese,
    BannerLanguage::English,
    BannerLanguage::French,
    BannerLanguage::German,
    BannerLanguage::Italian,
    BannerLanguage::Spanish,
    BannerLanguage::Chinese,
    BannerLanguage::Korean,
];

const TITLES_OFFSET: usize = 0x240;
const TITLE_SIZE: usize = 0x100;

/// Icon/title block referenced by the header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NdsBanner {
    version: u16,
    crc: u16,
    titles: Vec<String>,
}

impl NdsBanner {
    /// Reads the banner the header points to. Returns `None` if the header declares no banner.
    pub fn parse(rom: &Buffer, header: &NdsHeader) -> Result<Option<NdsBanner>> {
        let offset = header.banner_offset as usize;
        if offset == 0 {
            return Ok(None);
        }
        let mut reader = Cursor::new(rom.as_slice());
        reader.set_position(offset as u64);
        let version: u16 = reader.read_le()?;
        let crc: u16 = reader.read_le()?;
        // Chinese titles were added in version 2, Korean in version 3
        let count = match version {
            2 => 7,
            v if v >= 3 => 8,
            _ => 6,
        };
        let length = TITLES_OFFSET + TITLE_SIZE * count;
        let view = rom
            .view(offset, length)
            .ok_or(FileSystemError::OutOfBounds {
                what: "banner",
                offset,
                length,
                size: rom.len(),
            })?;
        let data = &rom.as_slice()[view.offset()..view.end()];
        let titles = data[TITLES_OFFSET..]
            .chunks_exact(TITLE_SIZE)
            .map(decode_title)
            .collect();
        Ok(Some(NdsBanner {
            version,
            crc,
            titles,
        }))
    }

    pub fn version(&self) -> u16 {
        self.version
    }

    pub fn crc(&self) -> u16 {
        self.crc
    }

    /// Every title stored in the banner, in [`BannerLanguage`] order
    pub fn titles(&self) -> &[String] {
        &self.titles
    }

    pub fn title(&self, language: BannerLanguage) -> Option<&str> {
        let index = LANGUAGES.iter().position(|l| *l == language)?;
        self.titles.get(index).map(String::as_str)
    }
}

fn decode_title(raw: &[u8]) -> String {
    let units = raw
        .chunks_exact(2)
        .map(|unit| u16::from_le_bytes([unit[0], unit[1]]))
        .take_while(|unit| *unit != 0);
    char::decode_utf16(units)
        .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect()
}
