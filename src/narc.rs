use crate::filesystem::{FileSystemError, Result};
use crate::*;
use binread::BinReaderExt;
use std::io::Cursor;
use std::ops::Range;

/// Size = 0x10
#[derive(Debug, PartialEq, Eq, Copy, Clone, BinRead)]
#[br(little)]
struct NarcHeader {
    magic: [u8; 4],
    bom: u16,
    version: u16,
    file_size: u32,
    header_size: u16,
    section_count: u16,
}

/// Size = 0x8
#[derive(Debug, PartialEq, Eq, Copy, Clone, BinRead)]
#[br(little)]
struct SectionHeader {
    magic: [u8; 4],
    size: u32,
}

fn magic_string(magic: &[u8]) -> String {
    String::from_utf8_lossy(magic).into_owned()
}

/// Section layout of a NARC container
///
/// Ranges are relative to the start of the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Narc {
    fat: Vec<FatEntry>,
    fnt: Range<usize>,
    image: Range<usize>,
}

impl Narc {
    /// Parses the section headers of a NARC container
    pub fn parse(data: &[u8]) -> Result<Narc> {
        let mut reader = Cursor::new(data);
        let header: NarcHeader = reader.read_le()?;
        if header.magic != NARC_MAGIC {
            return Err(FileSystemError::InvalidData(
                "NARC magic".to_owned(),
                magic_string(&header.magic),
            ));
        }
        if header.bom != 0xFFFE {
            return Err(FileSystemError::InvalidData(
                "NARC byte order mark".to_owned(),
                format!("{:#06x}", header.bom),
            ));
        }
        if header.header_size != 0x10 {
            return Err(FileSystemError::InvalidData(
                "NARC header size".to_owned(),
                header.header_size.to_string(),
            ));
        }

        let fat_start = header.header_size as usize;
        let fat_header = section(data, fat_start, FATB_MAGIC)?;
        reader.set_position(fat_start as u64 + 8);
        let num_files: u16 = reader.read_le()?;
        let _reserved: u16 = reader.read_le()?;
        if 12 + 8 * num_files as usize > fat_header.size as usize {
            return Err(FileSystemError::InvalidData(
                "BTAF file count".to_owned(),
                num_files.to_string(),
            ));
        }
        let fat = (0..num_files)
            .map(|_| reader.read_le())
            .collect::<core::result::Result<Vec<FatEntry>, _>>()?;

        let fnt_start = fat_start + fat_header.size as usize;
        let fnt_header = section(data, fnt_start, FNTB_MAGIC)?;
        let fimg_start = fnt_start + fnt_header.size as usize;
        let fimg_header = section(data, fimg_start, FIMG_MAGIC)?;

        Ok(Narc {
            fat,
            fnt: fnt_start + 8..fnt_start + fnt_header.size as usize,
            image: fimg_start + 8..fimg_start + fimg_header.size as usize,
        })
    }

    pub fn file_count(&self) -> usize {
        self.fat.len()
    }

    /// The file name table, relative to the container
    pub fn fnt(&self) -> Range<usize> {
        self.fnt.clone()
    }

    /// The file image, relative to the container. FAT entries are relative to its start.
    pub fn image(&self) -> Range<usize> {
        self.image.clone()
    }

    pub(crate) fn fat(&self) -> &[FatEntry] {
        &self.fat
    }
}

fn section(data: &[u8], offset: usize, magic: [u8; 4]) -> Result<SectionHeader> {
    let mut reader = Cursor::new(data);
    reader.set_position(offset as u64);
    let header: SectionHeader = reader.read_le()?;
    if header.magic != magic {
        return Err(FileSystemError::InvalidData(
            format!("{} magic", magic_string(&magic)),
            magic_string(&header.magic),
        ));
    }
    let size = header.size as usize;
    match offset.checked_add(size) {
        Some(end) if size >= 8 && end <= data.len() => Ok(header),
        _ => Err(FileSystemError::OutOfBounds {
            what: "NARC section",
            offset,
            length: size,
            size: data.len(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_rom::{file, narc};

    #[test]
    fn parse_sections() {
        let data = narc(vec![file("a.bin", vec![1; 5]), file("b.bin", vec![2; 3])]);
        let narc = Narc::parse(&data).unwrap();
        assert_eq!(narc.file_count(), 2);
        assert_eq!(narc.image().end, data.len());
        let image = &data[narc.image()];
        let first = narc.fat()[0];
        assert_eq!(&image[first.start as usize..first.end as usize], &[1; 5]);
        assert!(narc.fnt().end <= narc.image().start);
    }

    #[test]
    fn reject_bad_magic() {
        let mut data = narc(vec![file("a.bin", vec![1; 5])]);
        data[0] = b'X';
        assert!(matches!(
            Narc::parse(&data),
            Err(FileSystemError::InvalidData(..))
        ));
    }

    #[test]
    fn reject_truncated() {
        let data = narc(vec![file("a.bin", vec![1; 64])]);
        assert!(Narc::parse(&data[..data.len() - 16]).is_err());
        assert!(Narc::parse(&data[..6]).is_err());
    }
}
