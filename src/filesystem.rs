use crate::buffer::{Buffer, BufferView};
use crate::narc::Narc;
use crate::nds::NdsHeader;
use crate::resource::{ArchiveObject, ResourceType};
use crate::*;
use binread::BinReaderExt;
use derivative::*;
use indexmap::IndexSet;
use std::io::Cursor;
use std::path::Path;
use thiserror::Error;

/// Directory ids are 12 bits wide
const MAX_DIRECTORIES: usize = 0x1000;

#[derive(Error, Debug)]
/// An enum representing all possible errors when building or editing a file system
pub enum FileSystemError {
    #[error("No ROM is loaded")]
    NoRom,
    #[error("{what} at {offset:#x} (length {length:#x}) exceeds buffer of size {size:#x}")]
    OutOfBounds {
        what: &'static str,
        offset: usize,
        length: usize,
        size: usize,
    },
    #[error("Invalid {0} value: \"{1}\"")]
    InvalidData(String, String),
    #[error("Directory {0:#x} is referenced more than once")]
    Cycle(u16),
    #[error("{0} is not a file")]
    NotAFile(String),
    #[error("Resources can't change size (expected {expected} bytes, got {actual})")]
    SizeMismatch { expected: usize, actual: usize },
    #[error(transparent)]
    IOError(#[from] std::io::Error),
    #[error(transparent)]
    ParseError(#[from] binread::Error),
}

pub type Result<T> = core::result::Result<T, FileSystemError>;

/// A folder or file in the ROM's file tree
///
/// Nodes live in a flat table owned by [`FileSystem`]; children and parents
/// are referred to by index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSystemObject {
    index: usize,
    name: String,
    path: String,
    is_file: bool,
    folders: usize,
    files: usize,
    view: BufferView,
    parent: Option<usize>,
    children: Vec<usize>,
}

impl FileSystemObject {
    /// Position in the traversal order at build time
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Full `/`-separated path from the root
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_file(&self) -> bool {
        self.is_file
    }

    pub fn is_folder(&self) -> bool {
        !self.is_file
    }

    /// Number of folders below this node, at any depth
    pub fn folders(&self) -> usize {
        self.folders
    }

    /// Number of files below this node, at any depth
    pub fn files(&self) -> usize {
        self.files
    }

    /// The file's bytes, or the span of all descendant files for a folder
    pub fn view(&self) -> BufferView {
        self.view
    }

    pub fn offset(&self) -> usize {
        self.view.offset()
    }

    pub fn len(&self) -> usize {
        self.view.len()
    }

    pub fn is_empty(&self) -> bool {
        self.view.is_empty()
    }

    /// The text after the last `.` in a file name
    pub fn extension(&self) -> Option<&str> {
        if !self.is_file {
            return None;
        }
        self.name.rfind('.').map(|idx| &self.name[idx + 1..])
    }

    /// Index of the containing folder. `None` for the root.
    pub fn parent(&self) -> Option<usize> {
        self.parent
    }

    /// Indices of the immediate children, in table order
    pub fn children(&self) -> &[usize] {
        &self.children
    }
}

/// A resolved file name table and file allocation table
struct FileTable<'a> {
    fnt: &'a [u8],
    fat: &'a [FatEntry],
    /// Added to every FAT offset
    base: usize,
    /// Every file must lie inside this region
    region: BufferView,
}

/// A directory whose sub-table is still being read
#[derive(Debug, Clone, Copy)]
struct Frame {
    node: usize,
    pos: usize,
    file_id: usize,
}

enum Entry {
    End,
    File(String),
    Directory(String, usize),
}

struct TreeBuilder<'a> {
    fnt: &'a [u8],
    files: Vec<Option<BufferView>>,
    named: Vec<bool>,
    visited: Vec<bool>,
    nodes: Vec<FileSystemObject>,
    paths: IndexSet<String>,
}

impl<'a> TreeBuilder<'a> {
    fn new(table: &FileTable<'a>) -> Result<TreeBuilder<'a>> {
        let mut files = Vec::with_capacity(table.fat.len());
        for (id, entry) in table.fat.iter().enumerate() {
            if entry.is_unused() {
                files.push(None);
                continue;
            }
            if entry.end < entry.start {
                return Err(FileSystemError::InvalidData(
                    format!("FAT entry {}", id),
                    format!("{:#x}..{:#x}", entry.start, entry.end),
                ));
            }
            let offset = table.base + entry.start as usize;
            let length = (entry.end - entry.start) as usize;
            let view = BufferView::new(offset, length, table.region.end())
                .filter(|view| table.region.contains(view))
                .ok_or(FileSystemError::OutOfBounds {
                    what: "file",
                    offset,
                    length,
                    size: table.region.end(),
                })?;
            files.push(Some(view));
        }

        let root: FntDirEntry = read_dir_entry(table.fnt, 0)?;
        let dir_count = root.parent_id as usize;
        if dir_count == 0 || dir_count > MAX_DIRECTORIES || dir_count * 8 > table.fnt.len() {
            return Err(FileSystemError::InvalidData(
                "directory count".to_owned(),
                dir_count.to_string(),
            ));
        }

        Ok(TreeBuilder {
            fnt: table.fnt,
            named: vec![false; files.len()],
            files,
            visited: vec![false; dir_count],
            nodes: vec![],
            paths: IndexSet::new(),
        })
    }

    /// Walks the sub-tables depth first, assigning indices in pre-order
    fn build(mut self) -> Result<(Vec<FileSystemObject>, IndexSet<String>)> {
        let mut stack = vec![self.open_directory(0, None, String::new())?];
        while let Some(top) = stack.len().checked_sub(1) {
            let frame = stack[top];
            let (entry, next) = self.entry(frame.pos)?;
            stack[top].pos = next;
            match entry {
                Entry::End => {
                    stack.pop();
                }
                Entry::File(name) => {
                    let view = self
                        .files
                        .get(frame.file_id)
                        .copied()
                        .ok_or(FileSystemError::InvalidData(
                            "file id".to_owned(),
                            frame.file_id.to_string(),
                        ))?
                        .unwrap_or_default();
                    self.named[frame.file_id] = true;
                    stack[top].file_id += 1;
                    let index = self.add(Some(frame.node), name, true, view)?;
                    log::trace!("File {} -> {:?}", self.nodes[index].path, view);
                }
                Entry::Directory(name, dir) => {
                    let sub = self.open_directory(dir, Some(frame.node), name)?;
                    stack.push(sub);
                }
            }
        }

        let adopted: Vec<_> = self
            .files
            .iter()
            .enumerate()
            .filter_map(|(id, view)| match (view, self.named[id]) {
                (Some(view), false) => Some((id, *view)),
                _ => None,
            })
            .collect();
        if !adopted.is_empty() {
            log::warn!("Adopting {} unnamed files into the root", adopted.len());
        }
        for (id, view) in adopted {
            let mut name = format!("{}.bin", id);
            let mut suffix = 0;
            while self.paths.contains(&name) {
                suffix += 1;
                name = format!("{}_{}.bin", id, suffix);
            }
            self.add(Some(0), name, true, view)?;
        }

        self.aggregate();
        Ok((self.nodes, self.paths))
    }

    /// Fills in folder counts and spans. Children always follow their parent.
    fn aggregate(&mut self) {
        for i in (0..self.nodes.len()).rev() {
            if self.nodes[i].is_file {
                continue;
            }
            let mut folders = 0;
            let mut files = 0;
            let mut view = BufferView::empty();
            for &c in &self.nodes[i].children {
                let child = &self.nodes[c];
                if child.is_file {
                    files += 1;
                } else {
                    folders += 1 + child.folders;
                    files += child.files;
                }
                view = view.union(&child.view);
            }
            let node = &mut self.nodes[i];
            node.folders = folders;
            node.files = files;
            node.view = view;
        }
    }

    fn add(
        &mut self,
        parent: Option<usize>,
        name: String,
        is_file: bool,
        view: BufferView,
    ) -> Result<usize> {
        let path = match parent.map(|p| self.nodes[p].path.as_str()) {
            Some(parent_path) if !parent_path.is_empty() => format!("{}/{}", parent_path, name),
            _ => name.clone(),
        };
        if self.paths.contains(&path) {
            return Err(FileSystemError::InvalidData("duplicate path".to_owned(), path));
        }
        let (index, _) = self.paths.insert_full(path.clone());
        self.nodes.push(FileSystemObject {
            index,
            name,
            path,
            is_file,
            folders: 0,
            files: 0,
            view,
            parent,
            children: vec![],
        });
        if let Some(p) = parent {
            self.nodes[p].children.push(index);
        }
        Ok(index)
    }

    fn open_directory(&mut self, dir: usize, parent: Option<usize>, name: String) -> Result<Frame> {
        if dir >= self.visited.len() {
            return Err(FileSystemError::InvalidData(
                "directory id".to_owned(),
                format!("{:#x}", dir as u16 | DIR_ID_TAG),
            ));
        }
        if self.visited[dir] {
            return Err(FileSystemError::Cycle(dir as u16 | DIR_ID_TAG));
        }
        self.visited[dir] = true;

        let node = self.add(parent, name, false, BufferView::empty())?;
        let entry = read_dir_entry(self.fnt, dir)?;
        Ok(Frame {
            node,
            pos: entry.subtable_offset as usize,
            file_id: entry.first_file_id as usize,
        })
    }

    /// Reads the sub-table entry at `pos`, returning it with the position of the next one
    fn entry(&self, mut pos: usize) -> Result<(Entry, usize)> {
        let kind = *self.fnt.get(pos).ok_or(FileSystemError::OutOfBounds {
            what: "FNT sub-table",
            offset: pos,
            length: 1,
            size: self.fnt.len(),
        })?;
        pos += 1;
        if kind == 0 {
            return Ok((Entry::End, pos));
        }
        if kind == 0x80 {
            return Err(FileSystemError::InvalidData(
                "FNT entry type".to_owned(),
                format!("{:#x}", kind),
            ));
        }
        let len = (kind & 0x7F) as usize;
        let raw = self
            .fnt
            .get(pos..pos + len)
            .ok_or(FileSystemError::OutOfBounds {
                what: "FNT name",
                offset: pos,
                length: len,
                size: self.fnt.len(),
            })?;
        let name = String::from_utf8_lossy(raw).into_owned();
        pos += len;
        if kind & 0x80 == 0 {
            return Ok((Entry::File(name), pos));
        }

        let mut reader = Cursor::new(self.fnt);
        reader.set_position(pos as u64);
        let sub_id: u16 = reader.read_le()?;
        if sub_id & DIR_ID_TAG != DIR_ID_TAG {
            return Err(FileSystemError::InvalidData(
                "directory id".to_owned(),
                format!("{:#x}", sub_id),
            ));
        }
        Ok((
            Entry::Directory(name, (sub_id & !DIR_ID_TAG) as usize),
            pos + 2,
        ))
    }
}

fn read_dir_entry(fnt: &[u8], dir: usize) -> Result<FntDirEntry> {
    let mut reader = Cursor::new(fnt);
    reader.set_position(dir as u64 * 8);
    Ok(reader.read_le()?)
}

fn region(rom: &Buffer, what: &'static str, offset: u32, length: u32) -> Result<BufferView> {
    rom.view(offset as usize, length as usize)
        .ok_or(FileSystemError::OutOfBounds {
            what,
            offset: offset as usize,
            length: length as usize,
            size: rom.len(),
        })
}

#[derive(Derivative, Default)]
#[derivative(Debug)]
/// The folder/file tree of a ROM image
///
/// Nodes hold views into the ROM buffer rather than copies, so every method
/// that touches file contents takes the buffer the tree was built from.
pub struct FileSystem {
    #[derivative(Debug = "ignore")]
    nodes: Vec<FileSystemObject>,
    folder_count: usize,
    file_count: usize,
    rom_size: usize,
    #[derivative(Debug = "ignore")]
    paths: IndexSet<String>,
}

impl FileSystem {
    /// Parses the file table of a ROM image
    pub fn build(rom: &Buffer) -> Result<FileSystem> {
        let header = NdsHeader::parse(rom)?;
        let fnt = region(rom, "FNT", header.fnt_offset, header.fnt_size)?;
        let fat = region(rom, "FAT", header.fat_offset, header.fat_size)?;

        let mut reader = Cursor::new(&rom.as_slice()[fat.offset()..fat.end()]);
        let fat_entries = (0..fat.len() / 8)
            .map(|_| reader.read_le::<FatEntry>())
            .collect::<core::result::Result<Vec<_>, _>>()?;

        let table = FileTable {
            fnt: &rom.as_slice()[fnt.offset()..fnt.end()],
            fat: &fat_entries,
            base: 0,
            region: rom.view(0, rom.len()).unwrap_or_default(),
        };
        let fs = Self::from_table(&table, rom.len())?;
        log::debug!(
            "Built file system for {}: {} folders, {} files",
            header.title(),
            fs.folder_count,
            fs.file_count
        );
        Ok(fs)
    }

    fn from_table(table: &FileTable, rom_size: usize) -> Result<FileSystem> {
        let (nodes, paths) = TreeBuilder::new(table)?.build()?;
        Ok(FileSystem {
            folder_count: nodes[0].folders,
            file_count: nodes[0].files,
            nodes,
            rom_size,
            paths,
        })
    }

    /// Replaces the current tree with one built from `rom`
    ///
    /// On failure the file system is left empty.
    pub fn load(&mut self, rom: &Buffer) -> Result<()> {
        self.clear();
        *self = FileSystem::build(rom)?;
        Ok(())
    }

    /// Releases the tree. Safe to call when nothing is loaded.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.folder_count = 0;
        self.file_count = 0;
        self.rom_size = 0;
        self.paths.clear();
    }

    pub fn is_loaded(&self) -> bool {
        !self.nodes.is_empty()
    }

    /// Number of folders below the root
    pub fn folders(&self) -> usize {
        self.folder_count
    }

    /// Number of files in the whole tree
    pub fn files(&self) -> usize {
        self.file_count
    }

    pub fn root(&self) -> Option<&FileSystemObject> {
        self.nodes.first()
    }

    /// Get a node by its `/`-separated path. The empty path is the root.
    pub fn get(&self, path: &str) -> Option<&FileSystemObject> {
        let path = path.trim_matches('/');
        self.paths
            .get_index_of(path)
            .and_then(|index| self.nodes.get(index))
    }

    /// Get a node by its index
    pub fn get_by_index(&self, index: usize) -> Option<&FileSystemObject> {
        self.nodes.get(index)
    }

    /// The immediate children of a folder, in table order
    pub fn children<'s>(
        &'s self,
        fso: &'s FileSystemObject,
    ) -> impl Iterator<Item = &'s FileSystemObject> {
        fso.children.iter().filter_map(move |i| self.nodes.get(*i))
    }

    pub fn parent(&self, fso: &FileSystemObject) -> Option<&FileSystemObject> {
        fso.parent.and_then(|i| self.nodes.get(i))
    }

    /// Returns an iterator over all nodes in index order
    pub fn iter(&self) -> impl Iterator<Item = &FileSystemObject> {
        self.nodes.iter()
    }


    /// All nodes matching `predicate`, in index order
    pub fn find<F>(&self, predicate: F) -> Vec<&FileSystemObject>
    where
        F: Fn(&FileSystemObject) -> bool,
    {
        self.iter().filter(|fso| predicate(fso)).collect()
    }

    /// All files whose extension matches `ext`, ignoring case
    pub fn files_with_extension(&self, ext: &str) -> Vec<&FileSystemObject> {
        self.find(|fso| {
            fso.extension()
                .map_or(false, |e| e.eq_ignore_ascii_case(ext))
        })
    }

    fn check_rom(&self, rom: &Buffer) -> Result<()> {
        if self.nodes.is_empty() || rom.is_empty() {
            return Err(FileSystemError::NoRom);
        }
        if rom.len() != self.rom_size {
            return Err(FileSystemError::SizeMismatch {
                expected: self.rom_size,
                actual: rom.len(),
            });
        }
        Ok(())
    }

    fn file_bytes<'r>(&self, rom: &'r Buffer, fso: &FileSystemObject) -> Result<&'r [u8]> {
        self.check_rom(rom)?;
        if !fso.is_file {
            return Err(FileSystemError::NotAFile(fso.path.clone()));
        }
        rom.get(fso.view).ok_or(FileSystemError::OutOfBounds {
            what: "file",
            offset: fso.offset(),
            length: fso.len(),
            size: rom.len(),
        })
    }

    /// Classifies the resource stored in a file
    pub fn get_resource(&self, rom: &Buffer, fso: &FileSystemObject) -> Result<ArchiveObject> {
        self.file_bytes(rom, fso)?;
        ArchiveObject::new(fso.path.clone(), fso.view, rom).ok_or(FileSystemError::OutOfBounds {
            what: "resource",
            offset: fso.offset(),
            length: fso.len(),
            size: rom.len(),
        })
    }

    /// The raw bytes of a file
    pub fn export_resource<'r>(&self, rom: &'r Buffer, fso: &FileSystemObject) -> Result<&'r [u8]> {
        self.file_bytes(rom, fso)
    }

    /// Writes the raw bytes of a file to `path`
    pub fn export_resource_to<P: AsRef<Path>>(
        &self,
        rom: &Buffer,
        fso: &FileSystemObject,
        path: P,
    ) -> Result<()> {
        std::fs::write(path, self.file_bytes(rom, fso)?)?;
        Ok(())
    }

    /// Overwrites a file's bytes in place
    ///
    /// The replacement must have exactly the file's length; `rom` is left
    /// untouched otherwise.
    pub fn import_resource(
        &self,
        rom: &mut Buffer,
        fso: &FileSystemObject,
        data: &[u8],
    ) -> Result<()> {
        self.file_bytes(rom, fso)?;
        if data.len() != fso.len() {
            log::warn!(
                "Rejected import into {}: {} bytes for a {} byte resource",
                fso.path,
                data.len(),
                fso.len()
            );
            return Err(FileSystemError::SizeMismatch {
                expected: fso.len(),
                actual: data.len(),
            });
        }
        if let Some(target) = rom.get_mut(fso.view) {
            target.copy_from_slice(data);
        }
        log::debug!("Imported {} bytes into {}", data.len(), fso.path);
        Ok(())
    }

    /// Reads a replacement from `path` and imports it
    pub fn import_resource_from<P: AsRef<Path>>(
        &self,
        rom: &mut Buffer,
        fso: &FileSystemObject,
        path: P,
    ) -> Result<()> {
        let replacement = Buffer::read(path)?;
        self.import_resource(rom, fso, replacement.as_slice())
    }

    /// Builds the tree of a NARC stored in a file
    ///
    /// The nested nodes view the same ROM buffer, inside the container's range.
    pub fn open_archive(&self, rom: &Buffer, fso: &FileSystemObject) -> Result<FileSystem> {
        let resource = self.get_resource(rom, fso)?;
        if resource.resource_type() != ResourceType::Narc {
            return Err(FileSystemError::InvalidData(
                "archive type".to_owned(),
                format!("{:?}", resource.resource_type()),
            ));
        }
        let data = self.file_bytes(rom, fso)?;
        let narc = Narc::parse(data)?;
        let image = narc.image();
        let table = FileTable {
            fnt: &data[narc.fnt()],
            fat: narc.fat(),
            base: fso.offset() + image.start,
            region: rom
                .view(fso.offset() + image.start, image.len())
                .unwrap_or_default(),
        };
        let fs = Self::from_table(&table, rom.len())?;
        log::debug!(
            "Opened archive {}: {} folders, {} files",
            fso.path,
            fs.folder_count,
            fs.file_count
        );
        Ok(fs)
    }
}
