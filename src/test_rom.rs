//! Synthesizes small ROM images and NARC containers for tests

use crate::buffer::Buffer;

pub(crate) enum Node {
    File(String, Vec<u8>),
    Dir(String, Vec<Node>),
}

impl Drop for Node {
    // Deep chains would otherwise drop recursively
    fn drop(&mut self) {
        if let Node::Dir(_, children) = self {
            let mut stack = std::mem::take(children);
            while let Some(mut node) = stack.pop() {
                if let Node::Dir(_, children) = &mut node {
                    stack.append(children);
                }
            }
        }
    }
}

pub(crate) fn file(name: &str, data: Vec<u8>) -> Node {
    Node::File(name.to_owned(), data)
}

pub(crate) fn dir(name: &str, children: Vec<Node>) -> Node {
    Node::Dir(name.to_owned(), children)
}

fn pad(data: &mut Vec<u8>, alignment: usize) {
    while data.len() % alignment != 0 {
        data.push(0);
    }
}

/// Builds a file name table for `root`, returning it with the file contents in id order
fn file_table(root: &[Node], first_file_id: u16) -> (Vec<u8>, Vec<Vec<u8>>) {
    let mut dirs: Vec<(&[Node], u16)> = vec![(root, 0)];
    let mut sub_ids: Vec<Vec<u16>> = vec![];
    let mut i = 0;
    while i < dirs.len() {
        let (children, _) = dirs[i];
        let mut ids = vec![];
        for child in children {
            if let Node::Dir(_, grandchildren) = child {
                ids.push(dirs.len() as u16);
                dirs.push((grandchildren.as_slice(), i as u16));
            }
        }
        sub_ids.push(ids);
        i += 1;
    }

    let dir_count = dirs.len();
    let mut main = vec![];
    let mut subtables = vec![];
    let mut files = vec![];
    let mut next_file = first_file_id;
    for (d, (children, parent)) in dirs.iter().enumerate() {
        let offset = (dir_count * 8 + subtables.len()) as u32;
        let parent_id = if d == 0 {
            dir_count as u16
        } else {
            0xF000 | *parent
        };
        main.extend_from_slice(&offset.to_le_bytes());
        main.extend_from_slice(&next_file.to_le_bytes());
        main.extend_from_slice(&parent_id.to_le_bytes());

        let mut subs = sub_ids[d].iter();
        for child in children.iter() {
            match child {
                Node::File(name, data) => {
                    subtables.push(name.len() as u8);
                    subtables.extend_from_slice(name.as_bytes());
                    files.push(data.clone());
                    next_file += 1;
                }
                Node::Dir(name, _) => {
                    subtables.push(0x80 | name.len() as u8);
                    subtables.extend_from_slice(name.as_bytes());
                    let id = subs.next().copied().unwrap_or_default();
                    subtables.extend_from_slice(&(0xF000 | id).to_le_bytes());
                }
            }
        }
        subtables.push(0);
    }
    main.extend_from_slice(&subtables);
    (main, files)
}

/// Builds a NARC container holding `children`
pub(crate) fn narc(children: Vec<Node>) -> Vec<u8> {
    let (mut fnt, files) = file_table(&children, 0);
    pad(&mut fnt, 4);
    let mut image = vec![];
    let mut fat = vec![];
    for data in files {
        pad(&mut image, 4);
        let start = image.len() as u32;
        image.extend_from_slice(&data);
        fat.push((start, image.len() as u32));
    }

    let btaf_size = 12 + 8 * fat.len();
    let btnf_size = 8 + fnt.len();
    let gmif_size = 8 + image.len();
    let total = 0x10 + btaf_size + btnf_size + gmif_size;

    let mut out = vec![];
    out.extend_from_slice(b"NARC");
    out.extend_from_slice(&0xFFFEu16.to_le_bytes());
    out.extend_from_slice(&0x0100u16.to_le_bytes());
    out.extend_from_slice(&(total as u32).to_le_bytes());
    out.extend_from_slice(&0x10u16.to_le_bytes());
    out.extend_from_slice(&3u16.to_le_bytes());
    out.extend_from_slice(b"BTAF");
    out.extend_from_slice(&(btaf_size as u32).to_le_bytes());
    out.extend_from_slice(&(fat.len() as u16).to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    for (start, end) in fat {
        out.extend_from_slice(&start.to_le_bytes());
        out.extend_from_slice(&end.to_le_bytes());
    }
    out.extend_from_slice(b"BTNF");
    out.extend_from_slice(&(btnf_size as u32).to_le_bytes());
    out.extend_from_slice(&fnt);
    out.extend_from_slice(b"GMIF");
    out.extend_from_slice(&(gmif_size as u32).to_le_bytes());
    out.extend_from_slice(&image);
    out
}

pub(crate) struct RomBuilder {
    title: String,
    overlays: Vec<Vec<u8>>,
    root: Vec<Node>,
    banner: Option<Vec<String>>,
}

impl RomBuilder {
    pub(crate) fn new(title: &str) -> RomBuilder {
        RomBuilder {
            title: title.to_owned(),
            overlays: vec![],
            root: vec![],
            banner: None,
        }
    }

    /// Files that precede the named ones in the FAT and have no name
    pub(crate) fn overlays(mut self, overlays: Vec<Vec<u8>>) -> RomBuilder {
        self.overlays = overlays;
        self
    }

    pub(crate) fn root(mut self, root: Vec<Node>) -> RomBuilder {
        self.root = root;
        self
    }

    pub(crate) fn banner(mut self, titles: &[&str]) -> RomBuilder {
        self.banner = Some(titles.iter().map(|t| t.to_string()).collect());
        self
    }

    pub(crate) fn build(self) -> Buffer {
        let (fnt, named) = file_table(&self.root, self.overlays.len() as u16);
        let files: Vec<Vec<u8>> = self.overlays.into_iter().chain(named).collect();

        let mut rom = vec![0u8; 0x200];
        let fnt_offset = rom.len();
        rom.extend_from_slice(&fnt);
        pad(&mut rom, 4);
        let fat_offset = rom.len();
        rom.resize(fat_offset + 8 * files.len(), 0);

        let mut banner_offset = 0;
        if let Some(titles) = &self.banner {
            pad(&mut rom, 0x20);
            banner_offset = rom.len();
            let mut banner = vec![0u8; 0x840];
            banner[0..2].copy_from_slice(&1u16.to_le_bytes());
            for (i, title) in titles.iter().take(6).enumerate() {
                let base = 0x240 + 0x100 * i;
                for (j, unit) in title.encode_utf16().take(0x7F).enumerate() {
                    banner[base + 2 * j..base + 2 * j + 2].copy_from_slice(&unit.to_le_bytes());
                }
            }
            rom.extend_from_slice(&banner);
        }

        for (i, data) in files.iter().enumerate() {
            pad(&mut rom, 0x10);
            let start = rom.len() as u32;
            rom.extend_from_slice(data);
            let end = rom.len() as u32;
            let entry = fat_offset + 8 * i;
            rom[entry..entry + 4].copy_from_slice(&start.to_le_bytes());
            rom[entry + 4..entry + 8].copy_from_slice(&end.to_le_bytes());
        }

        let title = self.title.as_bytes();
        let title_len = title.len().min(12);
        rom[..title_len].copy_from_slice(&title[..title_len]);
        rom[0x0C..0x10].copy_from_slice(b"NFSR");
        rom[0x10..0x12].copy_from_slice(b"01");
        let size = rom.len();
        for (at, value) in [
            (0x40, fnt_offset),
            (0x44, fnt.len()),
            (0x48, fat_offset),
            (0x4C, 8 * files.len()),
            (0x68, banner_offset),
            (0x80, size),
            (0x84, 0x200),
        ] {
            rom[at..at + 4].copy_from_slice(&(value as u32).to_le_bytes());
        }
        Buffer::from(rom)
    }
}
