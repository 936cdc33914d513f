use crate::buffer::{Buffer, BufferView};
use cached::proc_macro::cached;
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const RESOURCE_INFO: &str = include_str!("../data/resource_types.json");

/// Every resource kind the archive browser can tell apart
#[derive(Debug, Eq, PartialEq, Copy, Clone, Hash, Serialize, Deserialize)]
pub enum ResourceType {
    Narc,
    Nclr,
    Ncgr,
    Nscr,
    Ncer,
    Nanr,
    Nmcr,
    Nmar,
    Bmd0,
    Btx0,
    Bca0,
    Btp0,
    Bta0,
    Sdat,
    Bmg,
    /// Unrecognized magic number
    Binary,
}

impl ResourceType {
    /// Returns true for resources that contain a nested file table
    pub fn is_container(self) -> bool {
        self == ResourceType::Narc
    }
}

impl Default for ResourceType {
    fn default() -> Self {
        ResourceType::Binary
    }
}

/// Registry entry describing a known resource kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceInfo {
    /// The first four bytes of the resource, as stored
    pub code: String,
    #[serde(rename = "type")]
    pub kind: ResourceType,
    pub ext: String,
    pub desc: String,
}

impl ResourceInfo {
    pub fn magic_number(&self) -> u32 {
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&self.code.as_bytes()[..4]);
        u32::from_le_bytes(magic)
    }
}

#[cached]
fn get_resource_info() -> Vec<ResourceInfo> {
    let info: Vec<ResourceInfo> = serde_json::from_str(RESOURCE_INFO).unwrap();
    assert!(info.iter().all(|entry| entry.code.len() == 4));
    info
}

lazy_static! {
    static ref MAGIC_TABLE: HashMap<u32, ResourceType> = get_resource_info()
        .iter()
        .map(|entry| (entry.magic_number(), entry.kind))
        .collect();
}

/// Classifies raw resources by their magic number
pub struct ResourceHelper;

impl ResourceHelper {
    /// Maps a magic number to its resource type. Unknown numbers are [`ResourceType::Binary`].
    pub fn classify(magic_number: u32) -> ResourceType {
        MAGIC_TABLE
            .get(&magic_number)
            .copied()
            .unwrap_or(ResourceType::Binary)
    }

    /// Reads the little-endian magic number from the first four bytes, or 0 if there are fewer
    pub fn magic_of(data: &[u8]) -> u32 {
        match data.get(..4) {
            Some(head) => u32::from_le_bytes([head[0], head[1], head[2], head[3]]),
            None => 0,
        }
    }

    /// Registry information for a resource type. `Binary` has none.
    pub fn info(kind: ResourceType) -> Option<ResourceInfo> {
        get_resource_info().into_iter().find(|entry| entry.kind == kind)
    }

    pub fn magic_number(kind: ResourceType) -> Option<u32> {
        Self::info(kind).map(|entry| entry.magic_number())
    }
}

/// A typed resource record backed by a view into the ROM buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveObject {
    name: String,
    magic_number: u32,
    resource_type: ResourceType,
    view: BufferView,
}

impl ArchiveObject {
    /// Classifies the bytes at `view`. Returns `None` if the view does not fit `rom`.
    pub fn new(name: String, view: BufferView, rom: &Buffer) -> Option<ArchiveObject> {
        let magic_number = ResourceHelper::magic_of(rom.get(view)?);
        Some(ArchiveObject {
            name,
            magic_number,
            resource_type: ResourceHelper::classify(magic_number),
            view,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn magic_number(&self) -> u32 {
        self.magic_number
    }

    pub fn resource_type(&self) -> ResourceType {
        self.resource_type
    }

    pub fn view(&self) -> BufferView {
        self.view
    }

    /// The resource bytes inside `rom`
    pub fn data<'a>(&self, rom: &'a Buffer) -> Option<&'a [u8]> {
        rom.get(self.view)
    }
}
