//! Universal (fat) Mach-O container reading.
//!
//! identityservicesd ships as a two-architecture universal binary. This
//! module carves the file into per-architecture slices so the signature
//! scanner can treat each one as an independent address space. Slices with
//! corrupt headers are kept and flagged so callers can warn about them
//! instead of silently dropping an architecture.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::{Error, Result};

/// Magic of a universal binary header (big-endian on disk).
pub const FAT_MAGIC: u32 = 0xcafe_babe;
/// Magic of a 32-bit Mach-O header (little-endian on disk).
pub const MACHO_MAGIC_32: u32 = 0xfeed_face;
/// Magic of a 64-bit Mach-O header (little-endian on disk).
pub const MACHO_MAGIC_64: u32 = 0xfeed_facf;

const FAT_HEADER_SIZE: usize = 8;
const FAT_ARCH_SIZE: usize = 20;

/// Known CPU identities: (cpu_type, cpu_subtype, capability) -> name.
const ARCH_NAMES: &[((u32, u32, u8), &str)] = &[
    ((0x0100_0007, 3, 0x00), "x86_64"),
    ((0x0100_000c, 2, 0x80), "arm64e"),
];

/// One architecture's byte range within a binary, as described by the
/// universal header (or synthesized for a thin binary).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchSlice {
    pub name: String,
    pub cpu_type: u32,
    pub cpu_subtype: u32,
    pub cpu_subtype_caps: u8,
    pub offset: u32,
    pub size: u32,
    pub align: u32,
    pub header_valid: bool,
}

impl ArchSlice {
    /// Borrow this architecture's byte range out of the whole-file buffer.
    pub fn bytes<'a>(&self, data: &'a [u8]) -> &'a [u8] {
        let start = (self.offset as usize).min(data.len());
        let end = (self.offset as usize)
            .saturating_add(self.size as usize)
            .min(data.len());
        &data[start..end]
    }
}

/// Canonical architecture name, or a descriptive fallback for identities
/// that are not in the table.
pub fn arch_name(cpu_type: u32, cpu_subtype: u32, caps: u8) -> String {
    for ((t, s, c), name) in ARCH_NAMES {
        if *t == cpu_type && *s == cpu_subtype && *c == caps {
            return (*name).to_string();
        }
    }
    format!("Unknown (Type: {cpu_type}, Subtype: {cpu_subtype}, Capability: {caps})")
}

/// Name of the slice the dynamic loader picks on this host.
pub fn host_arch_name() -> &'static str {
    if cfg!(target_arch = "aarch64") {
        "arm64e"
    } else {
        "x86_64"
    }
}

fn read_u32_be(data: &[u8], at: usize) -> Result<u32> {
    let bytes = data.get(at..at + 4).ok_or(Error::TruncatedInput {
        needed: at + 4,
        have: data.len(),
    })?;
    Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// True iff the four bytes at `offset` are a little-endian Mach-O magic.
fn header_valid(data: &[u8], offset: u32) -> bool {
    let at = offset as usize;
    match data.get(at..at + 4) {
        Some(bytes) => {
            let magic = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            magic == MACHO_MAGIC_32 || magic == MACHO_MAGIC_64
        }
        None => false,
    }
}

/// Split a binary into its architecture slices.
///
/// A file without the universal magic is treated as a single slice named by
/// the host CPU identity and spanning the whole file. Entries are keyed by
/// their position in the universal header; none are dropped, even with an
/// invalid per-architecture header.
pub fn read_architectures(data: &[u8]) -> Result<BTreeMap<usize, ArchSlice>> {
    let magic = read_u32_be(data, 0)?;
    let mut slices = BTreeMap::new();

    if magic != FAT_MAGIC {
        slices.insert(
            0,
            ArchSlice {
                name: host_arch_name().to_string(),
                cpu_type: 0,
                cpu_subtype: 0,
                cpu_subtype_caps: 0,
                offset: 0,
                size: data.len() as u32,
                align: 0,
                header_valid: header_valid(data, 0),
            },
        );
        return Ok(slices);
    }

    let count = read_u32_be(data, 4)? as usize;
    for index in 0..count {
        let at = FAT_HEADER_SIZE + index * FAT_ARCH_SIZE;
        let cpu_type = read_u32_be(data, at)?;
        let subtype_full = read_u32_be(data, at + 4)?;
        let offset = read_u32_be(data, at + 8)?;
        let size = read_u32_be(data, at + 12)?;
        let align = read_u32_be(data, at + 16)?;

        let cpu_subtype = subtype_full & 0x00ff_ffff;
        let cpu_subtype_caps = (subtype_full >> 24) as u8;

        slices.insert(
            index,
            ArchSlice {
                name: arch_name(cpu_type, cpu_subtype, cpu_subtype_caps),
                cpu_type,
                cpu_subtype,
                cpu_subtype_caps,
                offset,
                size,
                align,
                header_valid: header_valid(data, offset),
            },
        );
    }

    Ok(slices)
}

/// Synthetic binary builders shared by tests across the crate.
#[cfg(test)]
pub(crate) mod testutil {
    use super::*;

    pub struct FatEntry {
        pub cpu_type: u32,
        pub subtype_full: u32,
        pub offset: u32,
        pub size: u32,
        pub align: u32,
    }

    pub fn build_fat(entries: &[FatEntry], total_size: usize) -> Vec<u8> {
        let mut data = vec![0u8; total_size];
        data[0..4].copy_from_slice(&FAT_MAGIC.to_be_bytes());
        data[4..8].copy_from_slice(&(entries.len() as u32).to_be_bytes());
        for (i, entry) in entries.iter().enumerate() {
            let at = FAT_HEADER_SIZE + i * FAT_ARCH_SIZE;
            data[at..at + 4].copy_from_slice(&entry.cpu_type.to_be_bytes());
            data[at + 4..at + 8].copy_from_slice(&entry.subtype_full.to_be_bytes());
            data[at + 8..at + 12].copy_from_slice(&entry.offset.to_be_bytes());
            data[at + 12..at + 16].copy_from_slice(&entry.size.to_be_bytes());
            data[at + 16..at + 20].copy_from_slice(&entry.align.to_be_bytes());
            // Stamp a valid 64-bit header at each slice start.
            let slice_at = entry.offset as usize;
            data[slice_at..slice_at + 4].copy_from_slice(&MACHO_MAGIC_64.to_le_bytes());
        }
        data
    }
}
