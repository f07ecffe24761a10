//! Offset records and their discovery.
//!
//! A record holds the image-base-relative addresses of the reference symbol
//! and the three NAC entry points for one architecture of one binary
//! revision. Records come from the static catalogue when the binary's
//! content hash is known, and from a live signature scan otherwise.

pub mod catalogue;

use std::collections::BTreeMap;
use std::fs;
use std::io::{BufReader, Read};
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::macho::{self, ArchSlice};
use crate::scan::library::{
    self, NAC_INIT_ADDRESS, NAC_KEY_ESTABLISHMENT_ADDRESS, NAC_SIGN_ADDRESS, REFERENCE_ADDRESS,
};
use crate::scan::{self, Signature};

use catalogue::{Catalogue, Lookup};

/// Relative addresses for one architecture of one binary revision.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OffsetRecord {
    pub reference_symbol: String,
    pub reference_addr: u64,
    pub init_addr: u64,
    pub key_establishment_addr: u64,
    pub sign_addr: u64,
}

impl OffsetRecord {
    /// A record is usable only when the symbol is known and all four
    /// addresses were found.
    pub fn is_populated(&self) -> bool {
        !self.reference_symbol.is_empty()
            && self.reference_addr != 0
            && self.init_addr != 0
            && self.key_establishment_addr != 0
            && self.sign_addr != 0
    }
}

/// Records for both supported architectures. Either side may be
/// unpopulated when the revision has not been catalogued for it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OffsetRecordSet {
    pub x86_64: OffsetRecord,
    pub arm64e: OffsetRecord,
}

impl OffsetRecordSet {
    pub fn for_arch(&self, arch: &str) -> Option<&OffsetRecord> {
        match arch {
            "x86_64" => Some(&self.x86_64),
            "arm64e" => Some(&self.arm64e),
            _ => None,
        }
    }
}

/// SHA-256 of a byte buffer.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// SHA-256 of a file, streamed.
pub fn sha256_file(path: &Path) -> Result<[u8; 32]> {
    let file = fs::File::open(path)?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().into())
}

/// Lowercase hex rendering of a digest.
pub fn hex_digest(hash: &[u8; 32]) -> String {
    hash.iter().map(|byte| format!("{byte:02x}")).collect()
}

/// All pattern matches per architecture slice, keyed by slice index and
/// pattern label. Slices with invalid headers or without builtin patterns
/// are skipped with a warning.
pub fn scan_architectures(
    data: &[u8],
    slices: &BTreeMap<usize, ArchSlice>,
) -> Result<BTreeMap<usize, BTreeMap<&'static str, Vec<usize>>>> {
    let mut results = BTreeMap::new();
    for (index, slice) in slices {
        if !slice.header_valid {
            warn!(
                "skipping architecture {index} ({}): invalid Mach-O header",
                slice.name
            );
            continue;
        }
        let Some(patterns) = library::builtin_patterns(&slice.name) else {
            debug!("no builtin patterns for architecture {}", slice.name);
            continue;
        };

        let bytes = slice.bytes(data);
        let mut arch_results = BTreeMap::new();
        for (label, pattern) in patterns {
            let signature = Signature::parse(pattern)?;
            let matches = scan::scan(bytes, &signature);
            debug!("{}/{label}: {} match(es)", slice.name, matches.len());
            arch_results.insert(*label, matches);
        }
        results.insert(*index, arch_results);
    }
    Ok(results)
}

/// Fold scan results into per-architecture records, taking the first match
/// of each pattern as authoritative. An architecture where any pattern
/// failed to match yields an unpopulated record.
pub fn records_from_scan(
    slices: &BTreeMap<usize, ArchSlice>,
    results: &BTreeMap<usize, BTreeMap<&'static str, Vec<usize>>>,
) -> OffsetRecordSet {
    let mut set = OffsetRecordSet::default();
    for (index, slice) in slices {
        let Some(arch_results) = results.get(index) else {
            continue;
        };
        let record = record_from_matches(arch_results);
        match slice.name.as_str() {
            "x86_64" => set.x86_64 = record,
            "arm64e" => set.arm64e = record,
            _ => {}
        }
    }
    set
}

fn record_from_matches(matches: &BTreeMap<&'static str, Vec<usize>>) -> OffsetRecord {
    let first = |label: &str| -> Option<u64> {
        matches.get(label)?.first().map(|offset| *offset as u64)
    };
    let (Some(reference), Some(init), Some(key_establishment), Some(sign)) = (
        first(REFERENCE_ADDRESS),
        first(NAC_INIT_ADDRESS),
        first(NAC_KEY_ESTABLISHMENT_ADDRESS),
        first(NAC_SIGN_ADDRESS),
    ) else {
        return OffsetRecord::default();
    };
    OffsetRecord {
        reference_symbol: library::REFERENCE_SYMBOL.to_string(),
        reference_addr: reference,
        init_addr: init,
        key_establishment_addr: key_establishment,
        sign_addr: sign,
    }
}

/// Derive offset records for every architecture in `data` by scanning for
/// the builtin patterns.
pub fn find_offsets_in(data: &[u8]) -> Result<OffsetRecordSet> {
    let slices = macho::read_architectures(data)?;
    let results = scan_architectures(data, &slices)?;
    Ok(records_from_scan(&slices, &results))
}

/// As [`find_offsets_in`], reading the binary from disk.
pub fn find_offsets(path: &Path) -> Result<OffsetRecordSet> {
    let data = fs::read(path)?;
    find_offsets_in(&data)
}

/// Resolve the offset record for one architecture of `data`, preferring
/// the catalogue and falling back to a live scan. `Ok(None)` means no
/// usable offset data exists for this binary/architecture at all.
pub fn resolve_record(
    data: &[u8],
    hash: &[u8; 32],
    arch: &str,
    table: &Catalogue,
) -> Result<Option<OffsetRecord>> {
    match table.lookup(hash, arch) {
        Lookup::Hit(record) => {
            debug!("catalogue hit for {} ({arch})", hex_digest(hash));
            return Ok(Some(record.clone()));
        }
        Lookup::EmptyForArch => {
            info!(
                "revision {} is catalogued without offsets for {arch}, scanning",
                hex_digest(hash)
            );
        }
        Lookup::UnknownRevision => {
            info!("unknown revision {}, scanning", hex_digest(hash));
        }
    }

    let set = find_offsets_in(data)?;
    let record = set.for_arch(arch).cloned().unwrap_or_default();
    Ok(record.is_populated().then_some(record))
}
