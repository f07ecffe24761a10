//! Static offsets for known identityservicesd revisions.
//!
//! Keys are SHA-256 digests of the whole binary, hex-encoded. An entry
//! mapped to an empty record set marks a revision that was examined but
//! never catalogued; that is distinct from a digest that has never been
//! seen, and both fall back to a live scan.

use std::collections::HashMap;
use std::sync::LazyLock;

use super::{OffsetRecord, OffsetRecordSet, hex_digest};
use crate::scan::library::REFERENCE_SYMBOL;

/// Outcome of a catalogue lookup.
#[derive(Debug, PartialEq, Eq)]
pub enum Lookup<'a> {
    /// The revision is catalogued with usable offsets for the architecture.
    Hit(&'a OffsetRecord),
    /// The revision is known but carries no offsets for the architecture.
    EmptyForArch,
    /// The digest has never been seen.
    UnknownRevision,
}

pub struct Catalogue {
    entries: HashMap<String, OffsetRecordSet>,
}

impl Catalogue {
    /// The revisions shipped with this build.
    pub fn builtin() -> &'static Catalogue {
        &BUILTIN
    }

    /// A catalogue from explicit entries, keyed by hex digest.
    pub fn from_entries(entries: HashMap<String, OffsetRecordSet>) -> Self {
        Self { entries }
    }

    pub fn lookup(&self, hash: &[u8; 32], arch: &str) -> Lookup<'_> {
        match self.entries.get(&hex_digest(hash)) {
            None => Lookup::UnknownRevision,
            Some(set) => match set.for_arch(arch) {
                Some(record) if record.is_populated() => Lookup::Hit(record),
                _ => Lookup::EmptyForArch,
            },
        }
    }
}

fn record(
    reference_addr: u64,
    init_addr: u64,
    key_establishment_addr: u64,
    sign_addr: u64,
) -> OffsetRecord {
    OffsetRecord {
        reference_symbol: REFERENCE_SYMBOL.to_string(),
        reference_addr,
        init_addr,
        key_establishment_addr,
        sign_addr,
    }
}

/// Offsets from the macOS 11.7.7 binary; also matches 11.5 - 11.7.
fn macos_11_7_7() -> OffsetRecordSet {
    OffsetRecordSet {
        x86_64: record(0xa3b8e, 0x3d4870, 0x427390, 0x3c71a0),
        arm64e: OffsetRecord::default(),
    }
}

fn macos_12_7_1() -> OffsetRecordSet {
    OffsetRecordSet {
        x86_64: record(0xb2278, 0x4132e0, 0x465e00, 0x405c10),
        arm64e: record(0x0b562c, 0x43d408, 0x3fdafc, 0x3f2844),
    }
}

fn macos_13_3_1() -> OffsetRecordSet {
    OffsetRecordSet {
        x86_64: record(0xccfdf, 0x4ac060, 0x48c0a0, 0x49f390),
        arm64e: record(0xb7570, 0x414e28, 0x40268c, 0x3dc898),
    }
}

/// Offsets from the macOS 13.5 binary; also matches 13.5 - 13.6.
fn macos_13_6() -> OffsetRecordSet {
    OffsetRecordSet {
        x86_64: record(0xcc743, 0x4b91e0, 0x499220, 0x4ac510),
        arm64e: record(0xb524c, 0x41d714, 0x40af78, 0x3e5184),
    }
}

fn macos_14_0() -> OffsetRecordSet {
    OffsetRecordSet {
        x86_64: record(0xd5a4d, 0x543210, 0x523250, 0x536540),
        arm64e: record(0xc00ec, 0x4af610, 0x49ce74, 0x477080),
    }
}

fn macos_14_1() -> OffsetRecordSet {
    OffsetRecordSet {
        x86_64: record(0xd6c39, 0x549b30, 0x529b70, 0x53ce60),
        arm64e: record(0xbf178, 0x4b2e84, 0x4a06e8, 0x47a8f4),
    }
}

fn macos_14_2() -> OffsetRecordSet {
    OffsetRecordSet {
        x86_64: record(0xd4899, 0x54c730, 0x52c770, 0x53fa60),
        arm64e: record(0xbd9f0, 0x4b55a0, 0x4a2e04, 0x47d010),
    }
}

fn macos_14_3() -> OffsetRecordSet {
    OffsetRecordSet {
        x86_64: record(0xd45d9, 0x54c660, 0x52c6a0, 0x53f990),
        arm64e: record(0xbd6f4, 0x4b54e0, 0x4a2d44, 0x47cf50),
    }
}

static BUILTIN: LazyLock<Catalogue> = LazyLock::new(|| {
    let mut entries = HashMap::new();
    let mut add = |hash: &str, set: OffsetRecordSet| {
        entries.insert(hash.to_string(), set);
    };

    // macOS 11.5.1
    add(
        "e9ae1e7f0ef671269bc0b5f3e6791472665c7d17f8e3a3aead6276d15589cd4f",
        macos_11_7_7(),
    );
    // macOS 11.6.1
    add(
        "f3467734b116f78c22cbe43217d7a337d3cf4dbbc58c0dde81f90dfa19d22e91",
        macos_11_7_7(),
    );
    // macOS 11.7.7
    add(
        "80107d249088d9762ec38c8f86d6797b5070d476377e7c5ddacf83ad32d00a1e",
        macos_11_7_7(),
    );
    // macOS 12.6.3
    add(
        "6e8caf477c2b4d3a56a91835a2b6455f36fb0feb13006def7516ac09578c67d0",
        OffsetRecordSet::default(),
    );
    // macOS 12.7.1
    add(
        "5833338da6350266eda33f5501c5dfc793e0632b52883aa2389c438c02d03718",
        macos_12_7_1(),
    );
    // macOS 13.2.1
    add(
        "4d96de9438fdea5b0b7121e485541ecf0a74489eeb330c151a7d44d289dd3a85",
        OffsetRecordSet::default(),
    );
    // macOS 13.3.1
    add(
        "3c8357aaa1df1eb3a21d88182a1a0fca1c612a4d63592e022ca65bbf47deee35",
        macos_13_3_1(),
    );
    // macOS 13.5 - 13.6
    add(
        "fff8db27fef2a2b874f7bc6fb303a98e3e3b8aceb8dd4c5bfa2bad7b76ea438a",
        macos_13_6(),
    );
    // macOS 13.6.3
    add(
        "2c674438d30bf489695f2d1b8520afc30cbfb183af82d2fc53d74ce39a25b24e",
        macos_13_6(),
    );
    // macOS 14.0
    add(
        "9ffda11206ef874b1e6cb1d8f8fed330d2ac2cbbc87afc15485f4e4371afcd9a",
        macos_14_0(),
    );
    // macOS 14.1 - 14.1.2
    add(
        "2483dc690217e959d386ae4573bacb8d669f3c0a666b1874ebfcb8131a9c18d7",
        macos_14_1(),
    );
    // macOS 14.1.2 (M3 only)
    add(
        "47aa51e63ced0bb00dd27dab0def6f065a1a4911e250b79761681865fbd03644",
        macos_14_1(),
    );
    // macOS 14.2
    add(
        "034fc179e1cce559931a8e46866f54154cb1c5413902319473537527a2702b64",
        macos_14_2(),
    );
    // macOS 14.3
    add(
        "5b50140c83131b4f4bc32f5eb0679cf0763d41d3bfc4cc1c7a67e9c95779dc24",
        macos_14_3(),
    );

    Catalogue { entries }
});
