//! Standalone offset discovery: prints architecture info, signature
//! matches and derived offsets for a binary on disk.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use validata_core::macho;
use validata_core::offsets;
use validata_core::scan::library;

pub fn run(path: &Path) -> Result<()> {
    let data =
        fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let slices = macho::read_architectures(&data)?;

    println!("-= Universal Binary Sections =-");
    for (index, slice) in &slices {
        println!("Architecture {index} ({}):", slice.name);
        println!("  CPU Type: {} ({:#x})", slice.cpu_type, slice.cpu_type);
        println!("  CPU Subtype: {} ({:#x})", slice.cpu_subtype, slice.cpu_subtype);
        println!(
            "  CPU Subtype Capability: {} ({:#x})",
            slice.cpu_subtype_caps, slice.cpu_subtype_caps
        );
        println!(
            "  Offset: {:#x} (valid Mach-O header: {})",
            slice.offset, slice.header_valid
        );
        println!("  Size: {}", slice.size);
        println!("  Align: {}", slice.align);
    }

    let results = offsets::scan_architectures(&data, &slices)?;

    println!();
    println!("-= Signature Matches =-");
    for (index, arch_results) in &results {
        println!("Architecture {index} ({}):", slices[index].name);
        for label in library::PATTERN_LABELS {
            match arch_results.get(label) {
                Some(matches) if !matches.is_empty() => {
                    let rendered: Vec<String> =
                        matches.iter().map(|offset| format!("{offset:#x}")).collect();
                    println!("  {label}: {}", rendered.join("; "));
                }
                _ => println!("  {label}: no matches"),
            }
        }
    }

    let set = offsets::records_from_scan(&slices, &results);

    println!();
    println!("-= Derived Offsets =-");
    for (arch, record) in [("x86_64", &set.x86_64), ("arm64e", &set.arm64e)] {
        if record.is_populated() {
            println!(
                "{arch}: reference {:#x}, init {:#x}, key establishment {:#x}, sign {:#x}",
                record.reference_addr,
                record.init_addr,
                record.key_establishment_addr,
                record.sign_addr
            );
        } else {
            println!("{arch}: incomplete (not all patterns matched)");
        }
    }

    Ok(())
}
