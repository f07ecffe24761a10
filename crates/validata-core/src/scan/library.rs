//! Builtin signature patterns for the NAC entry points.
//!
//! Each pattern is a function prologue captured from a known
//! identityservicesd revision, with `..` wildcards over the bytes that
//! drift between revisions (immediates, displacements, pointer-auth
//! material). The fixed prefixes are long enough that anchor-granular
//! scanning cannot self-overlap in practice.

/// Exported symbol used to recover the image base after dlopen.
pub const REFERENCE_SYMBOL: &str = "IDSProtoKeyTransparencyTrustedServiceReadFrom";

pub const REFERENCE_ADDRESS: &str = "ReferenceAddress";
pub const NAC_INIT_ADDRESS: &str = "NACInitAddress";
pub const NAC_KEY_ESTABLISHMENT_ADDRESS: &str = "NACKeyEstablishmentAddress";
pub const NAC_SIGN_ADDRESS: &str = "NACSignAddress";

/// The four labels every architecture must resolve.
pub const PATTERN_LABELS: [&str; 4] = [
    REFERENCE_ADDRESS,
    NAC_INIT_ADDRESS,
    NAC_KEY_ESTABLISHMENT_ADDRESS,
    NAC_SIGN_ADDRESS,
];

static X86_64_PATTERNS: &[(&str, &str)] = &[
    (
        REFERENCE_ADDRESS,
        "554889e54157415641554154534883ec28..89..48897dd04c8b3d",
    ),
    (NAC_INIT_ADDRESS, "554889e541574156415541545350b87818"),
    (
        NAC_KEY_ESTABLISHMENT_ADDRESS,
        "554889e54157415641554154534881ec..010000488b05......00488b00488945d04885",
    ),
    (
        NAC_SIGN_ADDRESS,
        "554889e54157415641554154534881ec..030000........................................................................................................................................................................................48....48..........................................................................................................89............................................................",
    ),
];

static ARM64E_PATTERNS: &[(&str, &str)] = &[
    (
        REFERENCE_ADDRESS,
        "7f2303d5ffc301d1fc6f01a9fa6702a9f85f03a9f65704a9f44f05a9fd7b06a9fd830191f30301aa....00........f9..0280b9..68..f8....00........f9....80b9..68..f8....00........f9..01..eb....0054f40300aa............................................................................................................................80b96d6a6df89f010deb....0054..0380b96d6a6df8................................................",
    ),
    (
        NAC_INIT_ADDRESS,
        "7f2303d5fc6fbaa9fa6701a9f85f02a9f65703a9f44f04a9fd7b05a9fd43019109..8352....00..10....f91f0a3fd6ff0740d1ff....d1....00..08....f9080140f9a8....f8......d2......f2......f2......f2e9",
    ),
    (
        NAC_KEY_ESTABLISHMENT_ADDRESS,
        "7f2303d5ff....d1fc6f..a9fa67..a9f85f..a9f657..a9f44f..a9fd7b..a9fd..0591....00..08....f9080140f9a8....f8......52",
    ),
    (
        NAC_SIGN_ADDRESS,
        "7f2303d5fc6fbaa9fa6701a9f85f02a9f65703a9f44f04a9fd7b05a9fd430191ff....d1................08....f9......................................................................................................................................f2......f2......................d2",
    ),
];

/// Builtin patterns for an architecture, if any are catalogued for it.
pub fn builtin_patterns(arch: &str) -> Option<&'static [(&'static str, &'static str)]> {
    match arch {
        "x86_64" => Some(X86_64_PATTERNS),
        "arm64e" => Some(ARM64E_PATTERNS),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_cover_every_builtin_entry() {
        for arch in ["x86_64", "arm64e"] {
            let patterns = builtin_patterns(arch).unwrap();
            for (label, _) in patterns {
                assert!(PATTERN_LABELS.contains(label));
            }
        }
    }

    #[test]
    fn test_unknown_architecture_has_no_patterns() {
        assert!(builtin_patterns("i386").is_none());
    }
}
