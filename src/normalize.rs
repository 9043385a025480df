// 🔤 Match-Key Normalizer - Company names → canonical lookup keys
//
// Imported rows and stored accounts spell the same company differently
// ("Acme Inc", "ACME INC ", "acme  inc"). Matching happens on a normalized
// key; display casing is preserved separately (first-seen casing wins for
// auto-created records).

/// Normalize a free-text entity name into a match key.
///
/// Lowercases, trims, and collapses internal whitespace runs to a single
/// space. Idempotent and total: empty or whitespace-only input maps to the
/// empty key, which downstream code treats as unmatchable.
pub fn normalize_key(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// True when a name produces no usable match key.
pub fn is_unmatchable(name: &str) -> bool {
    normalize_key(name).is_empty()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lowercases_and_trims() {
        assert_eq!(normalize_key("  Acme Inc "), "acme inc");
        assert_eq!(normalize_key("ACME INC"), "acme inc");
    }

    #[test]
    fn test_collapses_internal_whitespace() {
        assert_eq!(normalize_key("Acme\t  Inc"), "acme inc");
        assert_eq!(normalize_key("Acme \n Inc"), "acme inc");
    }

    #[test]
    fn test_idempotent() {
        let names = ["Acme Inc", "  MERIDIAN Health  ", "", "a", "Über GmbH"];
        for name in names {
            let once = normalize_key(name);
            assert_eq!(normalize_key(&once), once, "not idempotent for {:?}", name);
        }
    }

    #[test]
    fn test_empty_is_unmatchable() {
        assert!(is_unmatchable(""));
        assert!(is_unmatchable("   \t "));
        assert!(!is_unmatchable("Acme"));
    }
}
