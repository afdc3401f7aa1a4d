pub mod address;
pub mod cleaning;
pub mod dates;
pub mod kana;

use unicode_normalization::UnicodeNormalization;

pub use cleaning::{SourceCleaner, SourceInput, SourceTable, TableOrigin};

/// Trait for canonicalizing free-text values into a comparable form
pub trait Normalizer {
    fn normalize(&self, raw: &str) -> String;
}

/// Canonicalizes raw Japanese addresses so that the same location written
/// in different styles compares equal.
///
/// Steps run in a fixed order: compatibility folding (NFKC), full-width
/// digits, half-width kana with voicing marks, standalone ノ/ケ/ツ, then the
/// structural rewrite in [`address::rewrite_address`]. Every step is
/// idempotent on its own output. Blank input is returned unchanged and no
/// input can make the transform fail.
#[derive(Debug, Clone, Copy, Default)]
pub struct AddressNormalizer;

impl AddressNormalizer {
    pub fn new() -> Self {
        Self
    }
}

impl Normalizer for AddressNormalizer {
    fn normalize(&self, raw: &str) -> String {
        if raw.trim().is_empty() {
            return raw.to_string();
        }
        let folded: String = raw.nfkc().collect();
        let folded = kana::fullwidth_digits_to_halfwidth(&folded);
        let folded = kana::halfwidth_kana_to_fullwidth(&folded);
        let folded = kana::disambiguate_standalone_kana(&folded);
        let rewritten = address::rewrite_address(&folded);
        // whitespace removal can leave a combining mark next to its base
        rewritten.nfc().collect()
    }
}
