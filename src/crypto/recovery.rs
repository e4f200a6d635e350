//! Recovery codes.
//!
//! A recovery code is 16 characters drawn from a 32-symbol alphabet with
//! the easily confused glyphs (`0 O 1 I`) removed, giving 80 bits of
//! entropy.  It is shown to the operator once and never stored.

use rand::Rng;
use zeroize::Zeroizing;

/// Number of characters in a recovery code.
pub const RECOVERY_CODE_LEN: usize = 16;

const ALPHABET: &[u8; 32] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Generate a fresh recovery code.
pub fn generate_recovery_code() -> Zeroizing<String> {
    let mut rng = rand::rng();
    let code: String = (0..RECOVERY_CODE_LEN)
        .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char)
        .collect();
    Zeroizing::new(code)
}

/// Normalize operator input before key derivation.
///
/// Surrounding whitespace, inner spaces and hyphens are dropped and the
/// code is upper-cased, so `abcd-efgh jkmn-pqrs` matches `ABCDEFGHJKMNPQRS`.
pub fn normalize_recovery_code(input: &str) -> Zeroizing<String> {
    Zeroizing::new(
        input
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '-')
            .flat_map(char::to_uppercase)
            .collect(),
    )
}

/// Format a code in groups of four for display (`ABCD-EFGH-JKMN-PQRS`).
pub fn display_grouped(code: &str) -> String {
    code.as_bytes()
        .chunks(4)
        .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
        .collect::<Vec<_>>()
        .join("-")
}
