//! One-time verification codes
use rand::Rng;

/// Number of digits in a code
pub const OTP_LENGTH: usize = 6;

/// Generate a 6-digit numeric code (never has a leading zero)
pub fn generate_code() -> String {
    rand::rng().random_range(100_000..=999_999u32).to_string()
}

/// Whether a presented code has the expected shape
pub fn is_well_formed(code: &str) -> bool {
    code.len() == OTP_LENGTH && code.bytes().all(|b| b.is_ascii_digit())
}

/// Compare two codes without early exit on the first mismatching byte
pub fn codes_match(expected: &str, presented: &str) -> bool {
    if expected.len() != presented.len() {
        return false;
    }
    expected
        .bytes()
        .zip(presented.bytes())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}
