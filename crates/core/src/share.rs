//! Share-code and OTP generation.

use rand::{Rng, RngCore};

/// Alphabet for public share codes. Base62 keeps codes URL-safe without
/// escaping while staying dense enough that 12 characters (~71 bits) make
/// brute-forcing a live code infeasible within its lifetime.
pub const SHARE_CODE_ALPHABET: &[u8; 62] =
    b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Generate a random share code of `length` base62 characters.
///
/// Uniqueness is not guaranteed here; callers must collision-check against
/// the store and retry.
pub fn generate_share_code(length: usize) -> String {
    let mut bytes = vec![0u8; length];
    rand::rng().fill_bytes(&mut bytes);
    bytes
        .iter()
        .map(|b| SHARE_CODE_ALPHABET[(b % 62) as usize] as char)
        .collect()
}

/// Generate a 6-digit numeric OTP, zero-padded.
pub fn generate_otp() -> String {
    let code: u32 = rand::rng().random_range(0..1_000_000);
    format!("{code:06}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn share_code_has_requested_length_and_alphabet() {
        let code = generate_share_code(crate::SHARE_CODE_LENGTH);
        assert_eq!(code.len(), crate::SHARE_CODE_LENGTH);
        assert!(code.bytes().all(|b| SHARE_CODE_ALPHABET.contains(&b)));
    }

    #[test]
    fn share_codes_do_not_collide_in_bulk() {
        // 10k draws from a 62^12 space; any collision here means the
        // generator is broken, not unlucky.
        let codes: HashSet<String> = (0..10_000)
            .map(|_| generate_share_code(crate::SHARE_CODE_LENGTH))
            .collect();
        assert_eq!(codes.len(), 10_000);
    }

    #[test]
    fn otp_is_six_digits() {
        for _ in 0..100 {
            let otp = generate_otp();
            assert_eq!(otp.len(), 6);
            assert!(otp.bytes().all(|b| b.is_ascii_digit()));
        }
    }
}
