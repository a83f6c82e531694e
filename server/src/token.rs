//! Share token generation and shape validation.

use rand::Rng;

/// Length of a share token. 22 base62 characters carry ~131 bits.
pub const TOKEN_LEN: usize = 22;

const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Generate a fresh, unguessable share token from the thread-local CSPRNG.
pub fn generate_token() -> String {
    let mut rng = rand::rng();
    (0..TOKEN_LEN)
        .map(|_| {
            let idx = rng.random_range(0..CHARSET.len());
            CHARSET[idx] as char
        })
        .collect()
}

/// Whether `token` could have been produced by [`generate_token`].
///
/// Lets the download path reject garbage before touching storage.
pub fn is_well_formed(token: &str) -> bool {
    token.len() == TOKEN_LEN && token.bytes().all(|b| b.is_ascii_alphanumeric())
}
