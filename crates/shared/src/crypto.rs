//! Random identifiers and download tokens.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::{rngs::OsRng, RngCore};

/// Number of random bytes in a download token (256 bits).
pub const DOWNLOAD_TOKEN_BYTES: usize = 32;

/// Length of a hex-encoded download token.
pub const DOWNLOAD_TOKEN_LEN: usize = DOWNLOAD_TOKEN_BYTES * 2;

/// Prefix for generated job identifiers.
pub const JOB_ID_PREFIX: &str = "export_";

/// Maximum accepted length for a job identifier.
pub const MAX_JOB_ID_LEN: usize = 64;

/// Generates a new download token from the operating system CSPRNG.
///
/// The token is 32 random bytes, hex encoded (64 lowercase characters).
pub fn generate_download_token() -> String {
    let mut bytes = [0u8; DOWNLOAD_TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Returns true if `token` has the shape of a download token.
///
/// Used to reject garbage before touching the store.
pub fn is_well_formed_token(token: &str) -> bool {
    token.len() == DOWNLOAD_TOKEN_LEN && token.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Generates a unique, URL and filename safe job identifier (`export_<random>`).
pub fn generate_job_id() -> String {
    let mut bytes = [0u8; 12];
    OsRng.fill_bytes(&mut bytes);
    format!("{}{}", JOB_ID_PREFIX, URL_SAFE_NO_PAD.encode(bytes))
}

/// Returns true if `id` only contains characters safe to embed in a file name.
pub fn is_safe_identifier(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_JOB_ID_LEN
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
