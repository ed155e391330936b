//! Opaque session token generation.

use anyhow::{anyhow, Context, Result};
use base64ct::{Base64UrlUnpadded, Encoding};
use rand::{rngs::OsRng, RngCore};

/// Tokens shorter than 128 bits of entropy are refused.
pub const MIN_TOKEN_BYTES: usize = 16;

/// Create a new session token from `byte_length` bytes of OS randomness,
/// encoded as unpadded base64url.
pub fn generate_token(byte_length: usize) -> Result<String> {
    if byte_length < MIN_TOKEN_BYTES {
        return Err(anyhow!(
            "token length {byte_length} is below the {MIN_TOKEN_BYTES} byte minimum"
        ));
    }
    let mut bytes = vec![0u8; byte_length];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate session token")?;
    Ok(Base64UrlUnpadded::encode_string(&bytes))
}

/// Whether `token` could have been produced by [`generate_token`].
///
/// Checked before any store lookup so a crafted value never reaches a key
/// pattern.
pub fn is_well_formed(token: &str) -> bool {
    !token.is_empty()
        && token.len() <= 256
        && token
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_token_round_trip() {
        let decoded_len = generate_token(32)
            .ok()
            .and_then(|token| Base64UrlUnpadded::decode_vec(&token).ok())
            .map(|bytes| bytes.len());
        assert_eq!(decoded_len, Some(32));
    }

    #[test]
    fn generate_token_is_url_safe() -> Result<()> {
        let token = generate_token(64)?;
        assert!(is_well_formed(&token));
        assert!(!token.contains('='));
        Ok(())
    }

    #[test]
    fn generate_token_rejects_short_lengths() {
        assert!(generate_token(8).is_err());
    }

    #[test]
    fn generate_token_differs_between_calls() -> Result<()> {
        assert_ne!(generate_token(32)?, generate_token(32)?);
        Ok(())
    }

    #[test]
    fn is_well_formed_rejects_pattern_characters() {
        assert!(!is_well_formed(""));
        assert!(!is_well_formed("abc*"));
        assert!(!is_well_formed("abc:def"));
        assert!(!is_well_formed("abc%"));
        assert!(is_well_formed("abc-DEF_123"));
    }
}
