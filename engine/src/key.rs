//! Key validation.
//!
//! Keys are opaque to kvsync, but both sides agree on what a well-formed key
//! is so that a client can reject a bad write synchronously instead of
//! learning about it from the server.

use crate::error::{Error, Result};

/// Default upper bound on key length, in bytes.
pub const DEFAULT_MAX_KEY_LEN: usize = 512;

/// Check that `key` is non-empty, at most `max_len` bytes and free of control
/// characters.
pub fn validate_key(key: &str, max_len: usize) -> Result<()> {
    if key.is_empty() {
        return Err(Error::InvalidKey("key must not be empty".to_string()));
    }

    if key.len() > max_len {
        return Err(Error::InvalidKey(format!(
            "key is {} bytes, maximum is {}",
            key.len(),
            max_len
        )));
    }

    if key.chars().any(char::is_control) {
        return Err(Error::InvalidKey(
            "key must not contain control characters".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_ordinary_keys() {
        assert!(validate_key("theme", DEFAULT_MAX_KEY_LEN).is_ok());
        assert!(validate_key("chart_settings", DEFAULT_MAX_KEY_LEN).is_ok());
        assert!(validate_key("user:42/weights", DEFAULT_MAX_KEY_LEN).is_ok());
        assert!(validate_key("日本語", DEFAULT_MAX_KEY_LEN).is_ok());
    }

    #[test]
    fn rejects_empty_key() {
        let err = validate_key("", DEFAULT_MAX_KEY_LEN).unwrap_err();
        assert!(matches!(err, Error::InvalidKey(_)));
    }

    #[test]
    fn rejects_overlong_key() {
        let key = "k".repeat(17);
        assert!(validate_key(&key, 16).is_err());
        assert!(validate_key(&key[..16], 16).is_ok());
    }

    #[test]
    fn rejects_control_characters() {
        assert!(validate_key("a\nb", DEFAULT_MAX_KEY_LEN).is_err());
        assert!(validate_key("null\0byte", DEFAULT_MAX_KEY_LEN).is_err());
    }
}
