//! Cache key validation and matching.

use stowaway_core::{Error, Result};

/// Longest accepted key, in characters.
pub const MAX_KEY_LENGTH: usize = 512;

/// Most keys a restore may look up (primary plus restore keys).
pub const MAX_KEY_COUNT: usize = 10;

/// Reject an empty path set.
pub fn validate_paths<P>(paths: &[P]) -> Result<()> {
    if paths.is_empty() {
        return Err(Error::Validation(
            "Path Validation Error: At least one directory or file path is required".into(),
        ));
    }
    Ok(())
}

/// Reject keys that are too long or contain a comma.
pub fn validate_key(key: &str) -> Result<()> {
    if key.chars().count() > MAX_KEY_LENGTH {
        return Err(Error::Validation(format!(
            "Key Validation Error: {} cannot be larger than {} characters.",
            key, MAX_KEY_LENGTH
        )));
    }
    if key.contains(',') {
        return Err(Error::Validation(format!(
            "Key Validation Error: {} cannot contain commas.",
            key
        )));
    }
    Ok(())
}

/// Ordered lookup keys: the primary key followed by restore keys.
///
/// Order is fallback priority. Every key has passed [`validate_key`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyList {
    keys: Vec<String>,
}

impl KeyList {
    /// Build and validate a key list. Blank restore keys are dropped.
    pub fn new(primary_key: &str, restore_keys: &[String]) -> Result<Self> {
        let mut keys = Vec::with_capacity(restore_keys.len() + 1);
        keys.push(primary_key.to_string());
        keys.extend(
            restore_keys
                .iter()
                .map(|k| k.trim())
                .filter(|k| !k.is_empty())
                .map(str::to_string),
        );

        if keys.len() > MAX_KEY_COUNT {
            return Err(Error::Validation(format!(
                "Key Validation Error: Keys are limited to a maximum of {}.",
                MAX_KEY_COUNT
            )));
        }
        for key in &keys {
            validate_key(key)?;
        }

        Ok(Self { keys })
    }

    pub fn primary(&self) -> &str {
        &self.keys[0]
    }

    pub fn as_slice(&self) -> &[String] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Whether `matched` is the primary key itself.
    pub fn is_exact_match(&self, matched: &str) -> bool {
        self.primary() == matched
    }
}

/// Check if a key matches a prefix pattern.
pub fn matches_prefix(key: &str, prefix: &str) -> bool {
    key.starts_with(prefix)
}

/// Sanitize a key for use in filenames.
pub fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            _ => c,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_at_limit_is_valid() {
        let key = "k".repeat(MAX_KEY_LENGTH);
        assert!(validate_key(&key).is_ok());
    }

    #[test]
    fn test_key_over_limit_is_rejected() {
        let key = "k".repeat(MAX_KEY_LENGTH + 1);
        assert!(matches!(validate_key(&key), Err(Error::Validation(_))));
    }

    #[test]
    fn test_key_with_comma_is_rejected() {
        assert!(matches!(
            validate_key("cargo,linux"),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_empty_paths_rejected() {
        let paths: Vec<String> = vec![];
        assert!(matches!(validate_paths(&paths), Err(Error::Validation(_))));
        assert!(validate_paths(&["dist"]).is_ok());
    }

    #[test]
    fn test_key_list_order_and_blanks() {
        let list = KeyList::new(
            "npm-linux-abc",
            &["npm-linux-".to_string(), "  ".to_string(), "npm-".to_string()],
        )
        .unwrap();
        assert_eq!(list.as_slice(), ["npm-linux-abc", "npm-linux-", "npm-"]);
        assert_eq!(list.primary(), "npm-linux-abc");
        assert!(list.is_exact_match("npm-linux-abc"));
        assert!(!list.is_exact_match("npm-linux-"));
    }

    #[test]
    fn test_key_list_limit() {
        let restore: Vec<String> = (0..9).map(|i| format!("k{}", i)).collect();
        assert!(KeyList::new("primary", &restore).is_ok());

        let restore: Vec<String> = (0..10).map(|i| format!("k{}", i)).collect();
        assert!(matches!(
            KeyList::new("primary", &restore),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_key_list_validates_restore_keys() {
        let result = KeyList::new("ok", &["bad,key".to_string()]);
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[test]
    fn test_matches_prefix() {
        assert!(matches_prefix("cargo-abc123", "cargo-"));
        assert!(matches_prefix("cargo-abc123", "cargo"));
        assert!(!matches_prefix("npm-abc123", "cargo-"));
    }

    #[test]
    fn test_sanitize_key() {
        assert_eq!(sanitize_key("my/cache/key"), "my_cache_key");
        assert_eq!(sanitize_key("cache:key"), "cache_key");
    }
}
