//! API key lookup for the completion endpoint
//!
//! The key comes from `LAMPSTAND_API_KEY` when set, otherwise from the OS
//! keyring under the `lampstand` service.

use crate::error::{LampstandError, Result};

/// Environment variable holding the completion API key
pub const API_KEY_ENV: &str = "LAMPSTAND_API_KEY";

const SERVICE: &str = "lampstand";
const ACCOUNT: &str = "completion-api-key";

fn entry() -> Result<keyring::Entry> {
    keyring::Entry::new(SERVICE, ACCOUNT).map_err(|e| LampstandError::Keyring(e).into())
}

/// Finds the API key, if one is configured
///
/// A keyring that cannot be reached is logged and treated as "no key", so
/// endpoints without authentication keep working on headless machines.
pub fn resolve_api_key() -> Result<Option<String>> {
    if let Ok(key) = std::env::var(API_KEY_ENV) {
        let key = key.trim();
        if !key.is_empty() {
            tracing::debug!("Using API key from {}", API_KEY_ENV);
            return Ok(Some(key.to_string()));
        }
    }

    let entry = match entry() {
        Ok(entry) => entry,
        Err(e) => {
            tracing::warn!("Keyring unavailable: {}", e);
            return Ok(None);
        }
    };
    match entry.get_password() {
        Ok(key) => Ok(Some(key)),
        Err(keyring::Error::NoEntry) => Ok(None),
        Err(e) => {
            tracing::warn!("Could not read API key from keyring: {}", e);
            Ok(None)
        }
    }
}

/// Stores the API key in the OS keyring
///
/// # Errors
///
/// Returns `LampstandError::Credentials` for a blank key or when the
/// keyring rejects the write.
pub fn store_api_key(key: &str) -> Result<()> {
    let key = key.trim();
    if key.is_empty() {
        return Err(LampstandError::Credentials("API key cannot be empty".to_string()).into());
    }
    entry()?.set_password(key).map_err(|e| {
        LampstandError::Credentials(format!("could not store API key in keyring: {}", e))
    })?;
    tracing::info!("Stored API key in keyring");
    Ok(())
}

/// Removes the stored API key; succeeds when none was stored
pub fn clear_api_key() -> Result<()> {
    match entry()?.delete_password() {
        Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
        Err(e) => Err(LampstandError::Credentials(format!(
            "could not remove API key from keyring: {}",
            e
        ))
        .into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::kind_of;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_env_var_takes_precedence() {
        std::env::set_var(API_KEY_ENV, "  sk-test  ");
        let key = resolve_api_key().unwrap();
        std::env::remove_var(API_KEY_ENV);
        assert_eq!(key.as_deref(), Some("sk-test"));
    }

    #[test]
    fn test_blank_key_is_rejected() {
        let err = store_api_key("   ").unwrap_err();
        assert!(matches!(kind_of(&err), Some(LampstandError::Credentials(_))));
        assert!(err.to_string().contains("cannot be empty"));
    }
}
