//! Test utilities for Lampstand
//!
//! This module provides common test fixtures: temporary directories, a
//! fixed clock, store-backed services and assertion helpers.

use crate::clock::ManualClock;
use crate::commands::Services;
use crate::config::Config;
use crate::store::MemoryStore;
use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;
use tempfile::TempDir;

/// Create a temporary directory for testing
///
/// # Returns
///
/// Returns a TempDir that will be cleaned up when dropped
pub fn temp_dir() -> TempDir {
    TempDir::new().expect("Failed to create temporary directory")
}

/// A fixed instant for deterministic tests (2024-05-02 12:00 UTC)
pub fn test_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 2, 12, 0, 0).unwrap()
}

/// Services on a fresh in-memory store with a manual clock
///
/// The returned clock shares its instant with the one inside the services.
pub fn memory_services() -> (Services, ManualClock) {
    let clock = ManualClock::new(test_time());
    let services = Services::with_store(
        &Config::default(),
        Arc::new(MemoryStore::new()),
        Arc::new(clock.clone()),
    );
    (services, clock)
}

/// Assert that an error contains the expected message
///
/// # Panics
///
/// Panics if the result is Ok or if the error doesn't contain the expected message
pub fn assert_error_contains<T: std::fmt::Debug>(result: crate::error::Result<T>, expected: &str) {
    match result {
        Ok(value) => panic!("Expected error containing '{}', got Ok({:?})", expected, value),
        Err(e) => {
            let msg = e.to_string();
            assert!(
                msg.contains(expected),
                "Error message '{}' does not contain '{}'",
                msg,
                expected
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LampstandError;

    #[test]
    fn test_temp_dir_creation() {
        let dir = temp_dir();
        assert!(dir.path().exists());
    }

    #[test]
    fn test_memory_services_share_clock() {
        let (services, clock) = memory_services();
        clock.advance(chrono::Duration::hours(1));
        assert_eq!(services.clock.now(), test_time() + chrono::Duration::hours(1));
    }

    #[test]
    fn test_assert_error_contains_success() {
        let result: crate::error::Result<()> =
            Err(LampstandError::Config("invalid value".to_string()).into());
        assert_error_contains(result, "invalid");
    }

    #[test]
    #[should_panic(expected = "Expected error")]
    fn test_assert_error_contains_with_ok() {
        assert_error_contains(Ok::<_, anyhow::Error>(()), "anything");
    }
}
