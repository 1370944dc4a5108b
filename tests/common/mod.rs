use chrono::{TimeZone, Utc};
use lampstand::chat::{ChatController, ChatServices};
use lampstand::clock::ManualClock;
use lampstand::commands::Services;
use lampstand::completion::ScriptedCompletion;
use lampstand::config::Config;
use lampstand::identity::LocalIdentity;
use lampstand::store::SqliteStore;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

/// Services over a SQLite file in a fresh temp dir, with a manual clock
#[allow(dead_code)]
pub fn sqlite_services(config: &Config) -> (Services, ManualClock, TempDir) {
    let tmp = TempDir::new().expect("failed to create tempdir");
    let store = SqliteStore::new_with_path(tmp.path().join("lampstand.db"))
        .expect("failed to create sqlite store with path");
    let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap());
    let services = Services::with_store(config, Arc::new(store), Arc::new(clock.clone()));
    (services, clock, tmp)
}

/// A controller for `user_id` answering from a script
#[allow(dead_code)]
pub fn controller(
    services: &Services,
    config: &Config,
    user_id: &str,
) -> (ChatController, Arc<ScriptedCompletion>) {
    let completion = Arc::new(ScriptedCompletion::new());
    let controller = ChatController::new(
        ChatServices {
            identity: Arc::new(LocalIdentity::new(Some(user_id.to_string()))),
            ledger: services.ledger.clone(),
            sessions: services.sessions.clone(),
            entitlements: services.entitlements.clone(),
            completion: completion.clone(),
        },
        config.chat.clone(),
    );
    (controller, completion)
}

#[allow(dead_code)]
pub fn temp_config_file(contents: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("failed to create tempdir");
    let config_path = temp_dir.path().join("config.yaml");
    fs::write(&config_path, contents).expect("failed to write config file");
    (temp_dir, config_path)
}
