//! Shared helpers for the API unit tests.

use crate::app_state::{AppState, SharedAppState};
use crate::settings::config::Settings;
use crate::stop_flag::StopFlag;
use config::Config;
use std::sync::Arc;
use warden_core::store::snapshot::SnapshotManager;
use warden_core::InMemoryGrantStore;

pub fn load_test_settings(config_file: &str) -> Settings {
    Config::builder()
        .add_source(config::File::with_name(config_file))
        .build()
        .unwrap()
        .try_deserialize()
        .unwrap()
}

/// App state over an in-memory store loaded from `tests/test_seed.yaml`.
pub async fn create_test_app_state_with_config(config_file: &str) -> SharedAppState {
    let settings = load_test_settings(config_file);
    let snapshot = SnapshotManager::load(std::path::Path::new("tests/test_seed.yaml"))
        .await
        .unwrap();
    let store = InMemoryGrantStore::from_snapshot(snapshot).unwrap();
    AppState::with_store(settings, StopFlag::new(), Arc::new(store))
}
