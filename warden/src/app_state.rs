use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use warden_core::{AuthorizationFacade, GrantStore, InMemoryGrantStore, RequestContext};

use crate::settings::config::Settings;
use crate::stop_flag;

pub struct AppState {
    pub settings: Settings,
    pub stop_flag: stop_flag::StopFlag,
    pub authz: AuthorizationFacade,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("settings", &self.settings)
            .field("stop_flag", &self.stop_flag)
            .finish_non_exhaustive()
    }
}

pub type SharedAppState = Arc<AppState>;

impl AppState {
    pub async fn new(settings: Settings) -> anyhow::Result<SharedAppState> {
        let stop_flag = stop_flag::StopFlag::new();
        stop_flag::register_signal_handler(&stop_flag);

        let store = InMemoryGrantStore::open(
            settings.store.seed_path.as_deref(),
            settings.store.snapshot_path.as_deref(),
        )
        .await
        .context("Failed to open grant store")?;
        info!("Grant store ready");

        Ok(Self::with_store(settings, stop_flag, Arc::new(store)))
    }

    pub fn with_store(
        settings: Settings,
        stop_flag: stop_flag::StopFlag,
        store: Arc<dyn GrantStore>,
    ) -> SharedAppState {
        Arc::new(AppState {
            settings,
            stop_flag,
            authz: AuthorizationFacade::new(store),
        })
    }

    /// Context for one request: cancelled on shutdown or after the
    /// configured request timeout.
    pub fn request_context(&self) -> RequestContext {
        RequestContext::new(self.stop_flag.child_token())
            .with_timeout(self.settings.api.request_timeout())
    }
}
