use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

use super::api_server::ApiServer;
use super::store::StoreSettings;

#[derive(Debug, Deserialize, Clone, Default)]
#[allow(unused)]
#[readonly::make]
pub struct Settings {
    #[serde(default)]
    pub debug: bool,
    pub api: ApiServer,
    #[serde(default)]
    pub store: StoreSettings,
}

impl Settings {
    pub fn get_environment() -> Environment {
        Environment::default()
            .prefix("WARDEN")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true)
    }

    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = env::var("WARDEN_RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            .set_default("api.bind_address", "0.0.0.0:21450")?
            .set_default("api.request_timeout_ms", 5_000u64)?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{run_mode}")).required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(Self::get_environment());

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.api.request_timeout_ms == 0 {
            return Err(ConfigError::Message(
                "api.request_timeout_ms must be greater than zero".into(),
            ));
        }
        if let Some((name, _)) = self
            .api
            .bearer_tokens
            .iter()
            .find(|(_, secret)| secret.trim().is_empty())
        {
            return Err(ConfigError::Message(format!(
                "Bearer token '{name}' has an empty secret"
            )));
        }
        Ok(())
    }
}
