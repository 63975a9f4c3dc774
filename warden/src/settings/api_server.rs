use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
#[allow(unused)]
#[readonly::make]
pub struct ApiServer {
    pub bind_address: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Token identifier mapped to the secret a caller presents.
    #[serde(default)]
    pub bearer_tokens: HashMap<String, String>,
}

fn default_request_timeout_ms() -> u64 {
    5_000
}

impl ApiServer {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for ApiServer {
    fn default() -> Self {
        ApiServer {
            bind_address: "0.0.0.0:21450".to_string(),
            request_timeout_ms: default_request_timeout_ms(),
            bearer_tokens: HashMap::new(),
        }
    }
}
