use serde::Deserialize;
use std::path::PathBuf;

/// Where the in-memory grant store loads its data from and writes it back to.
#[derive(Debug, Deserialize, Clone, Default)]
#[allow(unused)]
#[readonly::make]
pub struct StoreSettings {
    /// YAML seed with users, services, roles, grants and assignments.
    pub seed_path: Option<PathBuf>,
    /// Rewritten after every committed write. Takes precedence over the
    /// seed once it exists.
    pub snapshot_path: Option<PathBuf>,
}
