use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

use crate::model::{GrantFlags, GrantId, RoleId, ServiceId, UserId};

/// On-disk YAML layout of the in-memory store, used both for seeding and
/// for persisting committed writes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    #[serde(default)]
    pub users: Vec<UserId>,
    #[serde(default)]
    pub services: Vec<NamedRecord>,
    #[serde(default)]
    pub roles: Vec<NamedRecord>,
    #[serde(default)]
    pub grants: Vec<GrantRecord>,
    #[serde(default)]
    pub assignments: Vec<AssignmentRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedRecord {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantRecord {
    pub id: GrantId,
    pub role: RoleId,
    pub service: ServiceId,
    #[serde(default)]
    pub read: bool,
    #[serde(default)]
    pub write: bool,
    #[serde(default)]
    pub manage: bool,
}

impl GrantRecord {
    pub fn flags(&self) -> GrantFlags {
        GrantFlags::new(self.read, self.write, self.manage)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentRecord {
    pub user: UserId,
    pub roles: Vec<RoleId>,
}

pub struct SnapshotManager;

impl SnapshotManager {
    /// Load a snapshot from YAML. A missing file yields an empty snapshot.
    pub async fn load(path: &Path) -> Result<StoreSnapshot> {
        if !path.exists() {
            warn!(
                "Grant store snapshot not found at {}, starting empty",
                path.display()
            );
            return Ok(StoreSnapshot::default());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read grant store snapshot {}", path.display()))?;

        serde_norway::from_str(&content)
            .with_context(|| format!("Failed to parse grant store snapshot {}", path.display()))
    }

    pub async fn save(snapshot: &StoreSnapshot, path: &Path) -> Result<()> {
        let yaml = serde_norway::to_string(snapshot)?;
        let tmp_path = path.with_extension("yaml.tmp");
        tokio::fs::write(&tmp_path, yaml)
            .await
            .context("Failed to write grant store snapshot")?;
        tokio::fs::rename(&tmp_path, path)
            .await
            .context("Failed to replace grant store snapshot")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEED: &str = r#"
users: [1, 5]
services:
  - id: 1
    name: Billing
  - id: 2
    name: storage
roles:
  - id: 1
    name: admin
grants:
  - id: 1
    role: 1
    service: 1
    read: true
    manage: true
assignments:
  - user: 5
    roles: [1]
"#;

    #[test]
    fn test_parse_seed() {
        let snapshot: StoreSnapshot = serde_norway::from_str(SEED).unwrap();

        assert_eq!(snapshot.users, vec![UserId(1), UserId(5)]);
        assert_eq!(snapshot.services.len(), 2);
        assert_eq!(snapshot.grants[0].flags(), GrantFlags::new(true, false, true));
        assert_eq!(snapshot.assignments[0].roles, vec![RoleId(1)]);
    }

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = SnapshotManager::load(&dir.path().join("absent.yaml"))
            .await
            .unwrap();
        assert_eq!(snapshot, StoreSnapshot::default());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grants.yaml");
        let snapshot: StoreSnapshot = serde_norway::from_str(SEED).unwrap();

        SnapshotManager::save(&snapshot, &path).await.unwrap();
        let loaded = SnapshotManager::load(&path).await.unwrap();

        assert_eq!(loaded, snapshot);
    }
}
