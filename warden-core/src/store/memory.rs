use anyhow::Context;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::snapshot::{
    AssignmentRecord, GrantRecord, NamedRecord, SnapshotManager, StoreSnapshot,
};
use super::{GrantStore, UnitOfWork};
use crate::error::{StoreError, StoreResult};
use crate::model::{
    GrantFlags, GrantId, NewGrant, PermissionGrant, Role, RoleId, Service, ServiceId, UserId,
    UserRoleAssignment,
};

#[derive(Debug, Clone, Default)]
struct StoreState {
    users: BTreeSet<UserId>,
    services: BTreeMap<ServiceId, Service>,
    roles: BTreeMap<RoleId, Role>,
    grants: BTreeMap<GrantId, PermissionGrant>,
    assignments: BTreeSet<UserRoleAssignment>,
    next_role_id: i64,
    next_grant_id: i64,
}

impl StoreState {
    fn from_snapshot(snapshot: StoreSnapshot) -> StoreResult<Self> {
        let mut state = StoreState {
            users: snapshot.users.into_iter().collect(),
            ..Default::default()
        };

        for record in snapshot.services {
            let id = ServiceId(record.id);
            if state.services.contains_key(&id) {
                return Err(StoreError::UniqueViolation(format!("service id {}", id)));
            }
            if state.services.values().any(|s| s.name == record.name) {
                return Err(StoreError::UniqueViolation(format!(
                    "service name '{}'",
                    record.name
                )));
            }
            state.services.insert(
                id,
                Service {
                    id,
                    name: record.name,
                },
            );
        }

        for record in snapshot.roles {
            let id = RoleId(record.id);
            if state.roles.contains_key(&id) {
                return Err(StoreError::UniqueViolation(format!("role id {}", id)));
            }
            if state.roles.values().any(|r| r.name == record.name) {
                return Err(StoreError::UniqueViolation(format!(
                    "role name '{}'",
                    record.name
                )));
            }
            state.roles.insert(
                id,
                Role {
                    id,
                    name: record.name,
                },
            );
        }

        for record in snapshot.grants {
            if state.grants.contains_key(&record.id) {
                return Err(StoreError::UniqueViolation(format!("grant id {}", record.id)));
            }
            if state.find_grant(record.role, record.service).is_some() {
                return Err(StoreError::UniqueViolation(format!(
                    "grant for role {} and service {}",
                    record.role, record.service
                )));
            }
            if !state.roles.contains_key(&record.role)
                || !state.services.contains_key(&record.service)
            {
                return Err(StoreError::Inconsistent(format!(
                    "grant {} references an unknown role or service",
                    record.id
                )));
            }
            state.grants.insert(
                record.id,
                PermissionGrant {
                    id: record.id,
                    role_id: record.role,
                    service_id: record.service,
                    flags: record.flags(),
                },
            );
        }

        for record in snapshot.assignments {
            state.users.insert(record.user);
            for role_id in record.roles {
                if !state.roles.contains_key(&role_id) {
                    return Err(StoreError::Inconsistent(format!(
                        "user {} is assigned unknown role {}",
                        record.user, role_id
                    )));
                }
                state.assignments.insert(UserRoleAssignment {
                    user_id: record.user,
                    role_id,
                });
            }
        }

        state.next_role_id = state.roles.keys().map(|id| id.0).max().unwrap_or(0) + 1;
        state.next_grant_id = state.grants.keys().map(|id| id.0).max().unwrap_or(0) + 1;
        Ok(state)
    }

    fn to_snapshot(&self) -> StoreSnapshot {
        let mut assignments: BTreeMap<UserId, Vec<RoleId>> = BTreeMap::new();
        for assignment in &self.assignments {
            assignments
                .entry(assignment.user_id)
                .or_default()
                .push(assignment.role_id);
        }

        StoreSnapshot {
            users: self.users.iter().copied().collect(),
            services: self
                .services
                .values()
                .map(|s| NamedRecord {
                    id: s.id.0,
                    name: s.name.clone(),
                })
                .collect(),
            roles: self
                .roles
                .values()
                .map(|r| NamedRecord {
                    id: r.id.0,
                    name: r.name.clone(),
                })
                .collect(),
            grants: self
                .grants
                .values()
                .map(|g| GrantRecord {
                    id: g.id,
                    role: g.role_id,
                    service: g.service_id,
                    read: g.flags.can_read,
                    write: g.flags.can_write,
                    manage: g.flags.can_manage,
                })
                .collect(),
            assignments: assignments
                .into_iter()
                .map(|(user, roles)| AssignmentRecord { user, roles })
                .collect(),
        }
    }

    fn find_grant(&self, role_id: RoleId, service_id: ServiceId) -> Option<&PermissionGrant> {
        self.grants
            .values()
            .find(|g| g.role_id == role_id && g.service_id == service_id)
    }
}

/// Reference Grant Store keeping everything in process memory.
///
/// Every write runs under a single write lock, so readers observe either the
/// state before or after it. When a snapshot path is configured the write is
/// staged on a copy, the copy is written to the YAML file, and only then does
/// it replace the live state. A failed snapshot write leaves nothing applied.
#[derive(Clone)]
pub struct InMemoryGrantStore {
    state: Arc<RwLock<StoreState>>,
    snapshot_path: Option<PathBuf>,
    assignment_writes: Arc<AtomicU64>,
}

impl Default for InMemoryGrantStore {
    fn default() -> Self {
        Self {
            state: Arc::new(RwLock::new(StoreState {
                next_role_id: 1,
                next_grant_id: 1,
                ..Default::default()
            })),
            snapshot_path: None,
            assignment_writes: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl InMemoryGrantStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: StoreSnapshot) -> StoreResult<Self> {
        let state = StoreState::from_snapshot(snapshot)?;
        Ok(Self {
            state: Arc::new(RwLock::new(state)),
            ..Self::default()
        })
    }

    /// Load the seed file and keep persisting committed writes to `snapshot_path`.
    ///
    /// When the snapshot file already exists it takes precedence over the seed.
    pub async fn open(seed_path: Option<&Path>, snapshot_path: Option<&Path>) -> anyhow::Result<Self> {
        let source = match (snapshot_path, seed_path) {
            (Some(snapshot), _) if snapshot.exists() => Some(snapshot),
            (_, Some(seed)) => Some(seed),
            _ => None,
        };

        let snapshot = match source {
            Some(path) => SnapshotManager::load(path).await?,
            None => StoreSnapshot::default(),
        };

        let mut store = Self::from_snapshot(snapshot).context("Invalid grant store data")?;
        store.snapshot_path = snapshot_path.map(Path::to_path_buf);

        {
            let state = store.state.read().await;
            info!(
                "Grant store loaded with {} services, {} roles, {} grants, {} assignments",
                state.services.len(),
                state.roles.len(),
                state.grants.len(),
                state.assignments.len()
            );
        }

        Ok(store)
    }

    pub async fn add_user(&self, user_id: UserId) {
        self.state.write().await.users.insert(user_id);
    }

    pub async fn add_service(&self, id: ServiceId, name: &str) -> StoreResult<Service> {
        self.apply(|state| {
            if state.services.contains_key(&id) || state.services.values().any(|s| s.name == name)
            {
                return Err(StoreError::UniqueViolation(format!("service '{}'", name)));
            }
            let service = Service {
                id,
                name: name.to_string(),
            };
            state.services.insert(id, service.clone());
            Ok(service)
        })
        .await
    }

    /// Number of assignment rows inserted or deleted through committed units of work.
    pub fn assignment_writes(&self) -> u64 {
        self.assignment_writes.load(Ordering::SeqCst)
    }

    pub async fn snapshot(&self) -> StoreSnapshot {
        self.state.read().await.to_snapshot()
    }

    /// Run `write` against the state under the write lock and publish the
    /// result only once it is durable.
    async fn apply<T>(
        &self,
        write: impl FnOnce(&mut StoreState) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let mut state = self.state.write().await;
        let Some(path) = &self.snapshot_path else {
            return write(&mut *state);
        };

        let mut staged = state.clone();
        let result = write(&mut staged)?;
        SnapshotManager::save(&staged.to_snapshot(), path)
            .await
            .map_err(StoreError::Other)?;
        debug!("Grant store snapshot written to {}", path.display());
        *state = staged;
        Ok(result)
    }
}

#[async_trait]
impl GrantStore for InMemoryGrantStore {
    async fn user_exists(&self, user_id: UserId) -> StoreResult<bool> {
        Ok(self.state.read().await.users.contains(&user_id))
    }

    async fn list_roles(&self) -> StoreResult<Vec<Role>> {
        Ok(self.state.read().await.roles.values().cloned().collect())
    }

    async fn roles_by_ids(&self, ids: &[RoleId]) -> StoreResult<Vec<Role>> {
        let state = self.state.read().await;
        let wanted: BTreeSet<&RoleId> = ids.iter().collect();
        Ok(wanted
            .into_iter()
            .filter_map(|id| state.roles.get(id).cloned())
            .collect())
    }

    async fn find_role_by_name(&self, name: &str) -> StoreResult<Option<Role>> {
        let state = self.state.read().await;
        Ok(state.roles.values().find(|r| r.name == name).cloned())
    }

    async fn insert_role(&self, name: &str) -> StoreResult<Role> {
        self.apply(|state| {
            if state.roles.values().any(|r| r.name == name) {
                return Err(StoreError::UniqueViolation(format!("role name '{}'", name)));
            }
            let id = RoleId(state.next_role_id);
            state.next_role_id += 1;
            let role = Role {
                id,
                name: name.to_string(),
            };
            state.roles.insert(id, role.clone());
            Ok(role)
        })
        .await
    }

    async fn list_services(&self) -> StoreResult<Vec<Service>> {
        Ok(self.state.read().await.services.values().cloned().collect())
    }

    async fn services_by_ids(&self, ids: &[ServiceId]) -> StoreResult<Vec<Service>> {
        let state = self.state.read().await;
        let wanted: BTreeSet<&ServiceId> = ids.iter().collect();
        Ok(wanted
            .into_iter()
            .filter_map(|id| state.services.get(id).cloned())
            .collect())
    }

    async fn find_grant(
        &self,
        role_id: RoleId,
        service_id: ServiceId,
    ) -> StoreResult<Option<PermissionGrant>> {
        Ok(self.state.read().await.find_grant(role_id, service_id).copied())
    }

    async fn grants_for_roles(&self, role_ids: &[RoleId]) -> StoreResult<Vec<PermissionGrant>> {
        let state = self.state.read().await;
        let wanted: BTreeSet<&RoleId> = role_ids.iter().collect();
        Ok(state
            .grants
            .values()
            .filter(|g| wanted.contains(&g.role_id))
            .copied()
            .collect())
    }

    async fn grants_for_service(
        &self,
        service_id: ServiceId,
    ) -> StoreResult<Vec<PermissionGrant>> {
        let state = self.state.read().await;
        Ok(state
            .grants
            .values()
            .filter(|g| g.service_id == service_id)
            .copied()
            .collect())
    }

    async fn insert_grant(&self, grant: NewGrant) -> StoreResult<PermissionGrant> {
        self.apply(|state| {
            if state.find_grant(grant.role_id, grant.service_id).is_some() {
                return Err(StoreError::UniqueViolation(format!(
                    "grant for role {} and service {}",
                    grant.role_id, grant.service_id
                )));
            }
            let id = GrantId(state.next_grant_id);
            state.next_grant_id += 1;
            let inserted = PermissionGrant {
                id,
                role_id: grant.role_id,
                service_id: grant.service_id,
                flags: grant.flags,
            };
            state.grants.insert(id, inserted);
            Ok(inserted)
        })
        .await
    }

    async fn update_grant_flags(
        &self,
        id: GrantId,
        flags: GrantFlags,
    ) -> StoreResult<Option<PermissionGrant>> {
        if !self.state.read().await.grants.contains_key(&id) {
            return Ok(None);
        }
        self.apply(|state| {
            Ok(state.grants.get_mut(&id).map(|grant| {
                grant.flags = flags;
                *grant
            }))
        })
        .await
    }

    async fn role_ids_for_user(&self, user_id: UserId) -> StoreResult<Vec<RoleId>> {
        let state = self.state.read().await;
        Ok(state
            .assignments
            .iter()
            .filter(|a| a.user_id == user_id)
            .map(|a| a.role_id)
            .collect())
    }

    async fn begin_unit_of_work(&self) -> StoreResult<Box<dyn UnitOfWork>> {
        Ok(Box::new(MemoryUnitOfWork {
            store: self.clone(),
            pending: Vec::new(),
        }))
    }
}

#[derive(Debug, Clone, Copy)]
enum PendingWrite {
    Insert(UserRoleAssignment),
    Delete(UserRoleAssignment),
}

/// Buffers assignment writes and applies them atomically on commit.
/// Dropping it without committing discards the batch.
struct MemoryUnitOfWork {
    store: InMemoryGrantStore,
    pending: Vec<PendingWrite>,
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn insert_assignment(&mut self, assignment: UserRoleAssignment) -> StoreResult<()> {
        self.pending.push(PendingWrite::Insert(assignment));
        Ok(())
    }

    async fn delete_assignment(&mut self, assignment: UserRoleAssignment) -> StoreResult<()> {
        self.pending.push(PendingWrite::Delete(assignment));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let pending = &self.pending;
        self.store
            .apply(|state| {
                // Validate the whole batch against a scratch copy first so a
                // failing insert leaves the committed state untouched.
                let mut staged = state.assignments.clone();
                for write in pending {
                    match write {
                        PendingWrite::Insert(a) => {
                            if !state.roles.contains_key(&a.role_id) {
                                return Err(StoreError::Inconsistent(format!(
                                    "role {} does not exist",
                                    a.role_id
                                )));
                            }
                            if !staged.insert(*a) {
                                return Err(StoreError::UniqueViolation(format!(
                                    "assignment of role {} to user {}",
                                    a.role_id, a.user_id
                                )));
                            }
                        }
                        PendingWrite::Delete(a) => {
                            staged.remove(a);
                        }
                    }
                }
                state.assignments = staged;
                Ok(())
            })
            .await?;

        self.store
            .assignment_writes
            .fetch_add(self.pending.len() as u64, Ordering::SeqCst);
        Ok(())
    }
}
