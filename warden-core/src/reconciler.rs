use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, instrument};

use crate::context::RequestContext;
use crate::error::{AuthzError, AuthzResult, StoreResultExt};
use crate::model::{RoleId, UserId, UserRoleAssignment};
use crate::store::GrantStore;

const OP: &str = "assign_roles";

/// Diff applied by one reconciliation, each list sorted ascending.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileOutcome {
    pub added: Vec<RoleId>,
    pub removed: Vec<RoleId>,
    pub unchanged: Vec<RoleId>,
}

impl ReconcileOutcome {
    pub fn is_noop(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    pub fn writes(&self) -> usize {
        self.added.len() + self.removed.len()
    }
}

/// Per-user async mutexes. Entries live only while some caller holds or
/// waits for them, so the map stays bounded by in-flight reconciliations.
#[derive(Default)]
struct UserLocks {
    locks: Mutex<HashMap<UserId, UserLockEntry>>,
}

#[derive(Default)]
struct UserLockEntry {
    mutex: Arc<tokio::sync::Mutex<()>>,
    /// Outstanding leases; only changed while the map is locked.
    leases: usize,
}

impl UserLocks {
    fn lease(&self, user_id: UserId) -> UserLockLease<'_> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        let entry = locks.entry(user_id).or_default();
        entry.leases += 1;
        UserLockLease {
            locks: self,
            user_id,
            mutex: entry.mutex.clone(),
        }
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    #[cfg(test)]
    fn leases(&self, user_id: UserId) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&user_id)
            .map_or(0, |entry| entry.leases)
    }
}

/// Reference to one user's mutex; the last lease removes the map entry.
struct UserLockLease<'a> {
    locks: &'a UserLocks,
    user_id: UserId,
    mutex: Arc<tokio::sync::Mutex<()>>,
}

impl Drop for UserLockLease<'_> {
    fn drop(&mut self) {
        let mut locks = self.locks.locks.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = locks.get_mut(&self.user_id) {
            entry.leases -= 1;
            if entry.leases == 0 {
                locks.remove(&self.user_id);
            }
        }
    }
}

/// Brings a user's assigned roles to exactly a desired set with the minimal
/// number of inserts and deletes.
pub struct Reconciler {
    store: Arc<dyn GrantStore>,
    locks: UserLocks,
}

impl Reconciler {
    pub fn new(store: Arc<dyn GrantStore>) -> Self {
        Self {
            store,
            locks: UserLocks::default(),
        }
    }

    #[instrument(skip(self, ctx, desired), fields(desired = desired.len()))]
    pub async fn assign_roles(
        &self,
        ctx: &RequestContext,
        user_id: UserId,
        desired: &BTreeSet<RoleId>,
    ) -> AuthzResult<ReconcileOutcome> {
        if !user_id.is_valid() {
            return Err(AuthzError::Validation(format!("Invalid user id {}", user_id)));
        }
        if let Some(invalid) = desired.iter().find(|id| !id.is_valid()) {
            return Err(AuthzError::Validation(format!("Invalid role id {}", invalid)));
        }

        ctx.check()?;
        if !self.store.user_exists(user_id).await.during(OP)? {
            return Err(AuthzError::not_found(UserId::label(), user_id));
        }

        if !desired.is_empty() {
            let wanted: Vec<RoleId> = desired.iter().copied().collect();
            ctx.check()?;
            let known: BTreeSet<RoleId> = self
                .store
                .roles_by_ids(&wanted)
                .await
                .during(OP)?
                .into_iter()
                .map(|r| r.id)
                .collect();
            if let Some(missing) = desired.difference(&known).next() {
                return Err(AuthzError::not_found(RoleId::label(), missing));
            }
        }

        let lease = self.locks.lease(user_id);
        let _guard = tokio::select! {
            guard = lease.mutex.lock() => guard,
            _ = ctx.done() => return Err(AuthzError::Cancelled),
        };
        self.reconcile_locked(ctx, user_id, desired).await
    }

    async fn reconcile_locked(
        &self,
        ctx: &RequestContext,
        user_id: UserId,
        desired: &BTreeSet<RoleId>,
    ) -> AuthzResult<ReconcileOutcome> {
        ctx.check()?;
        let current: BTreeSet<RoleId> = self
            .store
            .role_ids_for_user(user_id)
            .await
            .during(OP)?
            .into_iter()
            .collect();

        let outcome = ReconcileOutcome {
            added: desired.difference(&current).copied().collect(),
            removed: current.difference(desired).copied().collect(),
            unchanged: current.intersection(desired).copied().collect(),
        };

        if outcome.is_noop() {
            debug!("User {} already holds the desired roles", user_id);
            return Ok(outcome);
        }

        ctx.check()?;
        let mut uow = self.store.begin_unit_of_work().await.during(OP)?;

        // Additions first: a partial write-through leaves a superset of the
        // desired roles rather than a subset.
        for role_id in &outcome.added {
            ctx.check()?;
            uow.insert_assignment(UserRoleAssignment {
                user_id,
                role_id: *role_id,
            })
            .await
            .during(OP)?;
        }
        for role_id in &outcome.removed {
            ctx.check()?;
            uow.delete_assignment(UserRoleAssignment {
                user_id,
                role_id: *role_id,
            })
            .await
            .during(OP)?;
        }

        ctx.check()?;
        uow.commit().await.during(OP)?;

        info!(
            "Reconciled roles for user {}: added {:?}, removed {:?}",
            user_id, outcome.added, outcome.removed
        );
        Ok(outcome)
    }
}
