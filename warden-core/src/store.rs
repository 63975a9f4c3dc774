//! Grant Store collaborator interface.
//!
//! The RBAC core only talks to persistence through these traits. Batched
//! lookups (`*_by_ids`, `grants_for_roles`) keep the number of round trips
//! per operation independent of how many roles a user holds.

use async_trait::async_trait;

use crate::error::StoreResult;
use crate::model::{
    GrantFlags, GrantId, NewGrant, PermissionGrant, Role, RoleId, Service, ServiceId, UserId,
    UserRoleAssignment,
};

pub mod memory;
pub mod snapshot;

pub use memory::InMemoryGrantStore;

#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait GrantStore: Send + Sync {
    async fn user_exists(&self, user_id: UserId) -> StoreResult<bool>;

    async fn list_roles(&self) -> StoreResult<Vec<Role>>;

    async fn roles_by_ids(&self, ids: &[RoleId]) -> StoreResult<Vec<Role>>;

    async fn find_role_by_name(&self, name: &str) -> StoreResult<Option<Role>>;

    /// Fails with `UniqueViolation` when a role with the same name exists.
    async fn insert_role(&self, name: &str) -> StoreResult<Role>;

    async fn list_services(&self) -> StoreResult<Vec<Service>>;

    async fn services_by_ids(&self, ids: &[ServiceId]) -> StoreResult<Vec<Service>>;

    async fn find_grant(
        &self,
        role_id: RoleId,
        service_id: ServiceId,
    ) -> StoreResult<Option<PermissionGrant>>;

    async fn grants_for_roles(&self, role_ids: &[RoleId]) -> StoreResult<Vec<PermissionGrant>>;

    async fn grants_for_service(&self, service_id: ServiceId)
        -> StoreResult<Vec<PermissionGrant>>;

    /// Fails with `UniqueViolation` when a grant for the same (role, service) exists.
    async fn insert_grant(&self, grant: NewGrant) -> StoreResult<PermissionGrant>;

    /// Returns `None` when no grant with that id exists.
    async fn update_grant_flags(
        &self,
        id: GrantId,
        flags: GrantFlags,
    ) -> StoreResult<Option<PermissionGrant>>;

    async fn role_ids_for_user(&self, user_id: UserId) -> StoreResult<Vec<RoleId>>;

    /// Opens a batch of assignment writes. Stores that support transactions
    /// apply the batch atomically on commit; others may write through.
    async fn begin_unit_of_work(&self) -> StoreResult<Box<dyn UnitOfWork>>;
}

#[async_trait]
pub trait UnitOfWork: Send {
    /// Fails with `UniqueViolation` when the pair is already assigned.
    async fn insert_assignment(&mut self, assignment: UserRoleAssignment) -> StoreResult<()>;

    /// Deleting an absent pair is not an error.
    async fn delete_assignment(&mut self, assignment: UserRoleAssignment) -> StoreResult<()>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;
}
