use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::context::RequestContext;
use crate::error::{AuthzError, AuthzResult, StoreError, StoreResultExt};
use crate::model::{
    EnrichedGrant, GrantFlags, NewGrant, PermissionGrant, Role, RoleId, Service, ServiceId, UserId,
};
use crate::store::GrantStore;

/// CRUD over roles, services and permission grants. No aggregation.
pub struct Catalog {
    store: Arc<dyn GrantStore>,
}

impl Catalog {
    pub fn new(store: Arc<dyn GrantStore>) -> Self {
        Self { store }
    }

    #[instrument(skip(self, ctx))]
    pub async fn create_role(&self, ctx: &RequestContext, name: &str) -> AuthzResult<Role> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AuthzError::Validation("Role name cannot be empty".into()));
        }

        ctx.check()?;
        if self
            .store
            .find_role_by_name(name)
            .await
            .during("create_role")?
            .is_some()
        {
            return Err(AuthzError::Conflict(format!("Role '{}' already exists", name)));
        }

        ctx.check()?;
        let role = match self.store.insert_role(name).await {
            Ok(role) => role,
            Err(StoreError::UniqueViolation(_)) => {
                return Err(AuthzError::Conflict(format!("Role '{}' already exists", name)))
            }
            Err(e) => return Err(AuthzError::storage("create_role", e)),
        };

        info!("Created role '{}' with id {}", role.name, role.id);
        Ok(role)
    }

    pub async fn list_roles(&self, ctx: &RequestContext) -> AuthzResult<Vec<Role>> {
        ctx.check()?;
        let mut roles = self.store.list_roles().await.during("list_roles")?;
        roles.sort_by_key(|r| r.id);
        Ok(roles)
    }

    /// Roles currently assigned to a user, ordered by id.
    pub async fn list_roles_for_user(
        &self,
        ctx: &RequestContext,
        user_id: UserId,
    ) -> AuthzResult<Vec<Role>> {
        const OP: &str = "list_roles_for_user";

        if !user_id.is_valid() {
            return Err(AuthzError::Validation(format!("Invalid user id {}", user_id)));
        }

        ctx.check()?;
        if !self.store.user_exists(user_id).await.during(OP)? {
            return Err(AuthzError::not_found(UserId::label(), user_id));
        }

        ctx.check()?;
        let role_ids = self.store.role_ids_for_user(user_id).await.during(OP)?;
        if role_ids.is_empty() {
            return Ok(Vec::new());
        }

        ctx.check()?;
        let mut roles = self.store.roles_by_ids(&role_ids).await.during(OP)?;
        roles.sort_by_key(|r| r.id);
        roles.dedup_by_key(|r| r.id);
        Ok(roles)
    }

    pub async fn list_services(&self, ctx: &RequestContext) -> AuthzResult<Vec<Service>> {
        ctx.check()?;
        let mut services = self.store.list_services().await.during("list_services")?;
        services.sort_by_key(|s| s.id);
        Ok(services)
    }

    /// Replace the flags of the single grant for `(role_id, service_id)`,
    /// creating it when none exists yet.
    #[instrument(skip(self, ctx))]
    pub async fn create_permission_grant(
        &self,
        ctx: &RequestContext,
        role_id: RoleId,
        service_id: ServiceId,
        flags: GrantFlags,
    ) -> AuthzResult<PermissionGrant> {
        if !role_id.is_valid() {
            return Err(AuthzError::Validation(format!("Invalid role id {}", role_id)));
        }
        if !service_id.is_valid() {
            return Err(AuthzError::Validation(format!(
                "Invalid service id {}",
                service_id
            )));
        }

        ctx.check()?;
        if self
            .store
            .roles_by_ids(&[role_id])
            .await
            .during("create_permission_grant")?
            .is_empty()
        {
            return Err(AuthzError::not_found(RoleId::label(), role_id));
        }

        ctx.check()?;
        if self
            .store
            .services_by_ids(&[service_id])
            .await
            .during("create_permission_grant")?
            .is_empty()
        {
            return Err(AuthzError::not_found(ServiceId::label(), service_id));
        }

        let grant = self.upsert_grant(ctx, role_id, service_id, flags).await?;
        info!(
            "Grant {} for role {} on service {} set to {:?}",
            grant.id, role_id, service_id, flags
        );
        Ok(grant)
    }

    async fn upsert_grant(
        &self,
        ctx: &RequestContext,
        role_id: RoleId,
        service_id: ServiceId,
        flags: GrantFlags,
    ) -> AuthzResult<PermissionGrant> {
        const OP: &str = "create_permission_grant";

        ctx.check()?;
        if let Some(existing) = self
            .store
            .find_grant(role_id, service_id)
            .await
            .during(OP)?
        {
            return self.update_existing(ctx, existing, flags).await;
        }

        ctx.check()?;
        match self
            .store
            .insert_grant(NewGrant {
                role_id,
                service_id,
                flags,
            })
            .await
        {
            Ok(grant) => Ok(grant),
            Err(StoreError::UniqueViolation(_)) => {
                // A concurrent caller inserted the row first, update theirs.
                debug!(
                    "Grant for role {} on service {} appeared concurrently, updating",
                    role_id, service_id
                );
                ctx.check()?;
                let existing = self
                    .store
                    .find_grant(role_id, service_id)
                    .await
                    .during(OP)?
                    .ok_or_else(|| {
                        AuthzError::storage(
                            OP,
                            StoreError::Inconsistent(format!(
                                "grant for role {} on service {} vanished after unique violation",
                                role_id, service_id
                            )),
                        )
                    })?;
                self.update_existing(ctx, existing, flags).await
            }
            Err(e) => Err(AuthzError::storage(OP, e)),
        }
    }

    async fn update_existing(
        &self,
        ctx: &RequestContext,
        existing: PermissionGrant,
        flags: GrantFlags,
    ) -> AuthzResult<PermissionGrant> {
        ctx.check()?;
        self.store
            .update_grant_flags(existing.id, flags)
            .await
            .during("create_permission_grant")?
            .ok_or_else(|| AuthzError::not_found(crate::model::GrantId::label(), existing.id))
    }

    /// Grants attached to a service, joined with role and service names.
    pub async fn list_grants_for_service(
        &self,
        ctx: &RequestContext,
        service_id: ServiceId,
    ) -> AuthzResult<Vec<EnrichedGrant>> {
        const OP: &str = "list_grants_for_service";

        if !service_id.is_valid() {
            return Err(AuthzError::Validation(format!(
                "Invalid service id {}",
                service_id
            )));
        }

        ctx.check()?;
        let service = self
            .store
            .services_by_ids(&[service_id])
            .await
            .during(OP)?
            .into_iter()
            .next()
            .ok_or_else(|| AuthzError::not_found(ServiceId::label(), service_id))?;

        ctx.check()?;
        let mut grants = self.store.grants_for_service(service_id).await.during(OP)?;
        if grants.is_empty() {
            return Ok(Vec::new());
        }
        grants.sort_by_key(|g| g.id);

        let role_ids: Vec<RoleId> = grants.iter().map(|g| g.role_id).collect();
        ctx.check()?;
        let roles: HashMap<RoleId, Role> = self
            .store
            .roles_by_ids(&role_ids)
            .await
            .during(OP)?
            .into_iter()
            .map(|r| (r.id, r))
            .collect();

        grants
            .into_iter()
            .map(|grant| {
                let role = roles.get(&grant.role_id).cloned().ok_or_else(|| {
                    AuthzError::storage(
                        OP,
                        StoreError::Inconsistent(format!(
                            "grant {} references missing role {}",
                            grant.id, grant.role_id
                        )),
                    )
                })?;
                Ok(EnrichedGrant {
                    id: grant.id,
                    service: service.clone(),
                    role,
                    can_read: grant.flags.can_read,
                    can_write: grant.flags.can_write,
                    can_manage: grant.flags.can_manage,
                })
            })
            .collect()
    }
}
