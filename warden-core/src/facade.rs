use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info_span, Instrument};

use crate::catalog::Catalog;
use crate::context::RequestContext;
use crate::error::AuthzResult;
use crate::matrix::MatrixBuilder;
use crate::model::{
    Action, CapabilityMatrix, EnrichedGrant, GrantFlags, PermissionGrant, Role, RoleId, Service,
    ServiceId, UserId,
};
use crate::reconciler::{ReconcileOutcome, Reconciler};
use crate::store::GrantStore;

/// Public surface of the RBAC core, called by the transport layer once it
/// has resolved the caller's identity.
pub struct AuthorizationFacade {
    catalog: Catalog,
    reconciler: Reconciler,
    matrix: MatrixBuilder,
}

impl AuthorizationFacade {
    pub fn new(store: Arc<dyn GrantStore>) -> Self {
        Self {
            catalog: Catalog::new(store.clone()),
            reconciler: Reconciler::new(store.clone()),
            matrix: MatrixBuilder::new(store),
        }
    }

    pub async fn get_user_permissions(
        &self,
        ctx: &RequestContext,
        user_id: UserId,
    ) -> AuthzResult<CapabilityMatrix> {
        self.matrix
            .build_matrix(ctx, user_id)
            .instrument(info_span!("get_user_permissions", user_id = user_id.get()))
            .await
    }

    /// Make the user's roles exactly `roles`. Duplicate ids collapse.
    pub async fn assign_user(
        &self,
        ctx: &RequestContext,
        user_id: UserId,
        roles: &[RoleId],
    ) -> AuthzResult<ReconcileOutcome> {
        let desired: BTreeSet<RoleId> = roles.iter().copied().collect();
        self.reconciler
            .assign_roles(ctx, user_id, &desired)
            .instrument(info_span!(
                "assign_user",
                user_id = user_id.get(),
                roles = ?desired
            ))
            .await
    }

    /// The role set `assign_user` would reconcile against.
    pub async fn get_user_roles(
        &self,
        ctx: &RequestContext,
        user_id: UserId,
    ) -> AuthzResult<Vec<Role>> {
        self.catalog
            .list_roles_for_user(ctx, user_id)
            .instrument(info_span!("get_user_roles", user_id = user_id.get()))
            .await
    }

    pub async fn get_roles(&self, ctx: &RequestContext) -> AuthzResult<Vec<Role>> {
        self.catalog
            .list_roles(ctx)
            .instrument(info_span!("get_roles"))
            .await
    }

    pub async fn create_role(&self, ctx: &RequestContext, name: &str) -> AuthzResult<Role> {
        self.catalog
            .create_role(ctx, name)
            .instrument(info_span!("create_role", name))
            .await
    }

    pub async fn get_services(&self, ctx: &RequestContext) -> AuthzResult<Vec<Service>> {
        self.catalog
            .list_services(ctx)
            .instrument(info_span!("get_services"))
            .await
    }

    pub async fn create_service_permissions(
        &self,
        ctx: &RequestContext,
        role_id: RoleId,
        service_id: ServiceId,
        flags: GrantFlags,
    ) -> AuthzResult<PermissionGrant> {
        self.catalog
            .create_permission_grant(ctx, role_id, service_id, flags)
            .instrument(info_span!(
                "create_service_permissions",
                role_id = role_id.get(),
                service_id = service_id.get()
            ))
            .await
    }

    pub async fn get_service_permissions(
        &self,
        ctx: &RequestContext,
        service_id: ServiceId,
    ) -> AuthzResult<Vec<EnrichedGrant>> {
        self.catalog
            .list_grants_for_service(ctx, service_id)
            .instrument(info_span!(
                "get_service_permissions",
                service_id = service_id.get()
            ))
            .await
    }

    /// Default-deny check of one (service, action) pair for a user.
    pub async fn authorize(
        &self,
        ctx: &RequestContext,
        user_id: UserId,
        service: &str,
        action: Action,
    ) -> AuthzResult<bool> {
        let span = info_span!(
            "authorize",
            user_id = user_id.get(),
            service,
            action = action.as_str()
        );
        let matrix = self
            .matrix
            .build_matrix(ctx, user_id)
            .instrument(span.clone())
            .await?;
        let allowed = matrix.allows(service, action);
        span.in_scope(|| debug!(allowed, "Authorization decision"));
        Ok(allowed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryGrantStore;

    async fn facade() -> (AuthorizationFacade, InMemoryGrantStore) {
        let store = InMemoryGrantStore::new();
        store.add_service(ServiceId(1), "Billing").await.unwrap();
        store.add_service(ServiceId(2), "storage").await.unwrap();
        store.add_user(UserId(5)).await;
        (AuthorizationFacade::new(Arc::new(store.clone())), store)
    }

    #[tokio::test]
    async fn test_end_to_end_grant_and_authorize() {
        let (facade, _) = facade().await;
        let ctx = RequestContext::background();

        let viewer = facade.create_role(&ctx, "viewer").await.unwrap();
        facade
            .create_service_permissions(&ctx, viewer.id, ServiceId(1), GrantFlags::new(true, false, false))
            .await
            .unwrap();
        facade
            .assign_user(&ctx, UserId(5), &[viewer.id, viewer.id])
            .await
            .unwrap();

        assert!(facade
            .authorize(&ctx, UserId(5), "BILLING", Action::Read)
            .await
            .unwrap());
        assert!(!facade
            .authorize(&ctx, UserId(5), "billing", Action::Write)
            .await
            .unwrap());
        assert!(!facade
            .authorize(&ctx, UserId(5), "storage", Action::Read)
            .await
            .unwrap());
        assert!(!facade
            .authorize(&ctx, UserId(5), "unknown-service", Action::Manage)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_clearing_roles_empties_matrix() {
        let (facade, _) = facade().await;
        let ctx = RequestContext::background();
        let admin = facade.create_role(&ctx, "admin").await.unwrap();
        facade
            .create_service_permissions(&ctx, admin.id, ServiceId(2), GrantFlags::new(true, true, true))
            .await
            .unwrap();

        facade.assign_user(&ctx, UserId(5), &[admin.id]).await.unwrap();
        assert_eq!(
            facade.get_user_permissions(&ctx, UserId(5)).await.unwrap().len(),
            3
        );

        assert_eq!(
            facade.get_user_roles(&ctx, UserId(5)).await.unwrap(),
            vec![admin.clone()]
        );

        let outcome = facade.assign_user(&ctx, UserId(5), &[]).await.unwrap();
        assert_eq!(outcome.removed, vec![admin.id]);
        assert!(facade.get_user_roles(&ctx, UserId(5)).await.unwrap().is_empty());
        assert!(facade
            .get_user_permissions(&ctx, UserId(5))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_listings_are_ordered_by_id() {
        let (facade, _) = facade().await;
        let ctx = RequestContext::background();
        facade.create_role(&ctx, "b").await.unwrap();
        facade.create_role(&ctx, "a").await.unwrap();

        let roles = facade.get_roles(&ctx).await.unwrap();
        assert_eq!(
            roles.iter().map(|r| r.name.as_str()).collect::<Vec<_>>(),
            vec!["b", "a"]
        );

        let services = facade.get_services(&ctx).await.unwrap();
        assert_eq!(services[0].name, "Billing");
        assert_eq!(services[1].id, ServiceId(2));
        assert!(facade
            .get_service_permissions(&ctx, ServiceId(2))
            .await
            .unwrap()
            .is_empty());
    }
}
