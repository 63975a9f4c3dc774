use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::context::RequestContext;
use crate::error::{AuthzError, AuthzResult, StoreError, StoreResultExt};
use crate::model::{CapabilityMatrix, RoleId, ServiceId, UserId};
use crate::store::GrantStore;

const OP: &str = "build_matrix";

/// Aggregates the grants reachable from a user's roles into one matrix.
///
/// Three batched store queries per call, independent of the role count:
/// the user's role ids, the grants of those roles, the services the grants
/// reference.
pub struct MatrixBuilder {
    store: Arc<dyn GrantStore>,
}

impl MatrixBuilder {
    pub fn new(store: Arc<dyn GrantStore>) -> Self {
        Self { store }
    }

    #[instrument(skip(self, ctx))]
    pub async fn build_matrix(
        &self,
        ctx: &RequestContext,
        user_id: UserId,
    ) -> AuthzResult<CapabilityMatrix> {
        if !user_id.is_valid() {
            return Err(AuthzError::Validation(format!("Invalid user id {}", user_id)));
        }

        ctx.check()?;
        if !self.store.user_exists(user_id).await.during(OP)? {
            return Err(AuthzError::not_found(UserId::label(), user_id));
        }

        ctx.check()?;
        let role_ids: Vec<RoleId> = self
            .store
            .role_ids_for_user(user_id)
            .await
            .during(OP)?
            .into_iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if role_ids.is_empty() {
            debug!("User {} holds no roles", user_id);
            return Ok(CapabilityMatrix::new());
        }

        ctx.check()?;
        let grants = self.store.grants_for_roles(&role_ids).await.during(OP)?;
        if grants.is_empty() {
            return Ok(CapabilityMatrix::new());
        }

        let service_ids: Vec<ServiceId> = grants
            .iter()
            .map(|g| g.service_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        ctx.check()?;
        let services: HashMap<ServiceId, String> = self
            .store
            .services_by_ids(&service_ids)
            .await
            .during(OP)?
            .into_iter()
            .map(|s| (s.id, s.name))
            .collect();

        let mut matrix = CapabilityMatrix::new();
        for grant in &grants {
            let name = services.get(&grant.service_id).ok_or_else(|| {
                AuthzError::storage(
                    OP,
                    StoreError::Inconsistent(format!(
                        "grant {} references missing service {}",
                        grant.id, grant.service_id
                    )),
                )
            })?;
            matrix.merge_grant(name, &grant.flags);
        }

        debug!(
            "Built matrix for user {} from {} roles and {} grants",
            user_id,
            role_ids.len(),
            grants.len()
        );
        Ok(matrix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{GrantFlags, GrantId, PermissionGrant, Service};
    use crate::store::{InMemoryGrantStore, MockGrantStore};
    use crate::model::UserRoleAssignment;
    use maplit::btreemap;

    async fn assign(store: &InMemoryGrantStore, user: UserId, roles: &[RoleId]) {
        let mut uow = store.begin_unit_of_work().await.unwrap();
        for role_id in roles {
            uow.insert_assignment(UserRoleAssignment {
                user_id: user,
                role_id: *role_id,
            })
            .await
            .unwrap();
        }
        uow.commit().await.unwrap();
    }

    async fn grant(store: &InMemoryGrantStore, role: RoleId, service: ServiceId, flags: GrantFlags) {
        store
            .insert_grant(crate::model::NewGrant {
                role_id: role,
                service_id: service,
                flags,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_or_merge_across_roles() {
        let store = InMemoryGrantStore::new();
        store.add_service(ServiceId(1), "Billing").await.unwrap();
        store.add_service(ServiceId(2), "storage").await.unwrap();
        let r1 = store.insert_role("r1").await.unwrap().id;
        let r2 = store.insert_role("r2").await.unwrap().id;
        grant(&store, r1, ServiceId(1), GrantFlags::new(true, false, false)).await;
        grant(&store, r2, ServiceId(1), GrantFlags::new(false, true, false)).await;
        grant(&store, r2, ServiceId(2), GrantFlags::new(false, false, true)).await;
        store.add_user(UserId(5)).await;
        assign(&store, UserId(5), &[r1, r2]).await;

        let matrix = MatrixBuilder::new(Arc::new(store))
            .build_matrix(&RequestContext::background(), UserId(5))
            .await
            .unwrap();

        assert_eq!(
            matrix.into_inner(),
            btreemap! {
                "billing.read".to_string() => true,
                "billing.write".to_string() => true,
                "billing.manage".to_string() => false,
                "storage.read".to_string() => false,
                "storage.write".to_string() => false,
                "storage.manage".to_string() => true,
            }
        );
    }

    #[tokio::test]
    async fn test_user_without_roles_gets_empty_matrix() {
        let store = InMemoryGrantStore::new();
        store.add_user(UserId(3)).await;

        let matrix = MatrixBuilder::new(Arc::new(store))
            .build_matrix(&RequestContext::background(), UserId(3))
            .await
            .unwrap();

        assert!(matrix.is_empty());
        assert!(!matrix.allows("billing", crate::model::Action::Read));
    }

    #[tokio::test]
    async fn test_unknown_user_is_not_found() {
        let err = MatrixBuilder::new(Arc::new(InMemoryGrantStore::new()))
            .build_matrix(&RequestContext::background(), UserId(42))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_query_count_is_bounded() {
        let mut store = MockGrantStore::new();
        store.expect_user_exists().times(1).returning(|_| Ok(true));
        store
            .expect_role_ids_for_user()
            .times(1)
            .returning(|_| Ok((1..=50).map(RoleId).collect()));
        store.expect_grants_for_roles().times(1).returning(|ids| {
            Ok(ids
                .iter()
                .map(|role_id| PermissionGrant {
                    id: GrantId(role_id.0),
                    role_id: *role_id,
                    service_id: ServiceId(role_id.0 % 3),
                    flags: GrantFlags::new(role_id.0 % 2 == 0, false, false),
                })
                .collect())
        });
        store.expect_services_by_ids().times(1).returning(|ids| {
            Ok(ids
                .iter()
                .map(|id| Service {
                    id: *id,
                    name: format!("svc{}", id),
                })
                .collect())
        });

        let matrix = MatrixBuilder::new(Arc::new(store))
            .build_matrix(&RequestContext::background(), UserId(1))
            .await
            .unwrap();

        assert_eq!(matrix.len(), 9);
        assert_eq!(matrix.get("svc0.read"), Some(true));
        assert_eq!(matrix.get("svc1.write"), Some(false));
    }

    #[tokio::test]
    async fn test_dangling_service_is_storage_error() {
        let mut store = MockGrantStore::new();
        store.expect_user_exists().returning(|_| Ok(true));
        store
            .expect_role_ids_for_user()
            .returning(|_| Ok(vec![RoleId(1)]));
        store.expect_grants_for_roles().returning(|_| {
            Ok(vec![PermissionGrant {
                id: GrantId(1),
                role_id: RoleId(1),
                service_id: ServiceId(9),
                flags: GrantFlags::new(true, true, true),
            }])
        });
        store.expect_services_by_ids().returning(|_| Ok(vec![]));

        let err = MatrixBuilder::new(Arc::new(store))
            .build_matrix(&RequestContext::background(), UserId(1))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            AuthzError::Storage {
                operation: "build_matrix",
                source: StoreError::Inconsistent(_)
            }
        ));
    }

    #[tokio::test]
    async fn test_cancelled_context_issues_no_queries() {
        let mut store = MockGrantStore::new();
        store.expect_user_exists().times(0);
        let ctx = RequestContext::background();
        ctx.cancel();

        let err = MatrixBuilder::new(Arc::new(store))
            .build_matrix(&ctx, UserId(1))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthzError::Cancelled));
    }
}
