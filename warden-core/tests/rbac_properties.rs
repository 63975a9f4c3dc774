use async_trait::async_trait;
use proptest::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use warden_core::matrix::MatrixBuilder;
use warden_core::model::{
    Action, GrantFlags, GrantId, NewGrant, PermissionGrant, Role, RoleId, Service, ServiceId,
    UserId,
};
use warden_core::reconciler::Reconciler;
use warden_core::{GrantStore, InMemoryGrantStore, RequestContext, StoreResult, UnitOfWork};

const SERVICES: [&str; 3] = ["Billing", "storage", "Reports"];

/// Store that hands back every list in a seed-dependent order.
struct ScrambledStore {
    inner: InMemoryGrantStore,
    seed: u64,
}

impl ScrambledStore {
    fn scramble<T>(&self, mut items: Vec<T>, key: impl Fn(&T) -> i64) -> Vec<T> {
        let seed = self.seed | 1;
        items.sort_by_key(|item| (key(item) as u64).wrapping_mul(seed).rotate_left(29));
        items
    }
}

#[async_trait]
impl GrantStore for ScrambledStore {
    async fn user_exists(&self, user_id: UserId) -> StoreResult<bool> {
        self.inner.user_exists(user_id).await
    }

    async fn list_roles(&self) -> StoreResult<Vec<Role>> {
        let roles = self.inner.list_roles().await?;
        Ok(self.scramble(roles, |r| r.id.0))
    }

    async fn roles_by_ids(&self, ids: &[RoleId]) -> StoreResult<Vec<Role>> {
        let roles = self.inner.roles_by_ids(ids).await?;
        Ok(self.scramble(roles, |r| r.id.0))
    }

    async fn find_role_by_name(&self, name: &str) -> StoreResult<Option<Role>> {
        self.inner.find_role_by_name(name).await
    }

    async fn insert_role(&self, name: &str) -> StoreResult<Role> {
        self.inner.insert_role(name).await
    }

    async fn list_services(&self) -> StoreResult<Vec<Service>> {
        let services = self.inner.list_services().await?;
        Ok(self.scramble(services, |s| s.id.0))
    }

    async fn services_by_ids(&self, ids: &[ServiceId]) -> StoreResult<Vec<Service>> {
        let services = self.inner.services_by_ids(ids).await?;
        Ok(self.scramble(services, |s| s.id.0))
    }

    async fn find_grant(
        &self,
        role_id: RoleId,
        service_id: ServiceId,
    ) -> StoreResult<Option<PermissionGrant>> {
        self.inner.find_grant(role_id, service_id).await
    }

    async fn grants_for_roles(&self, role_ids: &[RoleId]) -> StoreResult<Vec<PermissionGrant>> {
        let grants = self.inner.grants_for_roles(role_ids).await?;
        Ok(self.scramble(grants, |g| g.id.0))
    }

    async fn grants_for_service(
        &self,
        service_id: ServiceId,
    ) -> StoreResult<Vec<PermissionGrant>> {
        let grants = self.inner.grants_for_service(service_id).await?;
        Ok(self.scramble(grants, |g| g.id.0))
    }

    async fn insert_grant(&self, grant: NewGrant) -> StoreResult<PermissionGrant> {
        self.inner.insert_grant(grant).await
    }

    async fn update_grant_flags(
        &self,
        id: GrantId,
        flags: GrantFlags,
    ) -> StoreResult<Option<PermissionGrant>> {
        self.inner.update_grant_flags(id, flags).await
    }

    async fn role_ids_for_user(&self, user_id: UserId) -> StoreResult<Vec<RoleId>> {
        let ids = self.inner.role_ids_for_user(user_id).await?;
        Ok(self.scramble(ids, |id| id.0))
    }

    async fn begin_unit_of_work(&self) -> StoreResult<Box<dyn UnitOfWork>> {
        self.inner.begin_unit_of_work().await
    }
}

type GrantRow = (i64, usize, bool, bool, bool);

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

/// Store with roles 1..=role_count, the three services and user 1 holding
/// `held` roles, populated with `grants` in the given order.
async fn seeded_store(role_count: i64, held: &[i64], grants: &[GrantRow]) -> InMemoryGrantStore {
    let store = InMemoryGrantStore::new();
    for (i, name) in SERVICES.iter().enumerate() {
        store.add_service(ServiceId(i as i64 + 1), name).await.unwrap();
    }
    for i in 1..=role_count {
        store.insert_role(&format!("role-{}", i)).await.unwrap();
    }
    store.add_user(UserId(1)).await;

    for (role, service, read, write, manage) in grants {
        store
            .insert_grant(NewGrant {
                role_id: RoleId(*role),
                service_id: ServiceId(*service as i64 + 1),
                flags: GrantFlags::new(*read, *write, *manage),
            })
            .await
            .unwrap();
    }

    let mut uow = store.begin_unit_of_work().await.unwrap();
    for role in held {
        uow.insert_assignment(warden_core::model::UserRoleAssignment {
            user_id: UserId(1),
            role_id: RoleId(*role),
        })
        .await
        .unwrap();
    }
    uow.commit().await.unwrap();
    store
}

/// Straightforward OR-merge over the grants of the held roles.
fn expected_matrix(held: &[i64], grants: &[GrantRow]) -> BTreeMap<String, bool> {
    let held: BTreeSet<i64> = held.iter().copied().collect();
    let mut expected = BTreeMap::new();
    for (role, service, read, write, manage) in grants {
        if !held.contains(role) {
            continue;
        }
        let name = SERVICES[*service].to_lowercase();
        for (action, value) in [("read", read), ("write", write), ("manage", manage)] {
            *expected.entry(format!("{}.{}", name, action)).or_insert(false) |= *value;
        }
    }
    expected
}

fn unique_grants() -> impl Strategy<Value = Vec<GrantRow>> {
    prop::collection::btree_map(
        (1i64..=5, 0usize..SERVICES.len()),
        (any::<bool>(), any::<bool>(), any::<bool>()),
        0..12,
    )
    .prop_map(|grants| {
        grants
            .into_iter()
            .map(|((role, service), (r, w, m))| (role, service, r, w, m))
            .collect::<Vec<_>>()
    })
    .prop_shuffle()
}

proptest! {
    #[test]
    fn property_matrix_is_order_independent(
        grants in unique_grants(),
        held in prop::collection::btree_set(1i64..=5, 0..=5),
        seed in any::<u64>(),
    ) {
        let held: Vec<i64> = held.into_iter().collect();
        let matrix = runtime().block_on(async {
            let store = seeded_store(5, &held, &grants).await;
            let scrambled = ScrambledStore { inner: store, seed };
            MatrixBuilder::new(Arc::new(scrambled))
                .build_matrix(&RequestContext::background(), UserId(1))
                .await
                .unwrap()
        });

        prop_assert_eq!(matrix.into_inner(), expected_matrix(&held, &grants));
    }

    #[test]
    fn property_reconciliation_reaches_desired_set_and_is_idempotent(
        initial in prop::collection::btree_set(1i64..=6, 0..=6),
        desired in prop::collection::btree_set(1i64..=6, 0..=6),
    ) {
        let initial: Vec<i64> = initial.into_iter().collect();
        let desired: BTreeSet<RoleId> = desired.into_iter().map(RoleId).collect();

        let (final_roles, outcome, writes_between) = runtime().block_on(async {
            let store = seeded_store(6, &initial, &[]).await;
            let reconciler = Reconciler::new(Arc::new(store.clone()));
            let ctx = RequestContext::background();

            let outcome = reconciler.assign_roles(&ctx, UserId(1), &desired).await.unwrap();
            let before = store.assignment_writes();
            reconciler.assign_roles(&ctx, UserId(1), &desired).await.unwrap();
            let writes_between = store.assignment_writes() - before;

            let final_roles: BTreeSet<RoleId> =
                store.role_ids_for_user(UserId(1)).await.unwrap().into_iter().collect();
            (final_roles, outcome, writes_between)
        });

        let initial: BTreeSet<RoleId> = initial.into_iter().map(RoleId).collect();
        prop_assert_eq!(&final_roles, &desired);
        prop_assert_eq!(writes_between, 0);
        prop_assert_eq!(
            outcome.writes(),
            desired.symmetric_difference(&initial).count()
        );
    }
}

#[tokio::test]
async fn test_or_merge_example() {
    // R1 grants billing read, R2 grants billing write and storage manage.
    let grants: [GrantRow; 3] = [(1, 0, true, false, false), (2, 0, false, true, false), (2, 1, false, false, true)];
    let store = seeded_store(2, &[1, 2], &grants).await;

    let matrix = MatrixBuilder::new(Arc::new(store))
        .build_matrix(&RequestContext::background(), UserId(1))
        .await
        .unwrap();

    assert!(matrix.allows("billing", Action::Read));
    assert!(matrix.allows("billing", Action::Write));
    assert!(matrix.allows("storage", Action::Manage));
    assert!(!matrix.allows("billing", Action::Manage));
    assert!(!matrix.allows("reports", Action::Read));
}
