//! RBAC core of the warden grant service: role reconciliation, permission
//! grant catalog and capability matrix aggregation over a pluggable store.

pub mod catalog;
pub mod context;
pub mod error;
pub mod facade;
pub mod matrix;
pub mod model;
pub mod reconciler;
pub mod store;

pub use context::RequestContext;
pub use error::{AuthzError, AuthzResult, StoreError, StoreResult};
pub use facade::AuthorizationFacade;
pub use reconciler::ReconcileOutcome;
pub use store::{GrantStore, InMemoryGrantStore, UnitOfWork};
