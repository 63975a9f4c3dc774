use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            pub fn get(self) -> i64 {
                self.0
            }

            pub fn is_valid(self) -> bool {
                self.0 >= 0
            }

            pub const fn label() -> &'static str {
                $label
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }
    };
}

id_type!(
    /// Identifier of a user owned by the upstream identity subsystem
    UserId,
    "user"
);
id_type!(RoleId, "role");
id_type!(ServiceId, "service");
id_type!(GrantId, "permission grant");

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "utoipa", derive(utoipa::ToSchema))]
pub struct Role {
    #[cfg_attr(feature = "utoipa", schema(value_type = i64))]
    pub id: RoleId,
    pub name: String,
}

/// A protected capability domain, e.g. "billing".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "utoipa", derive(utoipa::ToSchema))]
pub struct Service {
    #[cfg_attr(feature = "utoipa", schema(value_type = i64))]
    pub id: ServiceId,
    pub name: String,
}

/// The three independent flags a grant attaches to a (role, service) pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "utoipa", derive(utoipa::ToSchema))]
pub struct GrantFlags {
    pub can_read: bool,
    pub can_write: bool,
    pub can_manage: bool,
}

impl GrantFlags {
    pub fn new(can_read: bool, can_write: bool, can_manage: bool) -> Self {
        Self {
            can_read,
            can_write,
            can_manage,
        }
    }

    pub fn allows(&self, action: Action) -> bool {
        match action {
            Action::Read => self.can_read,
            Action::Write => self.can_write,
            Action::Manage => self.can_manage,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionGrant {
    pub id: GrantId,
    pub role_id: RoleId,
    pub service_id: ServiceId,
    #[serde(flatten)]
    pub flags: GrantFlags,
}

/// Grant row before the store has assigned it an id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewGrant {
    pub role_id: RoleId,
    pub service_id: ServiceId,
    pub flags: GrantFlags,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRoleAssignment {
    pub user_id: UserId,
    pub role_id: RoleId,
}

/// Grant joined with the names of its role and service, for administrative display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "utoipa", derive(utoipa::ToSchema))]
pub struct EnrichedGrant {
    #[cfg_attr(feature = "utoipa", schema(value_type = i64))]
    pub id: GrantId,
    pub service: Service,
    pub role: Role,
    pub can_read: bool,
    pub can_write: bool,
    pub can_manage: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Read,
    Write,
    Manage,
}

impl Action {
    pub fn all() -> [Action; 3] {
        [Action::Read, Action::Write, Action::Manage]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Read => "read",
            Action::Write => "write",
            Action::Manage => "manage",
        }
    }

    /// Case-insensitive parse of "read", "write" or "manage".
    pub fn parse(s: &str) -> Option<Action> {
        match s.trim().to_lowercase().as_str() {
            "read" => Some(Action::Read),
            "write" => Some(Action::Write),
            "manage" => Some(Action::Manage),
            _ => None,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Flattened per-user view of every (service, action) pair some role granted.
///
/// Keys have the form `"<lowercased service name>.<action>"`. Entries are only
/// present for pairs that at least one grant referenced; lookups of absent
/// keys are denied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilityMatrix(BTreeMap<String, bool>);

impl CapabilityMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key(service: &str, action: Action) -> String {
        format!("{}.{}", service.trim().to_lowercase(), action.as_str())
    }

    /// OR-merges one grant's flags for `service` into the matrix.
    pub fn merge_grant(&mut self, service: &str, flags: &GrantFlags) {
        for action in Action::all() {
            let entry = self.0.entry(Self::key(service, action)).or_insert(false);
            *entry |= flags.allows(action);
        }
    }

    pub fn get(&self, key: &str) -> Option<bool> {
        self.0.get(key).copied()
    }

    pub fn allows(&self, service: &str, action: Action) -> bool {
        self.get(&Self::key(service, action)).unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &bool)> {
        self.0.iter()
    }

    pub fn into_inner(self) -> BTreeMap<String, bool> {
        self.0
    }
}

impl From<BTreeMap<String, bool>> for CapabilityMatrix {
    fn from(map: BTreeMap<String, bool>) -> Self {
        Self(map)
    }
}
