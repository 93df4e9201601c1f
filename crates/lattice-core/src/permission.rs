//! Permission levels and the permission store seam.
//!
//! The core makes exactly one kind of trust decision: comparing the level an
//! actor holds against the level a command requires. Where levels come from is
//! the business of a [`PermissionStore`], which the core only ever reads.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A totally ordered permission level.
///
/// `Banned < Normal < Admin < Owner < SuperAdmin`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum PermissionLevel {
    Banned,
    #[default]
    Normal,
    Admin,
    Owner,
    SuperAdmin,
}

impl PermissionLevel {
    /// Returns `true` if this level is at least `required`.
    pub fn satisfies(self, required: PermissionLevel) -> bool {
        self >= required
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Banned => "banned",
            Self::Normal => "normal",
            Self::Admin => "admin",
            Self::Owner => "owner",
            Self::SuperAdmin => "super_admin",
        }
    }
}

impl fmt::Display for PermissionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PermissionLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "banned" => Ok(Self::Banned),
            "normal" => Ok(Self::Normal),
            "admin" => Ok(Self::Admin),
            "owner" => Ok(Self::Owner),
            "super_admin" | "superadmin" => Ok(Self::SuperAdmin),
            other => Err(format!("unknown permission level '{other}'")),
        }
    }
}

/// Read-only source of actor permission levels.
///
/// Implementations typically sit in front of a database; whatever caching or
/// consistency they need is their own concern.
#[async_trait]
pub trait PermissionStore: Send + Sync + 'static {
    /// Returns the level held by `actor_id`.
    async fn get_level(&self, actor_id: &str) -> PermissionLevel;
}

/// A shared permission store.
pub type BoxedPermissionStore = Arc<dyn PermissionStore>;

/// An in-memory [`PermissionStore`] with a fallback level.
///
/// Populated from configuration; unknown actors get the default level.
#[derive(Debug, Clone, Default)]
pub struct StaticPermissionStore {
    default_level: PermissionLevel,
    levels: HashMap<String, PermissionLevel>,
}

impl StaticPermissionStore {
    pub fn new(default_level: PermissionLevel) -> Self {
        Self {
            default_level,
            levels: HashMap::new(),
        }
    }

    /// Assigns `level` to `actor_id` (builder pattern).
    pub fn with_level(mut self, actor_id: impl Into<String>, level: PermissionLevel) -> Self {
        self.levels.insert(actor_id.into(), level);
        self
    }

    /// Extends the table from `(actor, level)` pairs.
    pub fn with_levels<I, S>(mut self, levels: I) -> Self
    where
        I: IntoIterator<Item = (S, PermissionLevel)>,
        S: Into<String>,
    {
        self.levels
            .extend(levels.into_iter().map(|(actor, level)| (actor.into(), level)));
        self
    }
}

#[async_trait]
impl PermissionStore for StaticPermissionStore {
    async fn get_level(&self, actor_id: &str) -> PermissionLevel {
        self.levels
            .get(actor_id)
            .copied()
            .unwrap_or(self.default_level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_order() {
        use PermissionLevel::*;
        let ordered = [Banned, Normal, Admin, Owner, SuperAdmin];
        for pair in ordered.windows(2) {
            assert!(pair[0] < pair[1]);
            assert!(pair[1].satisfies(pair[0]));
            assert!(!pair[0].satisfies(pair[1]));
        }
        assert!(Admin.satisfies(Admin));
    }

    #[test]
    fn test_parse_roundtrip_names() {
        assert_eq!("super-admin".parse(), Ok(PermissionLevel::SuperAdmin));
        assert_eq!("Admin".parse(), Ok(PermissionLevel::Admin));
        assert!("root".parse::<PermissionLevel>().is_err());
        assert_eq!(PermissionLevel::Owner.to_string(), "owner");
    }

    #[tokio::test]
    async fn test_static_store() {
        let store = StaticPermissionStore::new(PermissionLevel::Normal)
            .with_level("1", PermissionLevel::Owner)
            .with_levels([("2", PermissionLevel::Banned)]);

        assert_eq!(store.get_level("1").await, PermissionLevel::Owner);
        assert_eq!(store.get_level("2").await, PermissionLevel::Banned);
        assert_eq!(store.get_level("3").await, PermissionLevel::Normal);
    }
}
