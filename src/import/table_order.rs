use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Roles,
    Users,
    Tags,
    Subscribers,
    Posts,
    Settings,
}

/// Fixed execution order. Producers come before their consumers: roles feed
/// users, users feed tags and posts, tags feed posts. Settings stand alone.
pub const IMPORT_ORDER: [EntityType; 6] = [
    EntityType::Roles,
    EntityType::Users,
    EntityType::Tags,
    EntityType::Subscribers,
    EntityType::Posts,
    EntityType::Settings,
];

impl EntityType {
    pub const fn as_str(self) -> &'static str {
        match self {
            EntityType::Roles => "roles",
            EntityType::Users => "users",
            EntityType::Tags => "tags",
            EntityType::Subscribers => "subscribers",
            EntityType::Posts => "posts",
            EntityType::Settings => "settings",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown entity type: {0}")]
pub struct UnknownEntityType(pub String);

impl FromStr for EntityType {
    type Err = UnknownEntityType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        IMPORT_ORDER
            .iter()
            .copied()
            .find(|entity| entity.as_str() == s)
            .ok_or_else(|| UnknownEntityType(s.to_string()))
    }
}
