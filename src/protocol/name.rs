use std::{borrow::Borrow, sync::Arc};

use serde::{Deserialize, Serialize};
use typeshare::typeshare;

use crate::error::ErrorKind;

const FORBIDDEN: [char; 3] = [' ', '*', ';'];

/// Name of a queue, channel or router. Names are case-insensitive and are
/// normalised to lowercase on construction; `' '`, `'*'` and `';'` are
/// rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[typeshare(serialized_as = "String")]
pub struct EntityName(Arc<str>);

impl EntityName {
    pub fn new(name: impl AsRef<str>) -> Result<Self, crate::Error> {
        let name = name.as_ref().trim();
        if name.is_empty() || name.chars().any(|c| FORBIDDEN.contains(&c)) {
            return Err(crate::Error::new("entity name", ErrorKind::InvalidName));
        }
        Ok(Self(name.to_ascii_lowercase().into()))
    }
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EntityName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for EntityName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for EntityName {
    type Error = crate::Error;
    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl Serialize for EntityName {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for EntityName {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        use serde::de::Error;
        let s = String::deserialize(deserializer)?;
        EntityName::new(s).map_err(D::Error::custom)
    }
}

/// Unique id of a connected client. Assigned by the id generator when the
/// connecting side does not bring its own.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[typeshare(serialized_as = "String")]
#[serde(transparent)]
pub struct ClientId(Arc<str>);

impl ClientId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(id.as_ref().into())
    }
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for ClientId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ClientId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}
