//! Request descriptors and the key used to coalesce them.

use std::collections::BTreeMap;
use std::fmt;

/// What a resource is used for. Informational only: it never takes part in
/// the coalescing key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ResourceKind {
    #[default]
    Unknown,
    Style,
    Source,
    Tile,
    Glyphs,
    SpriteImage,
    SpriteJson,
    Image,
}

/// Caller-supplied description of a resource to fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    pub kind: ResourceKind,
    pub url: String,
    /// Extra request headers ("Name" -> "value").
    pub headers: BTreeMap<String, String>,
}

impl Resource {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            kind: ResourceKind::Unknown,
            url: url.into(),
            headers: BTreeMap::new(),
        }
    }

    pub fn tile(url: impl Into<String>) -> Self {
        Self::new(url).with_kind(ResourceKind::Tile)
    }

    pub fn with_kind(mut self, kind: ResourceKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn key(&self) -> ResourceKey {
        ResourceKey::from(self)
    }
}

/// Identity under which requests are coalesced.
///
/// Two descriptors share a key if and only if their URL strings are byte-for-byte
/// identical. Scheme, host case and query order are not normalised; headers and
/// kind are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey(String);

impl ResourceKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&Resource> for ResourceKey {
    fn from(resource: &Resource) -> Self {
        Self(resource.url.clone())
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
