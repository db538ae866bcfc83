use std::fmt;
use std::str::FromStr;

use crate::RegistryError;

/// Namespace that method names without an explicit namespace resolve into.
pub const DEFAULT_NAMESPACE: &str = "game";

/// Path prefix of every server-initiated notification, keeping them apart from request methods in
/// the discovery listing.
pub const NOTIFICATION_PREFIX: &str = "notification/";

/// Identifier of a management method, `namespace:path`.
///
/// On the wire the namespace may be left off, in which case [`DEFAULT_NAMESPACE`] is assumed, so
/// `players` and `game:players` name the same method.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodId {
    namespace: String,
    path: String,
}

impl MethodId {
    pub fn new(namespace: impl Into<String>, path: impl Into<String>) -> Result<Self, RegistryError> {
        let namespace = namespace.into();
        let path = path.into();

        let invalid = |reason| RegistryError::InvalidMethodId {
            id: format!("{namespace}:{path}"),
            reason,
        };

        if !is_valid_namespace(&namespace) {
            return Err(invalid("namespace must be non-empty and contain only [a-z0-9_.-]"));
        }
        if !is_valid_path(&path) {
            return Err(invalid("path must be non-empty and contain only [a-z0-9_./-]"));
        }

        Ok(Self { namespace, path })
    }

    /// A method in the default `game` namespace.
    pub fn game(path: impl Into<String>) -> Result<Self, RegistryError> {
        Self::new(DEFAULT_NAMESPACE, path)
    }

    /// A notification method; `path` gets the [`NOTIFICATION_PREFIX`].
    pub fn notification(namespace: impl Into<String>, path: &str) -> Result<Self, RegistryError> {
        Self::new(namespace, format!("{NOTIFICATION_PREFIX}{path}"))
    }

    /// Resolve a method name received from a peer.
    ///
    /// Returns `None` if the name can't be a method id at all, which callers report the same way
    /// as a method that isn't registered.
    pub fn resolve(name: &str) -> Option<Self> {
        let (namespace, path) = match name.split_once(':') {
            Some((namespace, path)) => (namespace, path),
            None => (DEFAULT_NAMESPACE, name),
        };

        (is_valid_namespace(namespace) && is_valid_path(path)).then(|| Self {
            namespace: namespace.to_string(),
            path: path.to_string(),
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_notification(&self) -> bool {
        self.path.starts_with(NOTIFICATION_PREFIX)
    }
}

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.path)
    }
}

impl FromStr for MethodId {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::resolve(s).ok_or_else(|| RegistryError::InvalidMethodId {
            id: s.to_string(),
            reason: "not a valid method name",
        })
    }
}

fn is_valid_namespace(namespace: &str) -> bool {
    !namespace.is_empty()
        && namespace
            .bytes()
            .all(|b| matches!(b, b'a'..=b'z' | b'0'..=b'9' | b'_' | b'.' | b'-'))
}

fn is_valid_path(path: &str) -> bool {
    !path.is_empty()
        && path
            .bytes()
            .all(|b| matches!(b, b'a'..=b'z' | b'0'..=b'9' | b'_' | b'.' | b'/' | b'-'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn bare_names_resolve_to_the_default_namespace() {
        let id = MethodId::resolve("allowlist/add").unwrap();
        assert_eq!(id.namespace(), "game");
        assert_eq!(id.path(), "allowlist/add");
        assert_eq!(id, MethodId::resolve("game:allowlist/add").unwrap());
        assert_eq!(id.to_string(), "game:allowlist/add");
    }

    #[test]
    fn unresolvable_names() {
        for name in ["", ":", "game:", ":players", "Players", "game:players list", "a:b:c", "rpc discover"] {
            assert_eq!(MethodId::resolve(name), None, "{name:?} should not resolve");
        }
    }

    #[test]
    fn rpc_discover_is_a_valid_path() {
        let id = MethodId::resolve("rpc.discover").unwrap();
        assert_eq!(id, MethodId::game("rpc.discover").unwrap());
    }

    #[test]
    fn notification_ids() {
        let id = MethodId::notification("game", "players/joined").unwrap();
        assert_eq!(id.to_string(), "game:notification/players/joined");
        assert!(id.is_notification());
        assert!(!MethodId::game("players").unwrap().is_notification());
    }

    #[test]
    fn construction_validates() {
        assert_matches!(MethodId::new("Game", "players"), Err(RegistryError::InvalidMethodId { .. }));
        assert_matches!(MethodId::game("players/"), Ok(_));
        assert_matches!(MethodId::game("players:kick"), Err(RegistryError::InvalidMethodId { .. }));
        assert_matches!("example:echo".parse::<MethodId>(), Ok(id) if id.namespace() == "example");
    }
}
