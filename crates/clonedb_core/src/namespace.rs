//! Namespaces: database + collection name pairs.

use std::fmt;

/// Prefix shared by all system collections.
const SYSTEM_PREFIX: &str = "system.";

/// Maximum length of a full `db.collection` name.
pub const MAX_NAMESPACE_LEN: usize = 255;

/// Identifies a document collection within a database.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Namespace {
    db: String,
    coll: String,
}

impl Namespace {
    /// Creates a namespace from its parts.
    pub fn new(db: impl Into<String>, coll: impl Into<String>) -> Self {
        Self {
            db: db.into(),
            coll: coll.into(),
        }
    }

    /// Parses `db.collection`. The collection part may itself contain dots.
    #[must_use]
    pub fn parse(full: &str) -> Option<Self> {
        let (db, coll) = full.split_once('.')?;
        if db.is_empty() || coll.is_empty() {
            return None;
        }
        Some(Self::new(db, coll))
    }

    /// Returns the database name.
    #[must_use]
    pub fn db(&self) -> &str {
        &self.db
    }

    /// Returns the collection name.
    #[must_use]
    pub fn coll(&self) -> &str {
        &self.coll
    }

    /// Returns true for collections in the reserved `system.` space.
    #[must_use]
    pub fn is_system(&self) -> bool {
        self.coll.starts_with(SYSTEM_PREFIX)
    }

    /// Returns true for system collections that clients may create and
    /// that are therefore carried over by a clone.
    #[must_use]
    pub fn is_legal_client_system(&self) -> bool {
        match (self.db.as_str(), self.coll.as_str()) {
            (_, "system.js") | (_, "system.views") => true,
            ("admin", coll) => matches!(
                coll,
                "system.users"
                    | "system.roles"
                    | "system.version"
                    | "system.new_users"
                    | "system.backup_users"
            ),
            ("config", coll) => matches!(coll, "system.sessions" | "system.indexBuilds"),
            _ => false,
        }
    }

    /// Checks that a client is allowed to create this namespace.
    ///
    /// # Errors
    ///
    /// Returns a description of the first rule the name violates.
    pub fn check_user_create(&self) -> Result<(), String> {
        if self.db.is_empty() || self.coll.is_empty() {
            return Err(format!("invalid namespace '{self}': empty name"));
        }
        if self.db.contains(['.', '$', '\0', '/', '\\', ' ']) {
            return Err(format!("invalid database name '{}'", self.db));
        }
        if self.coll.contains(['$', '\0']) {
            return Err(format!("invalid collection name '{}'", self.coll));
        }
        if self.coll.starts_with('.') {
            return Err(format!("collection name '{}' starts with '.'", self.coll));
        }
        if self.db.len() + 1 + self.coll.len() > MAX_NAMESPACE_LEN {
            return Err(format!("namespace '{self}' is too long"));
        }
        if self.is_system() && !self.is_legal_client_system() {
            return Err(format!("cannot create system collection '{self}'"));
        }
        Ok(())
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.db, self.coll)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_and_parse() {
        let nss = Namespace::new("shop", "orders.archive");
        assert_eq!(nss.to_string(), "shop.orders.archive");
        assert_eq!(Namespace::parse("shop.orders.archive"), Some(nss));
        assert_eq!(Namespace::parse("noseparator"), None);
        assert_eq!(Namespace::parse(".coll"), None);
    }

    #[test]
    fn system_classification() {
        assert!(!Namespace::new("shop", "orders").is_system());
        assert!(Namespace::new("shop", "system.profile").is_system());
        assert!(!Namespace::new("shop", "system.profile").is_legal_client_system());
        assert!(Namespace::new("shop", "system.js").is_legal_client_system());
        assert!(Namespace::new("admin", "system.users").is_legal_client_system());
        assert!(!Namespace::new("shop", "system.users").is_legal_client_system());
        assert!(Namespace::new("config", "system.sessions").is_legal_client_system());
    }

    #[test]
    fn user_create_rules() {
        assert!(Namespace::new("shop", "orders").check_user_create().is_ok());
        assert!(Namespace::new("shop", "system.js").check_user_create().is_ok());
        assert!(Namespace::new("shop", "a$b").check_user_create().is_err());
        assert!(Namespace::new("shop", ".hidden").check_user_create().is_err());
        assert!(Namespace::new("sh op", "orders").check_user_create().is_err());
        assert!(Namespace::new("shop", "system.profile")
            .check_user_create()
            .is_err());
        let long = "x".repeat(MAX_NAMESPACE_LEN);
        assert!(Namespace::new("shop", long).check_user_create().is_err());
    }
}
