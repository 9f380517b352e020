//! Table and view naming.
//!
//! Tables and views share one SQL namespace. A candidate name is kept
//! unless something else already owns it, in which case the definition
//! hash is appended: `"Point (2f1c...)"`. Names are compared the way
//! SQLite compares identifiers, ASCII case-insensitively, so `Point` and
//! `point` are the same name.

use std::collections::HashMap;

use super::schema::RESERVED_TABLES;

/// Kind of schema object a name is claimed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameCategory {
    Table,
    View,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Owner {
    /// Spelling the object was created with.
    name: String,
    category: NameCategory,
    /// `None` for objects not created by the catalog.
    hash: Option<String>,
}

/// Registry of every table and view name in the store, keyed by folded name.
#[derive(Debug, Clone, Default)]
pub struct NameRegistry {
    owners: HashMap<String, Owner>,
}

fn fold(name: &str) -> String {
    name.to_ascii_lowercase()
}

impl NameRegistry {
    pub fn new() -> Self {
        let mut registry = Self::default();
        for name in RESERVED_TABLES {
            registry.claim_foreign(name, NameCategory::Table);
        }
        registry
    }

    /// Record a name that exists in the store without catalog ownership.
    pub fn claim_foreign(&mut self, name: &str, category: NameCategory) {
        self.owners.insert(
            fold(name),
            Owner {
                name: name.to_string(),
                category,
                hash: None,
            },
        );
    }

    /// Record a catalog-owned name.
    pub fn claim(&mut self, name: &str, category: NameCategory, hash: &str) {
        self.owners.insert(
            fold(name),
            Owner {
                name: name.to_string(),
                category,
                hash: Some(hash.to_string()),
            },
        );
    }

    /// Derive a name for `candidate`, suffixing the hash on collision.
    pub fn make_name(&self, category: NameCategory, candidate: &str, hash: &str) -> String {
        match self.owners.get(&fold(candidate)) {
            Some(owner)
                if owner.name == candidate
                    && owner.category == category
                    && owner.hash.as_deref() == Some(hash) =>
            {
                candidate.to_string()
            }
            Some(_) => format!("{} ({})", candidate, hash),
            None => candidate.to_string(),
        }
    }
}

/// Last `/`- or `.`-separated segment of a type name.
pub fn base_name(type_name: &str) -> &str {
    type_name
        .rsplit(['/', '.'])
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or(type_name)
}

/// Quote an SQL identifier.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote an SQL string literal.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
