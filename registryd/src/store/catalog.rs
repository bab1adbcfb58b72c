use std::collections::HashMap;
use rusqlite::{Connection, params, OptionalExtension};
use crate::error::{RegistryError, RegistryResult};

/// Closed vocabulary of version tags. The registry only ever resolves names;
/// the list itself is maintained outside the core (seeded from config).
#[derive(Debug, Clone, Default)]
pub struct VersionTagCatalog {
    tags: HashMap<String, i64>,
}

impl VersionTagCatalog {
    /// Build a catalog assigning ids in order of first appearance
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut tags = HashMap::new();
        for name in names {
            let next_id = tags.len() as i64 + 1;
            tags.entry(name.into()).or_insert(next_id);
        }
        Self { tags }
    }

    /// Build a catalog from stored (id, tag_name) pairs
    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (i64, String)>,
    {
        Self {
            tags: entries.into_iter().map(|(id, name)| (name, id)).collect(),
        }
    }

    pub fn resolve(&self, tag_name: &str) -> RegistryResult<i64> {
        self.tags
            .get(tag_name)
            .copied()
            .ok_or_else(|| RegistryError::InvalidVersionTag(tag_name.to_string()))
    }

    /// Entries as (id, tag_name), ordered by id
    pub fn entries(&self) -> Vec<(i64, String)> {
        let mut entries: Vec<(i64, String)> = self
            .tags
            .iter()
            .map(|(name, id)| (*id, name.clone()))
            .collect();
        entries.sort();
        entries
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }
}

/// Resolve a tag name against the `version_tag` table
pub fn resolve_tag(conn: &Connection, tag_name: &str) -> RegistryResult<i64> {
    conn.query_row(
        "SELECT id FROM version_tag WHERE tag_name = ?1",
        params![tag_name],
        |row| row.get(0),
    )
    .optional()?
    .ok_or_else(|| RegistryError::InvalidVersionTag(tag_name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_known_and_unknown() {
        let catalog = VersionTagCatalog::from_names(["stable", "beta"]);

        assert_eq!(catalog.resolve("stable").unwrap(), 1);
        assert_eq!(catalog.resolve("beta").unwrap(), 2);
        assert!(matches!(
            catalog.resolve("nightly"),
            Err(RegistryError::InvalidVersionTag(tag)) if tag == "nightly"
        ));
    }

    #[test]
    fn test_duplicate_names_keep_first_id() {
        let catalog = VersionTagCatalog::from_names(["stable", "beta", "stable", "canary"]);

        assert_eq!(catalog.len(), 3);
        assert_eq!(
            catalog.entries(),
            vec![
                (1, "stable".to_string()),
                (2, "beta".to_string()),
                (3, "canary".to_string()),
            ]
        );
    }

    #[test]
    fn test_from_entries_keeps_stored_ids() {
        let catalog = VersionTagCatalog::from_entries([
            (2, "beta".to_string()),
            (5, "canary".to_string()),
        ]);

        assert_eq!(catalog.resolve("beta").unwrap(), 2);
        assert_eq!(catalog.resolve("canary").unwrap(), 5);
        assert_eq!(catalog.entries(), vec![(2, "beta".to_string()), (5, "canary".to_string())]);
    }

    #[test]
    fn test_lookup_is_exact_match() {
        let catalog = VersionTagCatalog::from_names(["stable"]);
        assert!(catalog.resolve("Stable").is_err());
        assert!(catalog.resolve("stab").is_err());
        assert!(catalog.resolve("").is_err());
    }
}
