//! Migration script sources.

use std::collections::BTreeMap;
use std::path::Path;

use super::MigrationScript;
use crate::core::DialectKind;
use crate::error::MigrationError;

const SQLITE_SCRIPTS: &[(u64, &str, &str)] = &[
    (
        1,
        "reference_tables",
        include_str!("../../migrations/sqlite/0001_reference_tables.sql"),
    ),
    (2, "members", include_str!("../../migrations/sqlite/0002_members.sql")),
    (3, "events", include_str!("../../migrations/sqlite/0003_events.sql")),
];

const POSTGRES_SCRIPTS: &[(u64, &str, &str)] = &[
    (
        1,
        "reference_tables",
        include_str!("../../migrations/postgres/0001_reference_tables.sql"),
    ),
    (2, "members", include_str!("../../migrations/postgres/0002_members.sql")),
    (3, "events", include_str!("../../migrations/postgres/0003_events.sql")),
];

/// An ordered set of scripts with unique versions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationSet {
    scripts: Vec<MigrationScript>,
}

impl MigrationSet {
    /// Builds a set, sorting by version.
    pub fn new(mut scripts: Vec<MigrationScript>) -> Result<Self, MigrationError> {
        scripts.sort_by_key(|s| s.version);
        if let Some(pair) = scripts.windows(2).find(|w| w[0].version == w[1].version) {
            return Err(MigrationError::DuplicateVersion {
                version: pair[0].version,
            });
        }
        Ok(Self { scripts })
    }

    /// The scripts compiled into the crate for `dialect`.
    pub fn embedded(dialect: DialectKind) -> Self {
        let table = match dialect {
            DialectKind::Sqlite => SQLITE_SCRIPTS,
            DialectKind::Postgres => POSTGRES_SCRIPTS,
        };
        Self {
            scripts: table
                .iter()
                .map(|(version, name, body)| MigrationScript::new(*version, *name, *body))
                .collect(),
        }
    }

    /// Loads `*.sql` scripts from `dir` for `dialect`.
    ///
    /// `0002_members.sql` applies to every dialect; `0002_members.sqlite.sql`
    /// applies only to SQLite and replaces a generic script of the same
    /// version. Files without a `.sql` extension are ignored.
    pub fn from_dir(dir: impl AsRef<Path>, dialect: DialectKind) -> Result<Self, MigrationError> {
        let dir = dir.as_ref();
        let source_error = |e: std::io::Error| MigrationError::Source {
            path: dir.display().to_string(),
            message: e.to_string(),
        };

        let mut generic: BTreeMap<u64, MigrationScript> = BTreeMap::new();
        let mut specific: BTreeMap<u64, MigrationScript> = BTreeMap::new();

        for entry in std::fs::read_dir(dir).map_err(source_error)? {
            let path = entry.map_err(source_error)?.path();
            if !path.is_file() {
                continue;
            }
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some(stem) = file_name.strip_suffix(".sql") else {
                continue;
            };

            let (stem, target) = match stem.rsplit_once('.') {
                Some((rest, suffix)) => match DialectKind::parse(suffix) {
                    Some(kind) => (rest, Some(kind)),
                    None => {
                        return Err(MigrationError::InvalidScriptName {
                            name: file_name.to_string(),
                        });
                    }
                },
                None => (stem, None),
            };
            if target.is_some_and(|kind| kind != dialect) {
                continue;
            }

            let (version, name) = parse_stem(stem).ok_or_else(|| MigrationError::InvalidScriptName {
                name: file_name.to_string(),
            })?;
            let body = std::fs::read_to_string(&path).map_err(|e| MigrationError::Source {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;

            let bucket = if target.is_some() {
                &mut specific
            } else {
                &mut generic
            };
            if bucket
                .insert(version, MigrationScript::new(version, name, body))
                .is_some()
            {
                return Err(MigrationError::DuplicateVersion { version });
            }
        }

        generic.extend(specific);
        tracing::debug!(dir = %dir.display(), dialect = %dialect, count = generic.len(), "Loaded migration scripts");
        Ok(Self {
            scripts: generic.into_values().collect(),
        })
    }

    /// Scripts in ascending version order.
    pub fn scripts(&self) -> &[MigrationScript] {
        &self.scripts
    }

    /// Number of scripts.
    pub fn len(&self) -> usize {
        self.scripts.len()
    }

    /// True when the set has no scripts.
    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty()
    }
}

fn parse_stem(stem: &str) -> Option<(u64, &str)> {
    let (prefix, name) = stem.split_once('_')?;
    if prefix.is_empty() || !prefix.bytes().all(|b| b.is_ascii_digit()) || name.is_empty() {
        return None;
    }
    Some((prefix.parse().ok()?, name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_sets_are_ordered_and_aligned() {
        let sqlite = MigrationSet::embedded(DialectKind::Sqlite);
        let postgres = MigrationSet::embedded(DialectKind::Postgres);
        let versions =
            |set: &MigrationSet| set.scripts().iter().map(|s| s.version).collect::<Vec<_>>();
        assert_eq!(versions(&sqlite), vec![1, 2, 3]);
        assert_eq!(versions(&sqlite), versions(&postgres));
        assert!(sqlite.scripts()[0].body.contains("CREATE TABLE IF NOT EXISTS roles"));
    }

    #[test]
    fn test_new_rejects_duplicates() {
        let err = MigrationSet::new(vec![
            MigrationScript::new(2, "a", "SELECT 1;"),
            MigrationScript::new(2, "b", "SELECT 2;"),
        ])
        .unwrap_err();
        assert!(matches!(err, MigrationError::DuplicateVersion { version: 2 }));
    }

    #[test]
    fn test_new_sorts_by_version() {
        let set = MigrationSet::new(vec![
            MigrationScript::new(3, "c", ""),
            MigrationScript::new(1, "a", ""),
        ])
        .unwrap();
        assert_eq!(set.scripts()[0].version, 1);
    }

    #[test]
    fn test_parse_stem() {
        assert_eq!(parse_stem("0001_init"), Some((1, "init")));
        assert_eq!(parse_stem("12_add_index"), Some((12, "add_index")));
        assert_eq!(parse_stem("init"), None);
        assert_eq!(parse_stem("v1_init"), None);
        assert_eq!(parse_stem("0001_"), None);
    }

    #[test]
    fn test_from_dir_prefers_dialect_variant() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("0001_init.sql"), "CREATE TABLE a (id INTEGER);").unwrap();
        std::fs::write(dir.path().join("0002_more.sql"), "generic").unwrap();
        std::fs::write(dir.path().join("0002_more.sqlite.sql"), "sqlite only").unwrap();
        std::fs::write(dir.path().join("0003_pg.postgres.sql"), "pg only").unwrap();
        std::fs::write(dir.path().join("README.md"), "ignored").unwrap();

        let set = MigrationSet::from_dir(dir.path(), DialectKind::Sqlite).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.scripts()[1].body, "sqlite only");

        let set = MigrationSet::from_dir(dir.path(), DialectKind::Postgres).unwrap();
        assert_eq!(set.len(), 3);
        assert_eq!(set.scripts()[1].body, "generic");
    }

    #[test]
    fn test_from_dir_rejects_bad_names() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("init.sql"), "").unwrap();
        let err = MigrationSet::from_dir(dir.path(), DialectKind::Sqlite).unwrap_err();
        assert!(matches!(err, MigrationError::InvalidScriptName { .. }));
    }

    #[test]
    fn test_from_dir_rejects_duplicate_versions() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("0001_a.sql"), "").unwrap();
        std::fs::write(dir.path().join("1_b.sql"), "").unwrap();
        let err = MigrationSet::from_dir(dir.path(), DialectKind::Sqlite).unwrap_err();
        assert!(matches!(err, MigrationError::DuplicateVersion { version: 1 }));
    }

    #[test]
    fn test_from_missing_dir() {
        let err = MigrationSet::from_dir("/nonexistent/guild/migrations", DialectKind::Sqlite)
            .unwrap_err();
        assert!(matches!(err, MigrationError::Source { .. }));
    }
}
