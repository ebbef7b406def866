//! Table definitions for the application schema created by the embedded
//! migrations.

use crate::facade::{ColumnType, IdStrategy, TableDef};

/// `roles`: member roles, seeded reference data keyed by `slug`.
pub fn roles() -> TableDef {
    TableDef::new("roles", "id", IdStrategy::Generated)
        .column("slug", ColumnType::Text)
        .column("name", ColumnType::Text)
        .nullable("description", ColumnType::Text)
        .column("is_active", ColumnType::Bool)
        .column("created_at", ColumnType::Timestamp)
        .soft_delete("deleted_at")
}

/// `membership_tiers`: seeded reference data keyed by `slug`.
pub fn membership_tiers() -> TableDef {
    TableDef::new("membership_tiers", "id", IdStrategy::Generated)
        .column("slug", ColumnType::Text)
        .column("name", ColumnType::Text)
        .column("monthly_fee", ColumnType::Real)
        .column("sort_order", ColumnType::Integer)
        .column("created_at", ColumnType::Timestamp)
        .soft_delete("deleted_at")
}

/// `event_categories`: seeded reference data keyed by `slug`.
pub fn event_categories() -> TableDef {
    TableDef::new("event_categories", "id", IdStrategy::Generated)
        .column("slug", ColumnType::Text)
        .column("name", ColumnType::Text)
        .column("is_public", ColumnType::Bool)
        .column("created_at", ColumnType::Timestamp)
        .soft_delete("deleted_at")
}

/// `members`: guild members, identified by client-generated UUIDs.
pub fn members() -> TableDef {
    TableDef::new("members", "id", IdStrategy::ClientUuid)
        .column("email", ColumnType::Text)
        .column("display_name", ColumnType::Text)
        .column("role_slug", ColumnType::Text)
        .nullable("tier_slug", ColumnType::Text)
        .column("is_active", ColumnType::Bool)
        .column("joined_at", ColumnType::Timestamp)
        .column("created_at", ColumnType::Timestamp)
        .soft_delete("deleted_at")
}

/// `events`: scheduled guild events.
pub fn events() -> TableDef {
    TableDef::new("events", "id", IdStrategy::Generated)
        .column("title", ColumnType::Text)
        .column("category_slug", ColumnType::Text)
        .nullable("organizer_id", ColumnType::Uuid)
        .column("starts_at", ColumnType::Timestamp)
        .nullable("capacity", ColumnType::Integer)
        .column("is_published", ColumnType::Bool)
        .column("created_at", ColumnType::Timestamp)
        .soft_delete("deleted_at")
}

/// Every application table, in creation order.
pub fn all() -> Vec<TableDef> {
    vec![roles(), membership_tiers(), event_categories(), members(), events()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_tables() {
        let names: Vec<_> = all().iter().map(|t| t.name().to_string()).collect();
        assert_eq!(
            names,
            ["roles", "membership_tiers", "event_categories", "members", "events"]
        );
        assert!(all().iter().all(|t| t.soft_delete_column() == Some("deleted_at")));
    }

    #[test]
    fn test_members_use_client_ids() {
        assert_eq!(members().id_strategy(), IdStrategy::ClientUuid);
        assert_eq!(roles().id_strategy(), IdStrategy::Generated);
    }
}
