//! Schema and view synthesis.
//!
//! Derives a type table's column layout from the record's field tree under
//! the active nesting mode, and renders the DDL for type tables and topic
//! views.

use std::sync::Arc;

use sea_query::{Alias, SqliteQueryBuilder, Table};

use super::catalog::ColumnLayout;
use super::naming::{quote_ident, quote_literal};
use super::schema::{BASE_COLUMNS, COL_ID, COL_TOPIC, NESTING_COLUMNS, VIEW_METADATA_COLUMNS};
use crate::config::NestingMode;
use crate::model::{FieldDef, FieldKind, MessageType, ScalarKind};

/// Column type of a message array kept inline.
pub const SQL_JSON: &str = "JSON";
/// Column type of a reference to one child row.
pub const SQL_CHILD_REF: &str = "INTEGER";
/// Column type of a JSON list of child row ids.
pub const SQL_CHILDREN_REF: &str = "INTEGER[]";

/// Column type for a scalar kind.
pub fn sql_type(kind: ScalarKind) -> &'static str {
    match kind {
        ScalarKind::Float32 | ScalarKind::Float64 => "REAL",
        ScalarKind::String => "TEXT",
        ScalarKind::Bytes => "BLOB",
        _ => "INTEGER",
    }
}

/// Column type for an array of a scalar kind.
pub fn sql_array_type(kind: ScalarKind) -> String {
    format!("{}[]", sql_type(kind))
}

/// Join a field name onto a dotted path prefix.
pub fn join_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", prefix, name)
    }
}

/// Column layout for a type: user fields in field order, then metadata.
pub fn derive_layout(msg_type: &MessageType, mode: NestingMode) -> ColumnLayout {
    let mut layout = ColumnLayout::default();
    push_fields(&mut layout, msg_type.fields(), "", mode);
    for (name, sql_type) in BASE_COLUMNS {
        layout.push(name, sql_type);
    }
    if mode.is_enabled() {
        for (name, sql_type) in NESTING_COLUMNS {
            layout.push(name, sql_type);
        }
    }
    layout
}

fn push_fields(layout: &mut ColumnLayout, fields: &[FieldDef], prefix: &str, mode: NestingMode) {
    for field in fields {
        let path = join_path(prefix, &field.name);
        match &field.kind {
            FieldKind::Scalar(kind) => layout.push(path, sql_type(*kind)),
            FieldKind::ScalarArray(kind) => layout.push(path, sql_array_type(*kind)),
            FieldKind::Message(_) if mode.nests_messages() => layout.push(path, SQL_CHILD_REF),
            FieldKind::Message(nested) => push_fields(layout, nested.fields(), &path, mode),
            FieldKind::MessageArray(_) if mode.nests_arrays() => {
                layout.push(path, SQL_CHILDREN_REF)
            }
            FieldKind::MessageArray(_) => layout.push(path, SQL_JSON),
        }
    }
}

/// Nested fields that get their own child table, in field order.
///
/// A field nests when the mode allows it and the layout holds a reference
/// column for its path, so layouts created under another mode stay
/// consistent with the rows written into them.
pub fn nested_fields(
    msg_type: &MessageType,
    mode: NestingMode,
    layout: &ColumnLayout,
) -> Vec<(String, Arc<MessageType>)> {
    let mut nested = Vec::new();
    collect_nested(&mut nested, msg_type.fields(), "", mode, layout);
    nested
}

fn collect_nested(
    out: &mut Vec<(String, Arc<MessageType>)>,
    fields: &[FieldDef],
    prefix: &str,
    mode: NestingMode,
    layout: &ColumnLayout,
) {
    for field in fields {
        let path = join_path(prefix, &field.name);
        match &field.kind {
            FieldKind::Message(t) if mode.nests_messages() && is_ref(layout, &path, SQL_CHILD_REF) => {
                out.push((path, t.clone()))
            }
            FieldKind::Message(t) => collect_nested(out, t.fields(), &path, mode, layout),
            FieldKind::MessageArray(t)
                if mode.nests_arrays() && is_ref(layout, &path, SQL_CHILDREN_REF) =>
            {
                out.push((path, t.clone()))
            }
            _ => {}
        }
    }
}

fn is_ref(layout: &ColumnLayout, path: &str, sql_type: &str) -> bool {
    layout.get(path).is_some_and(|c| c.sql_type == sql_type)
}

/// Render a column type, quoting it when it is not a bare word.
fn render_type(sql_type: &str) -> String {
    if sql_type.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        sql_type.to_string()
    } else {
        quote_ident(sql_type)
    }
}

/// Drop-if-exists and create statements for a type table.
pub fn create_table_sql(table: &str, layout: &ColumnLayout) -> Vec<String> {
    let drop = Table::drop()
        .table(Alias::new(table))
        .if_exists()
        .to_string(SqliteQueryBuilder);

    let columns = layout
        .iter()
        .map(|c| {
            if c.name == COL_ID {
                format!("{} INTEGER NOT NULL PRIMARY KEY AUTOINCREMENT", quote_ident(&c.name))
            } else {
                format!("{} {}", quote_ident(&c.name), render_type(&c.sql_type))
            }
        })
        .collect::<Vec<_>>()
        .join(",\n    ");
    let create = format!("CREATE TABLE {} (\n    {}\n)", quote_ident(table), columns);

    vec![drop, create]
}

/// Statement adding one column to an existing type table.
pub fn add_column_sql(table: &str, column: &str, sql_type: &str) -> String {
    format!(
        "ALTER TABLE {} ADD COLUMN {} {}",
        quote_ident(table),
        quote_ident(column),
        render_type(sql_type)
    )
}

/// View selecting one topic's rows from its type table.
pub fn create_view_sql(view: &str, table: &str, layout: &ColumnLayout, topic: &str) -> String {
    let columns = layout
        .names()
        .filter(|name| !name.starts_with('_') || VIEW_METADATA_COLUMNS.contains(name))
        .map(quote_ident)
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "CREATE VIEW {} AS SELECT {} FROM {} WHERE {} = {}",
        quote_ident(view),
        columns,
        quote_ident(table),
        quote_ident(COL_TOPIC),
        quote_literal(topic)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FieldDef;

    fn point() -> Arc<MessageType> {
        Arc::new(MessageType::new(
            "geometry_msgs/Point",
            vec![
                FieldDef::scalar("x", ScalarKind::Float64),
                FieldDef::scalar("y", ScalarKind::Float64),
            ],
        ))
    }

    fn path_type() -> MessageType {
        MessageType::new(
            "nav/Path",
            vec![
                FieldDef::scalar("name", ScalarKind::String),
                FieldDef::array("flags", ScalarKind::UInt8),
                FieldDef::message("origin", point()),
                FieldDef::messages("points", point()),
            ],
        )
    }

    fn user_columns(layout: &ColumnLayout) -> Vec<(String, String)> {
        layout
            .iter()
            .filter(|c| !c.name.starts_with('_'))
            .map(|c| (c.name.clone(), c.sql_type.clone()))
            .collect()
    }

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(a, b)| (a.to_string(), b.to_string()))
            .collect()
    }

    #[test]
    fn test_layout_off_flattens_and_inlines() {
        let layout = derive_layout(&path_type(), NestingMode::Off);
        assert_eq!(
            user_columns(&layout),
            pairs(&[
                ("name", "TEXT"),
                ("flags", "INTEGER[]"),
                ("origin.x", "REAL"),
                ("origin.y", "REAL"),
                ("points", "JSON"),
            ])
        );
        assert!(!layout.has_nesting_columns());
        let tail: Vec<&str> = layout.names().skip(5).collect();
        assert_eq!(tail, vec!["_topic", "_topic_id", "_dt", "_timestamp", "_id"]);
    }

    #[test]
    fn test_layout_array_nests_only_arrays() {
        let t = path_type();
        let layout = derive_layout(&t, NestingMode::Array);
        assert_eq!(layout.get("points").unwrap().sql_type, "INTEGER[]");
        assert!(layout.contains("origin.x"));
        assert!(layout.has_nesting_columns());

        let nested = nested_fields(&t, NestingMode::Array, &layout);
        let paths: Vec<&str> = nested.iter().map(|(p, _)| p.as_str()).collect();
        assert_eq!(paths, vec!["points"]);
    }

    #[test]
    fn test_layout_all_nests_scalar_messages() {
        let t = path_type();
        let layout = derive_layout(&t, NestingMode::All);
        assert_eq!(layout.get("origin").unwrap().sql_type, "INTEGER");
        assert!(!layout.contains("origin.x"));

        let nested = nested_fields(&t, NestingMode::All, &layout);
        let paths: Vec<&str> = nested.iter().map(|(p, _)| p.as_str()).collect();
        assert_eq!(paths, vec!["origin", "points"]);
    }

    #[test]
    fn test_nested_fields_respect_existing_layout() {
        let t = path_type();
        let layout = derive_layout(&t, NestingMode::Off);
        assert!(nested_fields(&t, NestingMode::All, &layout).is_empty());
    }

    #[test]
    fn test_create_table_sql() {
        let mut layout = ColumnLayout::default();
        layout.push("range", "REAL");
        layout.push("ranges", "REAL[]");
        layout.push("_id", "INTEGER");

        let sql = create_table_sql("Range", &layout);
        assert_eq!(sql[0], r#"DROP TABLE IF EXISTS "Range""#);
        assert_eq!(
            sql[1],
            "CREATE TABLE \"Range\" (\n    \"range\" REAL,\n    \"ranges\" \"REAL[]\",\n    \"_id\" INTEGER NOT NULL PRIMARY KEY AUTOINCREMENT\n)"
        );
    }

    #[test]
    fn test_create_view_sql_selects_user_and_whitelisted_columns() {
        let layout = derive_layout(
            &MessageType::new("x/Range", vec![FieldDef::scalar("range", ScalarKind::Float32)]),
            NestingMode::All,
        );
        let sql = create_view_sql("/scan", "Range", &layout, "/scan");
        assert_eq!(
            sql,
            r#"CREATE VIEW "/scan" AS SELECT "range", "_topic", "_dt", "_timestamp", "_id" FROM "Range" WHERE "_topic" = '/scan'"#
        );
    }

    #[test]
    fn test_add_column_sql() {
        assert_eq!(
            add_column_sql("Point (ab)", "_parent_id", "INTEGER"),
            r#"ALTER TABLE "Point (ab)" ADD COLUMN "_parent_id" INTEGER"#
        );
    }
}
