//! Base schema and metadata column definitions.
//!
//! The three catalog tables always exist; type tables and topic views are
//! synthesized on demand by [`super::synth`].

use sea_query::Iden;

/// Flat log of every record written.
#[derive(Iden)]
pub enum Messages {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "dt"]
    Dt,
    #[iden = "timestamp"]
    Timestamp,
    #[iden = "topic"]
    Topic,
    #[iden = "type"]
    Type,
    #[iden = "topic_id"]
    TopicId,
    #[iden = "yaml"]
    Yaml,
    #[iden = "data"]
    Data,
}

/// Type registry.
#[derive(Iden)]
pub enum Types {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "type"]
    Type,
    #[iden = "definition"]
    Definition,
    #[iden = "hash"]
    Hash,
    #[iden = "table_name"]
    TableName,
    #[iden = "nested"]
    Nested,
    #[iden = "columns"]
    Columns,
}

/// Topic registry.
#[derive(Iden)]
pub enum Topics {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "name"]
    Name,
    #[iden = "type"]
    Type,
    #[iden = "hash"]
    Hash,
    #[iden = "table_name"]
    TableName,
    #[iden = "view_name"]
    ViewName,
    #[iden = "count"]
    Count,
    #[iden = "dt_first"]
    DtFirst,
    #[iden = "dt_last"]
    DtLast,
    #[iden = "timestamp_first"]
    TimestampFirst,
    #[iden = "timestamp_last"]
    TimestampLast,
}

/// Names of the always-present tables.
pub const RESERVED_TABLES: [&str; 3] = ["messages", "types", "topics"];

/// SQL for creating the catalog tables.
pub const CREATE_BASE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY,
    dt TIMESTAMP,
    timestamp INTEGER,
    topic TEXT,
    type TEXT,
    topic_id INTEGER,
    yaml TEXT,
    data BLOB
);

CREATE TABLE IF NOT EXISTS types (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    type TEXT,
    definition TEXT,
    hash TEXT,
    table_name TEXT,
    nested JSON,
    columns JSON
);

CREATE TABLE IF NOT EXISTS topics (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT,
    type TEXT,
    hash TEXT,
    table_name TEXT,
    view_name TEXT,
    count INTEGER DEFAULT 0,
    dt_first TIMESTAMP,
    dt_last TIMESTAMP,
    timestamp_first INTEGER,
    timestamp_last INTEGER
);
"#;

/// Counter and first/last update for a topic row.
///
/// `MIN(COALESCE(prior, v), v)` yields `v` while the prior is still NULL.
pub const UPDATE_TOPIC: &str = r#"
UPDATE topics SET count = count + 1,
    dt_first = MIN(COALESCE(dt_first, ?1), ?1),
    dt_last = MAX(COALESCE(dt_last, ?1), ?1),
    timestamp_first = MIN(COALESCE(timestamp_first, ?2), ?2),
    timestamp_last = MAX(COALESCE(timestamp_last, ?2), ?2)
WHERE id = ?3
"#;

pub const COL_TOPIC: &str = "_topic";
pub const COL_TOPIC_ID: &str = "_topic_id";
pub const COL_DT: &str = "_dt";
pub const COL_TIMESTAMP: &str = "_timestamp";
pub const COL_ID: &str = "_id";
pub const COL_PARENT_TYPE: &str = "_parent_type";
pub const COL_PARENT_ID: &str = "_parent_id";

/// Metadata columns appended after user fields in every type table.
pub const BASE_COLUMNS: [(&str, &str); 5] = [
    (COL_TOPIC, "TEXT"),
    (COL_TOPIC_ID, "INTEGER"),
    (COL_DT, "TIMESTAMP"),
    (COL_TIMESTAMP, "INTEGER"),
    (COL_ID, "INTEGER"),
];

/// Linkage columns appended when nesting is enabled.
pub const NESTING_COLUMNS: [(&str, &str); 2] = [(COL_PARENT_TYPE, "TEXT"), (COL_PARENT_ID, "INTEGER")];

/// Metadata columns exposed through topic views.
pub const VIEW_METADATA_COLUMNS: [&str; 4] = [COL_TOPIC, COL_DT, COL_TIMESTAMP, COL_ID];

/// SQL for listing existing tables and views.
pub const LIST_SCHEMA_NAMES: &str =
    "SELECT name, type FROM sqlite_master WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite_%'";
