//! Type and topic catalogs.
//!
//! Owned by one store handle, rebuilt from the catalog tables on every open
//! and discarded on close. Nested-table relations are kept as an adjacency
//! map between type keys rather than as references between descriptors.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use sea_query::{Expr, Order, Query, SqliteQueryBuilder};
use sea_query_binder::SqlxBinder;
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqliteConnection};
use tracing::debug;

use super::naming::{quote_ident, NameCategory, NameRegistry};
use super::schema::{Topics, Types, LIST_SCHEMA_NAMES, NESTING_COLUMNS};
use crate::error::{Result, SinkError};
use crate::model::{Timestamp, TypeKey};

/// One column of a type table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub sql_type: String,
}

impl Column {
    pub fn new(name: impl Into<String>, sql_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql_type: sql_type.into(),
        }
    }
}

/// Ordered column layout of a type table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ColumnLayout(Vec<Column>);

impl ColumnLayout {
    pub fn push(&mut self, name: impl Into<String>, sql_type: impl Into<String>) {
        self.0.push(Column::new(name, sql_type));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.iter().any(|c| c.name == name)
    }

    pub fn get(&self, name: &str) -> Option<&Column> {
        self.0.iter().find(|c| c.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Column> {
        self.0.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|c| c.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn has_nesting_columns(&self) -> bool {
        NESTING_COLUMNS.iter().all(|(name, _)| self.contains(name))
    }
}

impl FromIterator<Column> for ColumnLayout {
    fn from_iter<I: IntoIterator<Item = Column>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Persisted description of one record type.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeDescriptor {
    /// Row id in the `types` table.
    pub id: i64,
    pub key: TypeKey,
    pub definition: String,
    pub table_name: String,
    pub columns: ColumnLayout,
    /// Nested field path to child table name.
    pub nested: BTreeMap<String, String>,
}

/// Identity of a topic: name plus the hash of its record type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TopicKey {
    pub name: String,
    pub hash: String,
}

impl TopicKey {
    pub fn new(name: impl Into<String>, hash: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hash: hash.into(),
        }
    }
}

/// Persisted description of one topic.
#[derive(Debug, Clone, PartialEq)]
pub struct TopicDescriptor {
    /// Row id in the `topics` table.
    pub id: i64,
    pub name: String,
    pub type_name: String,
    pub hash: String,
    pub table_name: String,
    pub view_name: Option<String>,
    pub count: i64,
    pub dt_first: Option<String>,
    pub dt_last: Option<String>,
    pub timestamp_first: Option<i64>,
    pub timestamp_last: Option<i64>,
}

impl TopicDescriptor {
    pub fn key(&self) -> TopicKey {
        TopicKey::new(&self.name, &self.hash)
    }

    pub fn type_key(&self) -> TypeKey {
        TypeKey::new(&self.type_name, &self.hash)
    }

    /// Apply one write to the in-memory counters, mirroring `UPDATE_TOPIC`.
    pub fn record(&mut self, timestamp: Timestamp) {
        let nanos = timestamp.as_nanos();
        let dt = timestamp.wall_clock();
        self.count += 1;
        self.timestamp_first = Some(self.timestamp_first.map_or(nanos, |v| v.min(nanos)));
        self.timestamp_last = Some(self.timestamp_last.map_or(nanos, |v| v.max(nanos)));
        self.dt_first = Some(match self.dt_first.take() {
            Some(prior) if prior <= dt => prior,
            _ => dt.clone(),
        });
        self.dt_last = Some(match self.dt_last.take() {
            Some(prior) if prior >= dt => prior,
            _ => dt,
        });
    }
}

/// In-memory view of the type and topic registries.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    types: BTreeMap<TypeKey, TypeDescriptor>,
    topics: BTreeMap<TopicKey, TopicDescriptor>,
    tables: HashMap<String, TypeKey>,
    links: BTreeMap<TypeKey, BTreeSet<TypeKey>>,
    names: NameRegistry,
}

impl Catalog {
    /// Empty catalog with only the reserved names claimed.
    pub fn new() -> Self {
        Self {
            names: NameRegistry::new(),
            ..Self::default()
        }
    }

    /// Load the catalog from an open store.
    pub async fn load(conn: &mut SqliteConnection) -> Result<Self> {
        let mut catalog = Self::new();

        for row in sqlx::query(LIST_SCHEMA_NAMES).fetch_all(&mut *conn).await? {
            let name: String = row.try_get(0)?;
            let kind: String = row.try_get(1)?;
            let category = if kind == "view" {
                NameCategory::View
            } else {
                NameCategory::Table
            };
            catalog.names.claim_foreign(&name, category);
        }

        let query = Query::select()
            .columns([
                Types::Id,
                Types::Type,
                Types::Definition,
                Types::Hash,
                Types::TableName,
                Types::Nested,
                Types::Columns,
            ])
            .from(Types::Table)
            .order_by(Types::Id, Order::Asc)
            .to_string(SqliteQueryBuilder);

        for row in sqlx::query(&query).fetch_all(&mut *conn).await? {
            let table_name: String = row.try_get(4)?;
            let nested: Option<String> = row.try_get(5)?;
            let columns: Option<String> = row.try_get(6)?;

            let columns = match columns {
                Some(json) => serde_json::from_str(&json)?,
                None => table_layout(conn, &table_name).await?,
            };
            let nested = match nested {
                Some(json) => serde_json::from_str(&json)?,
                None => BTreeMap::new(),
            };

            catalog.insert_type(TypeDescriptor {
                id: row.try_get(0)?,
                key: TypeKey::new(row.try_get::<String, _>(1)?, row.try_get::<String, _>(3)?),
                definition: row.try_get::<Option<String>, _>(2)?.unwrap_or_default(),
                table_name,
                columns,
                nested,
            });
        }

        let edges: Vec<(TypeKey, String)> = catalog
            .types
            .values()
            .flat_map(|t| t.nested.values().map(|child| (t.key.clone(), child.clone())))
            .collect();
        for (parent, child_table) in edges {
            let child = catalog.tables.get(&child_table).cloned().ok_or_else(|| {
                SinkError::Catalog(format!(
                    "type {} links to unknown table {:?}",
                    parent, child_table
                ))
            })?;
            catalog.link(&parent, child);
        }

        let query = Query::select()
            .columns([
                Topics::Id,
                Topics::Name,
                Topics::Type,
                Topics::Hash,
                Topics::TableName,
                Topics::ViewName,
                Topics::Count,
                Topics::DtFirst,
                Topics::DtLast,
                Topics::TimestampFirst,
                Topics::TimestampLast,
            ])
            .from(Topics::Table)
            .order_by(Topics::Id, Order::Asc)
            .to_string(SqliteQueryBuilder);

        for row in sqlx::query(&query).fetch_all(&mut *conn).await? {
            catalog.insert_topic(TopicDescriptor {
                id: row.try_get(0)?,
                name: row.try_get(1)?,
                type_name: row.try_get(2)?,
                hash: row.try_get(3)?,
                table_name: row.try_get(4)?,
                view_name: row.try_get(5)?,
                count: row.try_get::<Option<i64>, _>(6)?.unwrap_or(0),
                dt_first: row.try_get(7)?,
                dt_last: row.try_get(8)?,
                timestamp_first: row.try_get(9)?,
                timestamp_last: row.try_get(10)?,
            });
        }

        debug!(
            types = catalog.types.len(),
            topics = catalog.topics.len(),
            "Loaded catalog"
        );
        Ok(catalog)
    }

    pub fn get_type(&self, key: &TypeKey) -> Option<&TypeDescriptor> {
        self.types.get(key)
    }

    pub(crate) fn get_type_mut(&mut self, key: &TypeKey) -> Option<&mut TypeDescriptor> {
        self.types.get_mut(key)
    }

    pub fn get_topic(&self, key: &TopicKey) -> Option<&TopicDescriptor> {
        self.topics.get(key)
    }

    pub(crate) fn get_topic_mut(&mut self, key: &TopicKey) -> Option<&mut TopicDescriptor> {
        self.topics.get_mut(key)
    }

    /// Types in key order.
    pub fn types(&self) -> impl Iterator<Item = &TypeDescriptor> {
        self.types.values()
    }

    /// Topics in key order.
    pub fn topics(&self) -> impl Iterator<Item = &TopicDescriptor> {
        self.topics.values()
    }

    pub fn make_name(&self, category: NameCategory, candidate: &str, hash: &str) -> String {
        self.names.make_name(category, candidate, hash)
    }

    pub(crate) fn insert_type(&mut self, descriptor: TypeDescriptor) {
        self.names
            .claim(&descriptor.table_name, NameCategory::Table, &descriptor.key.hash);
        self.tables
            .insert(descriptor.table_name.clone(), descriptor.key.clone());
        self.types.insert(descriptor.key.clone(), descriptor);
    }

    pub(crate) fn insert_topic(&mut self, descriptor: TopicDescriptor) {
        if let Some(view) = &descriptor.view_name {
            self.names.claim(view, NameCategory::View, &descriptor.hash);
        }
        self.topics.insert(descriptor.key(), descriptor);
    }

    pub(crate) fn link(&mut self, parent: &TypeKey, child: TypeKey) {
        self.links.entry(parent.clone()).or_default().insert(child);
    }

    /// Direct child types of a type.
    pub fn children(&self, key: &TypeKey) -> impl Iterator<Item = &TypeKey> {
        self.links.get(key).into_iter().flatten()
    }

    /// The type itself and every type reachable through nested links.
    pub fn reachable(&self, root: &TypeKey) -> Vec<TypeKey> {
        let mut seen = BTreeSet::new();
        let mut order = Vec::new();
        let mut queue = VecDeque::from([root.clone()]);
        while let Some(key) = queue.pop_front() {
            if !seen.insert(key.clone()) {
                continue;
            }
            queue.extend(self.children(&key).cloned());
            order.push(key);
        }
        order
    }

    /// Types that are nobody's child.
    pub fn roots(&self) -> Vec<TypeKey> {
        let children: BTreeSet<&TypeKey> = self.links.values().flatten().collect();
        self.types
            .keys()
            .filter(|k| !children.contains(k))
            .cloned()
            .collect()
    }
}

/// Column layout read from the table itself, for type rows without one.
async fn table_layout(conn: &mut SqliteConnection, table: &str) -> Result<ColumnLayout> {
    let rows = sqlx::query(&format!("PRAGMA table_info({})", quote_ident(table)))
        .fetch_all(&mut *conn)
        .await?;
    if rows.is_empty() {
        return Err(SinkError::Catalog(format!("type table {:?} is missing", table)));
    }
    rows.iter()
        .map(|row| -> Result<Column> {
            Ok(Column::new(
                row.try_get::<String, _>(1)?,
                row.try_get::<String, _>(2)?,
            ))
        })
        .collect()
}

/// Insert a `types` row and return its id.
pub(crate) async fn insert_type_row(
    conn: &mut SqliteConnection,
    key: &TypeKey,
    definition: &str,
    table_name: &str,
    columns: &ColumnLayout,
) -> Result<i64> {
    let (sql, values) = Query::insert()
        .into_table(Types::Table)
        .columns([
            Types::Type,
            Types::Definition,
            Types::Hash,
            Types::TableName,
            Types::Nested,
            Types::Columns,
        ])
        .values([
            key.name.as_str().into(),
            definition.into(),
            key.hash.as_str().into(),
            table_name.into(),
            "{}".into(),
            serde_json::to_string(columns)?.into(),
        ])?
        .build_sqlx(SqliteQueryBuilder);

    let result = sqlx::query_with(&sql, values).execute(&mut *conn).await?;
    Ok(result.last_insert_rowid())
}

/// Rewrite a type's nested-table map.
pub(crate) async fn update_type_nested(
    conn: &mut SqliteConnection,
    descriptor: &TypeDescriptor,
) -> Result<()> {
    let (sql, values) = Query::update()
        .table(Types::Table)
        .value(Types::Nested, serde_json::to_string(&descriptor.nested)?)
        .and_where(Expr::col(Types::Id).eq(descriptor.id))
        .build_sqlx(SqliteQueryBuilder);
    sqlx::query_with(&sql, values).execute(&mut *conn).await?;
    Ok(())
}

/// Rewrite a type's column layout.
pub(crate) async fn update_type_columns(
    conn: &mut SqliteConnection,
    descriptor: &TypeDescriptor,
) -> Result<()> {
    let (sql, values) = Query::update()
        .table(Types::Table)
        .value(Types::Columns, serde_json::to_string(&descriptor.columns)?)
        .and_where(Expr::col(Types::Id).eq(descriptor.id))
        .build_sqlx(SqliteQueryBuilder);
    sqlx::query_with(&sql, values).execute(&mut *conn).await?;
    Ok(())
}

/// Insert a `topics` row and return its id.
pub(crate) async fn insert_topic_row(
    conn: &mut SqliteConnection,
    topic: &TopicDescriptor,
) -> Result<i64> {
    let (sql, values) = Query::insert()
        .into_table(Topics::Table)
        .columns([
            Topics::Name,
            Topics::Type,
            Topics::Hash,
            Topics::TableName,
            Topics::ViewName,
        ])
        .values([
            topic.name.as_str().into(),
            topic.type_name.as_str().into(),
            topic.hash.as_str().into(),
            topic.table_name.as_str().into(),
            topic.view_name.clone().into(),
        ])?
        .build_sqlx(SqliteQueryBuilder);

    let result = sqlx::query_with(&sql, values).execute(&mut *conn).await?;
    Ok(result.last_insert_rowid())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(name: &str, hash: &str, table: &str) -> TypeDescriptor {
        TypeDescriptor {
            id: 0,
            key: TypeKey::new(name, hash),
            definition: String::new(),
            table_name: table.to_string(),
            columns: ColumnLayout::default(),
            nested: BTreeMap::new(),
        }
    }

    fn topic() -> TopicDescriptor {
        TopicDescriptor {
            id: 1,
            name: "/scan".to_string(),
            type_name: "sensor_msgs/Range".to_string(),
            hash: "abc123".to_string(),
            table_name: "Range".to_string(),
            view_name: Some("/scan".to_string()),
            count: 0,
            dt_first: None,
            dt_last: None,
            timestamp_first: None,
            timestamp_last: None,
        }
    }

    #[test]
    fn test_layout_serializes_as_ordered_list() {
        let mut layout = ColumnLayout::default();
        layout.push("range", "REAL");
        layout.push("_id", "INTEGER");
        let json = serde_json::to_string(&layout).unwrap();
        assert_eq!(
            json,
            r#"[{"name":"range","type":"REAL"},{"name":"_id","type":"INTEGER"}]"#
        );
        let back: ColumnLayout = serde_json::from_str(&json).unwrap();
        assert_eq!(back, layout);
    }

    #[test]
    fn test_insert_type_claims_table_name() {
        let mut catalog = Catalog::new();
        catalog.insert_type(descriptor("a/Point", "h1", "Point"));
        assert_eq!(catalog.make_name(NameCategory::Table, "Point", "h1"), "Point");
        assert_eq!(
            catalog.make_name(NameCategory::Table, "Point", "h2"),
            "Point (h2)"
        );
    }

    #[test]
    fn test_reachable_and_roots_follow_links() {
        let mut catalog = Catalog::new();
        let root = TypeKey::new("Root", "r");
        let mid = TypeKey::new("Mid", "m");
        let leaf = TypeKey::new("Leaf", "l");
        catalog.insert_type(descriptor("Root", "r", "Root"));
        catalog.insert_type(descriptor("Mid", "m", "Mid"));
        catalog.insert_type(descriptor("Leaf", "l", "Leaf"));
        catalog.link(&root, mid.clone());
        catalog.link(&root, leaf.clone());
        catalog.link(&mid, leaf.clone());

        assert_eq!(catalog.reachable(&root), vec![root.clone(), leaf.clone(), mid.clone()]);
        assert_eq!(catalog.reachable(&leaf), vec![leaf]);
        assert_eq!(catalog.roots(), vec![root]);
    }

    #[test]
    fn test_first_write_sets_first_and_last() {
        let mut t = topic();
        t.record(Timestamp::from_nanos(500));
        assert_eq!(t.count, 1);
        assert_eq!(t.timestamp_first, Some(500));
        assert_eq!(t.timestamp_last, Some(500));
        assert_eq!(t.dt_first, t.dt_last);
    }

    #[test]
    fn test_out_of_order_writes_keep_extremes() {
        let mut t = topic();
        t.record(Timestamp::from_nanos(500));
        t.record(Timestamp::from_nanos(100));
        t.record(Timestamp::from_nanos(300));
        assert_eq!(t.count, 3);
        assert_eq!(t.timestamp_first, Some(100));
        assert_eq!(t.timestamp_last, Some(500));
        assert_eq!(t.dt_first, Some(Timestamp::from_nanos(100).wall_clock()));
        assert_eq!(t.dt_last, Some(Timestamp::from_nanos(500).wall_clock()));
    }

    #[tokio::test]
    async fn test_catalog_rows_round_trip_quoted_text() {
        use sqlx::Connection;

        use crate::store::schema::CREATE_BASE_TABLES;

        let mut conn = SqliteConnection::connect("sqlite::memory:").await.unwrap();
        sqlx::raw_sql(CREATE_BASE_TABLES).execute(&mut conn).await.unwrap();

        let definition = "string note  # it's \"quoted\"; DROP TABLE types; -- ?";
        let mut layout = ColumnLayout::default();
        layout.push("note", "TEXT");
        let key = TypeKey::new("o'brien/Note", "h1");
        let type_id = insert_type_row(&mut conn, &key, definition, "Note", &layout)
            .await
            .unwrap();

        let mut t = topic();
        t.name = "/it's".to_string();
        t.view_name = Some("/it's".to_string());
        let topic_id = insert_topic_row(&mut conn, &t).await.unwrap();
        assert_eq!((type_id, topic_id), (1, 1));

        let row = sqlx::query("SELECT type, definition, columns FROM types")
            .fetch_one(&mut conn)
            .await
            .unwrap();
        assert_eq!(row.get::<String, _>(0), "o'brien/Note");
        assert_eq!(row.get::<String, _>(1), definition);
        assert_eq!(
            serde_json::from_str::<ColumnLayout>(&row.get::<String, _>(2)).unwrap(),
            layout
        );
        let name: String = sqlx::query("SELECT view_name FROM topics")
            .fetch_one(&mut conn)
            .await
            .unwrap()
            .get(0);
        assert_eq!(name, "/it's");
    }
}
