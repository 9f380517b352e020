//! Additive schema evolution for append sessions.

use std::collections::{BTreeSet, VecDeque};

use sqlx::SqliteConnection;
use tracing::info;

use super::catalog::{update_type_columns, Catalog};
use super::schema::NESTING_COLUMNS;
use super::synth::add_column_sql;
use crate::error::Result;

/// Append the parent-linkage columns to every type table lacking them.
///
/// Walks the catalog from its root types through nested links. Existing
/// rows keep their values; the new columns are NULL for them. Returns the
/// number of columns added.
pub async fn add_nesting_columns(conn: &mut SqliteConnection, catalog: &mut Catalog) -> Result<usize> {
    let mut added = 0;
    let mut seen = BTreeSet::new();
    let mut queue: VecDeque<_> = catalog.roots().into();

    while let Some(key) = queue.pop_front() {
        if !seen.insert(key.clone()) {
            continue;
        }
        queue.extend(catalog.children(&key).cloned());

        let Some(descriptor) = catalog.get_type_mut(&key) else {
            continue;
        };
        let missing: Vec<_> = NESTING_COLUMNS
            .iter()
            .filter(|(name, _)| !descriptor.columns.contains(name))
            .collect();
        if missing.is_empty() {
            continue;
        }

        for (name, sql_type) in missing {
            sqlx::query(&add_column_sql(&descriptor.table_name, name, sql_type))
                .execute(&mut *conn)
                .await?;
            descriptor.columns.push(*name, *sql_type);
            added += 1;
        }
        update_type_columns(conn, descriptor).await?;
        info!(table = %descriptor.table_name, "Added nesting columns");
    }

    Ok(added)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use sqlx::{Connection, Row};

    use crate::config::NestingMode;
    use crate::model::{FieldDef, MessageType, ScalarKind};
    use crate::store::catalog::insert_type_row;
    use crate::store::schema::CREATE_BASE_TABLES;
    use crate::store::synth::{create_table_sql, derive_layout};
    use crate::store::TypeDescriptor;

    #[tokio::test]
    async fn test_adds_columns_once_and_keeps_rows() {
        let mut conn = SqliteConnection::connect("sqlite::memory:").await.unwrap();
        sqlx::raw_sql(CREATE_BASE_TABLES).execute(&mut conn).await.unwrap();

        let t = MessageType::new("x/Range", vec![FieldDef::scalar("range", ScalarKind::Float32)]);
        let columns = derive_layout(&t, NestingMode::Off);
        for sql in create_table_sql("Range", &columns) {
            sqlx::query(&sql).execute(&mut conn).await.unwrap();
        }
        sqlx::query(r#"INSERT INTO "Range" ("range", "_id") VALUES (3.5, 1)"#)
            .execute(&mut conn)
            .await
            .unwrap();
        let id = insert_type_row(&mut conn, &t.key(), t.definition(), "Range", &columns)
            .await
            .unwrap();

        let mut catalog = Catalog::new();
        catalog.insert_type(TypeDescriptor {
            id,
            key: t.key(),
            definition: t.definition().to_string(),
            table_name: "Range".to_string(),
            columns,
            nested: BTreeMap::new(),
        });

        assert_eq!(add_nesting_columns(&mut conn, &mut catalog).await.unwrap(), 2);
        assert_eq!(add_nesting_columns(&mut conn, &mut catalog).await.unwrap(), 0);
        assert!(catalog.get_type(&t.key()).unwrap().columns.has_nesting_columns());

        let row = sqlx::query(r#"SELECT "range", "_parent_id" FROM "Range""#)
            .fetch_one(&mut conn)
            .await
            .unwrap();
        assert_eq!(row.get::<f64, _>(0), 3.5);
        assert_eq!(row.get::<Option<i64>, _>(1), None);

        let persisted: String = sqlx::query("SELECT columns FROM types")
            .fetch_one(&mut conn)
            .await
            .unwrap()
            .get(0);
        assert!(persisted.contains("_parent_type"));
    }
}
