//! Expansion of a record tree into type-table rows.
//!
//! Each row gets an id reserved up front, so children can carry it as
//! `_parent_id` before the parent is committed. Reference columns on the
//! parent are filled by a follow-up update once every child id is known.

use sea_query::{Alias, Expr, Query, SqliteQueryBuilder};
use sea_query_binder::SqlxBinder;

use super::batch::Statement;
use super::catalog::{Catalog, TypeDescriptor};
use super::ids::IdAllocator;
use super::schema::{
    COL_DT, COL_ID, COL_PARENT_ID, COL_PARENT_TYPE, COL_TIMESTAMP, COL_TOPIC, COL_TOPIC_ID,
};
use super::synth::join_path;
use crate::config::NestingMode;
use crate::error::{Result, SinkError};
use crate::model::{Record, Scalar, Timestamp, Value};

/// Per-record metadata shared by every row the record expands into.
#[derive(Debug, Clone, Copy)]
pub struct RowContext<'a> {
    pub topic: &'a str,
    pub topic_id: i64,
    pub timestamp: Timestamp,
}

enum Children<'r> {
    One(&'r Record),
    Many(&'r [Record]),
}

/// Expand `record` into insert statements, children included.
///
/// Statements are appended to `out` in execution order: this row's insert,
/// then each child's statements, then the update linking this row to its
/// children. Returns the id reserved for this row.
pub fn expand(
    catalog: &Catalog,
    ids: &mut IdAllocator,
    mode: NestingMode,
    ctx: &RowContext<'_>,
    record: &Record,
    parent: Option<(&str, i64)>,
    out: &mut Vec<Statement>,
) -> Result<i64> {
    let key = record.msg_type().key();
    let descriptor = catalog
        .get_type(&key)
        .ok_or_else(|| SinkError::Catalog(format!("type {} is not in the catalog", key)))?;
    let id = ids.allocate(&descriptor.table_name)?;

    let mut cells = Vec::new();
    let mut children = Vec::new();
    collect_cells(descriptor, mode, record, "", &mut cells, &mut children)?;

    cells.push((COL_TOPIC.to_string(), ctx.topic.into()));
    cells.push((COL_TOPIC_ID.to_string(), ctx.topic_id.into()));
    cells.push((COL_DT.to_string(), ctx.timestamp.wall_clock().into()));
    cells.push((COL_TIMESTAMP.to_string(), ctx.timestamp.as_nanos().into()));
    cells.push((COL_ID.to_string(), id.into()));
    if let Some((parent_type, parent_id)) = parent {
        cells.push((COL_PARENT_TYPE.to_string(), parent_type.into()));
        cells.push((COL_PARENT_ID.to_string(), parent_id.into()));
    }
    cells.retain(|(name, _)| descriptor.columns.contains(name));

    let (names, values): (Vec<_>, Vec<_>) = cells
        .into_iter()
        .map(|(name, value)| (Alias::new(name), sea_query::SimpleExpr::from(value)))
        .unzip();
    let insert = Query::insert()
        .into_table(Alias::new(descriptor.table_name.as_str()))
        .columns(names)
        .values(values)?
        .build_sqlx(SqliteQueryBuilder);
    out.push(insert.into());

    let type_name = record.msg_type().name();
    let mut links: Vec<(String, sea_query::Value)> = Vec::new();
    for (path, nested) in children {
        match nested {
            Children::One(child) => {
                let child_id = expand(catalog, ids, mode, ctx, child, Some((type_name, id)), out)?;
                links.push((path, child_id.into()));
            }
            Children::Many(items) => {
                let mut child_ids = Vec::with_capacity(items.len());
                for child in items {
                    child_ids.push(expand(catalog, ids, mode, ctx, child, Some((type_name, id)), out)?);
                }
                if !child_ids.is_empty() {
                    links.push((path, serde_json::to_string(&child_ids)?.into()));
                }
            }
        }
    }

    if !links.is_empty() {
        let update = Query::update()
            .table(Alias::new(descriptor.table_name.as_str()))
            .values(
                links
                    .into_iter()
                    .map(|(path, value)| (Alias::new(path), sea_query::SimpleExpr::from(value))),
            )
            .and_where(Expr::col(Alias::new(COL_ID)).eq(id))
            .build_sqlx(SqliteQueryBuilder);
        out.push(update.into());
    }

    Ok(id)
}

/// Collect column values for a record, flattening nested messages that do
/// not get their own table.
fn collect_cells<'r>(
    descriptor: &TypeDescriptor,
    mode: NestingMode,
    record: &'r Record,
    prefix: &str,
    cells: &mut Vec<(String, sea_query::Value)>,
    children: &mut Vec<(String, Children<'r>)>,
) -> Result<()> {
    for (field, value) in record.fields() {
        let path = join_path(prefix, &field.name);
        let nests = descriptor.nested.contains_key(&path);
        match value {
            Value::Scalar(scalar) => cells.push((path, scalar_value(scalar))),
            Value::ScalarArray(items) => {
                let json = serde_json::Value::Array(items.iter().map(Scalar::to_json).collect());
                cells.push((path, serde_json::to_string(&json)?.into()));
            }
            Value::Message(child) if nests && mode.nests_messages() => {
                cells.push((path.clone(), Option::<i64>::None.into()));
                children.push((path, Children::One(child)));
            }
            Value::Message(child) => {
                collect_cells(descriptor, mode, child, &path, cells, children)?;
            }
            Value::MessageArray(items) if nests && mode.nests_arrays() => {
                cells.push((path.clone(), "[]".into()));
                children.push((path, Children::Many(items)));
            }
            Value::MessageArray(items) => {
                let json = serde_json::Value::Array(items.iter().map(Record::to_json).collect());
                cells.push((path, serde_json::to_string(&json)?.into()));
            }
        }
    }
    Ok(())
}

/// Bind value for a scalar. Unsigned values beyond `i64` are stored as text.
fn scalar_value(scalar: &Scalar) -> sea_query::Value {
    match scalar {
        Scalar::Bool(b) => (*b).into(),
        Scalar::Int(n) => (*n).into(),
        Scalar::UInt(n) => match i64::try_from(*n) {
            Ok(n) => n.into(),
            Err(_) => n.to_string().into(),
        },
        Scalar::Float(f) => (*f).into(),
        Scalar::Text(s) => s.as_str().into(),
        Scalar::Bytes(b) => b.clone().into(),
    }
}
