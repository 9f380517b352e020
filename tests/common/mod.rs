//! Shared fixtures for store integration tests.
//!
//! Record types, record builders and a read-only side connection for
//! asserting on what actually reached the SQLite file.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use prost_reflect::{DescriptorPool, DynamicMessage};
use prost_types::field_descriptor_proto::{Label, Type};
use prost_types::{DescriptorProto, FieldDescriptorProto, FileDescriptorProto, FileDescriptorSet};
use sqlx::sqlite::{SqliteConnectOptions, SqliteRow};
use sqlx::{ConnectOptions, SqliteConnection};
use tempfile::TempDir;

use sqlsink::{FieldDef, MessageType, NestingMode, Record, ScalarKind, SinkConfig, Value};

/// Temporary directory plus the store path inside it.
pub struct TestStore {
    pub dir: TempDir,
    pub path: PathBuf,
}

impl TestStore {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("sink.sqlite");
        Self { dir, path }
    }

    /// Config for this store with the given nesting mode and batch size.
    pub fn config(&self, nesting: NestingMode, batch_size: usize) -> SinkConfig {
        SinkConfig::new(&self.path)
            .with_nesting(nesting)
            .with_batch_size(batch_size)
    }
}

/// Read-only side connection to a store file.
pub async fn reader(path: &Path) -> SqliteConnection {
    SqliteConnectOptions::new()
        .filename(path)
        .read_only(true)
        .connect()
        .await
        .expect("Failed to open reader connection")
}

pub async fn fetch_all(conn: &mut SqliteConnection, sql: &str) -> Vec<SqliteRow> {
    sqlx::query(sql)
        .fetch_all(&mut *conn)
        .await
        .unwrap_or_else(|e| panic!("query {sql:?} failed: {e}"))
}

pub async fn count(conn: &mut SqliteConnection, table: &str) -> i64 {
    use sqlx::Row;
    sqlx::query(&format!("SELECT COUNT(*) FROM \"{}\"", table))
        .fetch_one(&mut *conn)
        .await
        .unwrap_or_else(|e| panic!("count of {table:?} failed: {e}"))
        .get(0)
}

pub async fn column_names(conn: &mut SqliteConnection, table: &str) -> Vec<String> {
    use sqlx::Row;
    fetch_all(conn, &format!("PRAGMA table_info(\"{}\")", table))
        .await
        .iter()
        .map(|row| row.get::<String, _>(1))
        .collect()
}

pub async fn schema_names(conn: &mut SqliteConnection) -> Vec<String> {
    use sqlx::Row;
    let mut names: Vec<String> = fetch_all(
        conn,
        "SELECT name FROM sqlite_master WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite_%'",
    )
    .await
    .iter()
    .map(|row| row.get(0))
    .collect();
    names.sort();
    names
}

// ============================================================================
// Record types
// ============================================================================

pub fn header_type() -> Arc<MessageType> {
    Arc::new(MessageType::new(
        "std_msgs/Header",
        vec![FieldDef::scalar("stamp", ScalarKind::Time)],
    ))
}

/// `sensor_msgs/Range` with a fixed definition hash.
pub fn range_type() -> Arc<MessageType> {
    Arc::new(MessageType::with_definition(
        "sensor_msgs/Range",
        "abc123",
        "float32 range\nstd_msgs/Header header",
        vec![
            FieldDef::scalar("range", ScalarKind::Float32),
            FieldDef::message("header", header_type()),
        ],
    ))
}

pub fn range(value: f32, stamp: i64) -> Record {
    let header = Record::new(header_type(), vec![Value::scalar(stamp)]).expect("valid header");
    Record::new(
        range_type(),
        vec![Value::scalar(value), Value::message(header)],
    )
    .expect("valid range")
}

pub fn pose_type() -> Arc<MessageType> {
    Arc::new(MessageType::new(
        "geometry_msgs/Pose",
        vec![FieldDef::scalar("heading", ScalarKind::Float64)],
    ))
}

pub fn point_type() -> Arc<MessageType> {
    Arc::new(MessageType::new(
        "geometry_msgs/Point",
        vec![
            FieldDef::scalar("x", ScalarKind::Float64),
            FieldDef::scalar("y", ScalarKind::Float64),
        ],
    ))
}

/// A route with one scalar nested message and one nested message array.
pub fn route_type() -> Arc<MessageType> {
    Arc::new(MessageType::new(
        "nav_msgs/Route",
        vec![
            FieldDef::scalar("name", ScalarKind::String),
            FieldDef::message("pose", pose_type()),
            FieldDef::messages("points", point_type()),
        ],
    ))
}

pub fn point(x: f64, y: f64) -> Record {
    Record::new(point_type(), vec![Value::scalar(x), Value::scalar(y)]).expect("valid point")
}

pub fn route(name: &str, heading: f64, points: Vec<Record>) -> Record {
    let pose = Record::new(pose_type(), vec![Value::scalar(heading)]).expect("valid pose");
    Record::new(
        route_type(),
        vec![
            Value::scalar(name),
            Value::message(pose),
            Value::messages(points),
        ],
    )
    .expect("valid route")
}

/// Three levels of nested arrays: `Outer { middles: Middle[] }`,
/// `Middle { inners: Inner[] }`, `Inner { v: int32 }`.
pub fn inner_type() -> Arc<MessageType> {
    Arc::new(MessageType::new(
        "chain_msgs/Inner",
        vec![FieldDef::scalar("v", ScalarKind::Int32)],
    ))
}

pub fn middle_type() -> Arc<MessageType> {
    Arc::new(MessageType::new(
        "chain_msgs/Middle",
        vec![FieldDef::messages("inners", inner_type())],
    ))
}

pub fn outer_type() -> Arc<MessageType> {
    Arc::new(MessageType::new(
        "chain_msgs/Outer",
        vec![FieldDef::messages("middles", middle_type())],
    ))
}

pub fn inner(v: i32) -> Record {
    Record::new(inner_type(), vec![Value::scalar(v)]).expect("valid inner")
}

pub fn middle(inners: Vec<Record>) -> Record {
    Record::new(middle_type(), vec![Value::messages(inners)]).expect("valid middle")
}

pub fn outer(middles: Vec<Record>) -> Record {
    Record::new(outer_type(), vec![Value::messages(middles)]).expect("valid outer")
}

// ============================================================================
// Protobuf descriptors
// ============================================================================

fn proto_field(
    name: &str,
    number: i32,
    ty: Type,
    label: Label,
    type_name: Option<&str>,
) -> FieldDescriptorProto {
    FieldDescriptorProto {
        name: Some(name.to_string()),
        number: Some(number),
        label: Some(label as i32),
        r#type: Some(ty as i32),
        type_name: type_name.map(str::to_string),
        ..Default::default()
    }
}

/// Pool with `demo.Waypoint { x, y }` and `demo.Track { name, waypoints[] }`.
pub fn demo_pool() -> DescriptorPool {
    let waypoint = DescriptorProto {
        name: Some("Waypoint".to_string()),
        field: vec![
            proto_field("x", 1, Type::Double, Label::Optional, None),
            proto_field("y", 2, Type::Double, Label::Optional, None),
        ],
        ..Default::default()
    };
    let track = DescriptorProto {
        name: Some("Track".to_string()),
        field: vec![
            proto_field("name", 1, Type::String, Label::Optional, None),
            proto_field(
                "waypoints",
                2,
                Type::Message,
                Label::Repeated,
                Some(".demo.Waypoint"),
            ),
        ],
        ..Default::default()
    };
    let file = FileDescriptorProto {
        name: Some("demo.proto".to_string()),
        package: Some("demo".to_string()),
        syntax: Some("proto3".to_string()),
        message_type: vec![waypoint, track],
        ..Default::default()
    };
    DescriptorPool::from_file_descriptor_set(FileDescriptorSet { file: vec![file] })
        .expect("valid descriptor set")
}

pub fn demo_track(pool: &DescriptorPool, name: &str, waypoints: &[(f64, f64)]) -> DynamicMessage {
    let waypoint_desc = pool
        .get_message_by_name("demo.Waypoint")
        .expect("Waypoint descriptor");
    let waypoints = waypoints
        .iter()
        .map(|&(x, y)| {
            let mut msg = DynamicMessage::new(waypoint_desc.clone());
            msg.set_field_by_name("x", prost_reflect::Value::F64(x));
            msg.set_field_by_name("y", prost_reflect::Value::F64(y));
            prost_reflect::Value::Message(msg)
        })
        .collect();

    let mut track = DynamicMessage::new(pool.get_message_by_name("demo.Track").expect("Track descriptor"));
    track.set_field_by_name("name", prost_reflect::Value::String(name.to_string()));
    track.set_field_by_name("waypoints", prost_reflect::Value::List(waypoints));
    track
}
