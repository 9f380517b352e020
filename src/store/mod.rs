//! SQLite store handle.
//!
//! A [`Store`] owns one exclusive connection, the type and topic catalogs
//! loaded from it, the per-table id counters and the pending write batch.
//! It moves through `Closed -> Opening -> Open -> Closing -> Closed`;
//! writes are only accepted while `Open`.

use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use std::sync::Arc;

use sea_query::{Query, SqliteQueryBuilder, Values};
use sea_query_binder::SqlxBinder;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{ConnectOptions, Connection, SqliteConnection};
use tracing::{debug, error, info, warn};

use crate::config::SinkConfig;
use crate::error::{Result, SinkError};
use crate::model::{MessageType, Record, Timestamp, TypeKey};

pub mod batch;
pub mod catalog;
mod evolve;
pub mod ids;
mod materialize;
pub mod naming;
pub mod schema;
pub mod synth;

pub use batch::{BatchWriter, Statement};
pub use catalog::{Catalog, Column, ColumnLayout, TopicDescriptor, TopicKey, TypeDescriptor};
pub use naming::NameCategory;

use catalog::{insert_topic_row, insert_type_row, update_type_nested};
use materialize::RowContext;
use naming::base_name;
use schema::{Messages, CREATE_BASE_TABLES, UPDATE_TOPIC};
use synth::{create_table_sql, create_view_sql, derive_layout, nested_fields};

/// Lifecycle state of a store handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    Closed,
    Opening,
    Open,
    Closing,
}

/// Schema-synthesizing SQLite sink.
pub struct Store {
    config: SinkConfig,
    state: HandleState,
    read_only: bool,
    conn: Option<SqliteConnection>,
    catalog: Catalog,
    ids: ids::IdAllocator,
    batch: BatchWriter,
    written: u64,
}

impl Store {
    /// Create a closed handle. No I/O happens until [`Store::connect`].
    pub fn new(config: SinkConfig) -> Self {
        let batch = BatchWriter::new(config.batch_size);
        Self {
            config,
            state: HandleState::Closed,
            read_only: false,
            conn: None,
            catalog: Catalog::new(),
            ids: ids::IdAllocator::new(),
            batch,
            written: 0,
        }
    }

    /// Create and open a handle for writing.
    pub async fn open(config: SinkConfig) -> Result<Self> {
        let mut store = Self::new(config);
        store.connect().await?;
        Ok(store)
    }

    /// Open an existing store read-only. Every write is a usage error.
    pub async fn inspect(path: impl AsRef<Path>) -> Result<Self> {
        let mut store = Self::new(SinkConfig::new(path));
        store.read_only = true;
        store.connect().await?;
        Ok(store)
    }

    /// Open the connection and load the catalogs.
    pub async fn connect(&mut self) -> Result<()> {
        if self.state != HandleState::Closed {
            return Err(SinkError::Usage(format!(
                "cannot open a store handle in state {:?}",
                self.state
            )));
        }

        self.state = HandleState::Opening;
        match self.establish().await {
            Ok(()) => {
                self.state = HandleState::Open;
                info!(
                    path = %self.config.path.display(),
                    nesting = self.config.nesting.as_str(),
                    read_only = self.read_only,
                    types = self.catalog.types().count(),
                    topics = self.catalog.topics().count(),
                    "Opened store"
                );
                Ok(())
            }
            Err(e) => {
                self.state = HandleState::Closed;
                Err(e)
            }
        }
    }

    async fn establish(&mut self) -> Result<()> {
        let path = self.config.path.clone();

        if !self.read_only {
            if self.config.overwrite && path.exists() {
                info!(path = %path.display(), "Overwriting existing store");
                tokio::fs::remove_file(&path).await?;
            }
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let mut conn = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(!self.read_only)
            .read_only(self.read_only)
            .connect()
            .await?;

        if !self.read_only {
            sqlx::raw_sql(CREATE_BASE_TABLES).execute(&mut conn).await?;
        }

        let mut catalog = Catalog::load(&mut conn).await?;
        if !self.read_only && self.config.nesting.is_enabled() {
            let added = evolve::add_nesting_columns(&mut conn, &mut catalog).await?;
            if added > 0 {
                info!(columns = added, "Schema evolved for nesting");
            }
        }

        self.conn = Some(conn);
        self.catalog = catalog;
        self.ids.clear();
        self.batch = BatchWriter::new(self.config.batch_size);
        self.written = 0;
        Ok(())
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.state != HandleState::Open {
            return Err(SinkError::closed());
        }
        if self.read_only {
            return Err(SinkError::read_only());
        }
        Ok(())
    }

    /// Descriptor for a type, creating its table (and child tables) on first sight.
    pub async fn get_or_create(&mut self, msg_type: &Arc<MessageType>) -> Result<&TypeDescriptor> {
        self.ensure_writable()?;
        let key = msg_type.key();
        if self.catalog.get_type(&key).is_none() {
            self.create_types(msg_type).await?;
        }
        self.catalog
            .get_type(&key)
            .ok_or_else(|| SinkError::Catalog(format!("type {} was not created", key)))
    }

    /// Create a type and every nested type it needs, breadth first.
    async fn create_types(&mut self, root: &Arc<MessageType>) -> Result<()> {
        let mut queue: VecDeque<(Arc<MessageType>, Option<(TypeKey, String)>)> =
            VecDeque::from([(root.clone(), None)]);

        while let Some((msg_type, link)) = queue.pop_front() {
            let key = msg_type.key();
            if self.catalog.get_type(&key).is_none() {
                for (path, child) in self.create_type(&msg_type).await? {
                    queue.push_back((child, Some((key.clone(), path))));
                }
            }
            if let Some((parent, path)) = link {
                self.link_child(&parent, path, &key).await?;
            }
        }
        Ok(())
    }

    /// Create one type table. Returns the nested fields that need child tables.
    async fn create_type(
        &mut self,
        msg_type: &MessageType,
    ) -> Result<Vec<(String, Arc<MessageType>)>> {
        let conn = self.conn.as_mut().ok_or_else(SinkError::closed)?;
        let mode = self.config.nesting;
        let key = msg_type.key();

        let table_name =
            self.catalog
                .make_name(NameCategory::Table, base_name(msg_type.name()), msg_type.hash());
        let columns = derive_layout(msg_type, mode);
        let nested = nested_fields(msg_type, mode, &columns);

        for sql in create_table_sql(&table_name, &columns) {
            sqlx::query(&sql).execute(&mut *conn).await?;
        }
        let id = insert_type_row(conn, &key, msg_type.definition(), &table_name, &columns).await?;

        info!(
            type_name = %key.name,
            hash = %key.hash,
            table = %table_name,
            columns = columns.len(),
            "Created type table"
        );

        self.catalog.insert_type(TypeDescriptor {
            id,
            key,
            definition: msg_type.definition().to_string(),
            table_name,
            columns,
            nested: BTreeMap::new(),
        });
        Ok(nested)
    }

    /// Record that `path` of `parent` lives in `child`'s table.
    async fn link_child(&mut self, parent: &TypeKey, path: String, child: &TypeKey) -> Result<()> {
        let conn = self.conn.as_mut().ok_or_else(SinkError::closed)?;
        let child_table = self
            .catalog
            .get_type(child)
            .map(|t| t.table_name.clone())
            .ok_or_else(|| SinkError::Catalog(format!("type {} is not in the catalog", child)))?;

        let descriptor = self
            .catalog
            .get_type_mut(parent)
            .ok_or_else(|| SinkError::Catalog(format!("type {} is not in the catalog", parent)))?;
        if descriptor.nested.get(&path) == Some(&child_table) {
            return Ok(());
        }
        descriptor.nested.insert(path, child_table);
        update_type_nested(conn, descriptor).await?;
        self.catalog.link(parent, child.clone());
        Ok(())
    }

    /// Topic key for `(topic, type)`, creating the topic row and view on first sight.
    async fn ensure_topic(&mut self, topic: &str, msg_type: &MessageType) -> Result<TopicKey> {
        let key = TopicKey::new(topic, msg_type.hash());
        if self.catalog.get_topic(&key).is_some() {
            return Ok(key);
        }

        let conn = self.conn.as_mut().ok_or_else(SinkError::closed)?;
        let type_key = msg_type.key();
        let descriptor = self
            .catalog
            .get_type(&type_key)
            .ok_or_else(|| SinkError::Catalog(format!("type {} is not in the catalog", type_key)))?;

        let view_name = self
            .catalog
            .make_name(NameCategory::View, topic, msg_type.hash());
        let sql = create_view_sql(&view_name, &descriptor.table_name, &descriptor.columns, topic);
        sqlx::query(&sql).execute(&mut *conn).await?;

        let mut descriptor = TopicDescriptor {
            id: 0,
            name: topic.to_string(),
            type_name: msg_type.name().to_string(),
            hash: msg_type.hash().to_string(),
            table_name: descriptor.table_name.clone(),
            view_name: Some(view_name),
            count: 0,
            dt_first: None,
            dt_last: None,
            timestamp_first: None,
            timestamp_last: None,
        };
        descriptor.id = insert_topic_row(conn, &descriptor).await?;

        info!(
            topic,
            type_name = %descriptor.type_name,
            view = descriptor.view_name.as_deref().unwrap_or_default(),
            "Created topic view"
        );
        self.catalog.insert_topic(descriptor);
        Ok(key)
    }

    /// Write one record. Returns the row id of its top-level row.
    pub async fn insert(&mut self, topic: &str, record: &Record, timestamp: Timestamp) -> Result<i64> {
        self.ensure_writable()?;

        let msg_type = record.msg_type().clone();
        self.get_or_create(&msg_type).await?;
        let topic_key = self.ensure_topic(topic, &msg_type).await?;
        let topic_id = self
            .catalog
            .get_topic(&topic_key)
            .map(|t| t.id)
            .ok_or_else(|| SinkError::Catalog(format!("topic {:?} is not in the catalog", topic)))?;

        let conn = self.conn.as_mut().ok_or_else(SinkError::closed)?;
        for key in self.catalog.reachable(&msg_type.key()) {
            if let Some(descriptor) = self.catalog.get_type(&key) {
                self.ids.ensure_seeded(conn, &descriptor.table_name).await?;
            }
        }

        let mut statements: Vec<Statement> = Vec::new();
        statements.push(
            Query::insert()
                .into_table(Messages::Table)
                .columns([
                    Messages::Dt,
                    Messages::Timestamp,
                    Messages::Topic,
                    Messages::Type,
                    Messages::TopicId,
                    Messages::Yaml,
                    Messages::Data,
                ])
                .values([
                    timestamp.wall_clock().into(),
                    timestamp.as_nanos().into(),
                    topic.into(),
                    msg_type.name().into(),
                    topic_id.into(),
                    record.to_yaml()?.into(),
                    record.raw().to_vec().into(),
                ])?
                .build_sqlx(SqliteQueryBuilder)
                .into(),
        );

        let ctx = RowContext {
            topic,
            topic_id,
            timestamp,
        };
        let id = materialize::expand(
            &self.catalog,
            &mut self.ids,
            self.config.nesting,
            &ctx,
            record,
            None,
            &mut statements,
        )?;

        statements.push(Statement::new(
            UPDATE_TOPIC,
            Values(vec![
                timestamp.wall_clock().into(),
                timestamp.as_nanos().into(),
                topic_id.into(),
            ]),
        ));

        for statement in statements {
            self.batch.enqueue(conn, statement).await?;
        }
        if let Some(descriptor) = self.catalog.get_topic_mut(&topic_key) {
            descriptor.record(timestamp);
        }
        self.written += 1;

        self.batch.maybe_flush(conn).await?;
        Ok(id)
    }

    /// Commit every pending statement without closing.
    pub async fn flush(&mut self) -> Result<usize> {
        if self.state != HandleState::Open {
            return Err(SinkError::closed());
        }
        let conn = self.conn.as_mut().ok_or_else(SinkError::closed)?;
        self.batch.flush_all(conn).await
    }

    /// Flush pending writes and release the connection.
    ///
    /// The handle always ends closed, even when the flush fails; the flush
    /// error is returned afterwards. Closing a closed handle does nothing.
    pub async fn close(&mut self) -> Result<()> {
        let Some(mut conn) = self.conn.take() else {
            self.state = HandleState::Closed;
            return Ok(());
        };
        self.state = HandleState::Closing;

        let flushed = self.batch.flush_all(&mut conn).await;
        if let Err(e) = &flushed {
            error!(error = %e, "Failed to flush pending rows on close");
        }
        if let Err(e) = conn.close().await {
            warn!(error = %e, "Failed to close store connection cleanly");
        }

        self.catalog = Catalog::new();
        self.ids.clear();
        self.state = HandleState::Closed;
        info!(
            path = %self.config.path.display(),
            records = self.written,
            "Closed store"
        );

        let count = flushed?;
        debug!(statements = count, "Final flush complete");
        Ok(())
    }

    /// Release the connection without flushing. Queued statements are lost.
    ///
    /// Returns the number of statements dropped. Aborting a closed handle
    /// does nothing.
    pub async fn abort(&mut self) -> usize {
        let dropped = self.batch.discard();
        let Some(conn) = self.conn.take() else {
            self.state = HandleState::Closed;
            return dropped;
        };
        self.state = HandleState::Closing;
        if let Err(e) = conn.close().await {
            warn!(error = %e, "Failed to close store connection cleanly");
        }

        self.catalog = Catalog::new();
        self.ids.clear();
        self.state = HandleState::Closed;
        warn!(
            path = %self.config.path.display(),
            dropped,
            "Aborted store; pending rows discarded"
        );
        dropped
    }

    pub fn state(&self) -> HandleState {
        self.state
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Statements queued and not yet committed.
    pub fn pending_rows(&self) -> usize {
        self.batch.pending_rows()
    }

    pub fn config(&self) -> &SinkConfig {
        &self.config
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        let pending = self.batch.pending_rows();
        if pending > 0 {
            warn!(
                path = %self.config.path.display(),
                pending,
                "Store dropped with uncommitted rows; call close() to flush"
            );
        }
    }
}
