//! sqlsink-inspect: Store catalog dump
//!
//! Opens a store read-only and logs every record type and topic it holds.
//!
//! ## Usage
//! ```text
//! sqlsink-inspect [PATH]
//! ```
//!
//! ## Configuration
//! - PATH argument: store file to inspect
//! - SQLSINK_CONFIG / SQLSINK__PATH: used when no argument is given
//! - SQLSINK_LOG: log filter (default: info)

use std::path::PathBuf;

use tracing::info;

use sqlsink::bootstrap::init_tracing;
use sqlsink::{SinkConfig, Store};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let path: PathBuf = match std::env::args().nth(1) {
        Some(path) => path.into(),
        None => SinkConfig::load(None)?.path,
    };

    let mut store = Store::inspect(&path).await?;
    let catalog = store.catalog();

    for t in catalog.types() {
        info!(
            type_name = %t.key.name,
            hash = %t.key.hash,
            table = %t.table_name,
            columns = t.columns.len(),
            nested = ?t.nested,
            "type"
        );
    }

    for topic in catalog.topics() {
        info!(
            topic = %topic.name,
            type_name = %topic.type_name,
            view = topic.view_name.as_deref().unwrap_or("-"),
            count = topic.count,
            first = topic.dt_first.as_deref().unwrap_or("-"),
            last = topic.dt_last.as_deref().unwrap_or("-"),
            "topic"
        );
    }

    store.close().await?;
    Ok(())
}
