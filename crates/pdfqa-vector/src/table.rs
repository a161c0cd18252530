//! LanceDB connection and housekeeping helpers.
use anyhow::Result;
use arrow_array::RecordBatchIterator;
use lancedb::{connect, Connection};
use std::sync::Arc;

pub async fn open_db(uri: &str) -> Result<Connection> {
	Ok(connect(uri).execute().await?)
}

pub async fn ensure_table(conn: &Connection, name: &str, schema: Arc<arrow_schema::Schema>) -> Result<()> {
	let names = conn.table_names().execute().await?;
	if names.contains(&name.to_string()) {
		return Ok(());
	}
	// create empty table with 0 rows
	let iter = RecordBatchIterator::new(vec![].into_iter(), schema.clone());
	conn.create_table(name, Box::new(iter)).execute().await?;
	Ok(())
}

/// Quotes a string literal for a Lance SQL predicate.
pub fn sql_literal(s: &str) -> String { format!("'{}'", s.replace('\'', "''")) }

pub fn sql_in(column: &str, values: impl IntoIterator<Item = impl AsRef<str>>) -> String {
	let list = values.into_iter().map(|v| sql_literal(v.as_ref())).collect::<Vec<_>>().join(",");
	format!("{} IN ({})", column, list)
}
