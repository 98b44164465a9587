//! SQLite-backed [`DurableStore`]. Schema and constraint semantics are
//! ported from the original implementation's `DatabaseManager`: filter and
//! rule names are unique, rules carry a `filter_id` foreign key enforced
//! with `ON DELETE CASCADE`, and both tables record `created_at` so listing
//! endpoints can show newest-first order.
//!
//! `rusqlite`'s `Connection` is `!Send`-across-await-points in practice (it
//! holds a raw pointer), so every query runs inside `spawn_blocking`, with a
//! `tokio::sync::Mutex` serializing access to the one connection — this
//! crate doesn't need a pool, the proxy's request volume is bounded by a
//! single operator's browser traffic, not production fan-out.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use interceptor_core::model::{FilterModel, Operator, RuleAction, RuleModel};
use interceptor_core::store::{DurableStore, StoreError};
use rusqlite::{Connection, ErrorCode, OptionalExtension, params};
use tokio::sync::Mutex;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS filters (
	id INTEGER PRIMARY KEY AUTOINCREMENT,
	filter_name TEXT NOT NULL UNIQUE,
	field TEXT NOT NULL,
	operator INTEGER NOT NULL,
	value TEXT NOT NULL,
	created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS rules (
	id INTEGER PRIMARY KEY AUTOINCREMENT,
	rule_name TEXT NOT NULL UNIQUE,
	filter_id INTEGER NOT NULL REFERENCES filters(id) ON DELETE CASCADE,
	action INTEGER NOT NULL,
	target_key TEXT NOT NULL,
	target_value TEXT NOT NULL,
	enabled INTEGER NOT NULL DEFAULT 1,
	created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);
"#;

fn map_write_error(err: rusqlite::Error, name_kind: &'static str, name: &str, filter_id: i64) -> StoreError {
	if let rusqlite::Error::SqliteFailure(sql_err, _) = &err {
		match sql_err.code {
			ErrorCode::ConstraintViolation => {
				let msg = err.to_string();
				if msg.contains("FOREIGN KEY") {
					return StoreError::DanglingForeignKey { filter_id };
				}
				return StoreError::NameCollision {
					kind: name_kind,
					name: name.to_string(),
				};
			}
			_ => {}
		}
	}
	StoreError::Backend(anyhow::Error::from(err))
}

fn row_to_filter(row: &rusqlite::Row<'_>) -> rusqlite::Result<FilterModel> {
	let id: i64 = row.get("id")?;
	let filter_name: String = row.get("filter_name")?;
	let field: String = row.get("field")?;
	let operator: i32 = row.get("operator")?;
	let value: String = row.get("value")?;
	FilterModel::new(Some(id), filter_name, field, Operator::from_wire(operator), value)
		.map_err(|e| rusqlite::Error::InvalidColumnType(0, e.to_string(), rusqlite::types::Type::Text))
}

fn row_to_rule(row: &rusqlite::Row<'_>) -> rusqlite::Result<RuleModel> {
	let id: i64 = row.get("id")?;
	let rule_name: String = row.get("rule_name")?;
	let filter_id: i64 = row.get("filter_id")?;
	let action: i32 = row.get("action")?;
	let target_key: String = row.get("target_key")?;
	let target_value: String = row.get("target_value")?;
	let enabled: bool = row.get("enabled")?;
	RuleModel::new(
		Some(id),
		rule_name,
		filter_id,
		RuleAction::from_wire(action),
		target_key,
		target_value,
		enabled,
	)
	.map_err(|e| rusqlite::Error::InvalidColumnType(0, e.to_string(), rusqlite::types::Type::Text))
}

pub struct SqliteStore {
	conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
	pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
		let conn = Connection::open(path).map_err(|e| StoreError::Backend(e.into()))?;
		Self::init(conn)
	}

	pub fn open_in_memory() -> Result<Self, StoreError> {
		let conn = Connection::open_in_memory().map_err(|e| StoreError::Backend(e.into()))?;
		Self::init(conn)
	}

	fn init(conn: Connection) -> Result<Self, StoreError> {
		conn
			.pragma_update(None, "foreign_keys", "ON")
			.map_err(|e| StoreError::Backend(e.into()))?;
		conn.execute_batch(SCHEMA).map_err(|e| StoreError::Backend(e.into()))?;
		Ok(SqliteStore {
			conn: Arc::new(Mutex::new(conn)),
		})
	}

	async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
	where
		T: Send + 'static,
		F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
	{
		let conn = self.conn.clone();
		tokio::task::spawn_blocking(move || {
			let guard = conn.blocking_lock();
			f(&guard)
		})
		.await
		.map_err(|e| StoreError::Backend(anyhow::anyhow!("blocking task panicked: {e}")))?
	}
}

#[async_trait]
impl DurableStore for SqliteStore {
	async fn create_filter(&self, filter: FilterModel) -> Result<FilterModel, StoreError> {
		self
			.with_conn(move |conn| {
				conn
					.execute(
						"INSERT INTO filters (filter_name, field, operator, value) VALUES (?1, ?2, ?3, ?4)",
						params![
							filter.filter_name,
							filter.field.as_wire_string(),
							filter.operator.to_wire(),
							filter.value
						],
					)
					.map_err(|e| map_write_error(e, "filter", &filter.filter_name, 0))?;
				let id = conn.last_insert_rowid();
				Ok(FilterModel { id: Some(id), ..filter })
			})
			.await
	}

	async fn update_filter(&self, filter: FilterModel) -> Result<FilterModel, StoreError> {
		let id = filter.id.ok_or(StoreError::NotFound { kind: "filter", id: 0 })?;
		self
			.with_conn(move |conn| {
				let rows = conn
					.execute(
						"UPDATE filters SET filter_name = ?1, field = ?2, operator = ?3, value = ?4 WHERE id = ?5",
						params![
							filter.filter_name,
							filter.field.as_wire_string(),
							filter.operator.to_wire(),
							filter.value,
							id
						],
					)
					.map_err(|e| map_write_error(e, "filter", &filter.filter_name, 0))?;
				if rows == 0 {
					return Err(StoreError::NotFound { kind: "filter", id });
				}
				Ok(filter)
			})
			.await
	}

	async fn delete_filter(&self, id: i64) -> Result<(), StoreError> {
		self
			.with_conn(move |conn| {
				let rows = conn
					.execute("DELETE FROM filters WHERE id = ?1", params![id])
					.map_err(|e| StoreError::Backend(e.into()))?;
				if rows == 0 {
					return Err(StoreError::NotFound { kind: "filter", id });
				}
				Ok(())
			})
			.await
	}

	async fn list_filters(&self) -> Result<Vec<FilterModel>, StoreError> {
		self
			.with_conn(|conn| {
				let mut stmt = conn
					.prepare("SELECT * FROM filters ORDER BY created_at DESC, id DESC")
					.map_err(|e| StoreError::Backend(e.into()))?;
				let rows = stmt
					.query_map([], row_to_filter)
					.map_err(|e| StoreError::Backend(e.into()))?;
				rows
					.collect::<Result<Vec<_>, _>>()
					.map_err(|e| StoreError::Backend(e.into()))
			})
			.await
	}

	async fn get_filter(&self, id: i64) -> Result<FilterModel, StoreError> {
		self
			.with_conn(move |conn| {
				conn
					.query_row("SELECT * FROM filters WHERE id = ?1", params![id], row_to_filter)
					.optional()
					.map_err(|e| StoreError::Backend(e.into()))?
					.ok_or(StoreError::NotFound { kind: "filter", id })
			})
			.await
	}

	async fn create_rule(&self, rule: RuleModel) -> Result<RuleModel, StoreError> {
		self
			.with_conn(move |conn| {
				conn
					.execute(
						"INSERT INTO rules (rule_name, filter_id, action, target_key, target_value, enabled) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
						params![
							rule.rule_name,
							rule.filter_id,
							rule.action.to_wire(),
							rule.target_key,
							rule.target_value,
							rule.enabled
						],
					)
					.map_err(|e| map_write_error(e, "rule", &rule.rule_name, rule.filter_id))?;
				let id = conn.last_insert_rowid();
				Ok(RuleModel { id: Some(id), ..rule })
			})
			.await
	}

	async fn update_rule(&self, rule: RuleModel) -> Result<RuleModel, StoreError> {
		let id = rule.id.ok_or(StoreError::NotFound { kind: "rule", id: 0 })?;
		self
			.with_conn(move |conn| {
				let rows = conn
					.execute(
						"UPDATE rules SET rule_name = ?1, filter_id = ?2, action = ?3, target_key = ?4, target_value = ?5, enabled = ?6 WHERE id = ?7",
						params![
							rule.rule_name,
							rule.filter_id,
							rule.action.to_wire(),
							rule.target_key,
							rule.target_value,
							rule.enabled,
							id
						],
					)
					.map_err(|e| map_write_error(e, "rule", &rule.rule_name, rule.filter_id))?;
				if rows == 0 {
					return Err(StoreError::NotFound { kind: "rule", id });
				}
				Ok(rule)
			})
			.await
	}

	async fn delete_rule(&self, id: i64) -> Result<(), StoreError> {
		self
			.with_conn(move |conn| {
				let rows = conn
					.execute("DELETE FROM rules WHERE id = ?1", params![id])
					.map_err(|e| StoreError::Backend(e.into()))?;
				if rows == 0 {
					return Err(StoreError::NotFound { kind: "rule", id });
				}
				Ok(())
			})
			.await
	}

	async fn list_rules(&self) -> Result<Vec<RuleModel>, StoreError> {
		self
			.with_conn(|conn| {
				let mut stmt = conn
					.prepare("SELECT * FROM rules ORDER BY created_at DESC, id DESC")
					.map_err(|e| StoreError::Backend(e.into()))?;
				let rows = stmt
					.query_map([], row_to_rule)
					.map_err(|e| StoreError::Backend(e.into()))?;
				rows
					.collect::<Result<Vec<_>, _>>()
					.map_err(|e| StoreError::Backend(e.into()))
			})
			.await
	}

	async fn get_rule(&self, id: i64) -> Result<RuleModel, StoreError> {
		self
			.with_conn(move |conn| {
				conn
					.query_row("SELECT * FROM rules WHERE id = ?1", params![id], row_to_rule)
					.optional()
					.map_err(|e| StoreError::Backend(e.into()))?
					.ok_or(StoreError::NotFound { kind: "rule", id })
			})
			.await
	}

	async fn filter_name_exists(&self, name: &str, exclude: Option<i64>) -> Result<bool, StoreError> {
		let name = name.to_string();
		self
			.with_conn(move |conn| {
				conn
					.query_row(
						"SELECT EXISTS(SELECT 1 FROM filters WHERE filter_name = ?1 AND id != ?2)",
						params![name, exclude.unwrap_or(0)],
						|row| row.get::<_, bool>(0),
					)
					.map_err(|e| StoreError::Backend(e.into()))
			})
			.await
	}

	async fn rule_name_exists(&self, name: &str, exclude: Option<i64>) -> Result<bool, StoreError> {
		let name = name.to_string();
		self
			.with_conn(move |conn| {
				conn
					.query_row(
						"SELECT EXISTS(SELECT 1 FROM rules WHERE rule_name = ?1 AND id != ?2)",
						params![name, exclude.unwrap_or(0)],
						|row| row.get::<_, bool>(0),
					)
					.map_err(|e| StoreError::Backend(e.into()))
			})
			.await
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn filter(name: &str) -> FilterModel {
		FilterModel::new(None, name, "url", Operator::Contains, "x").unwrap()
	}

	#[tokio::test]
	async fn creates_and_lists_filters() {
		let store = SqliteStore::open_in_memory().unwrap();
		let created = store.create_filter(filter("f1")).await.unwrap();
		assert!(created.id.is_some());
		let listed = store.list_filters().await.unwrap();
		assert_eq!(listed.len(), 1);
		assert_eq!(listed[0].filter_name, "f1");
	}

	#[tokio::test]
	async fn duplicate_filter_name_is_collision() {
		let store = SqliteStore::open_in_memory().unwrap();
		store.create_filter(filter("dup")).await.unwrap();
		let err = store.create_filter(filter("dup")).await.unwrap_err();
		assert!(matches!(err, StoreError::NameCollision { kind: "filter", .. }));
	}

	#[tokio::test]
	async fn rule_with_unknown_filter_id_is_dangling_fk() {
		let store = SqliteStore::open_in_memory().unwrap();
		let rule = RuleModel::new(None, "r1", 999, RuleAction::AddHeader, "k", "v", true).unwrap();
		let err = store.create_rule(rule).await.unwrap_err();
		assert!(matches!(err, StoreError::DanglingForeignKey { .. }));
	}

	#[tokio::test]
	async fn deleting_filter_cascades_to_rules() {
		let store = SqliteStore::open_in_memory().unwrap();
		let f = store.create_filter(filter("f1")).await.unwrap();
		let rule = RuleModel::new(None, "r1", f.id.unwrap(), RuleAction::AddHeader, "k", "v", true).unwrap();
		let created_rule = store.create_rule(rule).await.unwrap();
		store.delete_filter(f.id.unwrap()).await.unwrap();
		let err = store.get_rule(created_rule.id.unwrap()).await.unwrap_err();
		assert!(matches!(err, StoreError::NotFound { kind: "rule", .. }));
	}

	#[tokio::test]
	async fn get_missing_filter_is_not_found() {
		let store = SqliteStore::open_in_memory().unwrap();
		let err = store.get_filter(42).await.unwrap_err();
		assert!(matches!(err, StoreError::NotFound { kind: "filter", id: 42 }));
	}

	#[tokio::test]
	async fn list_orders_newest_first() {
		let store = SqliteStore::open_in_memory().unwrap();
		store.create_filter(filter("a")).await.unwrap();
		store.create_filter(filter("b")).await.unwrap();
		let listed = store.list_filters().await.unwrap();
		assert_eq!(listed[0].filter_name, "b");
		assert_eq!(listed[1].filter_name, "a");
	}

	#[tokio::test]
	async fn filter_name_exists_ignores_the_excluded_id() {
		let store = SqliteStore::open_in_memory().unwrap();
		let f = store.create_filter(filter("taken")).await.unwrap();
		assert!(store.filter_name_exists("taken", None).await.unwrap());
		assert!(!store.filter_name_exists("taken", f.id).await.unwrap());
		assert!(!store.filter_name_exists("unused", None).await.unwrap());
	}

	#[tokio::test]
	async fn rule_name_exists_ignores_the_excluded_id() {
		let store = SqliteStore::open_in_memory().unwrap();
		let f = store.create_filter(filter("f1")).await.unwrap();
		let rule = RuleModel::new(None, "taken", f.id.unwrap(), RuleAction::AddHeader, "k", "v", true).unwrap();
		let created = store.create_rule(rule).await.unwrap();
		assert!(store.rule_name_exists("taken", None).await.unwrap());
		assert!(!store.rule_name_exists("taken", created.id).await.unwrap());
	}

	#[tokio::test]
	async fn dangling_foreign_key_carries_the_attempted_filter_id() {
		let store = SqliteStore::open_in_memory().unwrap();
		let rule = RuleModel::new(None, "r1", 999, RuleAction::AddHeader, "k", "v", true).unwrap();
		let err = store.create_rule(rule).await.unwrap_err();
		assert!(matches!(err, StoreError::DanglingForeignKey { filter_id: 999 }));
	}
}
