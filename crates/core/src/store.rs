//! The durable-storage seam. `interceptor-core` defines the trait and error
//! type; `interceptor-store` provides the SQLite-backed implementation so
//! this crate (and anything evaluating rules) never depends on a database
//! driver.

use async_trait::async_trait;
use thiserror::Error;

use crate::model::{FilterModel, RuleModel};

#[derive(Debug, Error)]
pub enum StoreError {
	#[error("a {kind} named '{name}' already exists")]
	NameCollision { kind: &'static str, name: String },
	#[error("rule references filter_id {filter_id} which does not exist")]
	DanglingForeignKey { filter_id: i64 },
	#[error("{kind} {id} not found")]
	NotFound { kind: &'static str, id: i64 },
	#[error("storage backend error: {0}")]
	Backend(#[source] anyhow::Error),
}

#[async_trait]
pub trait DurableStore: Send + Sync {
	async fn create_filter(&self, filter: FilterModel) -> Result<FilterModel, StoreError>;
	async fn update_filter(&self, filter: FilterModel) -> Result<FilterModel, StoreError>;
	async fn delete_filter(&self, id: i64) -> Result<(), StoreError>;
	async fn list_filters(&self) -> Result<Vec<FilterModel>, StoreError>;
	async fn get_filter(&self, id: i64) -> Result<FilterModel, StoreError>;

	async fn create_rule(&self, rule: RuleModel) -> Result<RuleModel, StoreError>;
	async fn update_rule(&self, rule: RuleModel) -> Result<RuleModel, StoreError>;
	async fn delete_rule(&self, id: i64) -> Result<(), StoreError>;
	async fn list_rules(&self) -> Result<Vec<RuleModel>, StoreError>;
	async fn get_rule(&self, id: i64) -> Result<RuleModel, StoreError>;

	/// True iff some other filter already has `name`. `exclude` is the
	/// filter's own id, so an update can check its new name against every
	/// *other* row without tripping on itself.
	async fn filter_name_exists(&self, name: &str, exclude: Option<i64>) -> Result<bool, StoreError>;
	/// Same as [`Self::filter_name_exists`], for rules.
	async fn rule_name_exists(&self, name: &str, exclude: Option<i64>) -> Result<bool, StoreError>;
}
