//! In-memory rule/filter cache shared by the worker process.
//!
//! Mirrors the original `CacheStore` singleton: filters and rules live in
//! two independently-lockable maps so a reader resolving a filter never
//! blocks on rule cache contention and vice versa. `IndexMap` preserves
//! insertion order, which is what gives "first matching enabled rule wins"
//! its meaning — the order rules were synced in is the order they're tried.

use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;

use crate::model::{FilterModel, OperationType, RuleModel, SyncMessage};

#[derive(Default)]
pub struct RuleCache {
	filters: RwLock<IndexMap<i64, Arc<FilterModel>>>,
	rules: RwLock<IndexMap<i64, Arc<RuleModel>>>,
}

impl RuleCache {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn get_filter_by_id(&self, id: i64) -> Option<Arc<FilterModel>> {
		self.filters.read().get(&id).cloned()
	}

	pub fn get_rule_by_id(&self, id: i64) -> Option<Arc<RuleModel>> {
		self.rules.read().get(&id).cloned()
	}

	/// Snapshot of every enabled rule, in sync order. Cloning the `Arc`s out
	/// from under the lock keeps evaluation lock-free.
	pub fn get_active_rules(&self) -> Vec<Arc<RuleModel>> {
		self.rules.read().values().filter(|r| r.enabled).cloned().collect()
	}

	pub fn filter_count(&self) -> usize {
		self.filters.read().len()
	}

	pub fn rule_count(&self) -> usize {
		self.rules.read().len()
	}

	fn upsert_filter(&self, filter: FilterModel) {
		if let Some(id) = filter.id {
			self.filters.write().insert(id, Arc::new(filter));
		}
	}

	fn upsert_rule(&self, rule: RuleModel) {
		if let Some(id) = rule.id {
			self.rules.write().insert(id, Arc::new(rule));
		}
	}

	fn remove_filter(&self, id: i64) {
		self.filters.write().shift_remove(&id);
	}

	fn remove_rule(&self, id: i64) {
		self.rules.write().shift_remove(&id);
	}

	/// Applies one incoming sync message. FULL_SYNC replaces both maps
	/// atomically with respect to each other (both write locks taken before
	/// either is populated) so a reader never observes a half-replaced
	/// world. ADD/UPDATE/DELETE only ever touch the map(s) named in the
	/// message; an id collision on ADD silently overwrites, matching the
	/// cache's original "last write wins" semantics.
	pub fn apply_sync(&self, msg: SyncMessage) {
		match msg.operation {
			OperationType::FullSync => {
				let mut filters = self.filters.write();
				let mut rules = self.rules.write();
				filters.clear();
				for f in msg.filters_data {
					if let Some(id) = f.id {
						filters.insert(id, Arc::new(f));
					}
				}
				rules.clear();
				for r in msg.rules_list {
					if let Some(id) = r.id {
						rules.insert(id, Arc::new(r));
					}
				}
			}
			OperationType::Add | OperationType::Update => {
				for f in msg.filters_data {
					self.upsert_filter(f);
				}
				for r in msg.rules_list {
					self.upsert_rule(r);
				}
			}
			OperationType::Delete => {
				for f in msg.filters_data.into_iter().filter_map(|f| f.id) {
					self.remove_filter(f);
				}
				for r in msg.rules_list.into_iter().filter_map(|r| r.id) {
					self.remove_rule(r);
				}
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::model::{Operator, RuleAction};

	fn filter(id: i64) -> FilterModel {
		FilterModel::new(Some(id), "f", "url", Operator::Contains, "x").unwrap()
	}

	fn rule(id: i64, enabled: bool) -> RuleModel {
		RuleModel::new(Some(id), "r", id, RuleAction::AddHeader, "k", "v", enabled).unwrap()
	}

	#[test]
	fn full_sync_replaces_contents() {
		let cache = RuleCache::new();
		cache.apply_sync(SyncMessage {
			operation: OperationType::Add,
			rules_list: vec![rule(1, true)],
			filters_data: vec![filter(1)],
			timestamp: 0.0,
		});
		cache.apply_sync(SyncMessage {
			operation: OperationType::FullSync,
			rules_list: vec![rule(2, true)],
			filters_data: vec![filter(2)],
			timestamp: 0.0,
		});
		assert!(cache.get_rule_by_id(1).is_none());
		assert!(cache.get_rule_by_id(2).is_some());
		assert_eq!(cache.filter_count(), 1);
	}

	#[test]
	fn active_rules_excludes_disabled() {
		let cache = RuleCache::new();
		cache.apply_sync(SyncMessage {
			operation: OperationType::Add,
			rules_list: vec![rule(1, true), rule(2, false)],
			filters_data: vec![],
			timestamp: 0.0,
		});
		let active = cache.get_active_rules();
		assert_eq!(active.len(), 1);
		assert_eq!(active[0].id, Some(1));
	}

	#[test]
	fn active_rules_preserve_insertion_order() {
		let cache = RuleCache::new();
		cache.apply_sync(SyncMessage {
			operation: OperationType::Add,
			rules_list: vec![rule(5, true), rule(1, true), rule(3, true)],
			filters_data: vec![],
			timestamp: 0.0,
		});
		let ids: Vec<_> = cache.get_active_rules().iter().map(|r| r.id).collect();
		assert_eq!(ids, vec![Some(5), Some(1), Some(3)]);
	}

	#[test]
	fn delete_removes_by_id() {
		let cache = RuleCache::new();
		cache.apply_sync(SyncMessage {
			operation: OperationType::Add,
			rules_list: vec![rule(1, true)],
			filters_data: vec![],
			timestamp: 0.0,
		});
		cache.apply_sync(SyncMessage {
			operation: OperationType::Delete,
			rules_list: vec![rule(1, true)],
			filters_data: vec![],
			timestamp: 0.0,
		});
		assert!(cache.get_rule_by_id(1).is_none());
	}

	#[test]
	fn add_with_colliding_id_overwrites() {
		let cache = RuleCache::new();
		cache.apply_sync(SyncMessage {
			operation: OperationType::Add,
			rules_list: vec![rule(1, true)],
			filters_data: vec![],
			timestamp: 0.0,
		});
		cache.apply_sync(SyncMessage {
			operation: OperationType::Add,
			rules_list: vec![rule(1, false)],
			filters_data: vec![],
			timestamp: 0.0,
		});
		assert_eq!(cache.get_rule_by_id(1).unwrap().enabled, false);
	}
}
