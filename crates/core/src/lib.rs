//! Shared domain model, rule evaluation, caching and wire codec for the
//! HTTP interceptor. Transport (hudsucker), persistence (rusqlite) and
//! process orchestration live in sibling crates; this crate has no I/O.

pub mod actions;
pub mod cache;
pub mod codec;
pub mod evaluator;
pub mod exclusion;
pub mod model;
pub mod store;
pub mod telemetry;

pub use cache::RuleCache;
pub use exclusion::ExclusionSet;
pub use store::{DurableStore, StoreError};
