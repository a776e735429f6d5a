//! Project deletion and clearing for the span store.
//!
//! A request flows through four stages:
//!
//! 1. [`global_id`] resolves the caller's opaque reference to a row key.
//! 2. [`guard`] refuses to delete the configured default project.
//! 3. [`executor`] runs the deletes in one transaction, using [`planner`] to
//!    keep session deletes under the bound-parameter limit.
//! 4. After commit, [`events`] publishes an invalidation event.
//!
//! ```no_run
//! use std::sync::Arc;
//! use common::config::Configuration;
//! use common::queue::InMemoryQueue;
//! use lifecycle::{ClearRequest, ProjectLifecycle, QueuePublisher};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Configuration::default();
//! let store = common::Store::new(&config.database.dsn).await?;
//! let queue = InMemoryQueue::connected(config.events.queue.clone()).await?;
//! let lifecycle =
//!     ProjectLifecycle::from_store(store, Arc::new(QueuePublisher::new(queue)), &config)?;
//!
//! let receipt = lifecycle.clear_project(&ClearRequest::all("UHJvamVjdDox")).await?;
//! println!("{} traces left", receipt.query.trace_count(receipt.event.project_key()).await?);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod events;
pub mod executor;
pub mod global_id;
pub mod guard;
pub mod planner;
pub mod query;
pub mod store;

pub use error::{LifecycleError, Result};
pub use events::{InvalidationEvent, InvalidationPublisher, PublishFault, QueuePublisher};
pub use executor::{ClearRequest, LifecycleSettings, MutationReceipt, ProjectLifecycle};
pub use global_id::{GlobalId, NodeKind};
pub use guard::GuardRules;
pub use planner::BatchPlanner;
pub use query::Query;
pub use store::{ProjectStore, SqlProjectStore, StoreError, StoreTransaction};
