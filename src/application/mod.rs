//! Application layer: the three services that keep credits, payments and
//! generation jobs consistent.
//!
//! Services hold their ports as `Arc<dyn Trait>` handles and are cheap to
//! clone, so one set of services can be shared by every request task.

pub mod dispatcher;
pub mod ledger;
pub mod orchestrator;
pub mod reconciler;
