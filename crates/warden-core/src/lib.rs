//! Event-driven automation engine for Kubernetes clusters.
//!
//! `warden-core` turns cluster events into findings and delivers them to
//! notification sinks. It provides:
//!
//! - **Triggers**: filters over resource changes, Prometheus alerts,
//!   schedules, manual requests and log lines, with scope rules, field-level
//!   change filters and per-playbook rate limiting
//! - **Actions**: named, parameter-validated units of work that enrich an
//!   execution event
//! - **Playbooks**: trigger sets bound to action chains
//! - **Sinks**: delivery destinations, reconciled by configuration diff so
//!   unchanged sinks survive a reload
//! - **Dispatch**: snapshot-based routing from events to playbooks to sinks,
//!   with per-playbook and per-sink failure isolation
//! - **Worker pool**: bounded, order-preserving lanes with graceful shutdown
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use serde_json::{Map, Value};
//! use warden_core::{
//!     ActionBindingDef, ActionRegistry, DispatcherConfig, EventDispatcher, EventKind,
//!     ManualTrigger, ManualTriggerDef, NoParams, PlaybookDefinition, SinkConfig, SinkContext,
//!     SinkFactory, Sink, TriggerDef, TriggerEvent,
//! };
//!
//! struct NoSinks;
//!
//! impl SinkFactory for NoSinks {
//!     fn create(&self, _: &SinkConfig, _: &SinkContext) -> warden_core::Result<Arc<dyn Sink>> {
//!         Err(warden_core::EngineError::config("no sinks"))
//!     }
//! }
//!
//! let mut actions = ActionRegistry::new();
//! actions
//!     .register_fn::<NoParams, _>("hello", vec![EventKind::Manual], |event, _| {
//!         event.finding_mut().description = "hello".to_string();
//!         Ok(())
//!     })
//!     .unwrap();
//!
//! let dispatcher = EventDispatcher::new(Arc::new(actions), DispatcherConfig::default());
//! let playbook = PlaybookDefinition::new(
//!     TriggerDef::OnManual(ManualTriggerDef::default()),
//!     vec![ActionBindingDef::new("hello", Value::Null)],
//! );
//! dispatcher.reload(&[playbook], &[], &Map::new(), &NoSinks).unwrap();
//!
//! let report = dispatcher.handle(&TriggerEvent::Manual(ManualTrigger::default()));
//! assert_eq!(report.fired, 1);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod action;
pub mod callbacks;
pub mod diff;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod finding;
pub mod playbook;
pub mod pool;
pub mod rate_limiter;
pub mod registry;
pub mod schedule;
pub mod scope;
pub mod sink;
pub mod sinks_registry;
pub mod trigger;

// Re-export main types at crate root
pub use action::{
    Action, ActionParams, ActionRegistry, BoundParams, FieldKind, FieldSpec, FnAction, NoParams,
    ParamsSchema,
};
pub use callbacks::{CallbackBinding, CallbackId, CallbackRegistry};
pub use diff::{ChangeFilters, FieldDiff};
pub use dispatcher::{DispatchReport, DispatcherConfig, EventDispatcher, Generation, PurgeReport};
pub use error::{ActionError, DeliveryError, EngineError, ParamViolation, Result};
pub use event::{
    EventKind, ExecutionContext, ExecutionEvent, LogLine, ManualTrigger, Operation,
    PrometheusAlert, ResourceChange, ScheduledTick, TriggerEvent,
};
pub use finding::{
    Block, Enrichment, Finding, FindingSeverity, FindingSource, FindingSubject, FindingType,
};
pub use playbook::{ActionBindingDef, Playbook, PlaybookDefinition, PlaybookOutcome};
pub use pool::{PoolConfig, PoolStats, WorkerPool};
pub use rate_limiter::{Clock, ManualClock, RateLimitEntry, RateLimiter, SystemClock};
pub use registry::PlaybooksRegistry;
pub use schedule::{INITIAL_SCHEDULE_DELAY, Schedule, ScheduleDef};
pub use scope::{LabelSelector, Scope, ScopeRule, ScopeRuleDef};
pub use sink::{FindingMatcher, Sink, SinkBase, SinkConfig, SinkContext, SinkFactory};
pub use sinks_registry::{SinksReconciliation, SinksRegistry};
pub use trigger::{
    AlertStatusFilter, LogTriggerDef, ManualTriggerDef, PrometheusTriggerDef,
    ResourceChangeTriggerDef, Trigger, TriggerDef, TriggerOptions, TriggerOutcome,
};
