//! # cosmos-tasks
//!
//! Task claim-and-lifecycle engine.
//!
//! Users claim `OPEN` tasks exclusively, hold at most a fixed number at once,
//! and complete them. A background sweeper expires tasks nobody claimed and
//! reopens claims left stale. Every transition lands in an append-only audit
//! trail. Storage is pluggable behind [`store::TaskStore`]: Postgres via
//! [`db::Db`] or in-process via [`store::MemoryStore`].

pub mod audit;
pub mod clock;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod model;
pub mod ratelimit;
pub mod service;
pub mod store;
pub mod telemetry;
