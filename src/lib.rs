//! Questline: a task-lifecycle engine for recurring player quests.
//!
//! Each player holds a bounded set of tasks per category. The engine
//! tracks progress, expires and regenerates tasks on configurable cycles,
//! and arbitrates paid rerolls against a per-cycle quota.
//!
//! # Architecture
//!
//! - **Clock** ([`clock`]): pure cycle math for daily, weekly, monthly,
//!   relative, fixed and permanent policies
//! - **Policy** ([`policy`]): immutable per-category rules
//! - **Catalog** ([`catalog`]): read-mostly template cache with delta sync
//! - **Store** ([`store`]): SQLite tables behind a single-writer queue
//! - **Engine** ([`engine`]): generator, lifecycle, rerolls, progress and
//!   the per-player cache
//! - **Scheduler** ([`scheduler`]): periodic sweep, sync and retention jobs

pub mod catalog;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod policy;
pub mod scheduler;
pub mod store;

pub use catalog::{TaskCatalog, TaskKind, TaskTemplate};
pub use config::EngineConfig;
pub use engine::{ActiveTask, Engine, EngineBuilder, ProgressEvent, RerollMode, TaskId};
pub use error::{Result, TaskError};
pub use policy::{CategoryPolicy, CategorySet};
