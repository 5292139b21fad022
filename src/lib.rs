//! # session-guard: Experiment Session Coordinator
//!
//! **Version**: 0.1.0
//!
//! session-guard coordinates a multi-session behavioural experiment embedded
//! in an interactive application. It tracks the session lifecycle, gates
//! which actions a participant may take at each phase, and keeps durable,
//! recoverable snapshots of experiment state against reloads, crashes and
//! closed tabs.
//!
//! ## Components
//!
//! - [`lifecycle`]: session start/end, idle and timeout detection, seeded
//!   presentation order, history and analytics
//! - [`validation`]: progress phase machine, per-action preconditions and
//!   consistency rules
//! - [`backup`]: snapshot encoding, scheduled and event backups, recovery,
//!   storage health and eviction
//! - [`coordinator`]: composition root wiring the three over a shared
//!   [`experiment::ExperimentState`], an [`bus::EventBus`] and a
//!   [`store::DurableStore`]
//!
//! Everything runs on one logical thread. Store and bus calls are
//! synchronous; timers are driven by [`coordinator::ExperimentCoordinator::tick`].
//!
//! ## Example
//!
//! ```rust
//! use std::rc::Rc;
//! use session_guard::bus::LocalBus;
//! use session_guard::clock::SystemClock;
//! use session_guard::config::ExperimentConfig;
//! use session_guard::coordinator::ExperimentCoordinator;
//! use session_guard::store::MemoryStore;
//!
//! let mut coordinator = ExperimentCoordinator::new(
//!     ExperimentConfig::default(),
//!     Rc::new(MemoryStore::new()),
//!     Rc::new(LocalBus::new()),
//!     Rc::new(SystemClock),
//! )?;
//! coordinator.initialize("participant-042");
//! assert_eq!(coordinator.state().session_order.len(), 9);
//! # Ok::<(), session_guard::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod backup;
pub mod bus;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod experiment;
pub mod lifecycle;
pub mod logging;
pub mod scheduler;
pub mod store;
pub mod validation;

pub use error::{Error, Result};
