//! Experiment data model
//!
//! ## Schema Overview
//!
//! ```text
//! ExperimentState
//!   ├── session_order: [permutation id; N]
//!   ├── metrics ──< SessionMetrics (one per finished session)
//!   └── current_session: SessionRecord?
//!                          ├──< SessionEvent (N)
//!                          └──< Milestone (N)
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use chrono::Utc;
//! use serde_json::json;
//! use session_guard::experiment::{ExperimentState, SessionRecord, SessionStartInfo};
//!
//! let mut state = ExperimentState::for_user("alice");
//! let info = SessionStartInfo::new(1, json!({"ballSpeed": 1.0}));
//! state.current_session = Some(SessionRecord::new("alice", info, Utc::now()));
//! assert!(state.has_active_session());
//! ```

mod metrics_record;
mod session_record;
mod state;

pub use metrics_record::SessionMetrics;
pub use session_record::{
    BrowserInfo, DeviceInfo, Milestone, SessionEvent, SessionRecord, SessionStartInfo,
};
pub use state::ExperimentState;
