//! `vpnsched-schedule`: the time-ordered VPN schedule.
//!
//! # Document format
//!
//! One entry per line, UTF-8 CSV:
//!
//! ```text
//! # comments run to end of line, blank lines are ignored
//! 2025-09-01T06:00:00Z,START,work
//! 2025-09-01T18:00:00Z,STOP
//! 2025-09-02T00:00:00Z,SET_DEFAULT_AND_START,home
//! ```
//!
//! | Command                 | Arguments    |
//! |-------------------------|--------------|
//! | `START`                 | profile name |
//! | `STOP`                  | none         |
//! | `SET_DEFAULT`           | profile name |
//! | `SET_DEFAULT_AND_START` | profile name |
//!
//! Timestamps must be strictly increasing; the active action at time `t` is
//! the last entry whose timestamp is `<= t`.

pub mod error;
pub mod shared;
pub mod storage;
pub mod store;
pub mod types;

pub use error::{ActionError, ParseError, Result, StorageError};
pub use shared::SharedSchedule;
pub use storage::ScheduleFile;
pub use store::ScheduleStore;
pub use types::{Action, Command, TimedAction};
