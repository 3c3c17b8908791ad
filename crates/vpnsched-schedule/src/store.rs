use chrono::{DateTime, Utc};

use crate::error::ParseError;
use crate::types::{Action, Command, TimedAction};

/// Immutable, strictly time-ordered list of scheduled actions.
///
/// Built once from a CSV document and replaced wholesale when a new document
/// is loaded; see [`SharedSchedule`](crate::SharedSchedule).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScheduleStore {
    /// Strictly increasing by timestamp.
    entries: Vec<TimedAction>,
}

impl ScheduleStore {
    /// Parse a schedule document.
    ///
    /// Each non-blank line is `<ISO-8601 instant>,<COMMAND>[,<arg>...]`.
    /// `#` starts a comment running to end of line. Any malformed line, or a
    /// timestamp that is not after the previous one, fails the whole document.
    pub fn parse(document: &str) -> Result<Self, ParseError> {
        let mut entries: Vec<TimedAction> = Vec::new();

        for (idx, raw) in document.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }

            let fields: Vec<&str> = line.split(',').map(str::trim).collect();
            if fields.len() < 2 {
                return Err(ParseError::MissingCommand {
                    line: line_no,
                    content: line.to_string(),
                });
            }

            let timestamp = parse_instant(fields[0]).map_err(|reason| {
                ParseError::InvalidTimestamp {
                    line: line_no,
                    value: fields[0].to_string(),
                    reason,
                }
            })?;

            if let Some(previous) = entries.last() {
                if timestamp <= previous.timestamp {
                    return Err(ParseError::NotIncreasing {
                        line: line_no,
                        timestamp,
                        previous: previous.timestamp,
                    });
                }
            }

            let command: Command =
                fields[1]
                    .parse()
                    .map_err(|_| ParseError::UnknownCommand {
                        line: line_no,
                        value: fields[1].to_string(),
                    })?;

            let arguments = fields[2..].iter().map(|s| s.to_string()).collect();
            let action = Action::new(command, arguments).map_err(|source| ParseError::Action {
                line: line_no,
                source,
            })?;

            entries.push(TimedAction::new(timestamp, action));
        }

        Ok(Self { entries })
    }

    /// Build a store from already-constructed entries, enforcing the same
    /// strictly-increasing rule as [`parse`](Self::parse).
    pub fn from_entries(entries: Vec<TimedAction>) -> Result<Self, ParseError> {
        for (idx, pair) in entries.windows(2).enumerate() {
            if pair[1].timestamp <= pair[0].timestamp {
                return Err(ParseError::NotIncreasing {
                    line: idx + 2,
                    timestamp: pair[1].timestamp,
                    previous: pair[0].timestamp,
                });
            }
        }
        Ok(Self { entries })
    }

    /// The entry in effect at `now`: greatest timestamp `<= now`.
    pub fn active_action(&self, now: DateTime<Utc>) -> Option<&TimedAction> {
        let idx = self.entries.partition_point(|e| e.timestamp <= now);
        idx.checked_sub(1).map(|i| &self.entries[i])
    }

    /// The first entry strictly after `now`, i.e. the next change of state.
    pub fn next_change(&self, now: DateTime<Utc>) -> Option<&TimedAction> {
        let idx = self.entries.partition_point(|e| e.timestamp <= now);
        self.entries.get(idx)
    }

    /// Canonical CSV form, one `timestamp,COMMAND[,arg...]` line per entry.
    pub fn serialize(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            out.push_str(&entry.to_string());
            out.push('\n');
        }
        out
    }

    pub fn entries(&self) -> &[TimedAction] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::str::FromStr for ScheduleStore {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// RFC 3339 instant with an explicit offset, normalised to UTC.
fn parse_instant(value: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| e.to_string())
}
