use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ActionError;

/// Control verb understood by the VPN control service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Command {
    /// Connect the named profile.
    Start,
    /// Disconnect whatever is connected.
    Stop,
    /// Mark the named profile as the service default.
    SetDefault,
    /// Mark the named profile default, then connect it.
    SetDefaultAndStart,
}

impl Command {
    pub const ALL: [Command; 4] = [
        Command::Start,
        Command::Stop,
        Command::SetDefault,
        Command::SetDefaultAndStart,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Start => "START",
            Command::Stop => "STOP",
            Command::SetDefault => "SET_DEFAULT",
            Command::SetDefaultAndStart => "SET_DEFAULT_AND_START",
        }
    }

    /// Number of positional arguments the command requires.
    pub fn arity(&self) -> usize {
        match self {
            Command::Stop => 0,
            Command::Start | Command::SetDefault | Command::SetDefaultAndStart => 1,
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Command {
    type Err = String;

    /// Case-insensitive match against the command names.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        Command::ALL
            .into_iter()
            .find(|c| c.as_str() == upper)
            .ok_or_else(|| format!("unknown command: {s}"))
    }
}

/// A command plus its positional arguments. Arity is checked on construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Action {
    command: Command,
    arguments: Vec<String>,
}

impl Action {
    pub fn new(command: Command, arguments: Vec<String>) -> Result<Self, ActionError> {
        if arguments.len() != command.arity() {
            return Err(ActionError::Arity {
                command,
                expected: command.arity(),
                actual: arguments.len(),
            });
        }
        if let Some(bad) = arguments.iter().find(|a| !is_valid_argument(a)) {
            return Err(ActionError::InvalidArgument {
                command,
                argument: bad.clone(),
            });
        }
        Ok(Self { command, arguments })
    }

    pub fn start(profile: impl Into<String>) -> Result<Self, ActionError> {
        Self::new(Command::Start, vec![profile.into()])
    }

    pub fn stop() -> Self {
        Self {
            command: Command::Stop,
            arguments: Vec::new(),
        }
    }

    pub fn set_default(profile: impl Into<String>) -> Result<Self, ActionError> {
        Self::new(Command::SetDefault, vec![profile.into()])
    }

    pub fn set_default_and_start(profile: impl Into<String>) -> Result<Self, ActionError> {
        Self::new(Command::SetDefaultAndStart, vec![profile.into()])
    }

    pub fn command(&self) -> Command {
        self.command
    }

    pub fn arguments(&self) -> &[String] {
        &self.arguments
    }

    /// The profile name for commands that take one.
    pub fn profile(&self) -> Option<&str> {
        self.arguments.first().map(String::as_str)
    }
}

/// Arguments must survive the CSV form unchanged: non-empty, no surrounding
/// whitespace, and none of the separator, comment or line-break characters.
fn is_valid_argument(arg: &str) -> bool {
    !arg.is_empty()
        && arg.trim() == arg
        && !arg.contains([',', '#', '\n', '\r'])
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.command.as_str())?;
        for arg in &self.arguments {
            write!(f, ",{arg}")?;
        }
        Ok(())
    }
}

/// An [`Action`] that takes effect at an absolute UTC instant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct TimedAction {
    pub timestamp: DateTime<Utc>,
    pub action: Action,
}

impl TimedAction {
    pub fn new(timestamp: DateTime<Utc>, action: Action) -> Self {
        Self { timestamp, action }
    }
}

/// Canonical CSV line: `timestamp,COMMAND[,arg...]`.
impl std::fmt::Display for TimedAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{},{}",
            self.timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            self.action
        )
    }
}
