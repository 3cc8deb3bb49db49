use serde::{Deserialize, Serialize};

/// Severity of a unit diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Log,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Log => "log",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// A diagnostic emitted by a unit through `log`, `warn` or `error`.
///
/// Serializes as `{"level", "id", "type", "name"?, "msg"}`; `name` only
/// appears when the unit has one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub level: LogLevel,
    pub id: String,
    #[serde(rename = "type")]
    pub unit_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub msg: String,
}

/// A log listener that hands records over to the `log` facade.
///
/// Register it with `unit.on_log(forward_to_log)` when no richer sink exists.
pub fn forward_to_log(record: &LogRecord) {
    let level = match record.level {
        LogLevel::Log => log::Level::Info,
        LogLevel::Warn => log::Level::Warn,
        LogLevel::Error => log::Level::Error,
    };
    let label = record.name.as_deref().unwrap_or(&record.id);
    log::log!(
        target: "flowwire::unit",
        level,
        "[{}:{}] {}",
        record.unit_type,
        label,
        record.msg
    );
}
