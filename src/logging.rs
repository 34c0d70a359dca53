use crate::crd::Kappnav;
use kube::ResourceExt;
use std::fmt::Display;
use std::str::FromStr;
use tracing::{debug, error, info, trace, warn};

/// Verbosity requested through `spec.logging.operator`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    None,
    Warning,
    Error,
    Info,
    Debug,
    Entry,
    All,
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(LogLevel::None),
            "warning" => Ok(LogLevel::Warning),
            "error" => Ok(LogLevel::Error),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "entry" => Ok(LogLevel::Entry),
            "all" => Ok(LogLevel::All),
            other => Err(format!("unknown log level {}", other)),
        }
    }
}

/// How a message is categorised by the code emitting it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogType {
    Entry,
    Exit,
    Info,
    Warning,
    Error,
    Debug,
}

/// Logging context for a single reconciliation pass.
///
/// Built from the resolved instance so that the level an operator sets on one
/// instance never leaks into passes for another.
#[derive(Debug, Clone)]
pub struct PassLog {
    level: LogLevel,
    namespace: String,
    name: String,
}

impl PassLog {
    pub fn new(level: LogLevel, namespace: &str, name: &str) -> Self {
        PassLog {
            level,
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    /// Unknown or missing levels keep the `info` default.
    pub fn for_instance(instance: &Kappnav) -> Self {
        let level = instance
            .spec
            .logging
            .as_ref()
            .and_then(|logging| logging.get("operator"))
            .and_then(|level| level.parse().ok())
            .unwrap_or(LogLevel::Info);
        PassLog::new(
            level,
            &instance.namespace().unwrap_or_default(),
            &instance.name_any(),
        )
    }

    pub fn level(&self) -> LogLevel {
        self.level
    }

    pub fn is_enabled(&self, log_type: LogType) -> bool {
        match self.level {
            LogLevel::None => false,
            LogLevel::Error => log_type == LogType::Error,
            LogLevel::Warning => matches!(log_type, LogType::Error | LogType::Warning),
            LogLevel::Info => matches!(
                log_type,
                LogType::Error | LogType::Warning | LogType::Info
            ),
            LogLevel::Debug => matches!(
                log_type,
                LogType::Error | LogType::Warning | LogType::Info | LogType::Debug
            ),
            LogLevel::Entry | LogLevel::All => true,
        }
    }

    pub fn error(&self, message: impl Display) {
        if self.is_enabled(LogType::Error) {
            error!(namespace = %self.namespace, name = %self.name, "{}", message);
        }
    }

    pub fn warning(&self, message: impl Display) {
        if self.is_enabled(LogType::Warning) {
            warn!(namespace = %self.namespace, name = %self.name, "{}", message);
        }
    }

    pub fn info(&self, message: impl Display) {
        if self.is_enabled(LogType::Info) {
            info!(namespace = %self.namespace, name = %self.name, "{}", message);
        }
    }

    pub fn debug(&self, message: impl Display) {
        if self.is_enabled(LogType::Debug) {
            debug!(namespace = %self.namespace, name = %self.name, "{}", message);
        }
    }

    pub fn entry(&self, step: &str) {
        if self.is_enabled(LogType::Entry) {
            trace!(namespace = %self.namespace, name = %self.name, "Entering {}", step);
        }
    }

    pub fn exit(&self, step: &str) {
        if self.is_enabled(LogType::Exit) {
            trace!(namespace = %self.namespace, name = %self.name, "Exiting {}", step);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::KappnavSpec;
    use std::collections::BTreeMap;

    const ALL_TYPES: [LogType; 6] = [
        LogType::Entry,
        LogType::Exit,
        LogType::Info,
        LogType::Warning,
        LogType::Error,
        LogType::Debug,
    ];

    fn enabled(level: LogLevel) -> Vec<LogType> {
        let log = PassLog::new(level, "kappnav", "instance");
        ALL_TYPES
            .into_iter()
            .filter(|t| log.is_enabled(*t))
            .collect()
    }

    #[test]
    fn test_level_table() {
        assert!(enabled(LogLevel::None).is_empty());
        assert_eq!(enabled(LogLevel::Error), vec![LogType::Error]);
        assert_eq!(
            enabled(LogLevel::Warning),
            vec![LogType::Warning, LogType::Error]
        );
        assert_eq!(
            enabled(LogLevel::Info),
            vec![LogType::Info, LogType::Warning, LogType::Error]
        );
        assert_eq!(
            enabled(LogLevel::Debug),
            vec![LogType::Info, LogType::Warning, LogType::Error, LogType::Debug]
        );
        assert_eq!(enabled(LogLevel::Entry), ALL_TYPES.to_vec());
        assert_eq!(enabled(LogLevel::All), ALL_TYPES.to_vec());
    }

    #[test]
    fn test_for_instance_reads_operator_level() {
        let mut instance = Kappnav::new(
            "kappnav",
            KappnavSpec {
                logging: Some(BTreeMap::from([(
                    "operator".to_string(),
                    "warning".to_string(),
                )])),
                ..Default::default()
            },
        );
        assert_eq!(PassLog::for_instance(&instance).level(), LogLevel::Warning);

        instance.spec.logging = Some(BTreeMap::from([(
            "operator".to_string(),
            "verbose".to_string(),
        )]));
        assert_eq!(PassLog::for_instance(&instance).level(), LogLevel::Info);

        instance.spec.logging = None;
        assert_eq!(PassLog::for_instance(&instance).level(), LogLevel::Info);
    }
}
