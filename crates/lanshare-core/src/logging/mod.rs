//! 日志模块
//!
//! 核心库只通过 `log` 门面输出日志；前端负责安装订阅者。
//! 这里提供统一的日志级别，以及对应的过滤指令。

use serde::{Deserialize, Serialize};
use std::fmt;

/// 本库的日志 target
pub const CRATE_TARGET: &str = "lanshare_core";

/// 日志级别
///
/// 实现了 `PartialOrd` 以便过滤。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    #[default]
    Info = 2,
    Debug = 3,
    Trace = 4,
}

impl LogLevel {
    /// 获取显示名称
    pub fn name(&self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
            LogLevel::Trace => "TRACE",
        }
    }

    /// 生成 `EnvFilter` 指令
    ///
    /// 第三方依赖（btleplug、hyper 等）最多输出到 info，避免刷屏。
    pub fn filter_directive(&self) -> String {
        let level = self.name().to_lowercase();
        let deps = if *self > LogLevel::Info { "info" } else { level.as_str() };
        format!("{deps},{CRATE_TARGET}={level},lanshare_cli={level}")
    }
}

/// 无法识别的日志级别
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown log level '{0}'")]
pub struct ParseLogLevelError(String);

impl std::str::FromStr for LogLevel {
    type Err = ParseLogLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "ERROR" => Ok(LogLevel::Error),
            "WARN" | "WARNING" => Ok(LogLevel::Warn),
            "INFO" => Ok(LogLevel::Info),
            "DEBUG" => Ok(LogLevel::Debug),
            "TRACE" => Ok(LogLevel::Trace),
            _ => Err(ParseLogLevelError(s.to_string())),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!("debug".parse::<LogLevel>().unwrap(), LogLevel::Debug);
        assert_eq!("Warning".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert!("verbose".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_filter_directive() {
        assert_eq!(
            LogLevel::Debug.filter_directive(),
            "info,lanshare_core=debug,lanshare_cli=debug"
        );
        assert_eq!(
            LogLevel::Warn.filter_directive(),
            "warn,lanshare_core=warn,lanshare_cli=warn"
        );
    }

    #[test]
    fn test_level_ordering() {
        assert!(LogLevel::Error < LogLevel::Trace);
        assert!(LogLevel::Debug > LogLevel::Info);
    }
}
