//! 应用配置和持久化
//!
//! 提供共享目录、默认端口、扫描时长等设置的存储和读取。

use log::debug;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::ble::DEFAULT_SCAN_SECS;
use crate::share::default_share_root;

/// 配置读写错误
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid settings: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to encode settings: {0}")]
    Encode(#[from] toml::ser::Error),
}

/// 应用设置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// 共享目录
    pub share_root: PathBuf,
    /// 共享端口（0 表示由系统分配）
    pub share_port: u16,
    /// 默认扫描时长（秒）
    pub scan_seconds: i64,
    /// 详细日志模式
    pub verbose: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            share_root: default_share_root(),
            share_port: 0,
            scan_seconds: DEFAULT_SCAN_SECS,
            verbose: false,
        }
    }
}

impl Settings {
    /// 获取配置文件路径
    pub fn config_path() -> PathBuf {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("lanshare");
        config_dir.join("settings.toml")
    }

    /// 加载设置（如果文件不存在或无法解析则使用默认值）
    pub fn load() -> Self {
        let path = Self::config_path();
        if !path.exists() {
            return Self::default();
        }
        match Self::load_from(&path) {
            Ok(settings) => {
                debug!("Loaded settings from {:?}", path);
                settings
            }
            Err(e) => {
                log::warn!("Failed to load settings: {}, using defaults", e);
                Self::default()
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// 保存设置
    pub fn save(&self) -> Result<PathBuf, ConfigError> {
        let path = Self::config_path();
        self.save_to(&path)?;
        Ok(path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.to_toml()?)?;
        debug!("Saved settings to {:?}", path);
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}
