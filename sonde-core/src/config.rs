//! エンジン設定
//!
//! `~/.config/sonde/config.toml` または明示したパスから読み込みます。
//!
//! ```toml
//! debugger_command = "/usr/bin/lldb"
//! prompt_marker = "(lldb)"
//! use_debugging_helpers = true
//! response_timeout_ms = 10000
//! ```

use crate::watch::FetchOptions;
use crate::Result;
use anyhow::Context;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// デバッガのバックエンド
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Lldb,
}

/// エンジン設定
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// デバッガツールの実行ファイル
    pub debugger_command: PathBuf,
    /// デバッガツールの引数
    pub debugger_args: Vec<String>,
    /// デバッグ対象の実行ファイル
    pub executable: Option<PathBuf>,
    /// デバッグ対象の引数
    pub inferior_args: Vec<String>,
    /// 応答の区切りとなるプロンプト
    pub prompt_marker: String,
    pub use_debugging_helpers: bool,
    pub auto_deref_pointers: bool,
    /// 応答待ちのタイムアウト（0 または未指定で無効）
    pub response_timeout_ms: Option<u64>,
    pub backend: BackendKind,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            debugger_command: PathBuf::from("lldb"),
            debugger_args: Vec::new(),
            executable: None,
            inferior_args: Vec::new(),
            prompt_marker: "(lldb)".to_string(),
            use_debugging_helpers: false,
            auto_deref_pointers: false,
            response_timeout_ms: None,
            backend: BackendKind::Lldb,
        }
    }
}

impl EngineConfig {
    const DEFAULT_PATH: &'static str = ".config/sonde/config.toml";

    /// 設定ファイルを読み込む
    ///
    /// パスを指定しなかった場合はホームディレクトリの既定のファイルを読み、
    /// 存在しなければ既定値を返します。指定したパスが読めない場合はエラーです。
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match home::home_dir() {
                Some(home) => {
                    let path = home.join(Self::DEFAULT_PATH);
                    if !path.exists() {
                        debug!("No config file at {}, using defaults", path.display());
                        return Ok(Self::default());
                    }
                    path
                }
                None => return Ok(Self::default()),
            },
        };

        let data = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml(&data).with_context(|| format!("Invalid config file {}", path.display()))
    }

    /// TOML 文字列から読み込む
    pub fn from_toml(data: &str) -> Result<Self> {
        let config: Self = toml::de::from_str(data)?;
        Ok(config)
    }

    /// 応答待ちのタイムアウト
    pub fn response_timeout(&self) -> Option<Duration> {
        self.response_timeout_ms
            .filter(|&ms| ms > 0)
            .map(Duration::from_millis)
    }

    /// 変数取得のオプション
    pub fn fetch_options(&self) -> FetchOptions {
        FetchOptions {
            fancy: self.use_debugging_helpers,
            autoderef: self.auto_deref_pointers,
        }
    }
}
