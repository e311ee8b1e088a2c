pub mod error;

pub use error::*;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_PATH_ENV: &str = "ARMFLOW_CONFIG_PATH";
pub const SUBSCRIPTION_ENV: &str = "AZURE_SUBSCRIPTION_ID";
pub const API_BASE_ENV: &str = "ARMFLOW_API_BASE";

const DEFAULT_API_BASE: &str = "https://management.azure.com";

/// armflow の設定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArmflowConfig {
    /// Azure サブスクリプションID
    pub subscription_id: Option<String>,

    /// 管理APIのエンドポイント
    pub api_base: String,

    /// ポーリング間隔のデフォルト値 (秒)。Retry-After が無い場合に使う
    pub default_poll_interval_secs: u64,

    /// what-if の待ち時間の上限 (秒)
    pub what_if_budget_secs: u64,

    /// 名前生成の試行回数
    pub name_attempts: u32,

    /// インスタンス状態の保存先
    pub state_dir: Option<PathBuf>,
}

impl Default for ArmflowConfig {
    fn default() -> Self {
        Self {
            subscription_id: None,
            api_base: DEFAULT_API_BASE.to_string(),
            default_poll_interval_secs: 60,
            what_if_budget_secs: 30 * 60,
            name_attempts: 15,
            state_dir: None,
        }
    }
}

impl ArmflowConfig {
    /// 設定ファイルを探して読み込み、環境変数で上書きする
    ///
    /// 設定ファイルが無い場合はデフォルト値から始める。
    pub fn load() -> Result<Self> {
        let mut config = match find_config_file() {
            Ok(path) => {
                tracing::debug!("Loading config from {}", path.display());
                Self::from_file(&path)?
            }
            Err(ConfigError::ConfigFileNotFound) => {
                tracing::debug!("No config file found, using defaults");
                Self::default()
            }
            Err(e) => return Err(e),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content, path)
    }

    fn from_yaml(content: &str, path: &Path) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// AZURE_SUBSCRIPTION_ID / ARMFLOW_API_BASE で上書き
    pub fn apply_env_overrides(&mut self) {
        if let Some(subscription) = non_empty_env(SUBSCRIPTION_ENV) {
            self.subscription_id = Some(subscription);
        }
        if let Some(api_base) = non_empty_env(API_BASE_ENV) {
            self.api_base = api_base;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.subscription().is_none() {
            return Err(ConfigError::MissingSubscription);
        }
        if !self.api_base.starts_with("http://") && !self.api_base.starts_with("https://") {
            return Err(ConfigError::InvalidValue(format!(
                "api_base は http(s) URL である必要があります: {}",
                self.api_base
            )));
        }
        if self.name_attempts == 0 {
            return Err(ConfigError::InvalidValue(
                "name_attempts は 1 以上である必要があります".to_string(),
            ));
        }
        Ok(())
    }

    pub fn subscription(&self) -> Option<&str> {
        self.subscription_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.default_poll_interval_secs)
    }

    pub fn what_if_budget(&self) -> Duration {
        Duration::from_secs(self.what_if_budget_secs)
    }

    /// 状態ディレクトリ (未指定なら ./.armflow/state)
    pub fn state_dir(&self) -> PathBuf {
        self.state_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(".armflow").join("state"))
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// armflow.yaml を探す
///
/// 以下の優先順位で設定ファイルを検索:
/// 1. 環境変数 ARMFLOW_CONFIG_PATH (直接パス指定)
/// 2. カレントディレクトリ: armflow.local.yaml, armflow.yaml
/// 3. ./.armflow/ ディレクトリ内: 同様の順序
/// 4. ~/.config/armflow/armflow.yaml (グローバル設定)
pub fn find_config_file() -> Result<PathBuf> {
    // 1. 環境変数で直接指定
    if let Ok(config_path) = std::env::var(CONFIG_PATH_ENV) {
        let path = PathBuf::from(config_path);
        if path.exists() {
            return Ok(path);
        }
        tracing::warn!(
            "{} points to a missing file: {}",
            CONFIG_PATH_ENV,
            path.display()
        );
    }

    let current_dir = std::env::current_dir()?;
    let candidates = ["armflow.local.yaml", "armflow.yaml"];

    // 2. カレントディレクトリで検索
    for filename in &candidates {
        let path = current_dir.join(filename);
        if path.exists() {
            return Ok(path);
        }
    }

    // 3. ./.armflow/ ディレクトリで検索
    let armflow_dir = current_dir.join(".armflow");
    if armflow_dir.is_dir() {
        for filename in &candidates {
            let path = armflow_dir.join(filename);
            if path.exists() {
                return Ok(path);
            }
        }
    }

    // 4. グローバル設定ファイル
    if let Some(config_dir) = dirs::config_dir() {
        let global_config = config_dir.join("armflow").join("armflow.yaml");
        if global_config.exists() {
            return Ok(global_config);
        }
    }

    Err(ConfigError::ConfigFileNotFound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;

    fn in_dir<R>(dir: &Path, f: impl FnOnce() -> R) -> R {
        let original_dir = std::env::current_dir().unwrap();
        std::env::set_current_dir(dir).unwrap();
        let result = f();
        std::env::set_current_dir(original_dir).unwrap();
        result
    }

    #[test]
    #[serial]
    fn test_find_config_file_in_current_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        fs::write(temp_dir.path().join("armflow.yaml"), "subscription_id: s").unwrap();

        let result = temp_env::with_var_unset(CONFIG_PATH_ENV, || {
            in_dir(temp_dir.path(), find_config_file)
        });
        assert!(result.unwrap().ends_with("armflow.yaml"));
    }

    #[test]
    #[serial]
    fn test_find_config_file_local_priority() {
        let temp_dir = tempfile::tempdir().unwrap();
        fs::write(temp_dir.path().join("armflow.yaml"), "# shared").unwrap();
        fs::write(temp_dir.path().join("armflow.local.yaml"), "# local").unwrap();

        let result = temp_env::with_var_unset(CONFIG_PATH_ENV, || {
            in_dir(temp_dir.path(), find_config_file)
        });

        // armflow.local.yaml が優先される
        assert!(result.unwrap().ends_with("armflow.local.yaml"));
    }

    #[test]
    #[serial]
    fn test_find_config_file_in_armflow_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        let armflow_dir = temp_dir.path().join(".armflow");
        fs::create_dir(&armflow_dir).unwrap();
        fs::write(armflow_dir.join("armflow.yaml"), "# nested").unwrap();

        let result = temp_env::with_var_unset(CONFIG_PATH_ENV, || {
            in_dir(temp_dir.path(), find_config_file)
        });
        assert!(result.unwrap().ends_with(".armflow/armflow.yaml"));
    }

    #[test]
    #[serial]
    fn test_find_config_file_env_var() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("custom.yaml");
        fs::write(&config_path, "# custom").unwrap();

        let result = temp_env::with_var(CONFIG_PATH_ENV, Some(&config_path), find_config_file);
        assert_eq!(result.unwrap(), config_path);
    }

    #[test]
    #[serial]
    fn test_load_applies_env_overrides() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("armflow.yaml");
        fs::write(
            &config_path,
            "subscription_id: from-file\ndefault_poll_interval_secs: 15\n",
        )
        .unwrap();

        let config = temp_env::with_vars(
            [
                (CONFIG_PATH_ENV, Some(config_path.to_str().unwrap())),
                (SUBSCRIPTION_ENV, Some("from-env")),
                (API_BASE_ENV, Some("http://127.0.0.1:9999")),
            ],
            ArmflowConfig::load,
        )
        .unwrap();

        assert_eq!(config.subscription(), Some("from-env"));
        assert_eq!(config.api_base, "http://127.0.0.1:9999");
        assert_eq!(config.poll_interval(), Duration::from_secs(15));
        assert_eq!(config.name_attempts, 15);
    }

    #[test]
    #[serial]
    fn test_load_without_subscription_fails() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("armflow.yaml");
        fs::write(&config_path, "what_if_budget_secs: 60\n").unwrap();

        let result = temp_env::with_vars(
            [
                (CONFIG_PATH_ENV, Some(config_path.to_str().unwrap())),
                (SUBSCRIPTION_ENV, None),
                (API_BASE_ENV, None),
            ],
            ArmflowConfig::load,
        );
        assert!(matches!(result, Err(ConfigError::MissingSubscription)));
    }

    #[test]
    fn test_defaults() {
        let config = ArmflowConfig::default();
        assert_eq!(config.poll_interval(), Duration::from_secs(60));
        assert_eq!(config.what_if_budget(), Duration::from_secs(1800));
        assert_eq!(config.state_dir(), PathBuf::from(".armflow/state"));
    }

    #[test]
    fn test_parse_error_names_file() {
        let result = ArmflowConfig::from_yaml("name_attempts: [oops", Path::new("bad.yaml"));
        match result {
            Err(ConfigError::Parse { path, .. }) => assert_eq!(path, PathBuf::from("bad.yaml")),
            other => panic!("Expected Parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = ArmflowConfig {
            subscription_id: Some("s".into()),
            api_base: "management.azure.com".into(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidValue(_))));

        let config = ArmflowConfig {
            subscription_id: Some("s".into()),
            name_attempts: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidValue(_))));
    }
}
