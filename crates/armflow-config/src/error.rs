use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error(
        "設定ファイルが見つかりません。以下の場所を確認してください:\n\
        - カレントディレクトリ: armflow.local.yaml, armflow.yaml\n\
        - ./.armflow/ ディレクトリ\n\
        - ~/.config/armflow/armflow.yaml\n\
        または ARMFLOW_CONFIG_PATH 環境変数で直接指定できます"
    )]
    ConfigFileNotFound,

    #[error("設定ファイルの解析に失敗しました ({path}): {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error(
        "サブスクリプションIDが設定されていません。\
        subscription_id を設定ファイルに書くか AZURE_SUBSCRIPTION_ID を指定してください"
    )]
    MissingSubscription,

    #[error("設定値が不正です: {0}")]
    InvalidValue(String),

    #[error("IO エラー: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
