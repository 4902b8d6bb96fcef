use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("設定ディレクトリが見つかりません")]
    ConfigDirNotFound,

    #[error(
        "compose ファイルが見つかりません: {0}\n\
        以下のファイル名を確認してください:\n\
        - compose.yaml, compose.yml, docker-compose.yml, docker-compose.yaml\n\
        または -f / BERTH_FILE 環境変数で直接指定できます"
    )]
    ComposeFileNotFound(PathBuf),

    #[error("設定ファイルのパースに失敗しました: {path}\n理由: {source}")]
    InvalidSettings {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("環境変数 {name} の値が不正です: {value}")]
    InvalidEnv { name: String, value: String },

    #[error("IO エラー: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
