use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("YAMLパースエラー: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("ファイル読み込みエラー: {path}\n理由: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("無効な設定: {0}")]
    InvalidConfig(String),

    #[error("サービス '{service}' が未定義のシークレット '{secret}' を参照しています")]
    UndefinedSecret { service: String, secret: String },

    #[error("無効なポート指定: {0}")]
    InvalidPort(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
