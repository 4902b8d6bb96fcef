//! モデル定義
//!
//! Berthで使用されるデータモデルを定義します。
//! マニフェストのパース後は不変として扱われます。

mod build;
mod service;

pub use build::*;
pub use service::*;

use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// プロジェクト全体の定義
#[derive(Debug, Clone, Default, Serialize)]
pub struct Project {
    /// プロジェクト名（正規化前）
    pub name: String,
    /// プロジェクトディレクトリ（相対パス解決の基準）
    pub directory: PathBuf,
    /// サービス定義（名前順）
    pub services: BTreeMap<String, ServiceSpec>,
}

/// デフォルトのイメージ命名規則
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NamingConvention {
    /// `<project>_<service>`
    #[default]
    Underscore,
    /// `<project>-<service>`
    Hyphen,
}

impl NamingConvention {
    pub fn separator(&self) -> char {
        match self {
            Self::Underscore => '_',
            Self::Hyphen => '-',
        }
    }

    /// 文字列からパース
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "underscore" | "_" => Some(Self::Underscore),
            "hyphen" | "-" => Some(Self::Hyphen),
            _ => None,
        }
    }
}

impl Project {
    /// ビルド設定を持つサービスのみを返す
    pub fn buildable_services(&self) -> impl Iterator<Item = &ServiceSpec> {
        self.services.values().filter(|s| s.build.is_some())
    }

    pub fn service(&self, name: &str) -> Option<&ServiceSpec> {
        self.services.get(name)
    }
}
