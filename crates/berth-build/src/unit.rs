//! 解決済みのビルドジョブ

use crate::digest::ContextDigest;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// 解決済みビルド引数（名前 → 値）
///
/// 値が決まらなかった引数はキーごと存在しない。
pub type BuildArgSet = BTreeMap<String, String>;

/// 解決済みのSSHフォワード
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthForward {
    pub id: String,
    pub socket: PathBuf,
}

/// 解決済みのシークレットマウント
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretMount {
    pub id: String,
    pub source: PathBuf,
}

/// 実行可能なビルドジョブ
///
/// [`crate::BuildGraph`] が生成し、[`crate::BuildExecutor`] が一度だけ消費する。
#[derive(Debug, Clone)]
pub struct BuildUnit {
    pub service: String,
    /// 正規化済みプロジェクト名
    pub project: String,
    pub context: PathBuf,
    pub dockerfile: PathBuf,
    pub target: Option<String>,
    pub args: BuildArgSet,
    pub forwards: Vec<AuthForward>,
    pub secrets: Vec<SecretMount>,
    pub labels: BTreeMap<String, String>,
    pub digest: ContextDigest,
    /// 最終的なイメージ名
    pub image: String,
    /// このユニットより先に成功している必要があるサービス
    pub dependencies: Vec<String>,
}
