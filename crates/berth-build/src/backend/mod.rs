//! ビルドバックエンド
//!
//! 実際のビルドを行う外部ビルダーとの境界。実装ごとの差異はここで吸収し、
//! 失敗は [`BackendFailure`] としてオーケストレーション側のエラーへ変換される。

mod buildx;
mod engine;

pub use buildx::BuildxBackend;
pub use engine::EngineBackend;

use crate::error::{BuildError, Result};
use crate::sink::OutputSink;
use crate::store::{DIGEST_LABEL, SERVICE_LABEL};
use crate::unit::BuildUnit;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

/// Docker CLI がビルド失敗時に返す終了コード
pub const DEFAULT_FAILURE_EXIT_CODE: i32 = 17;

/// プロジェクト名を記録するイメージラベル
pub const PROJECT_LABEL: &str = "io.berth.project";

/// バックエンドへのビルド依頼
#[derive(Debug, Clone, Copy)]
pub struct BackendRequest<'a> {
    pub unit: &'a BuildUnit,
    pub no_cache: bool,
}

impl BackendRequest<'_> {
    /// イメージに付与するラベル（宣言されたラベル + 管理用ラベル）
    pub fn labels(&self) -> BTreeMap<String, String> {
        let mut labels = self.unit.labels.clone();
        labels.insert(DIGEST_LABEL.to_string(), self.unit.digest.to_hex());
        labels.insert(SERVICE_LABEL.to_string(), self.unit.service.clone());
        labels.insert(PROJECT_LABEL.to_string(), self.unit.project.clone());
        labels
    }
}

/// ビルド成功時の結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltImage {
    /// イメージIDまたは名前
    pub id: String,
}

/// 失敗の分類
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureCategory {
    /// Dockerfile が未解決の SSH フォワードIDを要求した
    UnresolvedForwardKey(String),
    Solve,
    /// バックエンド自体に到達できない
    Connection,
}

/// バックエンドが報告する構造化された失敗
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendFailure {
    pub category: FailureCategory,
    pub message: String,
    pub exit_code: i32,
}

impl BackendFailure {
    pub fn solve(message: impl Into<String>, exit_code: i32) -> Self {
        Self {
            category: FailureCategory::Solve,
            message: message.into(),
            exit_code,
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self {
            category: FailureCategory::Connection,
            message: message.into(),
            exit_code: DEFAULT_FAILURE_EXIT_CODE,
        }
    }

    /// サービスのビルドエラーへ変換
    pub fn into_build_error(self, service: &str) -> BuildError {
        match self.category {
            FailureCategory::UnresolvedForwardKey(key) => BuildError::UnresolvedForwardKey {
                service: service.to_string(),
                key,
                message: self.message,
                exit_code: self.exit_code,
            },
            FailureCategory::Solve | FailureCategory::Connection => {
                BuildError::BackendSolveFailure {
                    service: service.to_string(),
                    message: self.message,
                    exit_code: self.exit_code,
                }
            }
        }
    }
}

/// ビルドバックエンド
///
/// 複数ユニットから同時に呼ばれるため、独立したビルドセッションを並行に扱える必要がある。
pub trait BuildBackend: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// ビルド開始前にユニットを受け付けられるか検証
    fn check(&self, _unit: &BuildUnit) -> Result<()> {
        Ok(())
    }

    /// ユニットをビルドし、出力を1行ずつ `sink` へ流す
    fn build(
        &self,
        request: BackendRequest<'_>,
        sink: Arc<dyn OutputSink>,
    ) -> impl Future<Output = std::result::Result<BuiltImage, BackendFailure>> + Send;
}

/// バックエンドのエラーメッセージから未解決のSSHフォワードIDを取り出す
pub(crate) fn unresolved_forward_key(message: &str) -> Option<String> {
    const MARKER: &str = "unset ssh forward key ";
    let start = message.find(MARKER)? + MARKER.len();
    message[start..]
        .split(|c: char| c.is_whitespace() || c == '"' || c == '\'')
        .next()
        .filter(|key| !key.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unresolved_forward_key() {
        assert_eq!(
            unresolved_forward_key(
                "ERROR: failed to solve: rpc error: code = Unknown desc = unset ssh forward key fake-ssh"
            ),
            Some("fake-ssh".to_string())
        );
        assert_eq!(unresolved_forward_key("failed to solve: exit code 1"), None);
    }

    #[test]
    fn test_into_build_error() {
        let failure = BackendFailure {
            category: FailureCategory::UnresolvedForwardKey("fake-ssh".to_string()),
            message: "unset ssh forward key fake-ssh".to_string(),
            exit_code: 17,
        };
        let err = failure.into_build_error("ssh");
        assert!(matches!(err, BuildError::UnresolvedForwardKey { ref key, .. } if key == "fake-ssh"));
        assert_eq!(err.exit_code(), 17);

        let err = BackendFailure::solve("boom", 17).into_build_error("web");
        assert!(matches!(err, BuildError::BackendSolveFailure { .. }));
    }
}
