//! ビルド宣言

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// デフォルトのSSHフォワードID
pub const DEFAULT_SSH_ID: &str = "default";

/// ビルド設定
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BuildSpec {
    /// ビルドコンテキスト（ロード時にプロジェクトディレクトリ基準で絶対化）
    pub context: PathBuf,
    /// Dockerfileのパス（未指定の場合はコンテキスト直下の Dockerfile）
    pub dockerfile: Option<PathBuf>,
    /// ビルド引数の宣言
    pub args: BTreeMap<String, BuildArgDecl>,
    /// SSHフォワード宣言
    pub ssh: Vec<SshSpec>,
    /// シークレット宣言
    pub secrets: Vec<SecretSpec>,
    /// マルチステージビルドのターゲット
    pub target: Option<String>,
    /// このコンテキストがイメージを参照する他サービス
    pub depends_on: Vec<String>,
    /// イメージに付与するラベル
    pub labels: BTreeMap<String, String>,
}

impl BuildSpec {
    /// Dockerfileの実パス
    pub fn dockerfile_path(&self) -> PathBuf {
        match &self.dockerfile {
            Some(path) if path.is_absolute() => path.clone(),
            Some(path) => self.context.join(path),
            None => self.context.join("Dockerfile"),
        }
    }
}

/// ビルド引数の宣言
///
/// `value` が `None` の場合は「環境変数から継承」を意味する。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BuildArgDecl {
    pub value: Option<String>,
    pub required: bool,
}

impl BuildArgDecl {
    pub fn with_value(value: impl Into<String>) -> Self {
        Self {
            value: Some(value.into()),
            required: false,
        }
    }

    pub fn inherit() -> Self {
        Self::default()
    }
}

/// SSHフォワードの参照先
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SshSource {
    /// SSH_AUTH_SOCK が指すエージェントソケット
    Agent,
    /// 鍵ファイルまたはソケットのパス
    Path(PathBuf),
}

/// SSHフォワード宣言
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SshSpec {
    pub id: String,
    pub source: SshSource,
}

impl SshSpec {
    /// `--ssh` / `ssh:` の文字列表現をパース
    ///
    /// - `""` / `default` → default エージェント
    /// - `ID` → ID名でエージェントをフォワード
    /// - `ID=PATH` → 名前付きの鍵ファイル
    pub fn parse(spec: &str) -> Self {
        let spec = spec.trim();
        match spec.split_once('=') {
            Some((id, path)) if !path.is_empty() => Self {
                id: normalize_id(id),
                source: SshSource::Path(PathBuf::from(path)),
            },
            Some((id, _)) => Self::agent(normalize_id(id)),
            None => Self::agent(normalize_id(spec)),
        }
    }

    pub fn agent(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source: SshSource::Agent,
        }
    }
}

fn normalize_id(id: &str) -> String {
    let id = id.trim();
    if id.is_empty() {
        DEFAULT_SSH_ID.to_string()
    } else {
        id.to_string()
    }
}

impl fmt::Display for SshSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            SshSource::Agent => write!(f, "{}", self.id),
            SshSource::Path(path) => write!(f, "{}={}", self.id, path.display()),
        }
    }
}

/// シークレット宣言
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecretSpec {
    pub id: String,
    pub file: PathBuf,
}
