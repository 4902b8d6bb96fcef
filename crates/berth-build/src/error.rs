use std::path::PathBuf;
use thiserror::Error;

/// 事前検証エラーの終了コード
pub const PREFLIGHT_EXIT_CODE: i32 = 1;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("{0}")]
    InvalidAuthSocket(String),

    #[error("failed to solve: {message}")]
    UnresolvedForwardKey {
        service: String,
        key: String,
        message: String,
        exit_code: i32,
    },

    #[error("failed to solve: {message}")]
    BackendSolveFailure {
        service: String,
        message: String,
        exit_code: i32,
    },

    #[error("cyclic build dependency detected: {}", .0.join(" -> "))]
    CyclicBuildDependency(Vec<String>),

    #[error("image name '{image}' is claimed by both '{first}' and '{second}'")]
    DuplicateImageName {
        image: String,
        first: String,
        second: String,
    },

    #[error("build arg '{name}' is required by service '{service}' but has no value")]
    MissingBuildArg { service: String, name: String },

    #[error("secret '{id}' source file not readable: {path}")]
    SecretNotFound { id: String, path: PathBuf },

    #[error("service '{service}' depends on unknown service '{dependency}'")]
    UnknownDependency { service: String, dependency: String },

    #[error("no such service: {0}")]
    UnknownService(String),

    #[error("Dockerfile not found: {0}")]
    DockerfileNotFound(PathBuf),

    #[error("Build context directory not found: {0}")]
    ContextNotFound(PathBuf),

    #[error("{backend} backend does not support {feature} (service '{service}')")]
    UnsupportedByBackend {
        backend: &'static str,
        service: String,
        feature: String,
    },

    #[error("image '{0}' is not inspectable after build")]
    ImageNotFound(String),

    #[error("Docker connection error: {0}")]
    DockerConnection(#[from] bollard::errors::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BuildError {
    /// コマンドの終了コード
    ///
    /// バックエンド由来の失敗はバックエンド自身のコードをそのまま返す。
    pub fn exit_code(&self) -> i32 {
        match self {
            BuildError::UnresolvedForwardKey { exit_code, .. }
            | BuildError::BackendSolveFailure { exit_code, .. } => *exit_code,
            _ => PREFLIGHT_EXIT_CODE,
        }
    }

    /// ビルド開始前に検出されるエラーか
    pub fn is_preflight(&self) -> bool {
        matches!(
            self,
            BuildError::InvalidAuthSocket(_)
                | BuildError::CyclicBuildDependency(_)
                | BuildError::MissingBuildArg { .. }
                | BuildError::SecretNotFound { .. }
                | BuildError::UnknownDependency { .. }
                | BuildError::UnknownService(_)
                | BuildError::DockerfileNotFound(_)
                | BuildError::ContextNotFound(_)
                | BuildError::UnsupportedByBackend { .. }
        )
    }

    /// ユーザー向けの分かりやすいエラーメッセージ
    pub fn user_message(&self) -> String {
        match self {
            BuildError::InvalidAuthSocket(msg) => {
                format!(
                    "{}\n\
                     \n\
                     解決方法:\n\
                     1. ssh-agent を起動してください: eval \"$(ssh-agent)\"\n\
                     2. または鍵ファイルを直接指定してください: --ssh id=path/to/key",
                    msg
                )
            }
            BuildError::UnresolvedForwardKey { service, key, .. } => {
                format!(
                    "サービス '{}' のビルドで SSH フォワード '{}' が見つかりません\n\
                     \n\
                     Dockerfile の RUN --mount=type=ssh,id={} に対応する\n\
                     --ssh {}=... またはマニフェストの ssh 設定を追加してください。",
                    service, key, key, key
                )
            }
            BuildError::CyclicBuildDependency(services) => {
                format!(
                    "ビルド依存が循環しています: {}\n\
                     \n\
                     build.depends_on または Dockerfile の FROM を確認してください。",
                    services.join(" -> ")
                )
            }
            BuildError::DockerfileNotFound(path) => {
                format!(
                    "Dockerfileが見つかりません: {}\n\
                     \n\
                     build.dockerfile のパスを確認してください（コンテキスト基準）。",
                    path.display()
                )
            }
            BuildError::ContextNotFound(path) => {
                format!(
                    "ビルドコンテキストが見つかりません: {}\n\
                     \n\
                     build.context のパスを確認してください。",
                    path.display()
                )
            }
            BuildError::SecretNotFound { id, path } => {
                format!(
                    "シークレット '{}' のファイルを読み込めません: {}",
                    id,
                    path.display()
                )
            }
            _ => format!("{}", self),
        }
    }
}

pub type Result<T> = std::result::Result<T, BuildError>;
