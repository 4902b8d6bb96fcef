//! Berth のビルドオーケストレーション
//!
//! compose マニフェストのサービス定義を、依存順に並んだイメージビルドへ変換します。
//! ビルド入力（引数・SSHフォワード・シークレット）の解決、再ビルド要否の判定、
//! バックエンドの呼び出しとイメージ名の確定を担当します。

pub mod args;
pub mod auth;
pub mod backend;
pub mod change;
pub mod context;
pub mod digest;
pub mod env;
pub mod error;
pub mod executor;
pub mod graph;
pub mod orchestrator;
pub mod progress;
pub mod result;
pub mod secrets;
pub mod sink;
pub mod store;
pub mod tagger;
pub mod unit;

pub use args::{BuildArgResolver, CliBuildArg};
pub use auth::{AuthForwarder, SSH_AUTH_SOCK};
pub use backend::{
    BackendFailure, BackendRequest, BuildBackend, BuildxBackend, BuiltImage, EngineBackend,
    FailureCategory,
};
pub use change::{ChangeDetector, PriorBuildIndex, RebuildDecision};
pub use context::{ContextBuilder, DockerIgnore};
pub use digest::ContextDigest;
pub use env::Environment;
pub use error::{BuildError, Result};
pub use executor::{BuildExecutor, ExecuteOptions};
pub use graph::{BuildGraph, BuildRequest, CascadePolicy};
pub use orchestrator::BuildOrchestrator;
pub use progress::BuildProgress;
pub use result::{BuildPlanResult, BuildResult, UnitStatus};
pub use secrets::SecretResolver;
pub use sink::{ConsoleSink, NullSink, OutputSink};
pub use store::{DIGEST_LABEL, DockerImageStore, ImageStore, split_image_tag};
pub use tagger::{ImageTagger, image_name, normalize_project_name};
pub use unit::{AuthForward, BuildArgSet, BuildUnit, SecretMount};
