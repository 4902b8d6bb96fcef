//! Berth core
//!
//! プロジェクトモデル（サービス・ビルド宣言）と compose マニフェストの読み込みを提供します。

pub mod error;
pub mod loader;
pub mod model;

pub use error::{CoreError, Result};
pub use loader::{load_project, parse_project};
pub use model::*;
