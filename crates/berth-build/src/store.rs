//! コンテナランタイム上のイメージ操作

use crate::digest::ContextDigest;
use crate::error::{BuildError, Result};
use bollard::Docker;
use bollard::query_parameters::{RemoveImageOptionsBuilder, TagImageOptionsBuilder};
use std::future::Future;

/// ビルド時のダイジェストを記録するイメージラベル
pub const DIGEST_LABEL: &str = "io.berth.build.digest";
/// ビルドしたサービス名を記録するイメージラベル
pub const SERVICE_LABEL: &str = "io.berth.build.service";

/// ビルド後の検査と事前クリーンアップに使うイメージストア
pub trait ImageStore: Send + Sync {
    /// 名前で検査可能か
    fn exists(&self, image: &str) -> impl Future<Output = Result<bool>> + Send;

    /// イメージに記録されたダイジェスト（イメージ無し・ラベル無しは `None`）
    fn recorded_digest(
        &self,
        image: &str,
    ) -> impl Future<Output = Result<Option<ContextDigest>>> + Send;

    /// `source`（イメージIDまたは名前）に `target` の名前を付ける
    fn tag(&self, source: &str, target: &str) -> impl Future<Output = Result<()>> + Send;

    /// 名前でイメージを削除（存在しなければ何もしない）
    fn remove(&self, image: &str) -> impl Future<Output = Result<()>> + Send;
}

/// Docker デーモンを使うイメージストア
#[derive(Clone)]
pub struct DockerImageStore {
    docker: Docker,
}

impl DockerImageStore {
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }
}

impl ImageStore for DockerImageStore {
    async fn exists(&self, image: &str) -> Result<bool> {
        match self.docker.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(BuildError::DockerConnection(e)),
        }
    }

    async fn recorded_digest(&self, image: &str) -> Result<Option<ContextDigest>> {
        let inspect = match self.docker.inspect_image(image).await {
            Ok(inspect) => inspect,
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => return Ok(None),
            Err(e) => return Err(BuildError::DockerConnection(e)),
        };

        let digest = inspect
            .config
            .and_then(|config| config.labels)
            .and_then(|labels| labels.get(DIGEST_LABEL).and_then(|v| ContextDigest::from_hex(v)));
        Ok(digest)
    }

    async fn tag(&self, source: &str, target: &str) -> Result<()> {
        let (repo, tag) = split_image_tag(target);
        let options = TagImageOptionsBuilder::default()
            .repo(&repo)
            .tag(&tag)
            .build();

        self.docker.tag_image(source, Some(options)).await?;
        tracing::debug!("Tagged {} as {}:{}", source, repo, tag);
        Ok(())
    }

    async fn remove(&self, image: &str) -> Result<()> {
        let options = RemoveImageOptionsBuilder::default().force(true).build();
        match self.docker.remove_image(image, Some(options), None).await {
            Ok(_) => Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(()),
            Err(e) => Err(BuildError::DockerConnection(e)),
        }
    }
}

/// イメージ名とタグを分離
///
/// # Examples
/// - `ghcr.io/org/app:v1.0` -> `("ghcr.io/org/app", "v1.0")`
/// - `demo_web` -> `("demo_web", "latest")`
/// - `localhost:5000/app` -> `("localhost:5000/app", "latest")`
pub fn split_image_tag(image: &str) -> (String, String) {
    if let Some(pos) = image.rfind(':') {
        let potential_tag = &image[pos + 1..];
        let potential_image = &image[..pos];

        // ポート番号は / を含むか純粋な数字になる
        if !potential_tag.contains('/') && !potential_tag.chars().all(|c| c.is_ascii_digit()) {
            return (potential_image.to_string(), potential_tag.to_string());
        }
    }

    (image.to_string(), "latest".to_string())
}

/// `:latest` を補った参照名
pub fn with_default_tag(image: &str) -> String {
    let (repo, tag) = split_image_tag(image);
    format!("{}:{}", repo, tag)
}
