//! Docker Engine API（クラシックビルダー）を使うバックエンド

use super::{BackendFailure, BackendRequest, BuildBackend, BuiltImage, DEFAULT_FAILURE_EXIT_CODE};
use crate::context::{ARCHIVED_DOCKERFILE, ContextBuilder};
use crate::error::{BuildError, Result};
use crate::sink::OutputSink;
use crate::unit::BuildUnit;
use bollard::Docker;
#[allow(deprecated)]
use bollard::image::BuildImageOptions;
use bytes::Bytes;
use futures_util::stream::StreamExt;
use http_body_util::{Either, Full};
use std::collections::HashMap;
use std::sync::Arc;

/// `DOCKER_BUILDKIT=0` 相当のバックエンド
///
/// コンテキストを tar.gz にして Engine API へ送る。SSHフォワードとシークレットは扱えない。
#[derive(Clone)]
pub struct EngineBackend {
    docker: Docker,
}

impl EngineBackend {
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }

    /// ビルド出力の処理
    ///
    /// ストリームの行を sink に流し、イメージIDかエラーを拾う。
    fn handle_build_output(
        service: &str,
        output: bollard::models::BuildInfo,
        sink: &dyn OutputSink,
        image_id: &mut Option<String>,
    ) -> std::result::Result<(), BackendFailure> {
        if let Some(stream) = output.stream {
            for line in stream.lines() {
                sink.line(service, line);
            }
        }

        if let Some(error_detail) = output.error_detail {
            let message = error_detail
                .message
                .unwrap_or_else(|| "Unknown build error".to_string());
            let exit_code = error_detail
                .code
                .and_then(|code| i32::try_from(code).ok())
                .filter(|code| *code > 1)
                .unwrap_or(DEFAULT_FAILURE_EXIT_CODE);
            return Err(BackendFailure::solve(message, exit_code));
        }

        if let Some(error) = output.error {
            return Err(BackendFailure::solve(error, DEFAULT_FAILURE_EXIT_CODE));
        }

        if let Some(status) = output.status {
            // ベースイメージの pull 等
            sink.line(service, &status);
        }

        if let Some(id) = output.aux.and_then(|aux| aux.id) {
            *image_id = Some(id);
        }

        Ok(())
    }
}

impl BuildBackend for EngineBackend {
    fn name(&self) -> &'static str {
        "engine"
    }

    fn check(&self, unit: &BuildUnit) -> Result<()> {
        let unsupported = if !unit.forwards.is_empty() {
            Some("ssh forwarding")
        } else if !unit.secrets.is_empty() {
            Some("secret mounts")
        } else {
            None
        };

        match unsupported {
            Some(feature) => Err(BuildError::UnsupportedByBackend {
                backend: self.name(),
                service: unit.service.clone(),
                feature: feature.to_string(),
            }),
            None => Ok(()),
        }
    }

    async fn build(
        &self,
        request: BackendRequest<'_>,
        sink: Arc<dyn OutputSink>,
    ) -> std::result::Result<BuiltImage, BackendFailure> {
        let unit = request.unit;
        tracing::info!("Building image: {}", unit.image);

        let context = unit.context.clone();
        let dockerfile = unit.dockerfile.clone();
        let context_data =
            tokio::task::spawn_blocking(move || ContextBuilder::create_context(&context, &dockerfile))
                .await
                .map_err(|e| BackendFailure::connection(e.to_string()))?
                .map_err(|e| BackendFailure::solve(e.to_string(), DEFAULT_FAILURE_EXIT_CODE))?;

        let buildargs: HashMap<String, String> = unit
            .args
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let labels: HashMap<String, String> = request.labels().into_iter().collect();

        #[allow(deprecated)]
        let options = BuildImageOptions {
            dockerfile: ARCHIVED_DOCKERFILE.to_string(),
            t: unit.image.clone(),
            buildargs,
            labels,
            target: unit.target.clone().unwrap_or_default(),
            nocache: request.no_cache,
            rm: true,      // 中間コンテナを削除
            forcerm: true, // ビルド失敗時も中間コンテナを削除
            ..Default::default()
        };

        let body = Full::new(Bytes::from(context_data));
        let mut stream = self
            .docker
            .build_image(options, None, Some(Either::Left(body)));

        let mut image_id = None;
        while let Some(msg) = stream.next().await {
            match msg {
                Ok(output) => {
                    Self::handle_build_output(&unit.service, output, sink.as_ref(), &mut image_id)?;
                }
                Err(bollard::errors::Error::DockerStreamError { error }) => {
                    return Err(BackendFailure::solve(error, DEFAULT_FAILURE_EXIT_CODE));
                }
                Err(e) => {
                    return Err(BackendFailure::connection(e.to_string()));
                }
            }
        }

        tracing::info!("Successfully built: {}", unit.image);
        Ok(BuiltImage {
            id: image_id.unwrap_or_else(|| unit.image.clone()),
        })
    }
}
