//! ビルドプランの実行エントリポイント
//!
//! `build` と `up` の両方から使われます。

use crate::backend::BuildBackend;
use crate::change::PriorBuildIndex;
use crate::env::Environment;
use crate::error::Result;
use crate::executor::{BuildExecutor, ExecuteOptions};
use crate::graph::{BuildGraph, BuildRequest};
use crate::result::BuildPlanResult;
use crate::sink::OutputSink;
use crate::store::ImageStore;
use crate::unit::BuildUnit;
use std::sync::Arc;

pub struct BuildOrchestrator<B, S> {
    backend: Arc<B>,
    store: Arc<S>,
    sink: Arc<dyn OutputSink>,
}

impl<B, S> BuildOrchestrator<B, S>
where
    B: BuildBackend,
    S: ImageStore + 'static,
{
    pub fn new(backend: B, store: S, sink: Arc<dyn OutputSink>) -> Self {
        Self {
            backend: Arc::new(backend),
            store: Arc::new(store),
            sink,
        }
    }

    /// ビルドプランを生成
    ///
    /// 解決エラーとバックエンドが受け付けられない指定はここで返る（バックエンドは呼ばれない）。
    pub fn plan(
        &self,
        project: &berth_core::Project,
        request: &BuildRequest,
        env: &Environment,
    ) -> Result<Vec<BuildUnit>> {
        let units = BuildGraph::compile(project, request, env)?;
        for unit in &units {
            self.backend.check(unit)?;
        }
        Ok(units)
    }

    /// イメージストアのラベルから前回ビルドのダイジェストを集める
    pub async fn load_index(&self, units: &[BuildUnit]) -> Result<PriorBuildIndex> {
        let mut index = PriorBuildIndex::new();
        for unit in units {
            if let Some(digest) = self.store.recorded_digest(&unit.image).await? {
                index.record(unit.image.clone(), digest);
            }
        }
        tracing::debug!("Loaded {} prior build digests", index.len());
        Ok(index)
    }

    /// プランを生成して実行
    pub async fn run(
        &self,
        project: &berth_core::Project,
        request: &BuildRequest,
        options: &ExecuteOptions,
        env: &Environment,
    ) -> Result<BuildPlanResult> {
        let units = self.plan(project, request, env)?;
        if units.is_empty() {
            tracing::info!("No services to build");
            return Ok(BuildPlanResult::default());
        }

        tracing::info!(
            "Build plan: {} (backend: {})",
            units
                .iter()
                .map(|u| u.service.as_str())
                .collect::<Vec<_>>()
                .join(" -> "),
            self.backend.name()
        );

        let index = self.load_index(&units).await?;
        let executor = BuildExecutor::new(
            Arc::clone(&self.backend),
            Arc::clone(&self.store),
            Arc::clone(&self.sink),
        );
        Ok(executor.execute(units, &index, options).await)
    }
}
