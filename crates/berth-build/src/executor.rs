//! ビルドの実行
//!
//! 依存が揃ったユニットから順に、上限数まで並行してバックエンドを呼び出します。
//! 失敗したユニットに依存するユニットは実行せずにスキップとして報告します。

use crate::backend::{BackendRequest, BuildBackend};
use crate::change::{ChangeDetector, PriorBuildIndex, RebuildDecision};
use crate::error::{BuildError, Result};
use crate::result::{BuildPlanResult, BuildResult, UnitStatus};
use crate::sink::OutputSink;
use crate::store::ImageStore;
use crate::tagger::ImageTagger;
use crate::unit::BuildUnit;
use futures_util::FutureExt;
use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::task::JoinSet;

/// 実行オプション
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// 同時に実行するユニット数の上限
    pub concurrency: usize,
    /// 失敗後は新しいユニットを開始しない
    pub fail_fast: bool,
    /// ダイジェストに関わらず再ビルド（`up --build`）
    pub force: bool,
    /// バックエンドのキャッシュを使わない（再ビルドも強制される）
    pub no_cache: bool,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            concurrency: 4,
            fail_fast: false,
            force: false,
            no_cache: false,
        }
    }
}

/// ユニット単体の実行結果
enum Outcome {
    Built,
    UpToDate,
}

pub struct BuildExecutor<B, S> {
    backend: Arc<B>,
    tagger: Arc<ImageTagger<S>>,
    sink: Arc<dyn OutputSink>,
}

impl<B, S> BuildExecutor<B, S>
where
    B: BuildBackend,
    S: ImageStore + 'static,
{
    pub fn new(backend: Arc<B>, store: Arc<S>, sink: Arc<dyn OutputSink>) -> Self {
        Self {
            backend,
            tagger: Arc::new(ImageTagger::new(store)),
            sink,
        }
    }

    /// ユニット列（依存順）を実行し、プラン順の結果を返す
    pub async fn execute(
        &self,
        units: Vec<BuildUnit>,
        index: &PriorBuildIndex,
        options: &ExecuteOptions,
    ) -> BuildPlanResult {
        let concurrency = options.concurrency.max(1);
        let force = options.force || options.no_cache;

        let position: HashMap<String, usize> = units
            .iter()
            .enumerate()
            .map(|(i, u)| (u.service.clone(), i))
            .collect();
        let mut statuses: Vec<Option<UnitStatus>> = units.iter().map(|_| None).collect();
        let mut dispatched: Vec<bool> = vec![false; units.len()];
        // ビルド中のイメージ名（同じイメージの同時ビルドを防ぐ）
        let mut in_progress: HashSet<String> = HashSet::new();
        let mut running: JoinSet<(usize, Result<Outcome>)> = JoinSet::new();
        let mut stop_new = false;

        loop {
            for i in 0..units.len() {
                if dispatched[i] {
                    continue;
                }
                let unit = &units[i];

                // 依存ユニットの状態を確認（計画外の依存は満たされているとみなす）
                let mut ready = true;
                let mut failed_dependency = None;
                for dep in &unit.dependencies {
                    let Some(&j) = position.get(dep) else {
                        continue;
                    };
                    match &statuses[j] {
                        Some(UnitStatus::Built | UnitStatus::UpToDate) => {}
                        Some(_) => {
                            failed_dependency = Some(dep.clone());
                            break;
                        }
                        None => ready = false,
                    }
                }

                if let Some(dependency) = failed_dependency {
                    tracing::info!(
                        "Skipping '{}': dependency '{}' did not build",
                        unit.service,
                        dependency
                    );
                    dispatched[i] = true;
                    statuses[i] = Some(UnitStatus::SkippedDueToDependencyFailure { dependency });
                    continue;
                }

                if !ready
                    || stop_new
                    || running.len() >= concurrency
                    || in_progress.contains(&unit.image)
                {
                    continue;
                }

                let decision = ChangeDetector::decide(unit, index, force);
                tracing::info!("{}: {}", unit.service, decision);

                dispatched[i] = true;
                in_progress.insert(unit.image.clone());
                self.spawn_unit(&mut running, i, unit.clone(), decision, options.no_cache);
            }

            let Some(joined) = running.join_next().await else {
                break;
            };

            let (i, outcome) = match joined {
                Ok(done) => done,
                // catch_unwind 済みのため、ここに来るのはランタイム停止時のみ
                Err(e) => {
                    tracing::error!("Build task aborted: {}", e);
                    break;
                }
            };

            in_progress.remove(&units[i].image);
            statuses[i] = Some(match outcome {
                Ok(Outcome::Built) => UnitStatus::Built,
                Ok(Outcome::UpToDate) => UnitStatus::UpToDate,
                Err(err) => {
                    tracing::warn!("Build of '{}' failed: {}", units[i].service, err);
                    if options.fail_fast {
                        stop_new = true;
                    }
                    UnitStatus::Failed(err)
                }
            });
        }

        let results = units
            .into_iter()
            .zip(statuses)
            .map(|(unit, status)| BuildResult {
                service: unit.service,
                image: unit.image,
                status: status.unwrap_or(UnitStatus::NotStarted),
            })
            .collect();

        BuildPlanResult::new(results)
    }

    fn spawn_unit(
        &self,
        running: &mut JoinSet<(usize, Result<Outcome>)>,
        index: usize,
        unit: BuildUnit,
        decision: RebuildDecision,
        no_cache: bool,
    ) {
        let backend = Arc::clone(&self.backend);
        let tagger = Arc::clone(&self.tagger);
        let sink = Arc::clone(&self.sink);

        running.spawn(async move {
            let service = unit.service.clone();
            let outcome = AssertUnwindSafe(run_unit(
                backend.as_ref(),
                tagger.as_ref(),
                sink,
                &unit,
                decision,
                no_cache,
            ))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| {
                Err(BuildError::BackendSolveFailure {
                    service,
                    message: "build task panicked".to_string(),
                    exit_code: crate::backend::DEFAULT_FAILURE_EXIT_CODE,
                })
            });
            (index, outcome)
        });
    }
}

async fn run_unit<B: BuildBackend, S: ImageStore>(
    backend: &B,
    tagger: &ImageTagger<S>,
    sink: Arc<dyn OutputSink>,
    unit: &BuildUnit,
    decision: RebuildDecision,
    no_cache: bool,
) -> Result<Outcome> {
    if !decision.needs_rebuild() {
        // ビルドは省略しても名前で検査できることは保証する
        tagger.commit(unit, None).await?;
        return Ok(Outcome::UpToDate);
    }

    // 別サービスが同じ名前でビルド結果を上書きしないよう先に名前を確保する
    tagger.claim(&unit.image, &unit.service)?;

    sink.unit_started(&unit.service, &unit.image);
    let built = backend
        .build(BackendRequest { unit, no_cache }, Arc::clone(&sink))
        .await;
    sink.unit_finished(&unit.service, built.is_ok());

    let built = built.map_err(|failure| failure.into_build_error(&unit.service))?;
    tagger.commit(unit, Some(&built)).await?;

    tracing::info!("Built {} ({})", unit.image, unit.service);
    Ok(Outcome::Built)
}
