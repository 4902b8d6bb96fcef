use crate::docker;
use crate::project::ProjectContext;
use berth_build::{
    BuildOrchestrator, BuildPlanResult, BuildProgress, BuildRequest, BuildxBackend, CliBuildArg,
    ConsoleSink, DockerImageStore, EngineBackend, ExecuteOptions, OutputSink, UnitStatus,
};
use berth_config::BackendKind;
use berth_core::SshSpec;
use colored::Colorize;
use std::io::IsTerminal;
use std::sync::Arc;

pub struct BuildOptions {
    pub services: Vec<String>,
    pub build_args: Vec<String>,
    pub ssh: Vec<String>,
    pub no_cache: bool,
    pub parallel: Option<usize>,
    pub fail_fast: bool,
}

pub async fn handle(context: &ProjectContext, options: BuildOptions) -> anyhow::Result<i32> {
    let request = BuildRequest {
        services: options.services,
        cli_args: options
            .build_args
            .iter()
            .map(|s| CliBuildArg::parse(s))
            .collect(),
        cli_ssh: options.ssh.iter().map(|s| SshSpec::parse(s)).collect(),
        naming: context.settings.naming,
        cascade: context.settings.cascade.into(),
    };
    let execute = ExecuteOptions {
        concurrency: options
            .parallel
            .unwrap_or(context.settings.parallel_limit),
        fail_fast: options.fail_fast || context.settings.fail_fast,
        force: false,
        no_cache: options.no_cache,
    };

    println!(
        "設定ファイル: {}",
        context.compose_file.display().to_string().cyan()
    );
    println!("プロジェクト: {}", context.project_name().cyan());
    println!("{}", "Dockerに接続中...".blue());
    let docker_conn = docker::init_docker_with_error_handling().await?;

    run(context, &docker_conn, &request, &execute).await
}

/// ビルドプランを実行して結果を表示し、終了コードを返す
pub async fn run(
    context: &ProjectContext,
    docker_conn: &bollard::Docker,
    request: &BuildRequest,
    execute: &ExecuteOptions,
) -> anyhow::Result<i32> {
    // スピナーは端末の場合のみ
    let sink: Arc<dyn OutputSink> = if std::io::stderr().is_terminal() {
        Arc::new(BuildProgress::new())
    } else {
        Arc::new(ConsoleSink::new())
    };
    let store = DockerImageStore::new(docker_conn.clone());

    let result = match context.settings.backend {
        BackendKind::Buildx => {
            BuildOrchestrator::new(BuildxBackend::new(), store, sink)
                .run(&context.project, request, execute, &context.env)
                .await
        }
        BackendKind::Engine => {
            BuildOrchestrator::new(EngineBackend::new(docker_conn.clone()), store, sink)
                .run(&context.project, request, execute, &context.env)
                .await
        }
    };

    match result {
        Ok(plan) => {
            print_summary(&plan);
            Ok(plan.exit_code())
        }
        Err(err) => {
            let title = if err.is_preflight() {
                "✗ ビルドを開始できません"
            } else {
                "✗ ビルドに失敗しました"
            };
            eprintln!();
            eprintln!("{}", title.red().bold());
            eprintln!();
            eprintln!("{}", err.user_message());
            Ok(err.exit_code())
        }
    }
}

fn print_summary(plan: &BuildPlanResult) {
    println!();
    if plan.results.is_empty() {
        println!("{}", "ビルド対象のサービスはありません".dimmed());
        return;
    }

    println!("{}", "ビルド結果:".bold());
    for result in &plan.results {
        match &result.status {
            UnitStatus::Built => {
                println!("  {} {} → {}", "✓".green(), result.service.cyan(), result.image);
            }
            UnitStatus::UpToDate => {
                println!(
                    "  {} {} → {} {}",
                    "=".green(),
                    result.service.cyan(),
                    result.image,
                    "(変更なし)".dimmed()
                );
            }
            UnitStatus::SkippedDueToDependencyFailure { dependency } => {
                println!(
                    "  {} {} {}",
                    "⊘".yellow(),
                    result.service.cyan(),
                    format!("(依存 '{}' が失敗したためスキップ)", dependency).yellow()
                );
            }
            UnitStatus::NotStarted => {
                println!(
                    "  {} {} {}",
                    "-".dimmed(),
                    result.service.cyan(),
                    "(未実行)".dimmed()
                );
            }
            UnitStatus::Failed(err) => {
                println!(
                    "  {} {} {}",
                    "✗".red(),
                    result.service.cyan(),
                    format!("(exit {})", err.exit_code()).red()
                );
            }
        }
    }

    let failures: Vec<_> = plan.failures().collect();
    if failures.is_empty() {
        println!();
        println!("{}", "✓ ビルド完了".green().bold());
        return;
    }

    for result in failures {
        let Some(err) = result.error() else {
            continue;
        };
        eprintln!();
        eprintln!(
            "{}",
            format!("✗ {} のビルドに失敗しました", result.service)
                .red()
                .bold()
        );
        eprintln!("{}", err.user_message());
    }
}
