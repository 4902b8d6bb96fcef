mod commands;
mod container;
mod docker;
mod project;

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "berth")]
#[command(about = "compose のイメージを、依存順に、必要なものだけビルドする", long_about = None)]
struct Cli {
    #[command(flatten)]
    global: GlobalOptions,

    #[command(subcommand)]
    command: Commands,
}

/// すべてのサブコマンドで共通のオプション
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalOptions {
    /// compose ファイル
    #[arg(short = 'f', long = "file", global = true)]
    pub file: Option<PathBuf>,

    /// プロジェクトディレクトリ（省略時は compose ファイルのあるディレクトリ）
    #[arg(long = "project-directory", visible_alias = "workdir", global = true)]
    pub project_directory: Option<PathBuf>,

    /// プロジェクト名
    #[arg(
        short = 'p',
        long = "project-name",
        env = "COMPOSE_PROJECT_NAME",
        global = true
    )]
    pub project_name: Option<String>,

    /// デバッグログを表示
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// サービスのイメージをビルド
    Build {
        /// 対象サービス（省略時は全サービス）
        services: Vec<String>,
        /// ビルド引数（NAME=VALUE、または NAME で環境変数から取得）
        #[arg(long = "build-arg", value_name = "NAME[=VALUE]")]
        build_args: Vec<String>,
        /// SSHフォワード（ID=PATH、または ID でエージェントを使用）
        #[arg(long = "ssh", value_name = "ID[=PATH]")]
        ssh: Vec<String>,
        /// キャッシュを使わずにビルド
        #[arg(long)]
        no_cache: bool,
        /// 同時にビルドするサービス数
        #[arg(long, value_name = "N")]
        parallel: Option<usize>,
        /// 失敗したら新しいビルドを開始しない
        #[arg(long)]
        fail_fast: bool,
    },
    /// イメージをビルドしてコンテナを起動
    Up {
        /// 対象サービス（省略時は全サービス）
        services: Vec<String>,
        /// バックグラウンドで起動
        #[arg(short = 'd', long)]
        detach: bool,
        /// 変更がなくてもイメージを再ビルド
        #[arg(long, conflicts_with = "no_build")]
        build: bool,
        /// イメージをビルドしない
        #[arg(long)]
        no_build: bool,
    },
    /// プロジェクトのコンテナを停止・削除
    Down {
        /// イメージも削除（local: ビルドしたイメージのみ、all: すべて）
        #[arg(long, value_enum, value_name = "TYPE")]
        rmi: Option<commands::down::RemoveImages>,
    },
    /// バージョン情報を表示
    Version,
}

fn init_tracing(verbose: bool) {
    let default_directive = if verbose {
        "berth=debug,berth_build=debug,berth_core=debug,berth_config=debug"
    } else {
        "warn"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.global.verbose);

    // Versionコマンドは compose ファイル不要
    if matches!(cli.command, Commands::Version) {
        println!("berth {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let context = project::ProjectContext::load(&cli.global)?;

    let code = match cli.command {
        Commands::Build {
            services,
            build_args,
            ssh,
            no_cache,
            parallel,
            fail_fast,
        } => {
            commands::build::handle(
                &context,
                commands::build::BuildOptions {
                    services,
                    build_args,
                    ssh,
                    no_cache,
                    parallel,
                    fail_fast,
                },
            )
            .await?
        }
        Commands::Up {
            services,
            detach,
            build,
            no_build,
        } => {
            commands::up::handle(
                &context,
                commands::up::UpOptions {
                    services,
                    detach,
                    build,
                    no_build,
                },
            )
            .await?
        }
        Commands::Down { rmi } => commands::down::handle(&context, rmi).await?,
        Commands::Version => {
            unreachable!("Version is handled before project loading");
        }
    };

    if code != 0 {
        std::process::exit(code);
    }

    Ok(())
}
