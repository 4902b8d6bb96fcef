use crate::commands::build;
use crate::container;
use crate::docker;
use crate::project::ProjectContext;
use berth_build::{BuildRequest, ExecuteOptions};
use colored::Colorize;

pub struct UpOptions {
    pub services: Vec<String>,
    pub detach: bool,
    pub build: bool,
    pub no_build: bool,
}

pub async fn handle(context: &ProjectContext, options: UpOptions) -> anyhow::Result<i32> {
    let project_name = context.project_name();
    let services = container::start_order(&context.project, &options.services)?;

    println!(
        "設定ファイル: {}",
        context.compose_file.display().to_string().cyan()
    );
    println!("プロジェクト: {}", project_name.cyan());
    println!();
    println!("{}", format!("サービス一覧 ({} 個):", services.len()).bold());
    for service in &services {
        println!("  • {}", service.name.cyan());
    }

    println!();
    println!("{}", "Dockerに接続中...".blue());
    let docker_conn = docker::init_docker_with_error_handling().await?;

    if !options.no_build {
        // 起動するサービスのうちビルド設定を持つものだけを対象にする
        let buildable: Vec<String> = services
            .iter()
            .filter(|s| s.build.is_some())
            .map(|s| s.name.clone())
            .collect();

        if !buildable.is_empty() {
            let request = BuildRequest {
                services: if options.services.is_empty() {
                    Vec::new()
                } else {
                    buildable
                },
                naming: context.settings.naming,
                cascade: context.settings.cascade.into(),
                ..Default::default()
            };
            let execute = ExecuteOptions {
                concurrency: context.settings.parallel_limit,
                fail_fast: context.settings.fail_fast,
                force: options.build,
                no_cache: false,
            };

            println!();
            println!("{}", "🔨 イメージをビルド中...".blue());
            let code = build::run(context, &docker_conn, &request, &execute).await?;
            if code != 0 {
                return Ok(code);
            }
        }
    }

    for service in &services {
        let image = context.image_for(service).ok_or_else(|| {
            anyhow::anyhow!(
                "サービス '{}' に image も build も指定されていません",
                service.name
            )
        })?;

        println!();
        println!(
            "{}",
            format!("▶ {} を起動中...", service.name).green().bold()
        );

        let (container_config, create_options) =
            container::service_to_container_config(&project_name, service, &image);

        match docker_conn
            .create_container(Some(create_options.clone()), container_config.clone())
            .await
        {
            Ok(response) => {
                println!("  ✓ コンテナ作成: {}", response.id);
                start(&docker_conn, &response.id).await?;
            }
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 409, ..
            }) => {
                // コンテナが既に存在する場合
                #[allow(deprecated)]
                let container_name = create_options.name.clone();
                if is_stale(&docker_conn, &container_name, &image).await? {
                    println!("  ↻ イメージが更新されたためコンテナを再作成します");
                    remove(&docker_conn, &container_name).await?;
                    let response = docker_conn
                        .create_container(Some(create_options.clone()), container_config.clone())
                        .await
                        .map_err(|e| anyhow::anyhow!("コンテナ作成に失敗: {}", e))?;
                    println!("  ✓ コンテナ作成: {}", response.id);
                    start(&docker_conn, &response.id).await?;
                } else {
                    println!("  ℹ コンテナは既に存在します");
                    start(&docker_conn, &container_name).await?;
                }
            }
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) if service.build.is_none() => {
                docker::pull_image(&docker_conn, &image).await?;

                // pull成功後、再度コンテナ作成を試行
                let response = docker_conn
                    .create_container(Some(create_options.clone()), container_config.clone())
                    .await
                    .map_err(|e| anyhow::anyhow!("コンテナ作成に失敗: {}", e))?;
                println!("  ✓ コンテナ作成: {}", response.id);
                start(&docker_conn, &response.id).await?;
            }
            Err(e) => {
                let err_str = e.to_string();
                eprintln!();
                if err_str.contains("port is already allocated") {
                    eprintln!("{}", "✗ ポートが既に使用されています".red().bold());
                } else {
                    eprintln!("{}", "✗ コンテナ作成エラー".red().bold());
                }
                eprintln!();
                eprintln!("{}", "原因:".yellow());
                eprintln!("  {}", err_str);
                return Err(anyhow::anyhow!("コンテナ作成に失敗しました"));
            }
        }
    }

    println!();
    println!("{}", "✓ すべてのサービスが起動しました！".green().bold());
    if !options.detach {
        println!(
            "{}",
            "  停止するには berth down を実行してください".dimmed()
        );
    }

    Ok(0)
}

/// 既存コンテナが `image` の現在のイメージIDと異なるイメージで作られているか
///
/// イメージがローカルに無い場合は判断できないので既存コンテナを使う。
async fn is_stale(
    docker_conn: &bollard::Docker,
    container: &str,
    image: &str,
) -> anyhow::Result<bool> {
    let current = match docker_conn.inspect_image(image).await {
        Ok(inspect) => inspect.id,
        Err(bollard::errors::Error::DockerResponseServerError {
            status_code: 404, ..
        }) => return Ok(false),
        Err(e) => return Err(anyhow::anyhow!("イメージの確認に失敗: {}", e)),
    };

    let existing = docker_conn
        .inspect_container(
            container,
            None::<bollard::query_parameters::InspectContainerOptions>,
        )
        .await
        .map_err(|e| anyhow::anyhow!("コンテナの確認に失敗: {}", e))?;

    tracing::debug!(
        container,
        existing = ?existing.image,
        current = ?current,
        "Comparing container image"
    );
    Ok(current.is_some() && existing.image != current)
}

/// コンテナを強制削除
async fn remove(docker_conn: &bollard::Docker, container: &str) -> anyhow::Result<()> {
    match docker_conn
        .remove_container(
            container,
            Some(bollard::query_parameters::RemoveContainerOptions {
                force: true,
                ..Default::default()
            }),
        )
        .await
    {
        Ok(_) => println!("  ✓ 古いコンテナを削除しました"),
        Err(bollard::errors::Error::DockerResponseServerError {
            status_code: 404, ..
        }) => {}
        Err(e) => return Err(anyhow::anyhow!("コンテナ削除に失敗: {}", e)),
    }
    Ok(())
}

async fn start(docker_conn: &bollard::Docker, container: &str) -> anyhow::Result<()> {
    match docker_conn
        .start_container(
            container,
            None::<bollard::query_parameters::StartContainerOptions>,
        )
        .await
    {
        Ok(_) => println!("  ✓ 起動完了"),
        Err(bollard::errors::Error::DockerResponseServerError {
            status_code: 304, ..
        }) => println!("  ℹ コンテナは既に起動しています"),
        Err(e) => return Err(anyhow::anyhow!("コンテナ起動に失敗: {}", e)),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONTAINER: &str = "berth-stale-test-1";

    async fn create(docker_conn: &bollard::Docker, image: &str) {
        #[allow(deprecated)]
        let options = bollard::container::CreateContainerOptions {
            name: CONTAINER.to_string(),
            platform: None,
        };
        #[allow(deprecated)]
        let config = bollard::container::Config {
            image: Some(image.to_string()),
            ..Default::default()
        };
        docker_conn
            .create_container(Some(options), config)
            .await
            .unwrap();
    }

    #[tokio::test]
    #[ignore] // Docker が必要
    async fn test_is_stale_after_image_changes() {
        let docker_conn = bollard::Docker::connect_with_local_defaults().unwrap();
        docker::pull_image(&docker_conn, "alpine:latest").await.unwrap();
        docker::pull_image(&docker_conn, "busybox:latest").await.unwrap();
        remove(&docker_conn, CONTAINER).await.unwrap();

        create(&docker_conn, "alpine:latest").await;
        assert!(!is_stale(&docker_conn, CONTAINER, "alpine:latest").await.unwrap());

        // 同じ名前が別のイメージを指すようになった状態
        assert!(is_stale(&docker_conn, CONTAINER, "busybox:latest").await.unwrap());

        // ローカルに無いイメージでは既存コンテナを使い続ける
        assert!(
            !is_stale(&docker_conn, CONTAINER, "berth-test-does-not-exist:never")
                .await
                .unwrap()
        );

        remove(&docker_conn, CONTAINER).await.unwrap();
    }
}
