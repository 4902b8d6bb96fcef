use crate::container;
use crate::docker;
use crate::project::ProjectContext;
use berth_build::{DockerImageStore, ImageStore};
use colored::Colorize;
use std::collections::BTreeSet;

/// `--rmi` で削除するイメージの範囲
#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveImages {
    /// ビルドしたイメージのみ
    Local,
    /// サービスが使うすべてのイメージ
    All,
}

pub async fn handle(context: &ProjectContext, rmi: Option<RemoveImages>) -> anyhow::Result<i32> {
    let project_name = context.project_name();
    println!("{}", "プロジェクトを停止中...".yellow());
    println!("プロジェクト: {}", project_name.cyan());

    println!();
    println!("{}", "Dockerに接続中...".blue());
    let docker_conn = docker::init_docker_with_error_handling().await?;

    #[allow(deprecated)]
    let options = bollard::container::ListContainersOptions {
        all: true,
        filters: container::project_filter(&project_name),
        ..Default::default()
    };

    #[allow(deprecated)]
    let containers = docker_conn.list_containers(Some(options)).await?;

    if containers.is_empty() {
        println!();
        println!("{}", "停止するコンテナはありません".dimmed());
    }

    for summary in containers {
        let Some(id) = summary.id else {
            continue;
        };
        let name = summary
            .names
            .and_then(|names| names.into_iter().next())
            .map(|n| n.trim_start_matches('/').to_string())
            .unwrap_or_else(|| id.clone());

        println!();
        println!("{}", format!("■ {} を停止中...", name).yellow().bold());

        match docker_conn
            .stop_container(&id, None::<bollard::query_parameters::StopContainerOptions>)
            .await
        {
            Ok(_) => println!("  ✓ 停止完了"),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 304, ..
            }) => println!("  ℹ コンテナは既に停止しています"),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => {
                println!("  ℹ コンテナが見つかりません");
                continue;
            }
            Err(e) => println!("  ⚠ 停止エラー: {}", e),
        }

        match docker_conn
            .remove_container(
                &id,
                None::<bollard::query_parameters::RemoveContainerOptions>,
            )
            .await
        {
            Ok(_) => println!("  ✓ 削除完了"),
            Err(e) => println!("  ⚠ 削除エラー: {}", e),
        }
    }

    if let Some(mode) = rmi {
        let store = DockerImageStore::new(docker_conn.clone());
        for image in images_to_remove(context, mode) {
            match store.remove(&image).await {
                Ok(()) => println!("  ✓ イメージ削除: {}", image.cyan()),
                Err(e) => println!("  ⚠ イメージ削除エラー: {}: {}", image, e),
            }
        }
    }

    println!();
    println!(
        "{}",
        "✓ すべてのサービスが停止・削除されました！".green().bold()
    );

    Ok(0)
}

/// `--rmi` の対象イメージ（重複なし）
fn images_to_remove(context: &ProjectContext, mode: RemoveImages) -> BTreeSet<String> {
    context
        .project
        .services
        .values()
        .filter(|service| mode == RemoveImages::All || service.build.is_some())
        .filter_map(|service| context.image_for(service))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GlobalOptions;

    #[test]
    fn test_images_to_remove() {
        let temp_dir = tempfile::tempdir().unwrap();
        let file = temp_dir.path().join("compose.yaml");
        std::fs::write(
            &file,
            "services:\n  web:\n    build: .\n  api:\n    build: .\n    image: custom/api:dev\n  db:\n    image: postgres:16\n  cache:\n    image: postgres:16\n",
        )
        .unwrap();

        let context = ProjectContext::load(&GlobalOptions {
            file: Some(file),
            project_name: Some("demo".to_string()),
            ..Default::default()
        })
        .unwrap();
        let separator = context.settings.naming.separator();

        let local: Vec<_> = images_to_remove(&context, RemoveImages::Local)
            .into_iter()
            .collect();
        assert_eq!(
            local,
            vec!["custom/api:dev".to_string(), format!("demo{}web", separator)]
        );

        let all = images_to_remove(&context, RemoveImages::All);
        assert_eq!(all.len(), 3);
        assert!(all.contains("postgres:16"));
    }
}
