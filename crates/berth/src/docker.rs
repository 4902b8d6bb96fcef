use colored::Colorize;
use futures_util::stream::StreamExt;
use std::io::Write;

fn print_connection_error(error: &bollard::errors::Error) {
    eprintln!();
    eprintln!("{}", "✗ Docker接続エラー".red().bold());
    eprintln!();
    eprintln!("{}", "原因:".yellow());
    eprintln!("  {}", error);
    eprintln!();
    eprintln!("{}", "解決方法:".yellow());
    eprintln!("  • Dockerが起動しているか確認してください");
    eprintln!("  • DOCKER_HOST が正しいソケットを指しているか確認してください");
    eprintln!("  • docker ps コマンドが正常に動作するか確認してください");
}

/// Docker接続を初期化（エラーハンドリング付き）
pub async fn init_docker_with_error_handling() -> anyhow::Result<bollard::Docker> {
    let docker = bollard::Docker::connect_with_local_defaults().map_err(|e| {
        print_connection_error(&e);
        anyhow::anyhow!("Docker接続に失敗しました")
    })?;

    // 接続テスト
    docker.ping().await.map_err(|e| {
        print_connection_error(&e);
        anyhow::anyhow!("Docker接続に失敗しました")
    })?;

    Ok(docker)
}

/// イメージをpull
pub async fn pull_image(docker: &bollard::Docker, image: &str) -> anyhow::Result<()> {
    let (name, tag) = berth_build::split_image_tag(image);

    println!("  ℹ イメージが見つかりません: {}", image.cyan());
    println!("  ↓ イメージをダウンロード中...");

    #[allow(deprecated)]
    let options = bollard::image::CreateImageOptions {
        from_image: name.as_str(),
        tag: tag.as_str(),
        ..Default::default()
    };

    #[allow(deprecated)]
    let mut stream = docker.create_image(Some(options), None, None);

    while let Some(info) = stream.next().await {
        match info {
            Ok(bollard::models::CreateImageInfo {
                status: Some(status),
                progress: Some(progress),
                ..
            }) => {
                // 進捗を表示（同じ行に上書き）
                print!("\r  ↓ {}: {}", status, progress);
                std::io::stdout().flush()?;
            }
            Ok(bollard::models::CreateImageInfo {
                status: Some(status),
                ..
            }) => {
                print!("\r  ↓ {}                    ", status);
                std::io::stdout().flush()?;
            }
            Err(e) => {
                println!();
                return Err(anyhow::anyhow!(
                    "イメージのダウンロードに失敗しました: {}",
                    e
                ));
            }
            _ => {}
        }
    }

    println!();
    println!("  ✓ イメージのダウンロード完了");

    Ok(())
}
