//! プロジェクトの読み込み
//!
//! compose ファイルの探索、プロジェクト名の決定、設定と環境変数のスナップショットをまとめます。

use crate::GlobalOptions;
use berth_build::{Environment, image_name, normalize_project_name};
use berth_config::Settings;
use berth_core::{Project, ServiceSpec};
use std::path::{Path, PathBuf};

pub struct ProjectContext {
    pub compose_file: PathBuf,
    pub project: Project,
    pub settings: Settings,
    pub env: Environment,
}

impl ProjectContext {
    pub fn load(options: &GlobalOptions) -> anyhow::Result<Self> {
        let cwd = std::env::current_dir()?;
        let search_dir = options
            .project_directory
            .as_deref()
            .map(|dir| cwd.join(dir))
            .unwrap_or_else(|| cwd.clone());

        let compose_file = cwd.join(berth_config::find_compose_file(
            &search_dir,
            options.file.as_deref(),
        )?);

        // 相対パスの基準は --project-directory、無ければ compose ファイルの場所
        let project_dir = match &options.project_directory {
            Some(_) => search_dir,
            None => compose_file
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(Path::to_path_buf)
                .unwrap_or(cwd),
        };

        let fallback_name = berth_config::default_project_name(&project_dir);
        let mut project = berth_core::load_project(&compose_file, &project_dir, &fallback_name)?;
        if let Some(name) = &options.project_name {
            project.name = name.clone();
        }

        let settings = Settings::load()?;
        tracing::debug!(
            project = %project.name,
            file = %compose_file.display(),
            "Project context loaded"
        );

        Ok(Self {
            compose_file,
            project,
            settings,
            env: Environment::from_process(),
        })
    }

    /// コンテナ名・ラベルに使う正規化済みのプロジェクト名
    pub fn project_name(&self) -> String {
        normalize_project_name(&self.project.name)
    }

    /// サービスのコンテナが使うイメージ
    ///
    /// ビルド設定があればビルドで付ける名前、無ければ `image` をそのまま使う。
    pub fn image_for(&self, service: &ServiceSpec) -> Option<String> {
        match &service.build {
            Some(_) => Some(image_name(
                &self.project_name(),
                &service.name,
                service.image.as_deref(),
                self.settings.naming,
            )),
            None => service.image.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_project(dir: &Path, content: &str) -> PathBuf {
        let path = dir.join("compose.yaml");
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_project_name_from_directory() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dir = temp_dir.path().join("Build-Test");
        fs::create_dir(&dir).unwrap();
        let file = write_project(&dir, "services:\n  web:\n    build: .\n");

        let context = ProjectContext::load(&GlobalOptions {
            file: Some(file),
            ..Default::default()
        })
        .unwrap();

        assert_eq!(context.project.name, "Build-Test");
        assert_eq!(context.project_name(), "build-test");
        assert_eq!(context.project.directory, dir);
    }

    #[test]
    fn test_project_name_override() {
        let temp_dir = tempfile::tempdir().unwrap();
        let file = write_project(
            temp_dir.path(),
            "name: from_file\nservices:\n  web:\n    build: .\n  db:\n    image: postgres:16\n",
        );

        let context = ProjectContext::load(&GlobalOptions {
            file: Some(file.clone()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(context.project.name, "from_file");

        let context = ProjectContext::load(&GlobalOptions {
            file: Some(file),
            project_name: Some("cli".to_string()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(context.project.name, "cli");

        let web = context.project.service("web").unwrap();
        let db = context.project.service("db").unwrap();
        let separator = context.settings.naming.separator();
        assert_eq!(context.image_for(web), Some(format!("cli{}web", separator)));
        assert_eq!(context.image_for(db).as_deref(), Some("postgres:16"));
    }

    #[test]
    fn test_project_directory_option() {
        let temp_dir = tempfile::tempdir().unwrap();
        write_project(temp_dir.path(), "services:\n  web:\n    build: ./web\n");

        let context = ProjectContext::load(&GlobalOptions {
            project_directory: Some(temp_dir.path().to_path_buf()),
            ..Default::default()
        })
        .unwrap();

        assert_eq!(context.compose_file, temp_dir.path().join("compose.yaml"));
        let build = context.project.service("web").unwrap().build.as_ref().unwrap();
        assert!(build.context.starts_with(temp_dir.path()));
    }
}
