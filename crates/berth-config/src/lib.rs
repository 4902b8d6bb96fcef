pub mod error;

pub use error::*;

use berth_core::NamingConvention;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// 検索する compose ファイル名（優先順）
pub const COMPOSE_FILE_NAMES: [&str; 4] = [
    "compose.yaml",
    "compose.yml",
    "docker-compose.yml",
    "docker-compose.yaml",
];

/// Berthの設定ディレクトリパスを取得
pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or(ConfigError::ConfigDirNotFound)?
        .join("berth");

    Ok(config_dir)
}

/// プロジェクトの compose ファイルを探す
///
/// 以下の優先順位で検索:
/// 1. 明示的な指定（-f オプション）
/// 2. 環境変数 BERTH_FILE
/// 3. プロジェクトディレクトリ: compose.yaml, compose.yml, docker-compose.yml, docker-compose.yaml
pub fn find_compose_file(project_dir: &Path, explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        return Err(ConfigError::ComposeFileNotFound(path.to_path_buf()));
    }

    if let Ok(config_path) = std::env::var("BERTH_FILE") {
        let path = PathBuf::from(config_path);
        if path.exists() {
            return Ok(path);
        }
    }

    for filename in &COMPOSE_FILE_NAMES {
        let path = project_dir.join(filename);
        if path.exists() {
            return Ok(path);
        }
    }

    Err(ConfigError::ComposeFileNotFound(project_dir.to_path_buf()))
}

/// ディレクトリ名からデフォルトのプロジェクト名を決定
pub fn default_project_name(project_dir: &Path) -> String {
    project_dir
        .canonicalize()
        .unwrap_or_else(|_| project_dir.to_path_buf())
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("default")
        .to_string()
}

/// ビルドバックエンドの種類
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// `docker buildx build`（BuildKit）
    #[default]
    Buildx,
    /// Docker Engine API のクラシックビルダー
    Engine,
}

/// エンジン設定
///
/// `~/.config/berth/config.yaml`:
/// ```yaml
/// parallel_limit: 4
/// naming: hyphen
/// cascade: false
/// fail_fast: false
/// backend: buildx
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// 同時実行するビルド数の上限
    pub parallel_limit: usize,
    pub naming: NamingConvention,
    /// 依存イメージのダイジェストを自身のダイジェストに含める
    pub cascade: bool,
    pub fail_fast: bool,
    pub backend: BackendKind,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            parallel_limit: 4,
            naming: NamingConvention::default(),
            cascade: false,
            fail_fast: false,
            backend: BackendKind::default(),
        }
    }
}

impl Settings {
    /// グローバル設定ファイルと環境変数から設定をロード
    pub fn load() -> Result<Self> {
        let mut settings = match get_config_dir() {
            Ok(dir) => Self::from_file(&dir.join("config.yaml"))?,
            Err(_) => Self::default(),
        };
        settings.apply_env(|name| std::env::var(name).ok())?;
        Ok(settings)
    }

    /// 設定ファイルを読み込む（存在しない場合はデフォルト）
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("Settings file not found at {}", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&content).map_err(|source| ConfigError::InvalidSettings {
            path: path.to_path_buf(),
            source,
        })
    }

    /// 環境変数による上書き
    ///
    /// - `BERTH_PARALLEL_LIMIT`: 同時ビルド数
    /// - `BERTH_NAMING`: `underscore` / `hyphen`
    /// - `BERTH_CASCADE`, `BERTH_FAIL_FAST`: `1` / `true`
    /// - `DOCKER_BUILDKIT=0`: クラシックビルダーを使用
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("BERTH_PARALLEL_LIMIT") {
            self.parallel_limit = value
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| ConfigError::InvalidEnv {
                    name: "BERTH_PARALLEL_LIMIT".to_string(),
                    value: value.clone(),
                })?;
        }

        if let Some(value) = lookup("BERTH_NAMING") {
            self.naming =
                NamingConvention::parse(&value).ok_or_else(|| ConfigError::InvalidEnv {
                    name: "BERTH_NAMING".to_string(),
                    value: value.clone(),
                })?;
        }

        if let Some(value) = lookup("BERTH_CASCADE") {
            self.cascade = parse_flag(&value);
        }

        if let Some(value) = lookup("BERTH_FAIL_FAST") {
            self.fail_fast = parse_flag(&value);
        }

        if let Some(value) = lookup("DOCKER_BUILDKIT") {
            self.backend = if parse_flag(&value) {
                BackendKind::Buildx
            } else {
                BackendKind::Engine
            };
        }

        Ok(())
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::collections::HashMap;
    use std::fs;

    fn env_of(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_get_config_dir() {
        let config_dir = get_config_dir().unwrap();
        assert!(config_dir.ends_with("berth"));
    }

    #[test]
    #[serial]
    fn test_find_compose_file_priority() {
        let temp_dir = tempfile::tempdir().unwrap();

        fs::write(temp_dir.path().join("docker-compose.yml"), "services: {}").unwrap();
        fs::write(temp_dir.path().join("compose.yaml"), "services: {}").unwrap();

        let result = find_compose_file(temp_dir.path(), None).unwrap();
        // compose.yaml が優先される
        assert!(result.ends_with("compose.yaml"));
    }

    #[test]
    #[serial]
    fn test_find_compose_file_legacy_name() {
        let temp_dir = tempfile::tempdir().unwrap();
        fs::write(temp_dir.path().join("docker-compose.yml"), "services: {}").unwrap();

        let result = find_compose_file(temp_dir.path(), None).unwrap();
        assert!(result.ends_with("docker-compose.yml"));
    }

    #[test]
    #[serial]
    fn test_find_compose_file_explicit() {
        let temp_dir = tempfile::tempdir().unwrap();
        let custom = temp_dir.path().join("compose-without-ssh.yaml");
        fs::write(&custom, "services: {}").unwrap();
        fs::write(temp_dir.path().join("compose.yaml"), "services: {}").unwrap();

        let result = find_compose_file(temp_dir.path(), Some(&custom)).unwrap();
        assert_eq!(result, custom);

        let missing = temp_dir.path().join("missing.yaml");
        assert!(matches!(
            find_compose_file(temp_dir.path(), Some(&missing)),
            Err(ConfigError::ComposeFileNotFound(_))
        ));
    }

    #[test]
    #[serial]
    fn test_find_compose_file_env_var() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("custom.yaml");
        fs::write(&config_path, "services: {}").unwrap();

        // 環境変数を設定
        unsafe {
            std::env::set_var("BERTH_FILE", config_path.to_str().unwrap());
        }

        let result = find_compose_file(temp_dir.path(), None).unwrap();
        assert_eq!(result, config_path);

        // クリーンアップ
        unsafe {
            std::env::remove_var("BERTH_FILE");
        }
    }

    #[test]
    #[serial]
    fn test_find_compose_file_not_found() {
        let temp_dir = tempfile::tempdir().unwrap();

        let result = find_compose_file(temp_dir.path(), None);
        assert!(matches!(result, Err(ConfigError::ComposeFileNotFound(_))));
    }

    #[test]
    fn test_default_project_name() {
        let temp_dir = tempfile::tempdir().unwrap();
        let project = temp_dir.path().join("build-test");
        fs::create_dir(&project).unwrap();
        assert_eq!(default_project_name(&project), "build-test");
    }

    #[test]
    fn test_settings_from_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("config.yaml");
        fs::write(&path, "parallel_limit: 2\nnaming: hyphen\n").unwrap();

        let settings = Settings::from_file(&path).unwrap();
        assert_eq!(settings.parallel_limit, 2);
        assert_eq!(settings.naming, NamingConvention::Hyphen);
        assert!(!settings.cascade);
        assert_eq!(settings.backend, BackendKind::Buildx);
    }

    #[test]
    fn test_settings_missing_file_is_default() {
        let temp_dir = tempfile::tempdir().unwrap();
        let settings = Settings::from_file(&temp_dir.path().join("none.yaml")).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_settings_env_override() {
        let env = env_of(&[
            ("BERTH_PARALLEL_LIMIT", "1"),
            ("BERTH_NAMING", "hyphen"),
            ("BERTH_CASCADE", "true"),
            ("DOCKER_BUILDKIT", "0"),
        ]);
        let mut settings = Settings::default();
        settings.apply_env(|name| env.get(name).cloned()).unwrap();

        assert_eq!(settings.parallel_limit, 1);
        assert_eq!(settings.naming, NamingConvention::Hyphen);
        assert!(settings.cascade);
        assert!(!settings.fail_fast);
        assert_eq!(settings.backend, BackendKind::Engine);
    }

    #[test]
    fn test_settings_env_invalid() {
        let env = env_of(&[("BERTH_PARALLEL_LIMIT", "zero")]);
        let mut settings = Settings::default();
        let result = settings.apply_env(|name| env.get(name).cloned());
        assert!(matches!(result, Err(ConfigError::InvalidEnv { .. })));
    }
}
