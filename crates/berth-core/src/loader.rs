//! マニフェストローダー
//!
//! compose 形式の YAML を読み込み、パスを解決して [`Project`] に変換します。

use crate::error::{CoreError, Result};
use crate::model::{
    BuildArgDecl, BuildSpec, Port, Project, SecretSpec, ServiceSpec, SshSource, SshSpec,
};
use serde::Deserialize;
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument};

/// マニフェストファイルを読み込んでプロジェクトを生成
///
/// `project_dir` は相対パス解決の基準。`fallback_name` は `name:` が無い場合に使う。
#[instrument(skip_all, fields(file = %file.display()))]
pub fn load_project(file: &Path, project_dir: &Path, fallback_name: &str) -> Result<Project> {
    let content = std::fs::read_to_string(file).map_err(|source| CoreError::Io {
        path: file.to_path_buf(),
        source,
    })?;
    let project = parse_project(&content, project_dir, fallback_name)?;
    info!(services = project.services.len(), "Project loaded");
    Ok(project)
}

/// YAML文字列からプロジェクトを生成
pub fn parse_project(content: &str, project_dir: &Path, fallback_name: &str) -> Result<Project> {
    let raw: RawCompose = serde_yaml::from_str(content)?;

    let mut services = BTreeMap::new();
    for (name, raw_service) in raw.services {
        let service = convert_service(&name, raw_service, &raw.secrets, project_dir)?;
        debug!(service = %name, buildable = service.build.is_some(), "Parsed service");
        services.insert(name, service);
    }

    Ok(Project {
        name: raw.name.unwrap_or_else(|| fallback_name.to_string()),
        directory: project_dir.to_path_buf(),
        services,
    })
}

#[derive(Debug, Deserialize)]
struct RawCompose {
    name: Option<String>,
    #[serde(default)]
    services: BTreeMap<String, RawService>,
    #[serde(default)]
    secrets: BTreeMap<String, RawSecret>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawService {
    image: Option<String>,
    build: Option<RawBuild>,
    environment: Option<ListOrMap>,
    ports: Vec<Value>,
    depends_on: Option<RawDependsOn>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawBuild {
    Short(String),
    Full(RawBuildConfig),
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawBuildConfig {
    context: Option<String>,
    dockerfile: Option<String>,
    args: Option<ListOrMap>,
    ssh: Option<ListOrMap>,
    secrets: Vec<RawSecretRef>,
    target: Option<String>,
    depends_on: Vec<String>,
    labels: Option<ListOrMap>,
}

/// `["KEY=value", "KEY"]` と `{KEY: value}` の両形式
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ListOrMap {
    List(Vec<String>),
    Map(BTreeMap<String, Option<Value>>),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawSecretRef {
    Name(String),
    Long {
        source: String,
        target: Option<String>,
    },
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawSecret {
    file: Option<String>,
    environment: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawDependsOn {
    List(Vec<String>),
    Map(BTreeMap<String, Value>),
}

fn convert_service(
    name: &str,
    raw: RawService,
    secrets: &BTreeMap<String, RawSecret>,
    project_dir: &Path,
) -> Result<ServiceSpec> {
    let build = match raw.build {
        Some(raw_build) => Some(convert_build(name, raw_build, secrets, project_dir)?),
        None => None,
    };

    let environment = match raw.environment {
        Some(env) => key_values(env)?
            .into_iter()
            .filter_map(|(k, v)| v.map(|v| (k, v)))
            .collect(),
        None => BTreeMap::new(),
    };

    let ports = raw
        .ports
        .iter()
        .map(|value| match value {
            Value::Number(n) => Port::parse(&n.to_string()),
            Value::String(s) => Port::parse(s),
            other => Err(CoreError::InvalidPort(format!("{:?}", other))),
        })
        .collect::<Result<Vec<_>>>()?;

    let depends_on = match raw.depends_on {
        Some(RawDependsOn::List(list)) => list,
        Some(RawDependsOn::Map(map)) => map.into_keys().collect(),
        None => Vec::new(),
    };

    Ok(ServiceSpec {
        name: name.to_string(),
        image: raw.image,
        build,
        environment,
        ports,
        depends_on,
    })
}

fn convert_build(
    service: &str,
    raw: RawBuild,
    secrets: &BTreeMap<String, RawSecret>,
    project_dir: &Path,
) -> Result<BuildSpec> {
    let config = match raw {
        RawBuild::Short(context) => RawBuildConfig {
            context: Some(context),
            ..Default::default()
        },
        RawBuild::Full(config) => config,
    };

    let context = resolve_path(project_dir, config.context.as_deref().unwrap_or("."));

    let mut args = BTreeMap::new();
    if let Some(raw_args) = config.args {
        args = convert_args(raw_args)?;
    }

    let ssh = match config.ssh {
        Some(ListOrMap::List(list)) => list.iter().map(|s| SshSpec::parse(s)).collect(),
        Some(ListOrMap::Map(map)) => map
            .into_iter()
            .map(|(id, path)| match path.and_then(|v| scalar_to_string(&v)) {
                Some(path) if !path.is_empty() => Ok(SshSpec {
                    id,
                    source: SshSource::Path(PathBuf::from(path)),
                }),
                _ => Ok(SshSpec::agent(id)),
            })
            .collect::<Result<Vec<_>>>()?,
        None => Vec::new(),
    };
    // マニフェスト内の鍵パスはプロジェクトディレクトリ基準
    let ssh = ssh
        .into_iter()
        .map(|spec| match spec.source {
            SshSource::Path(path) => SshSpec {
                id: spec.id,
                source: SshSource::Path(resolve_path(project_dir, &path.to_string_lossy())),
            },
            SshSource::Agent => spec,
        })
        .collect();

    let mut build_secrets = Vec::new();
    for secret_ref in config.secrets {
        let (source, id) = match secret_ref {
            RawSecretRef::Name(name) => (name.clone(), name),
            RawSecretRef::Long { source, target } => {
                let id = target.unwrap_or_else(|| source.clone());
                (source, id)
            }
        };
        let definition = secrets
            .get(&source)
            .ok_or_else(|| CoreError::UndefinedSecret {
                service: service.to_string(),
                secret: source.clone(),
            })?;
        let file = match (&definition.file, &definition.environment) {
            (Some(file), _) => resolve_path(project_dir, file),
            (None, Some(_)) => {
                return Err(CoreError::InvalidConfig(format!(
                    "シークレット '{}': ビルドシークレットは file 指定のみサポートしています",
                    source
                )));
            }
            (None, None) => {
                return Err(CoreError::InvalidConfig(format!(
                    "シークレット '{}' に file が指定されていません",
                    source
                )));
            }
        };
        build_secrets.push(SecretSpec { id, file });
    }

    let labels = match config.labels {
        Some(labels) => key_values(labels)?
            .into_iter()
            .map(|(k, v)| (k, v.unwrap_or_default()))
            .collect(),
        None => BTreeMap::new(),
    };

    Ok(BuildSpec {
        context,
        dockerfile: config.dockerfile.map(PathBuf::from),
        args,
        ssh,
        secrets: build_secrets,
        target: config.target,
        depends_on: config.depends_on,
        labels,
    })
}

/// ビルド引数の宣言を変換
///
/// マップ値は文字列・数値・null（環境変数から継承）、または
/// `{ value: ..., required: true }` の詳細形式を受け付ける。
fn convert_args(raw: ListOrMap) -> Result<BTreeMap<String, BuildArgDecl>> {
    let mut args = BTreeMap::new();
    match raw {
        ListOrMap::List(list) => {
            for entry in list {
                let decl = match entry.split_once('=') {
                    Some((key, value)) => (key.to_string(), BuildArgDecl::with_value(value)),
                    None => (entry.clone(), BuildArgDecl::inherit()),
                };
                args.insert(decl.0, decl.1);
            }
        }
        ListOrMap::Map(map) => {
            for (key, value) in map {
                let decl = match value {
                    None | Some(Value::Null) => BuildArgDecl::inherit(),
                    Some(Value::Mapping(detail)) => BuildArgDecl {
                        value: detail.get("value").and_then(scalar_to_string),
                        required: detail
                            .get("required")
                            .and_then(Value::as_bool)
                            .unwrap_or(false),
                    },
                    Some(other) => {
                        let value = scalar_to_string(&other).ok_or_else(|| {
                            CoreError::InvalidConfig(format!(
                                "ビルド引数 '{}' の値はスカラーである必要があります",
                                key
                            ))
                        })?;
                        BuildArgDecl::with_value(value)
                    }
                };
                args.insert(key, decl);
            }
        }
    }
    Ok(args)
}

fn key_values(raw: ListOrMap) -> Result<Vec<(String, Option<String>)>> {
    match raw {
        ListOrMap::List(list) => Ok(list
            .into_iter()
            .map(|entry| match entry.split_once('=') {
                Some((k, v)) => (k.to_string(), Some(v.to_string())),
                None => (entry, None),
            })
            .collect()),
        ListOrMap::Map(map) => Ok(map
            .into_iter()
            .map(|(k, v)| (k, v.and_then(|v| scalar_to_string(&v))))
            .collect()),
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn resolve_path(base: &Path, path: &str) -> PathBuf {
    let path = Path::new(path);
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    };
    normalize(&joined)
}

/// `.` と `..` を字句的に畳み込む
fn normalize(path: &Path) -> PathBuf {
    use std::path::Component;

    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const BUILD_TEST: &str = r#"
services:
  nginx:
    build:
      context: nginx-build
      args:
        FOO: bar
        BAR:
        PORT: 8080
        TOKEN:
          required: true
  nginx2:
    build: nginx-build2
    image: custom-nginx
    ports:
      - "8070:80"
    environment:
      - MODE=prod
    depends_on:
      - nginx
"#;

    #[test]
    fn test_parse_build_args() {
        let project = parse_project(BUILD_TEST, Path::new("/work/build-test"), "build-test")
            .unwrap();
        assert_eq!(project.name, "build-test");

        let build = project.services["nginx"].build.as_ref().unwrap();
        assert_eq!(build.context, PathBuf::from("/work/build-test/nginx-build"));
        assert_eq!(build.args["FOO"], BuildArgDecl::with_value("bar"));
        assert_eq!(build.args["BAR"], BuildArgDecl::inherit());
        assert_eq!(build.args["PORT"], BuildArgDecl::with_value("8080"));
        assert!(build.args["TOKEN"].required);
        assert_eq!(build.args["TOKEN"].value, None);
    }

    #[test]
    fn test_parse_short_build_and_runtime_fields() {
        let project = parse_project(BUILD_TEST, Path::new("/work/build-test"), "build-test")
            .unwrap();

        let nginx2 = &project.services["nginx2"];
        assert_eq!(nginx2.image.as_deref(), Some("custom-nginx"));
        assert_eq!(
            nginx2.build.as_ref().unwrap().context,
            PathBuf::from("/work/build-test/nginx-build2")
        );
        assert_eq!(nginx2.ports[0].host, Some(8070));
        assert_eq!(nginx2.environment["MODE"], "prod");
        assert_eq!(nginx2.depends_on, vec!["nginx".to_string()]);
    }

    #[test]
    fn test_parse_name_overrides_fallback() {
        let yaml = "name: custom\nservices: {}\n";
        let project = parse_project(yaml, Path::new("/work/x"), "x").unwrap();
        assert_eq!(project.name, "custom");
    }

    #[test]
    fn test_parse_ssh_and_secrets() {
        let yaml = r#"
services:
  ssh:
    image: build-test-ssh
    build:
      context: .
      ssh:
        - fake-ssh=./fake_rsa
        - default
      secrets:
        - mysecret
        - source: dotenv
          target: envfile
secrets:
  mysecret:
    file: ./secret.txt
  dotenv:
    file: ./.env
"#;
        let project = parse_project(yaml, Path::new("/work/ssh"), "ssh").unwrap();
        let build = project.services["ssh"].build.as_ref().unwrap();

        assert_eq!(
            build.ssh,
            vec![
                SshSpec {
                    id: "fake-ssh".to_string(),
                    source: SshSource::Path(PathBuf::from("/work/ssh/fake_rsa")),
                },
                SshSpec::agent("default"),
            ]
        );
        assert_eq!(build.secrets[0].id, "mysecret");
        assert_eq!(build.secrets[0].file, PathBuf::from("/work/ssh/secret.txt"));
        assert_eq!(build.secrets[1].id, "envfile");
        assert_eq!(build.secrets[1].file, PathBuf::from("/work/ssh/.env"));
    }

    #[test]
    fn test_parse_undefined_secret() {
        let yaml = r#"
services:
  app:
    build:
      context: .
      secrets: [missing]
"#;
        let err = parse_project(yaml, Path::new("/work"), "work").unwrap_err();
        assert!(matches!(err, CoreError::UndefinedSecret { .. }));
    }

    #[test]
    fn test_parse_ssh_map_form() {
        let yaml = r#"
services:
  app:
    build:
      context: ../app
      ssh:
        default:
        deploy: /keys/deploy
"#;
        let project = parse_project(yaml, Path::new("/work/proj"), "proj").unwrap();
        let build = project.services["app"].build.as_ref().unwrap();
        assert_eq!(build.context, PathBuf::from("/work/app"));
        assert!(build.ssh.contains(&SshSpec::agent("default")));
        assert!(build.ssh.contains(&SshSpec {
            id: "deploy".to_string(),
            source: SshSource::Path(PathBuf::from("/keys/deploy")),
        }));
    }

    #[test]
    fn test_load_project_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_project(&dir.path().join("compose.yaml"), dir.path(), "x").unwrap_err();
        assert!(matches!(err, CoreError::Io { .. }));
    }
}
