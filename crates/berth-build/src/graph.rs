//! ビルドグラフ
//!
//! プロジェクトのサービス定義から [`BuildUnit`] を生成し、依存順に並べます。
//! ビルド入力の解決（引数・SSH・シークレット・ダイジェスト・イメージ名）はすべてここで行うため、
//! いずれかの解決に失敗した場合はビルドを1つも開始せずにプラン全体が中断されます。

use crate::args::{BuildArgResolver, CliBuildArg};
use crate::auth::AuthForwarder;
use crate::digest::{ContextDigest, DigestInput, base_images};
use crate::env::Environment;
use crate::error::{BuildError, Result};
use crate::secrets::SecretResolver;
use crate::store::with_default_tag;
use crate::tagger::{image_name, normalize_project_name};
use crate::unit::BuildUnit;
use berth_core::{BuildSpec, NamingConvention, Project, SshSpec};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fs;

/// 依存ユニットのダイジェストを自身のダイジェストに含めるか
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CascadePolicy {
    /// 自身の入力のみ
    #[default]
    Isolated,
    /// 依存ユニットが変われば自身も再ビルド
    Cascade,
}

impl From<bool> for CascadePolicy {
    fn from(cascade: bool) -> Self {
        if cascade {
            CascadePolicy::Cascade
        } else {
            CascadePolicy::Isolated
        }
    }
}

/// ビルド対象と入力の指定
#[derive(Debug, Clone, Default)]
pub struct BuildRequest {
    /// 対象サービス（空なら全サービス）。依存サービスも自動的に含まれる
    pub services: Vec<String>,
    pub cli_args: Vec<CliBuildArg>,
    pub cli_ssh: Vec<SshSpec>,
    pub naming: NamingConvention,
    pub cascade: CascadePolicy,
}

/// グラフのノード（解決前）
struct Node<'a> {
    service: &'a str,
    build: &'a BuildSpec,
    dockerfile: Vec<u8>,
    image: String,
    dependencies: Vec<String>,
}

pub struct BuildGraph;

impl BuildGraph {
    /// ビルドユニットを依存順に生成
    pub fn compile(
        project: &Project,
        request: &BuildRequest,
        env: &Environment,
    ) -> Result<Vec<BuildUnit>> {
        let project_name = normalize_project_name(&project.name);

        let mut nodes: BTreeMap<&str, Node<'_>> = BTreeMap::new();
        for service in project.buildable_services() {
            let Some(build) = &service.build else {
                continue;
            };
            if !build.context.is_dir() {
                return Err(BuildError::ContextNotFound(build.context.clone()));
            }
            let dockerfile_path = build.dockerfile_path();
            let dockerfile = fs::read(&dockerfile_path)
                .map_err(|_| BuildError::DockerfileNotFound(dockerfile_path.clone()))?;

            nodes.insert(
                service.name.as_str(),
                Node {
                    service: service.name.as_str(),
                    build,
                    dockerfile,
                    image: image_name(
                        &project.name,
                        &service.name,
                        service.image.as_deref(),
                        request.naming,
                    ),
                    dependencies: Vec::new(),
                },
            );
        }

        Self::link(project, &mut nodes)?;
        let order = Self::topological_sort(&nodes)?;
        let selected = Self::select(project, &nodes, &request.services)?;

        let mut units: Vec<BuildUnit> = Vec::new();
        let mut digests: HashMap<&str, ContextDigest> = HashMap::new();
        for name in order.iter().filter(|name| selected.contains(name.as_str())) {
            let Some(node) = nodes.get(name.as_str()) else {
                continue;
            };
            let unit = Self::resolve(&project_name, node, request, env, &digests)?;
            tracing::debug!(
                "Compiled unit '{}' -> {} (digest {})",
                unit.service,
                unit.image,
                unit.digest
            );
            digests.insert(node.service, unit.digest);
            units.push(unit);
        }

        Ok(units)
    }

    /// 依存エッジを張る
    ///
    /// `build.depends_on` と、Dockerfile の `FROM` が他ユニットのイメージを参照しているもの。
    fn link(project: &Project, nodes: &mut BTreeMap<&str, Node<'_>>) -> Result<()> {
        let mut by_image: HashMap<String, String> = HashMap::new();
        for node in nodes.values() {
            by_image.insert(node.image.clone(), node.service.to_string());
            by_image.insert(with_default_tag(&node.image), node.service.to_string());
        }

        let buildable: HashSet<String> = nodes.keys().map(|k| k.to_string()).collect();

        for node in nodes.values_mut() {
            let mut deps: BTreeSet<String> = BTreeSet::new();

            for dep in &node.build.depends_on {
                if project.service(dep).is_none() {
                    return Err(BuildError::UnknownDependency {
                        service: node.service.to_string(),
                        dependency: dep.clone(),
                    });
                }
                if buildable.contains(dep) {
                    deps.insert(dep.clone());
                } else {
                    tracing::debug!(
                        "'{}' depends on '{}' which has no build, ignored",
                        node.service,
                        dep
                    );
                }
            }

            let dockerfile = String::from_utf8_lossy(&node.dockerfile);
            for base in base_images(&dockerfile) {
                let owner = by_image
                    .get(&base)
                    .or_else(|| by_image.get(&with_default_tag(&base)));
                if let Some(owner) = owner.filter(|owner| owner.as_str() != node.service) {
                    deps.insert(owner.clone());
                }
            }

            node.dependencies = deps.into_iter().collect();
        }

        Ok(())
    }

    /// 深さ優先でトポロジカルソート（サービス名順で安定）
    fn topological_sort(nodes: &BTreeMap<&str, Node<'_>>) -> Result<Vec<String>> {
        let mut visiting: Vec<String> = Vec::new();
        let mut visited: HashSet<String> = HashSet::new();
        let mut order = Vec::new();

        for name in nodes.keys() {
            Self::visit(name, nodes, &mut visiting, &mut visited, &mut order)?;
        }

        Ok(order)
    }

    fn visit(
        node: &str,
        nodes: &BTreeMap<&str, Node<'_>>,
        visiting: &mut Vec<String>,
        visited: &mut HashSet<String>,
        order: &mut Vec<String>,
    ) -> Result<()> {
        if visited.contains(node) {
            return Ok(());
        }

        if let Some(pos) = visiting.iter().position(|n| n == node) {
            let mut cycle: Vec<String> = visiting[pos..].to_vec();
            cycle.push(node.to_string());
            return Err(BuildError::CyclicBuildDependency(cycle));
        }

        visiting.push(node.to_string());

        let deps = nodes
            .get(node)
            .map(|n| n.dependencies.clone())
            .unwrap_or_default();
        for dep in deps {
            Self::visit(&dep, nodes, visiting, visited, order)?;
        }

        visiting.pop();
        visited.insert(node.to_string());
        order.push(node.to_string());

        Ok(())
    }

    /// 対象サービスと、その推移的な依存を選択
    fn select(
        project: &Project,
        nodes: &BTreeMap<&str, Node<'_>>,
        services: &[String],
    ) -> Result<HashSet<String>> {
        if services.is_empty() {
            return Ok(nodes.keys().map(|k| k.to_string()).collect());
        }

        let mut selected = HashSet::new();
        let mut stack: Vec<String> = Vec::new();
        for name in services {
            if project.service(name).is_none() {
                return Err(BuildError::UnknownService(name.clone()));
            }
            if nodes.contains_key(name.as_str()) {
                stack.push(name.clone());
            } else {
                tracing::info!("Service '{}' has no build section, skipped", name);
            }
        }

        while let Some(name) = stack.pop() {
            if !selected.insert(name.clone()) {
                continue;
            }
            if let Some(node) = nodes.get(name.as_str()) {
                stack.extend(node.dependencies.iter().cloned());
            }
        }

        Ok(selected)
    }

    /// ノードのビルド入力を解決してユニットにする
    fn resolve(
        project_name: &str,
        node: &Node<'_>,
        request: &BuildRequest,
        env: &Environment,
        digests: &HashMap<&str, ContextDigest>,
    ) -> Result<BuildUnit> {
        let build = node.build;
        let args = BuildArgResolver::resolve(node.service, &build.args, &request.cli_args, env)?;
        let forwards = AuthForwarder::resolve(&build.ssh, &request.cli_ssh, env)?;
        let secrets = SecretResolver::resolve(&build.secrets)?;

        let dependency_digests: Vec<ContextDigest> = match request.cascade {
            CascadePolicy::Isolated => Vec::new(),
            CascadePolicy::Cascade => node
                .dependencies
                .iter()
                .filter_map(|dep| digests.get(dep.as_str()).copied())
                .collect(),
        };

        let digest = ContextDigest::compute(&DigestInput {
            context: &build.context,
            dockerfile: &node.dockerfile,
            args: &args,
            secrets: &secrets,
            target: build.target.as_deref(),
            dependencies: &dependency_digests,
        })?;

        Ok(BuildUnit {
            service: node.service.to_string(),
            project: project_name.to_string(),
            context: build.context.clone(),
            dockerfile: build.dockerfile_path(),
            target: build.target.clone(),
            args,
            forwards,
            secrets,
            labels: build.labels.clone(),
            digest,
            image: node.image.clone(),
            dependencies: node.dependencies.clone(),
        })
    }
}
