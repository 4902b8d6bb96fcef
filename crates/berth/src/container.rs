//! サービス定義から Docker API パラメータへの変換

#![allow(deprecated)]

use anyhow::bail;
use berth_build::backend::PROJECT_LABEL;
use berth_core::{Project, ServiceSpec};
use bollard::container::{Config, CreateContainerOptions};
use bollard::models::{HostConfig, PortBinding};
use std::collections::{BTreeSet, HashMap};

/// コンテナに付けるサービス名ラベル
pub const SERVICE_LABEL: &str = "io.berth.service";

/// `<project>-<service>-1`
pub fn container_name(project_name: &str, service_name: &str) -> String {
    format!("{}-{}-1", project_name, service_name)
}

/// プロジェクトのコンテナを探すためのフィルタ
pub fn project_filter(project_name: &str) -> HashMap<String, Vec<String>> {
    let mut filters = HashMap::new();
    filters.insert(
        "label".to_string(),
        vec![format!("{}={}", PROJECT_LABEL, project_name)],
    );
    filters
}

/// サービスをコンテナ設定に変換
pub fn service_to_container_config(
    project_name: &str,
    service: &ServiceSpec,
    image: &str,
) -> (Config<String>, CreateContainerOptions<String>) {
    let env: Vec<String> = service
        .environment
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect();

    let mut port_bindings = HashMap::new();
    let mut exposed_ports = HashMap::new();
    for port in &service.ports {
        let key = port.container_key();
        exposed_ports.insert(key.clone(), HashMap::new());

        // ホスト側の指定が無いポートは公開のみ
        if let Some(host) = port.host {
            port_bindings.insert(
                key,
                Some(vec![PortBinding {
                    host_ip: Some("0.0.0.0".to_string()),
                    host_port: Some(host.to_string()),
                }]),
            );
        }
    }

    let mut labels = HashMap::new();
    labels.insert(
        "com.docker.compose.project".to_string(),
        project_name.to_string(),
    );
    labels.insert(
        "com.docker.compose.service".to_string(),
        service.name.clone(),
    );
    labels.insert(PROJECT_LABEL.to_string(), project_name.to_string());
    labels.insert(SERVICE_LABEL.to_string(), service.name.clone());

    let config = Config {
        image: Some(image.to_string()),
        env: Some(env),
        exposed_ports: Some(exposed_ports),
        host_config: Some(HostConfig {
            port_bindings: Some(port_bindings),
            ..Default::default()
        }),
        labels: Some(labels),
        ..Default::default()
    };

    let options = CreateContainerOptions {
        name: container_name(project_name, &service.name),
        platform: None,
    };

    (config, options)
}

/// 起動順（`depends_on` の依存先が先）
///
/// `selected` が空なら全サービス。指定されたサービスの依存先も含まれる。
pub fn start_order<'a>(project: &'a Project, selected: &[String]) -> anyhow::Result<Vec<&'a ServiceSpec>> {
    let roots: Vec<&str> = if selected.is_empty() {
        project.services.keys().map(String::as_str).collect()
    } else {
        selected.iter().map(String::as_str).collect()
    };

    let mut order = Vec::new();
    let mut done = BTreeSet::new();
    let mut visiting = Vec::new();
    for name in roots {
        visit(project, name, &mut visiting, &mut done, &mut order)?;
    }
    Ok(order)
}

fn visit<'a>(
    project: &'a Project,
    name: &str,
    visiting: &mut Vec<String>,
    done: &mut BTreeSet<String>,
    order: &mut Vec<&'a ServiceSpec>,
) -> anyhow::Result<()> {
    if done.contains(name) {
        return Ok(());
    }
    if visiting.iter().any(|v| v == name) {
        bail!(
            "サービスの depends_on が循環しています: {} -> {}",
            visiting.join(" -> "),
            name
        );
    }
    let Some(service) = project.service(name) else {
        bail!("サービス '{}' が見つかりません", name);
    };

    visiting.push(name.to_string());
    for dependency in &service.depends_on {
        visit(project, dependency, visiting, done, order)?;
    }
    visiting.pop();

    done.insert(name.to_string());
    order.push(service);
    Ok(())
}
