//! サービス定義

use super::build::BuildSpec;
use crate::error::{CoreError, Result};
use serde::Serialize;
use std::collections::BTreeMap;

/// サービス定義
///
/// YAML形式：
/// ```yaml
/// services:
///   web:
///     build: ./web
///     image: custom-web
///     ports: ["8080:80"]
///     environment:
///       KEY: value
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ServiceSpec {
    pub name: String,
    /// 明示的なイメージ名（build と併用時はビルド結果のタグになる）
    pub image: Option<String>,
    /// ビルド設定
    pub build: Option<BuildSpec>,
    pub environment: BTreeMap<String, String>,
    pub ports: Vec<Port>,
    /// 起動順の依存（ビルド依存ではない）
    pub depends_on: Vec<String>,
}

/// ポート定義
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Port {
    pub host: Option<u16>,
    pub container: u16,
    pub protocol: Protocol,
}

/// プロトコル種別
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
}

impl Protocol {
    /// Docker APIで使用する文字列に変換
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
        }
    }
}

impl Port {
    /// compose 形式のポート指定をパース
    ///
    /// - `80` → コンテナポートのみ
    /// - `8080:80` → ホスト:コンテナ
    /// - `8080:80/udp` → プロトコル指定
    pub fn parse(spec: &str) -> Result<Self> {
        let (ports, protocol) = match spec.split_once('/') {
            Some((p, "udp")) => (p, Protocol::Udp),
            Some((p, "tcp")) => (p, Protocol::Tcp),
            Some(_) => return Err(CoreError::InvalidPort(spec.to_string())),
            None => (spec, Protocol::Tcp),
        };

        let parse_num = |s: &str| {
            s.trim()
                .parse::<u16>()
                .map_err(|_| CoreError::InvalidPort(spec.to_string()))
        };

        match ports.rsplit_once(':') {
            Some((host, container)) => {
                // ip:host:container 形式の場合はホストポート部分のみを使う
                let host = host.rsplit(':').next().unwrap_or(host);
                Ok(Self {
                    host: Some(parse_num(host)?),
                    container: parse_num(container)?,
                    protocol,
                })
            }
            None => Ok(Self {
                host: None,
                container: parse_num(ports)?,
                protocol,
            }),
        }
    }

    /// `80/tcp` 形式のキー
    pub fn container_key(&self) -> String {
        format!("{}/{}", self.container, self.protocol.as_str())
    }
}
