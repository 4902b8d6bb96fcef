//! ビルド引数の解決
//!
//! 引数ごとに以下の優先順位で値を決定します（上が優先）:
//! 1. `--build-arg NAME=VALUE`
//! 2. `--build-arg NAME` → プロセス環境変数 `NAME`
//! 3. マニフェストの宣言値（値なし宣言は環境変数から継承）

use crate::env::Environment;
use crate::error::{BuildError, Result};
use crate::unit::BuildArgSet;
use berth_core::BuildArgDecl;
use std::collections::{BTreeMap, BTreeSet};
use std::convert::Infallible;
use std::str::FromStr;

/// コマンドラインの `--build-arg`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliBuildArg {
    pub name: String,
    pub value: Option<String>,
}

impl CliBuildArg {
    /// `NAME=VALUE` または `NAME`
    pub fn parse(spec: &str) -> Self {
        match spec.split_once('=') {
            Some((name, value)) => Self {
                name: name.trim().to_string(),
                value: Some(value.to_string()),
            },
            None => Self {
                name: spec.trim().to_string(),
                value: None,
            },
        }
    }
}

impl FromStr for CliBuildArg {
    type Err = Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

pub struct BuildArgResolver;

impl BuildArgResolver {
    /// サービスのビルド引数を解決
    ///
    /// 各引数は独立して最も優先度の高い値を採用する。どの層からも値が得られない
    /// 引数は結果に含めない（`required` 宣言の場合のみエラー）。
    pub fn resolve(
        service: &str,
        declared: &BTreeMap<String, BuildArgDecl>,
        cli: &[CliBuildArg],
        env: &Environment,
    ) -> Result<BuildArgSet> {
        // 同名の --build-arg は後勝ち
        let cli: BTreeMap<&str, Option<&str>> = cli
            .iter()
            .filter(|arg| !arg.name.is_empty())
            .map(|arg| (arg.name.as_str(), arg.value.as_deref()))
            .collect();

        let names: BTreeSet<&str> = declared
            .keys()
            .map(String::as_str)
            .chain(cli.keys().copied())
            .collect();

        let mut resolved = BuildArgSet::new();
        for name in names {
            let from_cli = match cli.get(name) {
                Some(Some(value)) => Some(value.to_string()),
                Some(None) => env.get(name).map(str::to_string),
                None => None,
            };

            let decl = declared.get(name);
            let from_manifest = decl.and_then(|decl| match &decl.value {
                Some(value) => Some(value.clone()),
                None => env.get(name).map(str::to_string),
            });

            match from_cli.or(from_manifest) {
                Some(value) => {
                    Self::validate_build_arg(name);
                    resolved.insert(name.to_string(), value);
                }
                None if decl.is_some_and(|d| d.required) => {
                    return Err(BuildError::MissingBuildArg {
                        service: service.to_string(),
                        name: name.to_string(),
                    });
                }
                None => {
                    tracing::debug!("Build arg '{}' for '{}' has no value, omitted", name, service);
                }
            }
        }

        Ok(resolved)
    }

    /// ビルド引数の検証（機密情報の警告）
    fn validate_build_arg(key: &str) {
        let sensitive_patterns = ["password", "token", "secret", "api_key", "private_key"];

        let key_lower = key.to_lowercase();
        if sensitive_patterns.iter().any(|p| key_lower.contains(p)) {
            tracing::warn!(
                "ビルド引数 '{}' は機密情報を含む可能性があります。\
                 ビルド引数はイメージ履歴に記録されるため、シークレットマウントを使用してください。",
                key
            );
        }
    }
}
