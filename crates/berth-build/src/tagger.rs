//! イメージ名の決定とビルド後のタグ付け

use crate::backend::BuiltImage;
use crate::error::{BuildError, Result};
use crate::store::ImageStore;
use crate::unit::BuildUnit;
use berth_core::NamingConvention;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// プロジェクト名をイメージ名に使える形へ正規化
///
/// 小文字化し、`[a-z0-9_-]` 以外の文字を取り除く。
pub fn normalize_project_name(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '_' || *c == '-')
        .collect()
}

/// サービスの最終イメージ名
///
/// 明示的な `image` があればそれを使い、無ければ `<project>_<service>`（命名規則により `-`）。
pub fn image_name(
    project: &str,
    service: &str,
    explicit: Option<&str>,
    convention: NamingConvention,
) -> String {
    match explicit {
        Some(image) if !image.trim().is_empty() => image.trim().to_string(),
        _ => format!(
            "{}{}{}",
            normalize_project_name(project),
            convention.separator(),
            service
        ),
    }
}

/// プロジェクトのイメージ名前空間を管理するタガー
pub struct ImageTagger<S> {
    store: Arc<S>,
    /// イメージ名 → 所有サービス
    claims: Mutex<HashMap<String, String>>,
}

impl<S: ImageStore> ImageTagger<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            claims: Mutex::new(HashMap::new()),
        }
    }

    /// イメージ名をサービスに割り当てる
    ///
    /// 同じサービスによる再割り当ては何もしない。
    pub fn claim(&self, image: &str, service: &str) -> Result<()> {
        let mut claims = self
            .claims
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        match claims.get(image) {
            Some(owner) if owner != service => Err(BuildError::DuplicateImageName {
                image: image.to_string(),
                first: owner.clone(),
                second: service.to_string(),
            }),
            Some(_) => Ok(()),
            None => {
                claims.insert(image.to_string(), service.to_string());
                Ok(())
            }
        }
    }

    /// ユニットのイメージ名を確定させる
    ///
    /// ビルド結果のIDが名前と異なる場合はタグを付け、最後に名前で検査できることを確認する。
    /// `built` が `None`（ビルド省略）の場合は検査のみ行う。
    pub async fn commit(&self, unit: &BuildUnit, built: Option<&BuiltImage>) -> Result<String> {
        self.claim(&unit.image, &unit.service)?;

        if let Some(built) = built.filter(|b| b.id != unit.image) {
            self.store.tag(&built.id, &unit.image).await?;
        }

        if !self.store.exists(&unit.image).await? {
            return Err(BuildError::ImageNotFound(unit.image.clone()));
        }

        tracing::debug!("Committed image {} for '{}'", unit.image, unit.service);
        Ok(unit.image.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_project_name() {
        assert_eq!(normalize_project_name("My.Project 2"), "myproject2");
        assert_eq!(normalize_project_name("compose_build-e2e"), "compose_build-e2e");
    }

    #[test]
    fn test_default_image_name() {
        assert_eq!(
            image_name("Demo", "web", None, NamingConvention::Underscore),
            "demo_web"
        );
        assert_eq!(
            image_name("Demo", "web", None, NamingConvention::Hyphen),
            "demo-web"
        );
    }

    #[test]
    fn test_explicit_image_name_overrides() {
        assert_eq!(
            image_name("demo", "web", Some("custom-web"), NamingConvention::Underscore),
            "custom-web"
        );
        assert_eq!(
            image_name("demo", "web", Some("  "), NamingConvention::Underscore),
            "demo_web"
        );
    }
}
