//! 再ビルド要否の判定

use crate::digest::ContextDigest;
use crate::unit::BuildUnit;
use std::collections::HashMap;
use std::fmt;

/// 前回成功したビルドのダイジェスト（イメージ名 → ダイジェスト）
///
/// 実行ごとにイメージストアのラベルから組み立てる。
#[derive(Debug, Clone, Default)]
pub struct PriorBuildIndex {
    digests: HashMap<String, ContextDigest>,
}

impl PriorBuildIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, image: impl Into<String>, digest: ContextDigest) {
        self.digests.insert(image.into(), digest);
    }

    pub fn get(&self, image: &str) -> Option<&ContextDigest> {
        self.digests.get(image)
    }

    pub fn len(&self) -> usize {
        self.digests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.digests.is_empty()
    }
}

/// 判定結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildDecision {
    /// `--build` / `--no-cache` 指定
    Forced,
    NoPriorBuild,
    DigestChanged,
    UpToDate,
}

impl RebuildDecision {
    pub fn needs_rebuild(&self) -> bool {
        !matches!(self, RebuildDecision::UpToDate)
    }
}

impl fmt::Display for RebuildDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            RebuildDecision::Forced => "forced",
            RebuildDecision::NoPriorBuild => "no previous build",
            RebuildDecision::DigestChanged => "inputs changed",
            RebuildDecision::UpToDate => "up to date",
        };
        f.write_str(reason)
    }
}

pub struct ChangeDetector;

impl ChangeDetector {
    pub fn decide(unit: &BuildUnit, index: &PriorBuildIndex, force: bool) -> RebuildDecision {
        if force {
            return RebuildDecision::Forced;
        }
        match index.get(&unit.image) {
            None => RebuildDecision::NoPriorBuild,
            Some(prior) if *prior != unit.digest => RebuildDecision::DigestChanged,
            Some(_) => RebuildDecision::UpToDate,
        }
    }

    pub fn needs_rebuild(unit: &BuildUnit, index: &PriorBuildIndex, force: bool) -> bool {
        Self::decide(unit, index, force).needs_rebuild()
    }
}
