//! ビルド結果

use crate::error::{BuildError, PREFLIGHT_EXIT_CODE};

/// ユニットの最終状態
#[derive(Debug)]
pub enum UnitStatus {
    Built,
    /// 入力に変更がなくビルドを省略した
    UpToDate,
    SkippedDueToDependencyFailure {
        dependency: String,
    },
    /// fail-fast により開始されなかった
    NotStarted,
    Failed(BuildError),
}

#[derive(Debug)]
pub struct BuildResult {
    pub service: String,
    pub image: String,
    pub status: UnitStatus,
}

impl BuildResult {
    pub fn is_success(&self) -> bool {
        matches!(self.status, UnitStatus::Built | UnitStatus::UpToDate)
    }

    pub fn error(&self) -> Option<&BuildError> {
        match &self.status {
            UnitStatus::Failed(err) => Some(err),
            _ => None,
        }
    }
}

/// プラン全体の結果（プラン順）
#[derive(Debug, Default)]
pub struct BuildPlanResult {
    pub results: Vec<BuildResult>,
}

impl BuildPlanResult {
    pub fn new(results: Vec<BuildResult>) -> Self {
        Self { results }
    }

    /// 全ユニットが成功または最新なら0、それ以外は最も重い失敗の終了コード
    ///
    /// バックエンド固有のコードは汎用の1より優先し、同じ重さならプラン順で最初のもの。
    /// スキップされたユニットは終了コードに影響しない。
    pub fn exit_code(&self) -> i32 {
        let codes: Vec<i32> = self
            .failures()
            .filter_map(BuildResult::error)
            .map(BuildError::exit_code)
            .collect();
        codes
            .iter()
            .copied()
            .find(|&code| code != PREFLIGHT_EXIT_CODE)
            .or_else(|| codes.first().copied())
            .unwrap_or(0)
    }

    pub fn is_success(&self) -> bool {
        self.results.iter().all(|r| {
            matches!(r.status, UnitStatus::Built | UnitStatus::UpToDate)
        })
    }

    /// 実際にバックエンドでビルドされたユニット
    pub fn built(&self) -> impl Iterator<Item = &BuildResult> {
        self.results
            .iter()
            .filter(|r| matches!(r.status, UnitStatus::Built))
    }

    pub fn failures(&self) -> impl Iterator<Item = &BuildResult> {
        self.results
            .iter()
            .filter(|r| matches!(r.status, UnitStatus::Failed(_)))
    }

    pub fn get(&self, service: &str) -> Option<&BuildResult> {
        self.results.iter().find(|r| r.service == service)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(service: &str, status: UnitStatus) -> BuildResult {
        BuildResult {
            service: service.to_string(),
            image: format!("demo_{}", service),
            status,
        }
    }

    #[test]
    fn test_exit_code_success() {
        let plan = BuildPlanResult::new(vec![
            result("a", UnitStatus::Built),
            result("b", UnitStatus::UpToDate),
        ]);
        assert_eq!(plan.exit_code(), 0);
        assert!(plan.is_success());
        assert_eq!(plan.built().count(), 1);
    }

    #[test]
    fn test_exit_code_first_failure_in_plan_order() {
        let plan = BuildPlanResult::new(vec![
            result("a", UnitStatus::Built),
            result(
                "b",
                UnitStatus::Failed(BuildError::BackendSolveFailure {
                    service: "b".to_string(),
                    message: "boom".to_string(),
                    exit_code: 17,
                }),
            ),
            result(
                "c",
                UnitStatus::SkippedDueToDependencyFailure {
                    dependency: "b".to_string(),
                },
            ),
            result(
                "d",
                UnitStatus::Failed(BuildError::ImageNotFound("demo_d".to_string())),
            ),
        ]);

        assert_eq!(plan.exit_code(), 17);
        assert!(!plan.is_success());
        assert_eq!(plan.failures().count(), 2);
        assert!(!plan.get("c").unwrap().is_success());
    }

    #[test]
    fn test_exit_code_prefers_backend_code() {
        let plan = BuildPlanResult::new(vec![
            result(
                "a",
                UnitStatus::Failed(BuildError::DuplicateImageName {
                    image: "shared".to_string(),
                    first: "z".to_string(),
                    second: "a".to_string(),
                }),
            ),
            result(
                "b",
                UnitStatus::Failed(BuildError::BackendSolveFailure {
                    service: "b".to_string(),
                    message: "boom".to_string(),
                    exit_code: 17,
                }),
            ),
        ]);
        assert_eq!(plan.exit_code(), 17);

        let plan = BuildPlanResult::new(vec![result(
            "a",
            UnitStatus::Failed(BuildError::ImageNotFound("demo_a".to_string())),
        )]);
        assert_eq!(plan.exit_code(), 1);
    }
}
