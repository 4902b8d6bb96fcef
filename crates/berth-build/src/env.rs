//! ビルド時に参照する環境変数のスナップショット

use std::collections::HashMap;

/// プロセス環境変数のスナップショット
///
/// リゾルバは純粋関数として扱うため、`std::env` を直接参照せずこの値を受け取る。
#[derive(Debug, Clone, Default)]
pub struct Environment {
    vars: HashMap<String, String>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    /// 現在のプロセス環境から作成
    ///
    /// 名前か値が UTF-8 でない変数は参照できないため含めない。
    pub fn from_process() -> Self {
        std::env::vars_os()
            .filter_map(|(name, value)| match (name.into_string(), value.into_string()) {
                (Ok(name), Ok(value)) => Some((name, value)),
                (name, _) => {
                    tracing::debug!(
                        "Skipping non UTF-8 environment variable: {}",
                        name.map_or_else(|n| n.to_string_lossy().into_owned(), |n| n)
                    );
                    None
                }
            })
            .collect()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Environment {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            vars: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}
