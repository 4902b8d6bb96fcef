//! シークレットマウントの解決

use crate::error::{BuildError, Result};
use crate::unit::SecretMount;
use berth_core::SecretSpec;
use std::collections::BTreeMap;
use std::fs::File;

pub struct SecretResolver;

impl SecretResolver {
    /// 宣言されたシークレットをマウント元ファイルに解決
    ///
    /// 内容は読まず、ファイルが開けることだけを確認する。同じIDは後勝ち。
    pub fn resolve(declared: &[SecretSpec]) -> Result<Vec<SecretMount>> {
        let mut mounts: BTreeMap<&str, &SecretSpec> = BTreeMap::new();
        for spec in declared {
            mounts.insert(spec.id.as_str(), spec);
        }

        mounts
            .into_values()
            .map(|spec| {
                let readable = spec.file.is_file() && File::open(&spec.file).is_ok();
                if !readable {
                    return Err(BuildError::SecretNotFound {
                        id: spec.id.clone(),
                        path: spec.file.clone(),
                    });
                }
                Ok(SecretMount {
                    id: spec.id.clone(),
                    source: spec.file.clone(),
                })
            })
            .collect()
    }
}
