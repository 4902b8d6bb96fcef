//! ビルド入力のフィンガープリント

use crate::context::walk_context;
use crate::error::Result;
use crate::unit::{BuildArgSet, SecretMount};
use std::fmt;
use std::fs;
use std::path::Path;

/// ビルド入力のblake3ダイジェスト
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextDigest([u8; 32]);

impl ContextDigest {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn to_hex(&self) -> String {
        blake3::Hash::from_bytes(self.0).to_hex().to_string()
    }

    /// 16進表記からパース（イメージラベルの読み戻し用）
    pub fn from_hex(hex: &str) -> Option<Self> {
        blake3::Hash::from_hex(hex.trim())
            .ok()
            .map(|hash| Self(*hash.as_bytes()))
    }
}

impl fmt::Display for ContextDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ContextDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContextDigest({})", &self.to_hex()[..12])
    }
}

/// ダイジェストの入力
///
/// SSHソケットやシークレットの中身は含めない。
pub struct DigestInput<'a> {
    pub context: &'a Path,
    pub dockerfile: &'a [u8],
    pub args: &'a BuildArgSet,
    pub secrets: &'a [SecretMount],
    pub target: Option<&'a str>,
    /// カスケード時のみ依存ユニットのダイジェストを渡す
    pub dependencies: &'a [ContextDigest],
}

impl ContextDigest {
    /// ビルド入力からダイジェストを計算
    pub fn compute(input: &DigestInput<'_>) -> Result<Self> {
        let mut hasher = Hasher::default();

        for entry in walk_context(input.context)? {
            hasher.field(b"path", entry.relative.to_string_lossy().as_bytes());
            let metadata = fs::symlink_metadata(&entry.absolute)?;
            if metadata.file_type().is_symlink() {
                let target = fs::read_link(&entry.absolute)?;
                hasher.field(b"link", target.to_string_lossy().as_bytes());
            } else {
                hasher.file(&entry.absolute, metadata.len())?;
            }
        }

        hasher.field(b"dockerfile", input.dockerfile);

        for (name, value) in input.args {
            hasher.field(b"arg", name.as_bytes());
            hasher.field(b"value", value.as_bytes());
        }

        let mut secrets: Vec<_> = input.secrets.iter().collect();
        secrets.sort_by(|a, b| a.id.cmp(&b.id));
        for secret in secrets {
            hasher.field(b"secret", secret.id.as_bytes());
            hasher.field(b"src", secret.source.to_string_lossy().as_bytes());
        }

        let dockerfile = String::from_utf8_lossy(input.dockerfile);
        for image in base_images(&dockerfile) {
            hasher.field(b"from", image.as_bytes());
        }

        hasher.field(b"target", input.target.unwrap_or("").as_bytes());

        for dep in input.dependencies {
            hasher.field(b"dep", &dep.0);
        }

        Ok(hasher.finish())
    }
}

/// 長さ付きで書き込み、フィールド境界の曖昧さを無くす
#[derive(Default)]
struct Hasher(blake3::Hasher);

impl Hasher {
    fn field(&mut self, tag: &[u8], value: &[u8]) {
        self.0.update(&(tag.len() as u64).to_le_bytes());
        self.0.update(tag);
        self.0.update(&(value.len() as u64).to_le_bytes());
        self.0.update(value);
    }

    /// ファイル内容をメモリに載せずに書き込む
    fn file(&mut self, path: &Path, len: u64) -> std::io::Result<()> {
        let tag = b"file";
        self.0.update(&(tag.len() as u64).to_le_bytes());
        self.0.update(tag);
        self.0.update(&len.to_le_bytes());
        self.0.update_reader(fs::File::open(path)?)?;
        Ok(())
    }

    fn finish(self) -> ContextDigest {
        ContextDigest(*self.0.finalize().as_bytes())
    }
}

/// Dockerfileの `FROM` が参照する外部イメージを出現順に返す
///
/// 先行ステージ名と `scratch` は除外する。
pub fn base_images(dockerfile: &str) -> Vec<String> {
    let mut stages: Vec<String> = Vec::new();
    let mut images: Vec<String> = Vec::new();

    for line in dockerfile.lines() {
        let line = line.trim();
        let Some((keyword, rest)) = line.split_once(char::is_whitespace) else {
            continue;
        };
        if !keyword.eq_ignore_ascii_case("FROM") {
            continue;
        }

        let mut tokens = rest.split_whitespace().filter(|t| !t.starts_with("--"));
        let Some(image) = tokens.next() else {
            continue;
        };

        let is_stage = stages.iter().any(|s| s.eq_ignore_ascii_case(image));
        if !is_stage && !image.eq_ignore_ascii_case("scratch") && !images.iter().any(|i| i == image)
        {
            images.push(image.to_string());
        }

        match (tokens.next(), tokens.next()) {
            (Some(kw), Some(name)) if kw.eq_ignore_ascii_case("AS") => {
                stages.push(name.to_string());
            }
            _ => {}
        }
    }

    images
}
