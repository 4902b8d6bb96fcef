//! ビルドコンテキストの走査とアーカイブ作成

use crate::error::{BuildError, Result};
use flate2::Compression;
use flate2::write::GzEncoder;
use glob::{MatchOptions, Pattern};
use std::fs;
use std::path::{Path, PathBuf};
use tar::Builder;
use walkdir::WalkDir;

/// アーカイブ内に配置するDockerfileの名前
///
/// コンテキスト内の同名ファイルと衝突しないよう専用名を使う。
pub const ARCHIVED_DOCKERFILE: &str = ".berth.Dockerfile";

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// `.dockerignore` のルール
#[derive(Debug, Default)]
pub struct DockerIgnore {
    rules: Vec<IgnoreRule>,
}

#[derive(Debug)]
struct IgnoreRule {
    pattern: Pattern,
    /// `/` 区切りの各要素（ディレクトリ単位の判定用）
    segments: Vec<String>,
    negated: bool,
}

impl DockerIgnore {
    /// コンテキスト直下の `.dockerignore` を読み込む（無ければ空）
    pub fn load(context: &Path) -> Result<Self> {
        let path = context.join(".dockerignore");
        if !path.is_file() {
            return Ok(Self::default());
        }
        Ok(Self::parse(&fs::read_to_string(path)?))
    }

    pub fn parse(content: &str) -> Self {
        let rules = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(|line| {
                let (negated, raw) = match line.strip_prefix('!') {
                    Some(rest) => (true, rest.trim()),
                    None => (false, line),
                };
                let raw = raw.trim_start_matches("./").trim_matches('/');
                match Pattern::new(raw) {
                    Ok(pattern) => Some(IgnoreRule {
                        pattern,
                        segments: raw.split('/').map(str::to_string).collect(),
                        negated,
                    }),
                    Err(e) => {
                        tracing::warn!("Ignoring invalid .dockerignore pattern '{}': {}", line, e);
                        None
                    }
                }
            })
            .collect();
        Self { rules }
    }

    /// コンテキスト相対パスが除外対象か
    ///
    /// ディレクトリにマッチしたルールは配下全体に効く。最後にマッチしたルールが勝つ。
    pub fn is_ignored(&self, rel: &Path) -> bool {
        let mut ignored = false;
        for rule in &self.rules {
            let matched = rel
                .ancestors()
                .filter(|p| !p.as_os_str().is_empty())
                .any(|p| rule.pattern.matches_path_with(p, MATCH_OPTIONS));
            if matched {
                ignored = !rule.negated;
            }
        }
        ignored
    }

    /// 除外されたディレクトリの配下を否定ルールが再び含める可能性があるか
    ///
    /// これが偽のディレクトリだけを走査から外せる。
    pub fn may_reinclude(&self, dir: &Path) -> bool {
        let components: Vec<String> = dir
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();

        self.rules.iter().filter(|rule| rule.negated).any(|rule| {
            if rule.segments.iter().any(|s| s.contains("**")) {
                return true;
            }
            rule.segments.len() > components.len()
                && components.iter().zip(&rule.segments).all(|(component, segment)| {
                    Pattern::new(segment)
                        .map(|p| p.matches_with(component, MATCH_OPTIONS))
                        .unwrap_or(false)
                })
        })
    }
}

/// コンテキスト内のファイル
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextEntry {
    /// コンテキスト相対パス
    pub relative: PathBuf,
    pub absolute: PathBuf,
}

/// コンテキスト内の対象ファイルを相対パス順に列挙
///
/// `.git` と `.dockerignore` で除外されたパスは含まない。
pub fn walk_context(context: &Path) -> Result<Vec<ContextEntry>> {
    if !context.is_dir() {
        return Err(BuildError::ContextNotFound(context.to_path_buf()));
    }

    let ignore = DockerIgnore::load(context)?;
    let relative = |path: &Path| path.strip_prefix(context).map(Path::to_path_buf);

    let walker = WalkDir::new(context)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| match relative(entry.path()) {
            Ok(rel) if rel.as_os_str().is_empty() => true,
            Ok(rel) if rel == Path::new(".git") => false,
            // 配下が再び含まれうるディレクトリは降りて、ファイル単位で判定する
            Ok(rel) if entry.file_type().is_dir() => {
                !ignore.is_ignored(&rel) || ignore.may_reinclude(&rel)
            }
            Ok(rel) => !ignore.is_ignored(&rel),
            Err(_) => false,
        });

    let mut entries = Vec::new();
    for entry in walker {
        let entry = entry.map_err(|e| BuildError::Io(e.into()))?;
        if entry.file_type().is_dir() {
            continue;
        }
        if let Ok(rel) = relative(entry.path()) {
            entries.push(ContextEntry {
                relative: rel,
                absolute: entry.path().to_path_buf(),
            });
        }
    }

    // sort_by_file_name は階層ごとの順序なので全体で並べ直す
    entries.sort_by(|a, b| a.relative.cmp(&b.relative));
    Ok(entries)
}

pub struct ContextBuilder;

impl ContextBuilder {
    /// ビルドコンテキストをtar.gzアーカイブとして作成
    ///
    /// Dockerfileは [`ARCHIVED_DOCKERFILE`] として追加される。
    pub fn create_context(context_path: &Path, dockerfile_path: &Path) -> Result<Vec<u8>> {
        tracing::debug!("Creating build context from: {}", context_path.display());

        let entries = walk_context(context_path)?;
        let dockerfile_content = fs::read(dockerfile_path)
            .map_err(|_| BuildError::DockerfileNotFound(dockerfile_path.to_path_buf()))?;

        let mut archive_data = Vec::new();
        {
            let encoder = GzEncoder::new(&mut archive_data, Compression::default());
            let mut tar = Builder::new(encoder);
            tar.follow_symlinks(false);

            for entry in &entries {
                tar.append_path_with_name(&entry.absolute, &entry.relative)?;
            }

            let mut header = tar::Header::new_gnu();
            header.set_size(dockerfile_content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            tar.append_data(&mut header, ARCHIVED_DOCKERFILE, &dockerfile_content[..])?;

            tar.into_inner()?.finish()?;
        }

        tracing::debug!("Build context created: {} bytes", archive_data.len());

        Self::check_context_size(archive_data.len());

        Ok(archive_data)
    }

    /// コンテキストサイズのチェックと警告
    fn check_context_size(size: usize) {
        const MAX_CONTEXT_SIZE: usize = 500 * 1024 * 1024; // 500MB

        if size > MAX_CONTEXT_SIZE {
            tracing::warn!(
                "警告: ビルドコンテキストが大きすぎます（{}MB）\n\
                 .dockerignoreファイルで不要なファイルを除外することを推奨します。",
                size / 1024 / 1024
            );
        }
    }
}
