//! `docker buildx build` を使うバックエンド

use super::{
    BackendFailure, BackendRequest, BuildBackend, BuiltImage, DEFAULT_FAILURE_EXIT_CODE,
    FailureCategory, unresolved_forward_key,
};
use crate::sink::OutputSink;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;

/// BuildKit（`docker buildx`）バックエンド
///
/// SSHフォワードとシークレットマウントに対応する。
#[derive(Debug, Clone)]
pub struct BuildxBackend {
    program: PathBuf,
}

impl Default for BuildxBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl BuildxBackend {
    pub fn new() -> Self {
        Self::with_program("docker")
    }

    /// 実行する docker CLI を指定
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// `docker` に渡す引数
    pub fn command_args(request: &BackendRequest<'_>, iidfile: &Path) -> Vec<OsString> {
        let unit = request.unit;
        let mut args: Vec<OsString> = vec![
            "buildx".into(),
            "build".into(),
            "--progress".into(),
            "plain".into(),
            "--load".into(),
            "-t".into(),
            unit.image.clone().into(),
            "-f".into(),
            unit.dockerfile.clone().into(),
        ];

        if let Some(target) = &unit.target {
            args.push("--target".into());
            args.push(target.into());
        }
        if request.no_cache {
            args.push("--no-cache".into());
        }

        for (name, value) in &unit.args {
            args.push("--build-arg".into());
            args.push(format!("{}={}", name, value).into());
        }
        for forward in &unit.forwards {
            let mut spec = OsString::from(format!("{}=", forward.id));
            spec.push(&forward.socket);
            args.push("--ssh".into());
            args.push(spec);
        }
        for secret in &unit.secrets {
            let mut spec = OsString::from(format!("id={},src=", secret.id));
            spec.push(&secret.source);
            args.push("--secret".into());
            args.push(spec);
        }
        for (key, value) in request.labels() {
            args.push("--label".into());
            args.push(format!("{}={}", key, value).into());
        }

        args.push("--iidfile".into());
        args.push(iidfile.into());
        args.push(unit.context.clone().into());
        args
    }

    /// stderr の内容から失敗を分類
    pub fn classify(stderr: &[String], exit_code: Option<i32>) -> BackendFailure {
        let exit_code = match exit_code {
            Some(code) if code > 1 => code,
            _ => DEFAULT_FAILURE_EXIT_CODE,
        };

        let error_line = stderr
            .iter()
            .rev()
            .find(|line| line.contains("ERROR:") || line.contains("failed to solve"))
            .or_else(|| stderr.iter().rev().find(|line| !line.trim().is_empty()));
        let message = error_line
            .map(|line| clean_error_line(line))
            .unwrap_or_else(|| "build failed".to_string());

        let category = match stderr.iter().find_map(|line| unresolved_forward_key(line)) {
            Some(key) => FailureCategory::UnresolvedForwardKey(key),
            None => FailureCategory::Solve,
        };

        BackendFailure {
            category,
            message,
            exit_code,
        }
    }
}

/// `ERROR: failed to solve: ...` から本文だけを取り出す
fn clean_error_line(line: &str) -> String {
    let mut message = line.trim();
    if let Some(pos) = message.find("ERROR:") {
        message = message[pos + "ERROR:".len()..].trim_start();
    }
    message
        .strip_prefix("failed to solve:")
        .unwrap_or(message)
        .trim()
        .to_string()
}

/// 1行ずつ sink に流し、必要なら保持する
///
/// UTF-8 でない行も置換文字に変換して流す。途中で読むのをやめるとパイプが閉じ、
/// docker 側が SIGPIPE で終了してしまうため、EOF まで読み切る。
async fn pump<R: AsyncRead + Unpin>(
    reader: R,
    service: &str,
    sink: &dyn OutputSink,
    keep: bool,
) -> Vec<String> {
    let mut kept = Vec::new();
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("Failed to read build output of {}: {}", service, e);
                break;
            }
        }

        let line = String::from_utf8_lossy(&buf);
        let line = line.trim_end_matches(['\n', '\r']);
        sink.line(service, line);
        if keep {
            kept.push(line.to_string());
        }
    }
    kept
}

impl BuildBackend for BuildxBackend {
    fn name(&self) -> &'static str {
        "buildx"
    }

    async fn build(
        &self,
        request: BackendRequest<'_>,
        sink: Arc<dyn OutputSink>,
    ) -> Result<BuiltImage, BackendFailure> {
        let unit = request.unit;
        let iidfile = tempfile::NamedTempFile::new()
            .map_err(|e| BackendFailure::connection(format!("failed to create iidfile: {}", e)))?;

        let mut cmd = Command::new(&self.program);
        cmd.args(Self::command_args(&request, iidfile.path()));
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        tracing::debug!(
            "Running: {} buildx build -t {} {}",
            self.program.display(),
            unit.image,
            unit.context.display()
        );

        let mut child = cmd.spawn().map_err(|e| {
            BackendFailure::connection(format!(
                "failed to run {}: {}",
                self.program.display(),
                e
            ))
        })?;

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            return Err(BackendFailure::connection("build output is not captured"));
        };

        let (_, stderr_lines) = tokio::join!(
            pump(stdout, &unit.service, sink.as_ref(), false),
            pump(stderr, &unit.service, sink.as_ref(), true),
        );

        let status = child
            .wait()
            .await
            .map_err(|e| BackendFailure::connection(e.to_string()))?;

        if !status.success() {
            return Err(Self::classify(&stderr_lines, status.code()));
        }

        let id = tokio::fs::read_to_string(iidfile.path())
            .await
            .map(|s| s.trim().to_string())
            .unwrap_or_default();
        let id = if id.is_empty() { unit.image.clone() } else { id };

        Ok(BuiltImage { id })
    }
}
