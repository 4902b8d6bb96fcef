//! ビルドログの出力先

use colored::Colorize;
use std::io::Write;

/// ユニットごとのビルド出力を受け取る
///
/// 同一ユニットの行はバックエンドが出力した順に届く。並行ユニット間の順序は保証しない。
pub trait OutputSink: Send + Sync {
    fn unit_started(&self, _service: &str, _image: &str) {}

    fn line(&self, service: &str, line: &str);

    fn unit_finished(&self, _service: &str, _success: bool) {}
}

/// 標準出力へ `service | line` 形式で書き出す
#[derive(Debug, Default)]
pub struct ConsoleSink;

impl ConsoleSink {
    pub fn new() -> Self {
        Self
    }
}

impl OutputSink for ConsoleSink {
    fn unit_started(&self, service: &str, image: &str) {
        println!(
            "{} {} {}",
            "▶".green(),
            format!("{} をビルド中", service).bold(),
            format!("({})", image).dimmed()
        );
    }

    fn line(&self, service: &str, line: &str) {
        // 並行ユニットの行が途中で混ざらないよう1行ずつロックして書く
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        writeln!(out, "{} {}", format!("{} |", service).cyan(), line).ok();
    }

    fn unit_finished(&self, service: &str, success: bool) {
        if success {
            println!("  {} {} ビルド完了", "✓".green(), service);
        } else {
            println!("  {} {} ビルド失敗", "✗".red(), service);
        }
    }
}

/// 何も出力しない
#[derive(Debug, Default)]
pub struct NullSink;

impl OutputSink for NullSink {
    fn line(&self, _service: &str, _line: &str) {}
}
