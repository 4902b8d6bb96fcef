use crate::sink::OutputSink;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// 端末向けのビルド進捗表示
///
/// ユニットごとにスピナーを表示し、最新のビルドログ行をメッセージに出す。
/// ログ行はスピナーの上に残る。
pub struct BuildProgress {
    multi: MultiProgress,
    bars: Mutex<HashMap<String, ProgressBar>>,
}

impl BuildProgress {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            bars: Mutex::new(HashMap::new()),
        }
    }

    fn style() -> ProgressStyle {
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {prefix:.bold} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
    }

    fn with_bar(&self, service: &str, f: impl FnOnce(&ProgressBar)) {
        let bars = self.bars.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(pb) = bars.get(service) {
            f(pb);
        }
    }
}

impl Default for BuildProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputSink for BuildProgress {
    fn unit_started(&self, service: &str, _image: &str) {
        let pb = self.multi.add(ProgressBar::new_spinner());
        pb.set_style(Self::style());
        pb.set_prefix(service.to_string());
        pb.set_message(format!("Building {}...", service));
        pb.enable_steady_tick(Duration::from_millis(120));

        self.bars
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(service.to_string(), pb);
    }

    fn line(&self, service: &str, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        self.with_bar(service, |pb| pb.set_message(line.to_string()));
        if let Err(e) = self.multi.println(format!("{} | {}", service, line)) {
            tracing::debug!("Failed to print build log line: {}", e);
        }
    }

    fn unit_finished(&self, service: &str, success: bool) {
        self.with_bar(service, |pb| {
            if success {
                pb.finish_with_message("Build completed ✓");
            } else {
                pb.finish_with_message("Build failed ✗");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_lifecycle() {
        let progress = BuildProgress::new();
        progress.multi.set_draw_target(indicatif::ProgressDrawTarget::hidden());

        progress.unit_started("web", "demo_web");
        progress.line("web", "#5 [2/2] COPY static /usr/share/nginx/html");
        progress.line("unknown", "ignored");
        progress.unit_finished("web", true);

        let bars = progress.bars.lock().unwrap();
        assert!(bars["web"].is_finished());
    }

    #[test]
    fn test_log_lines_persist_after_finish() {
        let term = indicatif::InMemoryTerm::new(10, 80);
        let progress = BuildProgress::new();
        progress
            .multi
            .set_draw_target(indicatif::ProgressDrawTarget::term_like(Box::new(term.clone())));

        progress.unit_started("web", "demo_web");
        progress.line("web", "#5 [2/2] COPY static");
        progress.line("web", "#6 exporting to image");
        progress.unit_finished("web", true);

        let contents = term.contents();
        assert!(contents.contains("web | #5 [2/2] COPY static"));
        assert!(contents.contains("web | #6 exporting to image"));
    }
}
