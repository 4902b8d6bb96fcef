use berth_build::{
    BackendFailure, BackendRequest, BuildBackend, BuildUnit, BuiltImage, ContextDigest,
    ImageStore, OutputSink,
};
use berth_core::Project;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

pub struct TestProject {
    pub root: TempDir,
}

impl TestProject {
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        Self { root }
    }

    pub fn write_compose(&self, content: &str) {
        fs::write(self.root.path().join("compose.yaml"), content).unwrap();
    }

    /// `<root>/<service>/Dockerfile` を作成
    pub fn write_dockerfile(&self, service: &str, content: &str) {
        let dir = self.root.path().join(service);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("Dockerfile"), content).unwrap();
    }

    #[allow(dead_code)]
    pub fn write_file(&self, relative: &str, content: &str) {
        let path = self.root.path().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    pub fn path(&self) -> PathBuf {
        self.root.path().to_path_buf()
    }

    pub fn load(&self) -> Project {
        berth_core::load_project(&self.path().join("compose.yaml"), &self.path(), "demo").unwrap()
    }
}

/// バックエンドとイメージストアで共有する疑似Dockerデーモン
#[derive(Default)]
pub struct FakeDocker {
    /// イメージ参照 → 記録されたダイジェスト
    pub images: Mutex<HashMap<String, ContextDigest>>,
    /// バックエンドに渡されたユニット（呼び出し順）
    pub requests: Mutex<Vec<BuildUnit>>,
    /// 失敗させるサービス
    pub failures: Mutex<HashMap<String, BackendFailure>>,
    /// サービスごとに出力する行
    pub output: Mutex<HashMap<String, Vec<String>>>,
    pub no_cache_calls: AtomicUsize,
    running: AtomicUsize,
    pub peak: AtomicUsize,
}

impl FakeDocker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn build_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn built_services(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|u| u.service.clone())
            .collect()
    }

    #[allow(dead_code)]
    pub fn fail(&self, service: &str, failure: BackendFailure) {
        self.failures
            .lock()
            .unwrap()
            .insert(service.to_string(), failure);
    }

    #[allow(dead_code)]
    pub fn emit(&self, service: &str, lines: &[&str]) {
        self.output.lock().unwrap().insert(
            service.to_string(),
            lines.iter().map(|l| l.to_string()).collect(),
        );
    }

    pub fn has_image(&self, image: &str) -> bool {
        self.images.lock().unwrap().contains_key(image)
    }
}

pub struct FakeBackend {
    pub docker: Arc<FakeDocker>,
}

impl BuildBackend for FakeBackend {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn build(
        &self,
        request: BackendRequest<'_>,
        sink: Arc<dyn OutputSink>,
    ) -> Result<BuiltImage, BackendFailure> {
        let unit = request.unit;
        self.docker.requests.lock().unwrap().push(unit.clone());
        if request.no_cache {
            self.docker.no_cache_calls.fetch_add(1, Ordering::SeqCst);
        }

        let now = self.docker.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.docker.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.docker.running.fetch_sub(1, Ordering::SeqCst);

        let lines = self
            .docker
            .output
            .lock()
            .unwrap()
            .get(&unit.service)
            .cloned()
            .unwrap_or_default();
        for line in lines {
            sink.line(&unit.service, &line);
        }

        if let Some(failure) = self.docker.failures.lock().unwrap().get(&unit.service) {
            return Err(failure.clone());
        }

        // docker build -t と同様に、IDと名前の両方で参照できるようにする
        let id = format!("sha256:{}", unit.digest.to_hex());
        let mut images = self.docker.images.lock().unwrap();
        images.insert(id.clone(), unit.digest);
        images.insert(unit.image.clone(), unit.digest);
        Ok(BuiltImage { id })
    }
}

pub struct FakeStore {
    pub docker: Arc<FakeDocker>,
}

impl ImageStore for FakeStore {
    async fn exists(&self, image: &str) -> berth_build::Result<bool> {
        Ok(self.docker.has_image(image))
    }

    async fn recorded_digest(&self, image: &str) -> berth_build::Result<Option<ContextDigest>> {
        Ok(self.docker.images.lock().unwrap().get(image).copied())
    }

    async fn tag(&self, source: &str, target: &str) -> berth_build::Result<()> {
        let mut images = self.docker.images.lock().unwrap();
        let digest = images
            .get(source)
            .copied()
            .ok_or_else(|| berth_build::BuildError::ImageNotFound(source.to_string()))?;
        images.insert(target.to_string(), digest);
        Ok(())
    }

    async fn remove(&self, image: &str) -> berth_build::Result<()> {
        self.docker.images.lock().unwrap().remove(image);
        Ok(())
    }
}

/// 受け取った行を記録する
#[derive(Default)]
pub struct CaptureSink {
    pub lines: Mutex<Vec<(String, String)>>,
}

impl CaptureSink {
    #[allow(dead_code)]
    pub fn lines_for(&self, service: &str) -> Vec<String> {
        self.lines
            .lock()
            .unwrap()
            .iter()
            .filter(|(s, _)| s == service)
            .map(|(_, l)| l.clone())
            .collect()
    }
}

impl OutputSink for CaptureSink {
    fn line(&self, service: &str, line: &str) {
        self.lines
            .lock()
            .unwrap()
            .push((service.to_string(), line.to_string()));
    }
}
