//! Integration tests for the artifact pipelines.
//!
//! `gsutil` is faked by a handler that copies between the workspace and a
//! temp directory standing in for the bucket.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use ampci_core::fakes::{RecordingRunner, SharedBuffer};
use ampci_core::{CommandSpec, Reporter};
use ampci_pipeline::{
    ArtifactPipeline, ArtifactPipelineConfig, CdnUrlRewriter, PipelineError, Result, ServeMode,
    UploadOutcome, UploadSignal, UrlRewriter,
};
use async_trait::async_trait;
use build_artifacts::{content_digests, RunId, StorageSecret};

const BUCKET: &str = "gs://amp-travis-builds";
const RUNTIME_PAGE: &str = r#"<script async src="https://cdn.ampproject.org/v0.js"></script>"#;

fn fake_gsutil(bucket_dir: PathBuf) -> impl Fn(&CommandSpec) -> i32 + Send + Sync {
    move |cmd: &CommandSpec| {
        let resolve = |arg: &str| -> PathBuf {
            match arg.strip_prefix(BUCKET) {
                Some(object) => bucket_dir.join(object.trim_start_matches('/')),
                None => PathBuf::from(arg),
            }
        };
        let [_, _, src, dst] = cmd.args.as_slice() else {
            return 2;
        };
        match fs::copy(resolve(src.as_str()), resolve(dst.as_str())) {
            Ok(_) => 0,
            Err(_) => 1,
        }
    }
}

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn seed_dist(root: &Path) {
    write(root, "build/amp.js", "// runtime");
    write(root, "dist/v0.js", "runtime");
    write(root, "dist.3p/current/integration.js", "3p");
    write(root, "EXTENSIONS_CSS_MAP", "{}");
    write(root, "dist.tools/experiments/experiments.js", "experiments");
    write(root, "examples/article.amp.html", RUNTIME_PAGE);
    write(root, "test/manual/amp-bind.amp.html", RUNTIME_PAGE);
}

fn make_pipeline(runner: Arc<RecordingRunner>, workspace: &Path, run_id: &str) -> ArtifactPipeline {
    ArtifactPipeline::new(
        runner,
        ArtifactPipelineConfig::new(workspace, RunId::new(run_id).unwrap()),
        StorageSecret::new("ci-secret"),
        Reporter::with_sink("pipeline_integration.rs:", SharedBuffer::new(), false),
    )
    .unwrap()
}

/// Signal that remembers what it was told.
#[derive(Default)]
struct RecordingSignal(Mutex<Vec<UploadOutcome>>);

impl RecordingSignal {
    fn outcomes(&self) -> Vec<UploadOutcome> {
        self.0.lock().unwrap().clone()
    }
}

#[async_trait]
impl UploadSignal for RecordingSignal {
    async fn notify(&self, outcome: UploadOutcome) -> Result<()> {
        self.0.lock().unwrap().push(outcome);
        Ok(())
    }
}

/// Rewriter that records the directories it was asked to process.
struct OrderedRewriter {
    inner: CdnUrlRewriter,
    seen: Mutex<Vec<String>>,
}

#[async_trait]
impl UrlRewriter for OrderedRewriter {
    async fn rewrite_dir(&self, dir: &Path) -> Result<usize> {
        let name = dir.file_name().unwrap().to_string_lossy().to_string();
        self.seen.lock().unwrap().push(name);
        self.inner.rewrite_dir(dir).await
    }
}

/// Test: pages inside the published dist archive carry rewritten URLs
#[tokio::test]
async fn test_rewrite_happens_before_packing() {
    let bucket = tempfile::tempdir().unwrap();
    let runner = Arc::new(RecordingRunner::new().on("gsutil", fake_gsutil(bucket.path().into())));

    let plain = tempfile::tempdir().unwrap();
    seed_dist(plain.path());
    let plain_report = make_pipeline(runner.clone(), plain.path(), "1")
        .upload_dist_output()
        .await
        .unwrap();

    let processed = tempfile::tempdir().unwrap();
    seed_dist(processed.path());
    let rewriter = OrderedRewriter {
        inner: CdnUrlRewriter::new(ServeMode::Compiled),
        seen: Mutex::default(),
    };
    let signal = RecordingSignal::default();
    let processed_report = make_pipeline(runner.clone(), processed.path(), "2")
        .process_and_upload_dist_output(&rewriter, &signal)
        .await
        .unwrap();

    assert_eq!(*rewriter.seen.lock().unwrap(), vec!["manual", "examples"]);
    assert_eq!(signal.outcomes(), vec![UploadOutcome::Success]);

    let plain_digests = content_digests(&plain_report.archive.path).unwrap();
    let processed_digests = content_digests(&processed_report.archive.path).unwrap();
    for (name, digest) in &plain_digests {
        let rewritten = name.ends_with(".html");
        assert_eq!(
            processed_digests.get(name) != Some(digest),
            rewritten,
            "{name} should {}differ",
            if rewritten { "" } else { "not " }
        );
    }

    let page = fs::read_to_string(processed.path().join("examples/article.amp.html")).unwrap();
    assert!(page.contains(r#"src="/dist/v0.js""#));
}

/// Test: run 1234 writes amp_build_1234.zip and amp_dist_1234.zip to the bucket
#[tokio::test]
async fn test_run_1234_publishes_both_archives() {
    let bucket = tempfile::tempdir().unwrap();
    let runner = Arc::new(RecordingRunner::new().on("gsutil", fake_gsutil(bucket.path().into())));
    let workspace = tempfile::tempdir().unwrap();
    seed_dist(workspace.path());
    let pipeline = make_pipeline(runner.clone(), workspace.path(), "1234");

    let build = pipeline.upload_build_output().await.unwrap();
    let dist = pipeline.upload_dist_output().await.unwrap();
    assert_eq!(build.destination, "gs://amp-travis-builds/amp_build_1234.zip");
    assert_eq!(dist.destination, "gs://amp-travis-builds/amp_dist_1234.zip");
    assert!(bucket.path().join("amp_build_1234.zip").exists());
    assert!(bucket.path().join("amp_dist_1234.zip").exists());

    let fresh = tempfile::tempdir().unwrap();
    let downstream = make_pipeline(runner.clone(), fresh.path(), "1234");
    downstream.download_build_output().await.unwrap();
    let report = downstream.download_dist_output().await.unwrap();
    assert!(report.listing.iter().any(|p| p == "test/manual/amp-bind.amp.html"));
    assert!(fresh.path().join("dist/v0.js").exists());
}

/// Test: a failed copy signals failure and keeps the tool's exit code
#[tokio::test]
async fn test_failed_dist_upload_signals_failure() {
    let runner = Arc::new(RecordingRunner::new().fail_on("gsutil", 1));
    let workspace = tempfile::tempdir().unwrap();
    seed_dist(workspace.path());
    let signal = RecordingSignal::default();

    let err = make_pipeline(runner.clone(), workspace.path(), "7")
        .process_and_upload_dist_output(&CdnUrlRewriter::default(), &signal)
        .await
        .unwrap_err();

    assert_eq!(signal.outcomes(), vec![UploadOutcome::Failure]);
    assert_eq!(err.exit_code(), Some(1));
    assert!(matches!(err, PipelineError::Artifact(_)));
}

/// Test: a missing page directory aborts before anything is packed or copied
#[tokio::test]
async fn test_missing_examples_aborts_before_upload() {
    let runner = Arc::new(RecordingRunner::new());
    let workspace = tempfile::tempdir().unwrap();
    write(workspace.path(), "test/manual/a.html", RUNTIME_PAGE);
    let signal = RecordingSignal::default();

    let err = make_pipeline(runner.clone(), workspace.path(), "8")
        .process_and_upload_dist_output(&CdnUrlRewriter::default(), &signal)
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Rewrite { .. }));
    assert_eq!(signal.outcomes(), vec![UploadOutcome::Failure]);
    assert!(runner.calls().is_empty());
    assert!(!workspace.path().join("amp_dist_8.zip").exists());
}
