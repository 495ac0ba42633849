mod common;

use std::fs;
use std::path::{Path, PathBuf};

use common::{write_captures, FakeRunner};
use data_contracts::{RunReport, Stage};
use spatialpair_tools::pairing::MatchOptions;
use spatialpair_tools::services::CancellationToken;
use spatialpair_tools::session::{run_session, SessionError, SessionOptions, REPORT_FILE_NAME};
use spatialpair_tools::stage_commands::common::PipelineOptions;
use spatialpair_tools::ToolConfig;

fn options(root: &Path) -> SessionOptions {
    SessionOptions {
        left_dir: root.join("left"),
        right_dir: root.join("right"),
        output_dir: root.join("spatial"),
        matching: MatchOptions::default(),
        pipeline: PipelineOptions::default(),
        jobs: 1,
        dry_run: false,
        allow_unpaired: false,
        write_report: true,
    }
}

fn outputs(dir: &Path) -> Vec<PathBuf> {
    let mut found: Vec<PathBuf> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p.extension().is_some_and(|e| e == "heic"))
        .collect();
    found.sort();
    found
}

#[test]
fn three_pairs_all_succeed() {
    let dir = tempfile::tempdir().unwrap();
    let opts = options(dir.path());
    write_captures(&opts.left_dir, &[1, 2, 3]);
    write_captures(&opts.right_dir, &[1, 2, 3]);
    let runner = FakeRunner::default();

    let summary = run_session(&ToolConfig::default(), &opts, &runner, CancellationToken::new())
        .unwrap();
    assert_eq!(summary.results.len(), 3);
    assert!(summary.results.iter().all(|r| r.is_success()));
    assert_eq!(summary.exit_code(), 0);
    assert_eq!(
        outputs(&opts.output_dir),
        vec![
            opts.output_dir.join("IMG20240501120001-0001.heic"),
            opts.output_dir.join("IMG20240501120002-0002.heic"),
            opts.output_dir.join("IMG20240501120003-0003.heic"),
        ]
    );
    // Only outputs and the report remain; intermediates are gone.
    assert!(!opts.output_dir.join(".spatialpair-work").exists());

    let raw = fs::read_to_string(opts.output_dir.join(REPORT_FILE_NAME)).unwrap();
    let report: RunReport = serde_json::from_str(&raw).unwrap();
    assert!(report.validate().is_ok());
    assert_eq!(report.counts.succeeded, 3);
    assert_eq!(summary.report_path, Some(opts.output_dir.join(REPORT_FILE_NAME)));
}

#[test]
fn unpaired_image_fails_the_run_unless_allowed() {
    let dir = tempfile::tempdir().unwrap();
    let mut opts = options(dir.path());
    write_captures(&opts.left_dir, &[1, 2, 3]);
    write_captures(&opts.right_dir, &[1, 2]);
    let runner = FakeRunner::default();

    let summary = run_session(&ToolConfig::default(), &opts, &runner, CancellationToken::new())
        .unwrap();
    assert_eq!(summary.results.len(), 2);
    assert_eq!(summary.unpaired.len(), 1);
    assert_eq!(summary.exit_code(), 1);

    opts.allow_unpaired = true;
    let summary = run_session(&ToolConfig::default(), &opts, &runner, CancellationToken::new())
        .unwrap();
    assert_eq!(summary.exit_code(), 0);
    assert!(summary.to_string().contains("unpaired"));
}

#[test]
fn one_failed_pair_does_not_stop_the_others() {
    let dir = tempfile::tempdir().unwrap();
    let mut opts = options(dir.path());
    opts.jobs = 2;
    write_captures(&opts.left_dir, &[1, 2, 3]);
    write_captures(&opts.right_dir, &[1, 2, 3]);
    let runner = FakeRunner::failing("spatialPhotoTool", 2);

    let summary = run_session(&ToolConfig::default(), &opts, &runner, CancellationToken::new())
        .unwrap();
    assert_eq!(summary.results.len(), 3);
    assert!(summary
        .results
        .iter()
        .all(|r| r.failed_stage == Some(Stage::Packaging)));
    let order: Vec<usize> = summary.results.iter().map(|r| r.pair_index).collect();
    assert_eq!(order, vec![0, 1, 2]);
    assert_eq!(runner.count("StereoAutoAlign"), 3);
    assert_eq!(summary.exit_code(), 1);
    assert!(outputs(&opts.output_dir).is_empty());
}

#[test]
fn missing_tool_is_caught_before_any_pair() {
    let dir = tempfile::tempdir().unwrap();
    let opts = options(dir.path());
    write_captures(&opts.left_dir, &[1]);
    write_captures(&opts.right_dir, &[1]);
    let runner = FakeRunner {
        missing: vec!["StereoAutoAlign".to_string()],
        ..FakeRunner::default()
    };

    let err = run_session(&ToolConfig::default(), &opts, &runner, CancellationToken::new())
        .unwrap_err();
    assert!(matches!(
        err,
        SessionError::MissingTool {
            tool: "stereo_align",
            ..
        }
    ));
    assert_eq!(err.exit_code(), 2);
    assert!(runner.programs().is_empty());
}

#[test]
fn packager_is_not_required_when_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let mut opts = options(dir.path());
    opts.pipeline = PipelineOptions::default().with_package(false);
    write_captures(&opts.left_dir, &[1]);
    write_captures(&opts.right_dir, &[1]);
    let runner = FakeRunner {
        missing: vec!["spatialPhotoTool".to_string()],
        ..FakeRunner::default()
    };

    let summary = run_session(&ToolConfig::default(), &opts, &runner, CancellationToken::new())
        .unwrap();
    assert_eq!(summary.exit_code(), 0);
    assert!(opts
        .output_dir
        .join("IMG20240501120001-0001-sbs.tiff")
        .is_file());
}

#[test]
fn duplicate_index_aborts_with_usage_code() {
    let dir = tempfile::tempdir().unwrap();
    let opts = options(dir.path());
    write_captures(&opts.left_dir, &[1, 2]);
    write_captures(&opts.right_dir, &[1, 2]);
    fs::write(opts.right_dir.join("IMG20240601000000-0001.jpg"), b"").unwrap();
    let runner = FakeRunner::default();

    let err = run_session(&ToolConfig::default(), &opts, &runner, CancellationToken::new())
        .unwrap_err();
    assert!(matches!(err, SessionError::Pairing(_)));
    assert_eq!(err.exit_code(), 2);
    assert!(runner.programs().is_empty());
}

#[test]
fn missing_input_directory_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let opts = options(dir.path());
    write_captures(&opts.right_dir, &[1]);
    let err = run_session(
        &ToolConfig::default(),
        &opts,
        &FakeRunner::default(),
        CancellationToken::new(),
    )
    .unwrap_err();
    assert!(matches!(err, SessionError::BadDirectory { side: "left", .. }));
}

#[test]
fn dry_run_pairs_without_launching() {
    let dir = tempfile::tempdir().unwrap();
    let mut opts = options(dir.path());
    opts.dry_run = true;
    write_captures(&opts.left_dir, &[1, 2]);
    write_captures(&opts.right_dir, &[1, 2]);
    let runner = FakeRunner {
        missing: vec!["ffmpeg".to_string()],
        ..FakeRunner::default()
    };

    let summary = run_session(&ToolConfig::default(), &opts, &runner, CancellationToken::new())
        .unwrap();
    assert_eq!(summary.pairs, 2);
    assert!(summary.results.is_empty());
    assert_eq!(summary.exit_code(), 0);
    assert!(runner.programs().is_empty());
    assert!(summary.to_string().contains("Dry run: 2 pairs"));
}

#[test]
fn interrupt_marks_remaining_pairs_cancelled() {
    let dir = tempfile::tempdir().unwrap();
    let opts = options(dir.path());
    write_captures(&opts.left_dir, &[1, 2, 3]);
    write_captures(&opts.right_dir, &[1, 2, 3]);
    let cancel = CancellationToken::new();
    let runner = FakeRunner {
        cancel_after_align: Some(cancel.clone()),
        ..FakeRunner::default()
    };

    let summary = run_session(&ToolConfig::default(), &opts, &runner, cancel).unwrap();
    assert_eq!(summary.results.len(), 3);
    assert!(summary
        .results
        .iter()
        .all(|r| r.detail.as_deref() == Some("cancelled")));
    assert_eq!(runner.count("StereoAutoAlign"), 1);
    assert!(outputs(&opts.output_dir).is_empty());
    assert_eq!(summary.exit_code(), 1);
}
