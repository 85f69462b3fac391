use super::*;
use crate::camera::{CameraCapability, ImageBytes, ImageMetadata, IntrinsicParameters, PropertySet, MIME_JPEG};
use crate::error::{CallError, HarnessError};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// In-process camera that starts serving frames after a number of calls
#[derive(Default)]
struct FakeCamera {
    ready_after: u32,
    empty_batches: bool,
    broken_properties: bool,
    properties_delay: Duration,
    image_calls: AtomicU32,
    images_calls: AtomicU32,
    properties_calls: AtomicU32,
}

impl FakeCamera {
    fn ready_after(calls: u32) -> Self {
        Self {
            ready_after: calls,
            ..Default::default()
        }
    }

    fn frame() -> ImageBytes {
        ImageBytes::new(MIME_JPEG, vec![0xFF, 0xD8, 0xFF, 0xD9])
    }
}

#[async_trait]
impl CameraCapability for FakeCamera {
    async fn fetch_image(&self, _mime_hint: &str) -> std::result::Result<ImageBytes, CallError> {
        let call = self.image_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call < self.ready_after {
            return Err(CallError::Driver("no frame captured yet".to_string()));
        }
        Ok(Self::frame())
    }

    async fn fetch_images(&self) -> std::result::Result<(Vec<ImageBytes>, ImageMetadata), CallError> {
        let call = self.images_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call < self.ready_after {
            return Err(CallError::Driver("no frame captured yet".to_string()));
        }
        let images = if self.empty_batches {
            Vec::new()
        } else {
            vec![Self::frame()]
        };
        Ok((images, ImageMetadata { captured_at: Utc::now() }))
    }

    async fn fetch_properties(&self) -> std::result::Result<PropertySet, CallError> {
        self.properties_calls.fetch_add(1, Ordering::SeqCst);
        if !self.properties_delay.is_zero() {
            tokio::time::sleep(self.properties_delay).await;
        }
        if self.broken_properties {
            return Err(CallError::Transport("broken pipe".to_string()));
        }
        Ok(PropertySet {
            supports_pcd: false,
            intrinsics: Some(IntrinsicParameters {
                width_px: 1920,
                height_px: 1080,
            }),
            mime_types: vec![MIME_JPEG.to_string()],
            frame_rate: Some(30.0),
        })
    }
}

fn literal_poll() -> PollSettings {
    PollSettings {
        timeout: Duration::from_secs(5),
        interval: Duration::from_millis(100),
    }
}

#[tokio::test(start_paused = true)]
async fn test_checks_pass_once_camera_warms_up() {
    let camera = FakeCamera::ready_after(4);
    let deadline = Instant::now() + Duration::from_secs(60);

    let outcomes = run_checks(&camera, literal_poll(), deadline).await;

    let names: Vec<&str> = outcomes.iter().map(|o| o.name.as_str()).collect();
    assert_eq!(names, vec![GET_IMAGE, GET_IMAGES, GET_PROPERTIES]);
    assert!(outcomes.iter().all(CheckOutcome::is_passed));

    assert_eq!(outcomes[0].attempts, 4);
    assert_eq!(outcomes[0].elapsed, Duration::from_millis(300));
    assert_eq!(outcomes[1].attempts, 4);
    assert_eq!(outcomes[2].attempts, 1);
    assert_eq!(camera.properties_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_camera_that_never_warms_up() {
    let camera = FakeCamera::ready_after(u32::MAX);
    let deadline = Instant::now() + Duration::from_secs(60);

    let outcome = check_image(&camera, literal_poll(), deadline).await;

    assert!(!outcome.is_passed());
    assert_eq!(outcome.attempts, 50);
    assert_eq!(outcome.elapsed, Duration::from_secs(5));
    let reason = outcome.reason().unwrap();
    assert!(reason.contains("'GetImage'"), "{}", reason);
    // Transport detail stays out of the report
    assert!(!reason.contains("no frame captured yet"), "{}", reason);
}

#[tokio::test(start_paused = true)]
async fn test_empty_batches_are_retried_until_deadline() {
    let camera = FakeCamera {
        empty_batches: true,
        ..Default::default()
    };
    let deadline = Instant::now() + Duration::from_secs(60);

    let outcome = check_images(&camera, literal_poll(), deadline).await;

    assert!(!outcome.is_passed());
    assert_eq!(camera.images_calls.load(Ordering::SeqCst), 50);
}

#[tokio::test(start_paused = true)]
async fn test_properties_are_not_retried() {
    let camera = FakeCamera {
        broken_properties: true,
        ..Default::default()
    };
    let deadline = Instant::now() + Duration::from_secs(60);

    let outcome = check_properties(&camera, deadline).await;

    assert!(!outcome.is_passed());
    assert_eq!(outcome.attempts, 1);
    assert_eq!(camera.properties_calls.load(Ordering::SeqCst), 1);
    let reason = outcome.reason().unwrap();
    assert!(reason.contains("first call"), "{}", reason);
    assert!(!reason.contains("broken pipe"), "{}", reason);
}

#[tokio::test(start_paused = true)]
async fn test_scenario_deadline_supersedes_poll_timeout() {
    let camera = FakeCamera::ready_after(u32::MAX);
    let deadline = Instant::now() + Duration::from_secs(1);

    let outcomes = run_checks(&camera, literal_poll(), deadline).await;

    assert_eq!(outcomes[0].attempts, 10);
    assert_eq!(outcomes[0].elapsed, Duration::from_secs(1));

    for outcome in &outcomes[1..] {
        assert_eq!(outcome.attempts, 0);
        assert!(outcome
            .reason()
            .unwrap()
            .contains("scenario deadline reached"));
    }
    assert_eq!(camera.properties_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_slow_call_is_cut_off_at_scenario_deadline() {
    let camera = FakeCamera {
        properties_delay: Duration::from_secs(30),
        ..Default::default()
    };
    let deadline = Instant::now() + Duration::from_secs(2);

    let outcome = check_properties(&camera, deadline).await;

    assert!(!outcome.is_passed());
    assert_eq!(outcome.elapsed, Duration::from_secs(2));
}

#[test]
fn test_report_keeps_teardown_errors_apart() {
    let report = ScenarioReport {
        setup_error: None,
        checks: vec![
            CheckOutcome::passed(GET_IMAGE, 3, Duration::from_millis(200)),
            CheckOutcome::failed(GET_IMAGES, "did not succeed", 50, Duration::from_secs(5)),
        ],
        teardown_errors: vec![HarnessError::teardown("viam_csi-cam-pi", "exited with 1")],
        elapsed: Duration::from_secs(6),
    };

    assert!(!report.passed());
    assert_eq!(report.exit_code(), 1);
    assert_eq!(
        report.failed_checks().map(|c| c.name.as_str()).collect::<Vec<_>>(),
        vec![GET_IMAGES]
    );
    assert_eq!(report.check(GET_IMAGES).unwrap().reason(), Some("did not succeed"));

    let rendered = report.to_string();
    assert!(rendered.contains("✓ GetImage"));
    assert!(rendered.contains("✗ GetImages"));
    assert!(rendered.contains("✗ teardown"));
    assert!(rendered.ends_with(&format!("FAIL: 1/2 checks passed in {:?}", report.elapsed)));
}

#[test]
fn test_report_exit_codes() {
    let mut report = ScenarioReport {
        checks: vec![CheckOutcome::passed(GET_PROPERTIES, 1, Duration::ZERO)],
        ..Default::default()
    };
    assert!(report.passed());
    assert_eq!(report.exit_code(), 0);

    report
        .teardown_errors
        .push(HarnessError::teardown("viam_csi-cam-pi", "killed"));
    assert!(report.passed());
    assert_eq!(report.exit_code(), 1);

    // No checks ran at all
    assert!(!ScenarioReport::default().passed());
}

#[tokio::test]
async fn test_missing_artifact_is_a_setup_error() {
    let dir = tempfile::tempdir().unwrap();
    let settings = ScenarioSettings {
        locator: ArtifactLocator::new(dir.path()),
        ..Default::default()
    };

    let report = run_scenario(&settings).await;

    assert!(matches!(
        report.setup_error,
        Some(HarnessError::ArtifactNotFound { .. })
    ));
    assert!(report.checks.is_empty());
    assert!(report.teardown_errors.is_empty());
    assert_eq!(report.exit_code(), 1);
}

#[test]
fn test_settings_from_config() {
    let settings = ScenarioSettings::default();
    assert_eq!(settings.component_name, "csi-cam-1");
    assert_eq!(settings.model, "viam:camera:csi-pi");
    assert_eq!(settings.module_name, "viam_csi-cam-pi");
    assert_eq!(settings.poll, literal_poll());
    assert_eq!(settings.scenario_timeout, Duration::from_secs(60));

    let configuration = settings
        .configuration(std::path::Path::new("/opt/csi/AppRun"))
        .unwrap();
    assert_eq!(configuration.components[0].name, "csi-cam-1");
    assert_eq!(
        configuration.modules[0].executable_path(),
        Some(std::path::Path::new("/opt/csi/AppRun"))
    );
}

#[cfg(unix)]
#[tokio::test]
async fn test_scenario_against_module_without_frames() {
    use std::os::unix::fs::PermissionsExt;

    // Serves static properties but never produces a frame
    const MODULE: &str = r#"#!/bin/sh
echo '{"kind":"ready","models":["viam:camera:csi-pi"]}'
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/^{"id":\([0-9]*\),.*/\1/p')
  case "$line" in
    *'"op":"shutdown"'*)
      echo "{\"kind\":\"response\",\"id\":$id,\"body\":{\"kind\":\"closed\"}}"
      exit 0 ;;
    *'"op":"construct"'*)
      echo "{\"kind\":\"response\",\"id\":$id,\"body\":{\"kind\":\"constructed\"}}" ;;
    *'"op":"get_properties"'*)
      echo "{\"kind\":\"response\",\"id\":$id,\"body\":{\"kind\":\"properties\",\"properties\":{\"supports_pcd\":false}}}" ;;
    *)
      echo "{\"kind\":\"response\",\"id\":$id,\"body\":{\"kind\":\"error\",\"message\":\"no frame\"}}" ;;
  esac
done
"#;

    let dir = tempfile::tempdir().unwrap();
    let app_run = dir.path().join("squashfs-root/AppRun");
    std::fs::create_dir_all(app_run.parent().unwrap()).unwrap();
    std::fs::write(&app_run, MODULE).unwrap();
    std::fs::set_permissions(&app_run, std::fs::Permissions::from_mode(0o755)).unwrap();

    let settings = ScenarioSettings {
        locator: ArtifactLocator::new(dir.path()),
        poll: PollSettings {
            timeout: Duration::from_millis(300),
            interval: Duration::from_millis(100),
        },
        scenario_timeout: Duration::from_secs(20),
        bootstrap_timeout: Duration::from_secs(5),
        ..Default::default()
    };

    let report = run_scenario(&settings).await;

    assert!(report.setup_error.is_none(), "{:?}", report.setup_error);
    assert!(!report.check(GET_IMAGE).unwrap().is_passed());
    assert!(!report.check(GET_IMAGES).unwrap().is_passed());
    assert!(report.check(GET_PROPERTIES).unwrap().is_passed());
    assert!(report.teardown_errors.is_empty(), "{:?}", report.teardown_errors);
    assert_eq!(report.exit_code(), 1);
}
