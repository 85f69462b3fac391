#![cfg(unix)]

use super::*;
use crate::camera::{client_for, CameraCapability};
use crate::document::{ComponentSpec, Configuration, ConfigurationBuilder, ModuleSpec};
use crate::error::{CallError, HarnessError};
use serde_json::Map;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

const FAKE_MODEL: &str = "acme:camera:fake";

/// Answers construct and get_properties, fails image calls, exits on shutdown
const SERVING_MODULE: &str = r#"#!/bin/sh
echo "fake module starting" >&2
echo '{"kind":"ready","models":["acme:camera:fake"]}'
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/^{"id":\([0-9]*\),.*/\1/p')
  case "$line" in
    *'"op":"shutdown"'*)
      echo "{\"kind\":\"response\",\"id\":$id,\"body\":{\"kind\":\"closed\"}}"
      exit 0 ;;
    *'"op":"construct"'*)
      echo "{\"kind\":\"response\",\"id\":$id,\"body\":{\"kind\":\"constructed\"}}" ;;
    *'"op":"get_properties"'*)
      echo "{\"kind\":\"response\",\"id\":$id,\"body\":{\"kind\":\"properties\",\"properties\":{\"supports_pcd\":false,\"intrinsics\":{\"width_px\":640,\"height_px\":480},\"frame_rate\":null}}}" ;;
    *)
      echo "{\"kind\":\"response\",\"id\":$id,\"body\":{\"kind\":\"error\",\"message\":\"not ready\"}}" ;;
  esac
done
"#;

/// Rejects every construct request
const REJECTING_MODULE: &str = r#"#!/bin/sh
echo '{"kind":"ready","models":["acme:camera:fake"]}'
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/^{"id":\([0-9]*\),.*/\1/p')
  echo "{\"kind\":\"response\",\"id\":$id,\"body\":{\"kind\":\"error\",\"message\":\"sensor not found\"}}"
done
"#;

/// Completes the handshake, then never answers
const WEDGED_MODULE: &str = r#"#!/bin/sh
echo '{"kind":"ready","models":["acme:camera:fake"]}'
exec sleep 30
"#;

fn settings() -> RuntimeSettings {
    RuntimeSettings {
        call_timeout: Duration::from_millis(500),
        teardown_timeout: Duration::from_secs(1),
    }
}

fn write_module(dir: &TempDir, name: &str, body: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, body).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn fake_camera_config(path: &Path) -> Configuration {
    ConfigurationBuilder::new("cam", path)
        .model(FAKE_MODEL)
        .module_name("fake")
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_bootstrap_and_lookup() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_module(&dir, "serving.sh", SERVING_MODULE);

    let mut instance = RuntimeInstance::bootstrap(&fake_camera_config(&path), settings(), Duration::from_secs(5))
        .await
        .unwrap();

    assert_eq!(instance.component_names(), vec!["cam"]);
    assert_eq!(instance.module_names(), vec!["fake"]);

    let camera = client_for(&instance, "cam").unwrap();
    assert_eq!(camera.name(), "cam");
    assert_eq!(camera.model(), FAKE_MODEL);

    match client_for(&instance, "csi-cam-2") {
        Err(HarnessError::Lookup { component, .. }) => assert_eq!(component, "csi-cam-2"),
        other => panic!("Expected lookup error, got {:?}", other),
    }

    let properties = camera.fetch_properties().await.unwrap();
    assert_eq!(properties.intrinsics.map(|i| i.width_px), Some(640));

    match camera.fetch_image("image/jpeg").await {
        Err(CallError::Driver(message)) => assert_eq!(message, "not ready"),
        other => panic!("Expected driver error, got {:?}", other),
    }

    let report = instance.close(Duration::from_secs(5)).await;
    assert!(report.is_clean(), "teardown errors: {:?}", report.errors);
    assert!(instance.is_closed());
}

#[tokio::test]
async fn test_close_is_idempotent_and_invalidates_clients() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_module(&dir, "serving.sh", SERVING_MODULE);

    let mut instance = RuntimeInstance::bootstrap_document(
        &fake_camera_config(&path).to_document().unwrap(),
        settings(),
        Duration::from_secs(5),
    )
    .await
    .unwrap();
    let camera = instance.camera("cam").unwrap();

    assert!(instance.close(Duration::from_secs(5)).await.is_clean());
    assert!(instance.close(Duration::from_secs(5)).await.is_clean());

    assert_eq!(
        camera.fetch_properties().await.unwrap_err(),
        CallError::RuntimeClosed
    );
    assert!(matches!(
        client_for(&instance, "cam"),
        Err(HarnessError::Lookup { .. })
    ));
}

#[tokio::test]
async fn test_concurrent_calls_share_one_client() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_module(&dir, "serving.sh", SERVING_MODULE);

    let mut instance = RuntimeInstance::bootstrap(&fake_camera_config(&path), settings(), Duration::from_secs(5))
        .await
        .unwrap();
    let camera = instance.camera("cam").unwrap();

    let calls = (0..8).map(|_| {
        let camera = camera.clone();
        tokio::spawn(async move { camera.fetch_properties().await })
    });
    for result in futures::future::join_all(calls).await {
        assert!(result.unwrap().is_ok());
    }

    assert!(instance.close(Duration::from_secs(5)).await.is_clean());
}

#[tokio::test]
async fn test_non_camera_component_lookup() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_module(&dir, "serving.sh", SERVING_MODULE);

    let configuration = ConfigurationBuilder::new("board", &path)
        .api("rdk:component:board")
        .model(FAKE_MODEL)
        .build()
        .unwrap();
    let mut instance = RuntimeInstance::bootstrap(&configuration, settings(), Duration::from_secs(5))
        .await
        .unwrap();

    match client_for(&instance, "board") {
        Err(HarnessError::Lookup { reason, .. }) => assert!(reason.contains("not a camera")),
        other => panic!("Expected lookup error, got {:?}", other),
    }

    instance.close(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn test_module_exits_before_handshake() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_module(&dir, "crash.sh", "#!/bin/sh\necho 'no sensor' >&2\nexit 3\n");

    match RuntimeInstance::bootstrap(&fake_camera_config(&path), settings(), Duration::from_secs(5)).await {
        Err(HarnessError::ModuleLaunch { module, reason }) => {
            assert_eq!(module, "fake");
            assert!(reason.contains("before handshake"), "{}", reason);
        }
        other => panic!("Expected launch error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_handshake_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_module(&dir, "silent.sh", "#!/bin/sh\nexec sleep 30\n");

    let started = std::time::Instant::now();
    let result = RuntimeInstance::bootstrap(
        &fake_camera_config(&path),
        settings(),
        Duration::from_millis(300),
    )
    .await;

    match result {
        Err(HarnessError::ModuleLaunch { reason, .. }) => assert!(reason.contains("no handshake")),
        other => panic!("Expected launch error, got {:?}", other),
    }
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_malformed_handshake() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_module(&dir, "chatty.sh", "#!/bin/sh\necho hello\nexec sleep 30\n");

    match RuntimeInstance::bootstrap(&fake_camera_config(&path), settings(), Duration::from_secs(5)).await {
        Err(HarnessError::ModuleLaunch { reason, .. }) => assert!(reason.contains("malformed handshake")),
        other => panic!("Expected launch error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_unadvertised_model() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_module(&dir, "serving.sh", SERVING_MODULE);

    // Builder default model is viam:camera:csi-pi, which the fake does not advertise
    let configuration = ConfigurationBuilder::new("csi-cam-1", &path).build().unwrap();

    match RuntimeInstance::bootstrap(&configuration, settings(), Duration::from_secs(5)).await {
        Err(HarnessError::ComponentBind { component, reason }) => {
            assert_eq!(component, "csi-cam-1");
            assert!(reason.contains("no loaded module advertises"));
        }
        other => panic!("Expected bind error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_module_rejects_construction() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_module(&dir, "rejecting.sh", REJECTING_MODULE);

    match RuntimeInstance::bootstrap(&fake_camera_config(&path), settings(), Duration::from_secs(5)).await {
        Err(HarnessError::ComponentBind { reason, .. }) => assert!(reason.contains("sensor not found")),
        other => panic!("Expected bind error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_wedged_module_is_killed_after_failed_bootstrap() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_module(&dir, "wedged.sh", WEDGED_MODULE);

    let started = std::time::Instant::now();
    let result =
        RuntimeInstance::bootstrap(&fake_camera_config(&path), settings(), Duration::from_secs(5)).await;

    // The construct call times out, then teardown gives up waiting and kills the process
    match result {
        Err(HarnessError::ComponentBind { reason, .. }) => assert!(reason.contains("timed out")),
        other => panic!("Expected bind error, got {:?}", other),
    }
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_missing_executable_is_config_invalid() {
    let dir = tempfile::tempdir().unwrap();
    let configuration = fake_camera_config(&dir.path().join("AppRun"));

    assert!(matches!(
        RuntimeInstance::bootstrap(&configuration, settings(), Duration::from_secs(5)).await,
        Err(HarnessError::ConfigInvalid { .. })
    ));
}

#[tokio::test]
async fn test_registry_module_is_skipped() {
    let configuration = Configuration {
        components: vec![ComponentSpec {
            name: "cam".to_string(),
            api: "rdk:component:camera".to_string(),
            model: "viam:camera:csi-pi".to_string(),
            attributes: Map::new(),
            depends_on: Vec::new(),
        }],
        modules: vec![ModuleSpec::Registry {
            name: "csi".to_string(),
            module_id: "viam:csi-cam".to_string(),
        }],
    };

    assert!(matches!(
        RuntimeInstance::bootstrap(&configuration, settings(), Duration::from_secs(5)).await,
        Err(HarnessError::ComponentBind { .. })
    ));
}

#[tokio::test]
async fn test_empty_configuration() {
    let mut instance =
        RuntimeInstance::bootstrap(&Configuration::default(), settings(), Duration::from_secs(1))
            .await
            .unwrap();

    assert!(instance.component_names().is_empty());
    assert!(matches!(
        client_for(&instance, "csi-cam-1"),
        Err(HarnessError::Lookup { .. })
    ));
    assert!(instance.close(Duration::from_secs(1)).await.is_clean());
    assert!(instance.close(Duration::from_secs(1)).await.is_clean());
}
