//! State-file bootstrap tests.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::watch;
use verdant_registry::Registry;
use verdant_scheduler::admission::ShootValidator;
use verdant_scheduler::bootstrap::load_state_file;
use verdant_scheduler::indexers::Indexers;

fn unique_suffix() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
        .as_nanos()
        .to_string()
}

const STATE: &str = r#"{
  "cloudProfiles": [
    {
      "metadata": { "name": "aws-profile" },
      "spec": {
        "type": "aws",
        "kubernetes": { "versions": [ { "version": "1.6.4" } ] },
        "regions": [ { "name": "eu-west-1" } ]
      }
    }
  ],
  "projects": [
    { "metadata": { "name": "dev" }, "spec": { "namespace": "garden-dev" } }
  ],
  "seeds": [
    {
      "metadata": { "name": "seed-a" },
      "spec": {
        "provider": { "type": "aws", "region": "eu-west-1" },
        "networks": {
          "nodes": "10.240.0.0/16",
          "pods": "10.241.128.0/17",
          "services": "10.241.0.0/17"
        }
      },
      "status": {
        "conditions": [ { "type": "Available", "status": "True" } ]
      }
    }
  ],
  "shoots": [
    {
      "metadata": { "name": "crown", "namespace": "garden-dev" },
      "spec": {
        "cloudProfileName": "aws-profile",
        "region": "eu-west-1",
        "provider": { "type": "aws", "workers": [] },
        "secretBindingName": "my-secret",
        "networking": { "nodes": "10.250.0.0/16" },
        "kubernetes": { "version": "1.6" }
      }
    }
  ]
}"#;

#[tokio::test]
async fn test_state_file_passes_objects_through_admission() {
    let path = std::env::temp_dir().join(format!("verdant-state-{}.json", unique_suffix()));
    std::fs::write(&path, STATE).unwrap();

    let registry = Arc::new(Registry::new());
    let (_shutdown, shutdown_rx) = watch::channel(false);
    let indexers = Indexers::spawn(registry.clone(), shutdown_rx);
    registry.set_shoot_admission(Arc::new(ShootValidator::new(indexers.clone())));
    assert!(indexers.wait_synced(Duration::from_secs(2)).await);

    load_state_file(&registry, &indexers, &path).await.unwrap();
    std::fs::remove_file(&path).ok();

    assert_eq!(registry.cloud_profiles().list().len(), 1);
    assert_eq!(registry.projects().list().len(), 1);
    assert_eq!(registry.seeds().list().len(), 1);

    // The short version in the fixture is defaulted on the way in.
    let shoots = registry.list_shoots();
    assert_eq!(shoots.len(), 1);
    assert_eq!(shoots[0].spec.kubernetes.version.to_string(), "1.6.4");
}

#[tokio::test]
async fn test_state_file_rejects_inadmissible_shoots() {
    let bad_state = STATE.replace("\"version\": \"1.6\"", "\"version\": \"2.0\"");
    let path = std::env::temp_dir().join(format!("verdant-state-{}.json", unique_suffix()));
    std::fs::write(&path, bad_state).unwrap();

    let registry = Arc::new(Registry::new());
    let (_shutdown, shutdown_rx) = watch::channel(false);
    let indexers = Indexers::spawn(registry.clone(), shutdown_rx);
    registry.set_shoot_admission(Arc::new(ShootValidator::new(indexers.clone())));
    assert!(indexers.wait_synced(Duration::from_secs(2)).await);

    let err = load_state_file(&registry, &indexers, &path).await.unwrap_err();
    std::fs::remove_file(&path).ok();

    assert!(err.to_string().contains("not admitted"));
    assert!(registry.list_shoots().is_empty());
}
