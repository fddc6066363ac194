// Integration tests for key lifecycle and payload encryption

use proptest::prelude::*;
use proptest::test_runner::{Config, TestRunner};
use safeguard::audit::AuditLogger;
use safeguard::config::EncryptionConfig;
use safeguard::encryption::{
    DataClassification, EncryptionAlgorithm, EncryptionManager, KeyLifecycleError,
};
use safeguard::SafeguardError;
use std::time::Duration;

async fn manager(dir: &std::path::Path) -> EncryptionManager {
    EncryptionManager::initialize(
        EncryptionConfig::new(dir.join("keys")).with_master_secret("integration-secret"),
    )
    .await
    .expect("encryption manager")
}

#[test]
fn prop_round_trip_for_every_classification() {
    let rt = tokio::runtime::Runtime::new().expect("runtime");
    let dir = tempfile::tempdir().expect("tempdir");
    let manager = rt.block_on(manager(dir.path()));

    let strategy = (
        proptest::collection::vec(any::<u8>(), 0..4096),
        proptest::sample::select(DataClassification::ALL.to_vec()),
    );
    let mut runner = TestRunner::new(Config::with_cases(48));
    runner
        .run(&strategy, |(payload, classification)| {
            let container = rt
                .block_on(manager.encrypt(&payload, classification, None))
                .expect("encrypt");
            prop_assert_eq!(container.algorithm, classification.algorithm());
            prop_assert_eq!(container.classification, classification);

            let decrypted = rt.block_on(manager.decrypt(&container)).expect("decrypt");
            prop_assert_eq!(decrypted, payload);
            Ok(())
        })
        .expect("round trip property");
}

#[tokio::test]
async fn test_rsa_key_round_trip() {
    let dir = tempfile::tempdir().expect("tempdir");
    let manager = manager(dir.path()).await;

    let key_id = manager
        .generate_key(EncryptionAlgorithm::Rsa2048, DataClassification::Confidential, None, None)
        .await
        .expect("rsa key");
    let payload = b"settlement terms, privileged".repeat(200);

    let container = manager
        .encrypt_with_key(&key_id, &payload, None)
        .await
        .expect("encrypt");
    assert_eq!(container.algorithm, EncryptionAlgorithm::Rsa2048);
    assert!(container.wrapped_key.is_some());

    assert_eq!(manager.decrypt(&container).await.expect("decrypt"), payload);
}

#[tokio::test]
async fn test_expired_key_blocks_decrypt_until_rotation() {
    let dir = tempfile::tempdir().expect("tempdir");
    let audit = AuditLogger::new();
    let manager = manager(dir.path()).await.with_audit_logger(audit.clone());

    let key_id = manager
        .generate_key(
            EncryptionAlgorithm::Aes256Gcm,
            DataClassification::Restricted,
            Some(Duration::from_secs(1)),
            None,
        )
        .await
        .expect("key");
    let container = manager
        .encrypt_with_key(&key_id, b"medical records", None)
        .await
        .expect("encrypt");

    tokio::time::sleep(Duration::from_millis(1200)).await;

    let err = manager.decrypt(&container).await.unwrap_err();
    assert!(matches!(
        err,
        SafeguardError::KeyLifecycle(KeyLifecycleError::Expired(ref id)) if id == &key_id
    ));

    let rotated = manager
        .rotate_keys(Some(DataClassification::Restricted))
        .await
        .expect("rotate");
    assert_eq!(rotated.len(), 1);
    assert_ne!(rotated[0], key_id);

    let old = manager.key_metadata(&key_id).await.expect("old key kept");
    assert!(!old.active);
    assert!(old.deactivated_at.is_some());
    assert!(manager.key_metadata(&rotated[0]).await.unwrap().active);

    let err = manager.decrypt(&container).await.unwrap_err();
    assert!(matches!(
        err,
        SafeguardError::KeyLifecycle(KeyLifecycleError::Inactive(_))
    ));

    // Forced decrypt still reads retired data and leaves an audit trail
    let plaintext = manager
        .decrypt_forced(&container, "records request")
        .await
        .expect("forced decrypt");
    assert_eq!(plaintext, b"medical records");
    assert!(audit
        .get_subject_events(&key_id)
        .await
        .iter()
        .any(|e| e.event_type == "forced_decrypt"));
}

#[tokio::test]
async fn test_expired_key_is_not_selected_for_new_data() {
    let dir = tempfile::tempdir().expect("tempdir");
    let manager = manager(dir.path()).await;

    let first = manager
        .encrypt(b"a", DataClassification::Internal, None)
        .await
        .unwrap();
    let short_lived = manager
        .generate_key(
            EncryptionAlgorithm::XChaCha20Poly1305,
            DataClassification::Internal,
            Some(Duration::from_millis(50)),
            None,
        )
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    // The expired key is never picked for new data
    let second = manager
        .encrypt(b"b", DataClassification::Internal, None)
        .await
        .unwrap();
    assert_ne!(second.key_id, short_lived);
    assert_eq!(second.key_id, first.key_id);
}

#[tokio::test]
async fn test_file_encryption_round_trip() {
    let dir = tempfile::tempdir().expect("tempdir");
    let manager = manager(dir.path()).await;

    let input = dir.path().join("deposition.txt");
    let sealed = dir.path().join("deposition.enc");
    let output = dir.path().join("deposition.out");
    std::fs::write(&input, "Q: Where were you on the night of...").unwrap();

    let container = manager
        .encrypt_file(&input, &sealed, DataClassification::TopSecret)
        .await
        .expect("encrypt file");
    assert_eq!(container.metadata.get("file_name").map(String::as_str), Some("deposition.txt"));

    let on_disk = std::fs::read_to_string(&sealed).unwrap();
    assert!(!on_disk.contains("night of"));

    manager.decrypt_file(&sealed, &output).await.expect("decrypt file");
    assert_eq!(
        std::fs::read_to_string(&output).unwrap(),
        "Q: Where were you on the night of..."
    );
}

#[tokio::test]
async fn test_key_files_never_hold_plain_material() {
    let dir = tempfile::tempdir().expect("tempdir");
    let manager = manager(dir.path()).await;
    let key_id = manager
        .generate_key(EncryptionAlgorithm::Aes256Gcm, DataClassification::Confidential, None, None)
        .await
        .unwrap();

    let index = std::fs::read_to_string(dir.path().join("keys").join("key_index.json")).unwrap();
    assert!(index.contains(&key_id));
    assert!(!index.contains("material"));
    assert!(dir.path().join("keys").join(format!("{}.key", key_id)).exists());
}
