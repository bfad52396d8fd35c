//! End-to-end vault lifecycle against a real directory.

use std::io::Cursor;
use std::sync::Arc;

use nascrypt_common::{Error, ErrorKind};
use nascrypt_crypto::{is_encrypted, KdfParams, CHUNK_SIZE, HEADER_SIZE};
use nascrypt_vault::{VaultOptions, VaultRecord, VaultService, VaultState};
use tempfile::TempDir;

fn fresh_service() -> (TempDir, VaultService) {
    let dir = TempDir::new().unwrap();
    let service = VaultService::new(dir.path().join("vault"));
    (dir, service)
}

#[test]
fn test_state_machine() {
    let (_dir, service) = fresh_service();

    assert_eq!(service.state(), VaultState::NotConfigured);
    assert!(matches!(service.unlock(b"pw"), Err(Error::VaultNotConfigured)));
    assert!(matches!(service.lock(), Err(Error::VaultNotConfigured)));
    assert!(matches!(service.encrypt_data(b"x"), Err(Error::VaultLocked)));

    service.setup(b"pw").unwrap();
    assert_eq!(service.state(), VaultState::Unlocked);
    assert!(service.is_configured());
    assert!(service.is_unlocked());
    assert!(matches!(service.setup(b"pw"), Err(Error::VaultAlreadyConfigured)));
    assert!(matches!(service.unlock(b"pw"), Err(Error::VaultAlreadyUnlocked)));

    service.lock().unwrap();
    assert_eq!(service.state(), VaultState::Locked);
    assert!(matches!(service.lock(), Err(Error::VaultAlreadyLocked)));
    assert_eq!(service.state(), VaultState::Locked);
    assert!(matches!(service.setup(b"pw"), Err(Error::VaultAlreadyConfigured)));

    service.unlock(b"pw").unwrap();
    assert_eq!(service.state(), VaultState::Unlocked);
}

#[test]
fn test_data_roundtrip_survives_relock() {
    let (_dir, service) = fresh_service();
    service.setup(b"master").unwrap();

    let plaintext = b"quarterly numbers".to_vec();
    let encrypted = service.encrypt_data(&plaintext).unwrap();
    assert!(is_encrypted(&encrypted[..]));

    service.lock().unwrap();
    assert!(matches!(service.decrypt_data(&encrypted), Err(Error::VaultLocked)));
    assert_eq!(Error::VaultLocked.kind(), ErrorKind::VaultLocked);

    service.unlock(b"master").unwrap();
    assert_eq!(service.decrypt_data(&encrypted).unwrap(), plaintext);
}

#[test]
fn test_record_shared_across_instances() {
    let (dir, first) = fresh_service();
    first.setup(b"master").unwrap();
    let encrypted = first.encrypt_data(b"persisted").unwrap();
    drop(first);

    let second = VaultService::new(dir.path().join("vault"));
    assert_eq!(second.state(), VaultState::Locked);
    second.unlock(b"master").unwrap();
    assert_eq!(second.decrypt_data(&encrypted).unwrap(), b"persisted");
}

#[test]
fn test_wrong_password_keeps_locked() {
    let (_dir, service) = fresh_service();
    service.setup(b"right").unwrap();
    service.lock().unwrap();

    let err = service.unlock(b"wrong").unwrap_err();
    assert!(matches!(err, Error::InvalidPassword));
    assert!(err.is_authentication());
    assert_eq!(service.state(), VaultState::Locked);
    assert_eq!(service.status().failed_unlocks, 1);

    service.unlock(b"right").unwrap();
    assert_eq!(service.status().failed_unlocks, 0);
}

#[test]
fn test_lockout_after_repeated_failures() {
    let dir = TempDir::new().unwrap();
    let options = VaultOptions {
        max_failed_unlocks: 2,
        lockout_secs: 300,
    };
    let service = VaultService::with_options(dir.path().join("vault"), options);
    service.setup(b"right").unwrap();
    service.lock().unwrap();

    assert!(matches!(service.unlock(b"a"), Err(Error::InvalidPassword)));
    assert!(matches!(service.unlock(b"b"), Err(Error::InvalidPassword)));

    // Even the right password is refused during the lockout.
    match service.unlock(b"right") {
        Err(Error::UnlockThrottled { retry_after_secs }) => {
            assert!(retry_after_secs > 0 && retry_after_secs <= 300);
        }
        other => panic!("expected throttle, got {:?}", other),
    }
    assert_eq!(service.state(), VaultState::Locked);
}

#[test]
fn test_streams_through_dek() {
    let (_dir, service) = fresh_service();
    service.setup(b"pw").unwrap();

    let plaintext: Vec<u8> = (0..3 * CHUNK_SIZE + 1234).map(|i| (i % 251) as u8).collect();
    let mut encrypted = Vec::new();
    let consumed = service.encrypt_stream(&plaintext[..], &mut encrypted).unwrap();
    assert_eq!(consumed as usize, plaintext.len());

    let mut decrypted = Vec::new();
    service.decrypt_stream(&encrypted[..], &mut decrypted).unwrap();
    assert_eq!(decrypted, plaintext);

    let mut range = Vec::new();
    service
        .decrypt_range(Cursor::new(&encrypted), &mut range, 2 * CHUNK_SIZE as u64 - 3, Some(6))
        .unwrap();
    assert_eq!(range, plaintext[2 * CHUNK_SIZE - 3..2 * CHUNK_SIZE + 3]);
}

#[test]
fn test_empty_data() {
    let (_dir, service) = fresh_service();
    service.setup(b"pw").unwrap();

    let encrypted = service.encrypt_data(b"").unwrap();
    assert_eq!(encrypted.len(), HEADER_SIZE);
    assert!(service.decrypt_data(&encrypted).unwrap().is_empty());
}

#[test]
fn test_tampered_data_is_authentication_error() {
    let (_dir, service) = fresh_service();
    service.setup(b"pw").unwrap();

    let mut encrypted = service.encrypt_data(b"integrity matters").unwrap();
    let last = encrypted.len() - 1;
    encrypted[last] ^= 0x01;

    let err = service.decrypt_data(&encrypted).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authentication);
}

#[test]
fn test_vault_path_relocation() {
    let dir = TempDir::new().unwrap();
    let service = VaultService::new(dir.path().join("a"));
    service.setup(b"pw").unwrap();

    assert!(matches!(
        service.set_vault_path(dir.path().join("b")),
        Err(Error::VaultUnlocked)
    ));

    service.lock().unwrap();
    service.set_vault_path(dir.path().join("b")).unwrap();
    assert_eq!(service.vault_path(), dir.path().join("b"));
    assert_eq!(service.state(), VaultState::NotConfigured);

    service.set_vault_path(dir.path().join("a")).unwrap();
    assert_eq!(service.state(), VaultState::Locked);
}

#[test]
fn test_change_password() {
    let (dir, service) = fresh_service();
    service.setup(b"old").unwrap();
    let encrypted = service.encrypt_data(b"keep me").unwrap();

    assert!(matches!(
        service.change_password(b"not-old", b"new"),
        Err(Error::InvalidPassword)
    ));
    service.change_password(b"old", b"new").unwrap();
    assert!(service.is_unlocked());

    service.lock().unwrap();
    assert!(matches!(
        service.change_password(b"new", b"newer"),
        Err(Error::VaultLocked)
    ));
    assert!(matches!(service.unlock(b"old"), Err(Error::InvalidPassword)));
    service.unlock(b"new").unwrap();
    assert_eq!(service.decrypt_data(&encrypted).unwrap(), b"keep me");

    let record = VaultRecord::load(&dir.path().join("vault")).unwrap().unwrap();
    assert!(record.modified_at >= record.created_at);
}

#[test]
fn test_export_key_material() {
    let (_dir, service) = fresh_service();
    service.setup(b"master").unwrap();
    let encrypted = service.encrypt_data(b"shared file").unwrap();

    let material = service.export_key_material(b"recipient").unwrap();
    let dek = material.unwrap(b"recipient").unwrap();

    let cipher = nascrypt_crypto::StreamCipher::from_key(dek);
    assert_eq!(cipher.decrypt_bytes(&encrypted).unwrap(), b"shared file");

    service.lock().unwrap();
    assert!(matches!(
        service.export_key_material(b"recipient"),
        Err(Error::VaultLocked)
    ));
}

#[test]
fn test_weakened_record_params_refused() {
    let (dir, service) = fresh_service();
    service.setup(b"pw").unwrap();
    service.lock().unwrap();

    let vault_dir = dir.path().join("vault");
    let mut record = VaultRecord::load(&vault_dir).unwrap().unwrap();
    record.kdf_params = KdfParams {
        memory_cost: 8192,
        time_cost: 1,
        parallelism: 1,
    };
    record.save(&vault_dir).unwrap();

    assert!(matches!(service.unlock(b"pw"), Err(Error::Format(_))));
    assert_eq!(service.state(), VaultState::Locked);
    assert_eq!(service.status().failed_unlocks, 0);
}

#[test]
fn test_backup_and_restore() {
    let (_dir, service) = fresh_service();
    assert!(matches!(service.export_record(), Err(Error::VaultNotConfigured)));

    service.setup(b"master").unwrap();
    let encrypted = service.encrypt_data(b"survives a rebuild").unwrap();
    service.lock().unwrap();
    let backup = service.export_record().unwrap();
    assert!(matches!(
        service.import_record(&backup),
        Err(Error::VaultAlreadyConfigured)
    ));

    let (_other_dir, restored) = fresh_service();
    restored.import_record(&backup).unwrap();
    assert_eq!(restored.state(), VaultState::Locked);
    assert!(matches!(restored.unlock(b"wrong"), Err(Error::InvalidPassword)));
    restored.unlock(b"master").unwrap();
    assert_eq!(restored.decrypt_data(&encrypted).unwrap(), b"survives a rebuild");
}

#[test]
fn test_restore_rejects_incompatible_record() {
    let (_dir, service) = fresh_service();
    service.setup(b"master").unwrap();
    let backup = service.export_record().unwrap();

    let mut record = VaultRecord::from_json(std::str::from_utf8(&backup).unwrap()).unwrap();
    record.kdf_params.memory_cost = u32::MAX;
    let tampered = record.to_json().unwrap();

    let (_other_dir, restored) = fresh_service();
    assert!(matches!(
        restored.import_record(tampered.as_bytes()),
        Err(Error::Format(_))
    ));
    assert_eq!(restored.state(), VaultState::NotConfigured);
}

#[test]
fn test_status_serializes() {
    let (_dir, service) = fresh_service();
    service.setup(b"pw").unwrap();

    let value = serde_json::to_value(service.status()).unwrap();
    assert_eq!(value["state"], "unlocked");
    assert_eq!(value["configured"], true);
    assert_eq!(value["unlocked"], true);
}

#[test]
fn test_concurrent_data_operations() {
    let (_dir, service) = fresh_service();
    service.setup(b"pw").unwrap();
    let service = Arc::new(service);

    std::thread::scope(|scope| {
        for i in 0..10u8 {
            let service = Arc::clone(&service);
            scope.spawn(move || {
                let plaintext = vec![i; CHUNK_SIZE + usize::from(i) * 100];
                let encrypted = service.encrypt_data(&plaintext).unwrap();
                assert_eq!(service.decrypt_data(&encrypted).unwrap(), plaintext);
            });
        }
    });

    service.lock().unwrap();
    assert!(!service.is_unlocked());
}
