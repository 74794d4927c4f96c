//! Account store tests
//!
//! Exercises the on-disk layout the desktop manager reads:
//! - manual token entry creates a record and a matching index entry
//! - delete keeps index and records consistent per provider
//! - reconcile repairs drift
//! - export bundles refresh tokens
//! - fields written by the manager survive a rewrite

use std::fs;

use kiro_auth::Error;
use kiro_auth::accounts::{Account, AccountStore, ListedAccount, Provider};
use kiro_auth::oauth::TokenSet;
use pretty_assertions::assert_eq;
use serde_json::Value;

fn manual(access: &str, refresh: &str) -> TokenSet {
    TokenSet::manual(access.to_string(), refresh.to_string(), 3600)
}

/// Manual tokens AT1/RT1 produce a Kiro record the manager can read
#[test]
fn test_manual_tokens_create_kiro_account() {
    let dir = tempfile::tempdir().unwrap();
    let store = AccountStore::open(dir.path()).unwrap();

    let account = Account::from_tokens(Provider::Kiro, &manual("AT1", "RT1"), None);
    store.create(&account).unwrap();

    let record: Value =
        serde_json::from_str(&fs::read_to_string(store.record_path(&account.id).unwrap()).unwrap())
            .unwrap();
    assert_eq!(record["provider"], "kiro");
    assert_eq!(record["token"]["access_token"], "AT1");
    assert_eq!(record["token"]["refresh_token"], "RT1");
    assert_eq!(record["token"]["expires_in"], 3600);
    assert_eq!(record["disabled"], false);

    let index: Value =
        serde_json::from_str(&fs::read_to_string(dir.path().join("accounts.json")).unwrap()).unwrap();
    assert_eq!(index["version"], "2.0");
    assert_eq!(index["accounts"].as_array().unwrap().len(), 1);
    assert_eq!(index["accounts"][0]["id"], account.id.as_str());

    let reloaded = store.load(&account.id).unwrap();
    assert_eq!(reloaded.email, account.email);
    assert_eq!(reloaded.provider, Provider::Kiro);
    assert_eq!(reloaded.token, account.token);
}

/// Index and record counts stay equal across creates and deletes
#[test]
fn test_delete_keeps_index_consistent() {
    let dir = tempfile::tempdir().unwrap();
    let store = AccountStore::open(dir.path()).unwrap();

    let accounts: Vec<_> = (0..3)
        .map(|i| Account::from_tokens(Provider::Kiro, &manual(&format!("AT{i}"), "RT"), None))
        .collect();
    for account in &accounts {
        store.create(account).unwrap();
    }
    assert_eq!(store.count_indexed(Provider::Kiro).unwrap(), 3);
    assert_eq!(store.count_records(Provider::Kiro).unwrap(), 3);

    store.delete(&accounts[1].id).unwrap();

    assert!(!store.record_path(&accounts[1].id).unwrap().exists());
    assert!(!store.load_index().unwrap().contains(&accounts[1].id));
    assert_eq!(store.count_indexed(Provider::Kiro).unwrap(), 2);
    assert_eq!(store.count_records(Provider::Kiro).unwrap(), 2);
    assert!(matches!(
        store.load(&accounts[1].id),
        Err(Error::AccountNotFound(_))
    ));
}

/// Records written by older versions without a provider count as gemini
#[test]
fn test_legacy_records_are_listed() {
    let dir = tempfile::tempdir().unwrap();
    let store = AccountStore::open(dir.path()).unwrap();

    fs::write(
        dir.path().join("accounts.json"),
        r#"{"version":"2.0","accounts":[{"id":"old","email":"old@example.com","created_at":1,"last_used":1}],"current_account_id":"old"}"#,
    )
    .unwrap();
    fs::write(
        store.record_path("old").unwrap(),
        r#"{"id":"old","email":"old@example.com","token":{"access_token":"a","refresh_token":"r","expires_in":3600,"expiry_timestamp":1},"created_at":1,"last_used":1}"#,
    )
    .unwrap();

    let listed = store.list().unwrap();
    assert_eq!(listed.len(), 1);
    match &listed[0] {
        ListedAccount::Loaded(account) => {
            assert_eq!(account.provider, Provider::Gemini);
            assert!(account.is_token_expired());
        }
        other => panic!("expected loaded account, got {other:?}"),
    }
    assert_eq!(store.count_indexed(Provider::Gemini).unwrap(), 1);
    assert_eq!(store.count_indexed(Provider::Kiro).unwrap(), 0);
}

/// Reconcile drops dangling entries and reports orphans without touching them
#[test]
fn test_reconcile_repairs_drift() {
    let dir = tempfile::tempdir().unwrap();
    let store = AccountStore::open(dir.path()).unwrap();

    let kept = Account::from_tokens(Provider::Kiro, &manual("AT1", "RT1"), None);
    let dangling = Account::from_tokens(Provider::Kiro, &manual("AT2", "RT2"), None);
    store.create(&kept).unwrap();
    store.create(&dangling).unwrap();
    fs::remove_file(store.record_path(&dangling.id).unwrap()).unwrap();

    let orphan = Account::from_tokens(Provider::Kiro, &manual("AT3", "RT3"), None);
    fs::write(
        store.record_path(&orphan.id).unwrap(),
        serde_json::to_string(&orphan).unwrap(),
    )
    .unwrap();

    let report = store.reconcile().unwrap();
    assert_eq!(report.dropped, vec![dangling.id.clone()]);
    assert_eq!(report.orphans, vec![orphan.id.clone()]);
    assert!(store.record_path(&orphan.id).unwrap().exists());

    let ids: Vec<_> = store
        .load_index()
        .unwrap()
        .accounts
        .into_iter()
        .map(|s| s.id)
        .collect();
    assert_eq!(ids, vec![kept.id]);
}

/// Export carries email, refresh token and provider of loadable accounts
#[test]
fn test_export_bundle() {
    let dir = tempfile::tempdir().unwrap();
    let store = AccountStore::open(dir.path()).unwrap();

    let account = Account::from_tokens(
        Provider::Kiro,
        &manual("AT1", "RT1"),
        Some("dev@example.com".to_string()),
    );
    store.create(&account).unwrap();

    let bundle = store.export().unwrap();
    let value = serde_json::to_value(&bundle).unwrap();
    assert_eq!(
        value,
        serde_json::json!({
            "accounts": [
                {"email": "dev@example.com", "refresh_token": "RT1", "provider": "kiro"}
            ]
        })
    );
}

/// Manager-owned fields survive load, usage update and save
#[test]
fn test_save_keeps_manager_fields() {
    let dir = tempfile::tempdir().unwrap();
    let store = AccountStore::open(dir.path()).unwrap();
    let account = Account::from_tokens(Provider::Kiro, &manual("AT1", "RT1"), None);
    store.create(&account).unwrap();

    let path = store.record_path(&account.id).unwrap();
    let mut record: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    record["quota"] = serde_json::json!({"models": [{"name": "claude", "percentage": 42}]});
    record["protected_models"] = serde_json::json!(["claude"]);
    record["individual_proxy"] = serde_json::json!({"url": "socks5://127.0.0.1:1080"});
    fs::write(&path, serde_json::to_string(&record).unwrap()).unwrap();

    let mut loaded = store.load(&account.id).unwrap();
    loaded.record_usage();
    store.save(&loaded).unwrap();

    let saved: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(saved["usage_count"], 1);
    assert_eq!(saved["quota"], record["quota"]);
    assert_eq!(saved["protected_models"], record["protected_models"]);
    assert_eq!(saved["individual_proxy"], record["individual_proxy"]);
}
