//! Per-provider API key storage on top of [`LocalStorage`].

use std::collections::BTreeMap;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{
    crypto,
    db::{LocalStorage, API_KEYS_KEY, SELECTED_PROVIDER_KEY},
    providers::{validate_api_key, ProviderId},
    telemetry,
};

/**
 * \brief Stored, encrypted representation of one provider key.
 */
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialRecord {
    pub provider: ProviderId,
    pub encrypted_key: String,
    pub is_valid: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub last_validated: OffsetDateTime,
}

/**
 * \brief One record per provider, persisted as a single JSON map.
 * \details The map is loaded once and written back in full after each change.
 *          Unknown or `null` entries in the stored map are skipped on load.
 */
pub struct CredentialStore {
    storage: LocalStorage,
    records: BTreeMap<ProviderId, CredentialRecord>,
    selected: ProviderId,
}

impl CredentialStore {
    pub fn load(storage: LocalStorage) -> Self {
        let records = match storage.get_item(API_KEYS_KEY) {
            Ok(Some(raw)) => parse_records(&raw),
            Ok(None) => BTreeMap::new(),
            Err(e) => {
                telemetry::log_error("credentials", &format!("load keys failed: {}", e));
                BTreeMap::new()
            }
        };
        let selected = storage
            .get_item(SELECTED_PROVIDER_KEY)
            .ok()
            .flatten()
            .and_then(|s| s.parse().ok())
            .unwrap_or_default();
        Self {
            storage,
            records,
            selected,
        }
    }

    /**
     * \brief Validate, encrypt and persist a key; false on any failure.
     */
    pub fn store(&mut self, provider: ProviderId, raw_key: &str) -> bool {
        if !validate_api_key(provider, raw_key) {
            return false;
        }
        let encrypted_key = match crypto::encrypt_api_key(raw_key) {
            Ok(v) => v,
            Err(e) => {
                telemetry::log_error("credentials", &format!("encrypt failed: {}", e));
                return false;
            }
        };
        let record = CredentialRecord {
            provider,
            encrypted_key,
            is_valid: true,
            last_validated: OffsetDateTime::now_utc(),
        };
        let previous = self.records.insert(provider, record);
        if let Err(e) = self.persist() {
            telemetry::log_error("credentials", &format!("persist failed: {}", e));
            match previous {
                Some(prev) => self.records.insert(provider, prev),
                None => self.records.remove(&provider),
            };
            return false;
        }
        telemetry::log_event("credentials", &format!("stored key provider={}", provider));
        true
    }

    /**
     * \brief Plaintext key, or None when absent, invalid or undecryptable.
     */
    pub fn get_decrypted(&self, provider: ProviderId) -> Option<String> {
        let record = self.records.get(&provider).filter(|r| r.is_valid)?;
        match crypto::decrypt_api_key(&record.encrypted_key) {
            Ok(key) => Some(key),
            Err(e) => {
                telemetry::log_error(
                    "credentials",
                    &format!("decrypt failed provider={}: {}", provider, e),
                );
                None
            }
        }
    }

    pub fn has_valid_key(&self, provider: ProviderId) -> bool {
        self.records
            .get(&provider)
            .map(|r| r.is_valid)
            .unwrap_or(false)
    }

    /**
     * \brief Drop one record; memory is left untouched when the write fails.
     */
    pub fn remove(&mut self, provider: ProviderId) -> Result<()> {
        let Some(previous) = self.records.remove(&provider) else {
            return Ok(());
        };
        if let Err(e) = self.persist() {
            self.records.insert(provider, previous);
            return Err(e);
        }
        telemetry::log_event("credentials", &format!("removed key provider={}", provider));
        Ok(())
    }

    /**
     * \brief Drop every record and the selected-provider pointer.
     */
    pub fn clear_all(&mut self) -> Result<()> {
        self.storage
            .remove_items(&[API_KEYS_KEY, SELECTED_PROVIDER_KEY])?;
        self.records.clear();
        self.selected = ProviderId::default();
        telemetry::log_event("credentials", "cleared all keys");
        Ok(())
    }

    pub fn selected_provider(&self) -> ProviderId {
        self.selected
    }

    pub fn select_provider(&mut self, provider: ProviderId) -> Result<()> {
        self.storage
            .set_item(SELECTED_PROVIDER_KEY, provider.as_str())?;
        self.selected = provider;
        Ok(())
    }

    pub fn records(&self) -> impl Iterator<Item = &CredentialRecord> {
        self.records.values()
    }

    pub fn storage(&self) -> &LocalStorage {
        &self.storage
    }

    fn persist(&self) -> Result<()> {
        let raw = serde_json::to_string(&self.records)?;
        self.storage.set_item(API_KEYS_KEY, &raw)
    }
}

fn parse_records(raw: &str) -> BTreeMap<ProviderId, CredentialRecord> {
    let map: BTreeMap<String, serde_json::Value> = match serde_json::from_str(raw) {
        Ok(m) => m,
        Err(e) => {
            telemetry::log_error("credentials", &format!("stored keys unreadable: {}", e));
            return BTreeMap::new();
        }
    };
    map.into_iter()
        .filter_map(|(name, value)| {
            let provider: ProviderId = name.parse().ok()?;
            let record: CredentialRecord = serde_json::from_value(value).ok()?;
            Some((provider, record))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mem_store() -> CredentialStore {
        CredentialStore::load(LocalStorage::open_in_memory().expect("storage"))
    }

    fn sample_key(provider: ProviderId) -> String {
        format!("{}abcdefghij1234567890", provider.info().key_prefix())
    }

    #[test]
    fn store_rejects_short_keys_without_side_effects() {
        let mut store = mem_store();
        for p in ProviderId::ALL {
            assert!(!store.store(p, "short"));
            assert!(!store.has_valid_key(p));
        }
        assert_eq!(store.storage().get_item(API_KEYS_KEY).unwrap(), None);
    }

    #[test]
    fn has_valid_key_flips_after_store() {
        let mut store = mem_store();
        for p in ProviderId::ALL {
            assert!(!store.has_valid_key(p));
            assert!(store.store(p, &sample_key(p)));
            assert!(store.has_valid_key(p));
            assert_eq!(store.get_decrypted(p), Some(sample_key(p)));
        }
    }

    #[test]
    fn remove_only_affects_one_provider() {
        let mut store = mem_store();
        assert!(store.store(ProviderId::Groq, &sample_key(ProviderId::Groq)));
        assert!(store.store(ProviderId::Gemini, &sample_key(ProviderId::Gemini)));

        store.remove(ProviderId::Groq).expect("remove");
        assert_eq!(store.get_decrypted(ProviderId::Groq), None);
        assert!(!store.has_valid_key(ProviderId::Groq));
        assert!(store.get_decrypted(ProviderId::Gemini).is_some());
    }

    #[test]
    fn failed_remove_keeps_record() {
        let mut store = mem_store();
        assert!(store.store(ProviderId::Groq, &sample_key(ProviderId::Groq)));

        store.storage().set_read_only(true).unwrap();
        assert!(store.remove(ProviderId::Groq).is_err());
        assert_eq!(
            store.get_decrypted(ProviderId::Groq),
            Some(sample_key(ProviderId::Groq))
        );

        store.storage().set_read_only(false).unwrap();
        let reloaded = CredentialStore::load(store.storage);
        assert!(reloaded.has_valid_key(ProviderId::Groq));
    }

    #[test]
    fn failed_store_keeps_previous_record() {
        let mut store = mem_store();
        let first = sample_key(ProviderId::Mistral);
        assert!(store.store(ProviderId::Mistral, &first));

        store.storage().set_read_only(true).unwrap();
        assert!(!store.store(ProviderId::Mistral, &"z".repeat(30)));
        assert!(!store.store(ProviderId::Cohere, &sample_key(ProviderId::Cohere)));
        assert_eq!(store.get_decrypted(ProviderId::Mistral), Some(first));
        assert!(!store.has_valid_key(ProviderId::Cohere));
    }

    #[test]
    fn clear_all_drops_keys_and_selection() {
        let mut store = mem_store();
        for p in ProviderId::ALL {
            assert!(store.store(p, &sample_key(p)));
        }
        store.select_provider(ProviderId::Mistral).unwrap();

        store.clear_all().expect("clear");
        for p in ProviderId::ALL {
            assert_eq!(store.get_decrypted(p), None);
        }
        assert_eq!(store.selected_provider(), ProviderId::Groq);
        assert_eq!(store.storage().get_item(API_KEYS_KEY).unwrap(), None);
        assert_eq!(store.storage().get_item(SELECTED_PROVIDER_KEY).unwrap(), None);
    }

    #[test]
    fn resave_overwrites_single_record() {
        let mut store = mem_store();
        assert!(store.store(ProviderId::Cohere, "co-first-key-000000"));
        assert!(store.store(ProviderId::Cohere, "co-second-key-11111"));
        assert_eq!(store.records().count(), 1);
        assert_eq!(
            store.get_decrypted(ProviderId::Cohere).as_deref(),
            Some("co-second-key-11111")
        );
    }

    #[test]
    fn records_survive_reload() {
        let path =
            std::env::temp_dir().join(format!("ultimate-ai-cred-{}.db", uuid::Uuid::new_v4()));
        {
            let mut store = CredentialStore::load(LocalStorage::open(&path).unwrap());
            assert!(store.store(ProviderId::OpenRouter, "sk-or-v1-0123456789"));
            store.select_provider(ProviderId::OpenRouter).unwrap();
        }
        let store = CredentialStore::load(LocalStorage::open(&path).unwrap());
        assert_eq!(store.selected_provider(), ProviderId::OpenRouter);
        assert_eq!(
            store.get_decrypted(ProviderId::OpenRouter).as_deref(),
            Some("sk-or-v1-0123456789")
        );
        drop(store);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn corrupted_ciphertext_reads_as_absent() {
        let storage = LocalStorage::open_in_memory().unwrap();
        let raw = serde_json::json!({
            "groq": {
                "provider": "groq",
                "encryptedKey": "U2FsdGVkX1-not-really",
                "isValid": true,
                "lastValidated": "2024-01-01T00:00:00Z"
            },
            "huggingface": null
        });
        storage.set_item(API_KEYS_KEY, &raw.to_string()).unwrap();
        let store = CredentialStore::load(storage);
        assert!(store.has_valid_key(ProviderId::Groq));
        assert_eq!(store.get_decrypted(ProviderId::Groq), None);
        assert!(!store.has_valid_key(ProviderId::HuggingFace));
    }

    #[test]
    fn invalid_record_is_not_decrypted() {
        let storage = LocalStorage::open_in_memory().unwrap();
        let encrypted = crypto::encrypt_api_key("gsk_abcdefghijkl").unwrap();
        let raw = serde_json::json!({
            "groq": {
                "provider": "groq",
                "encryptedKey": encrypted,
                "isValid": false,
                "lastValidated": "2024-01-01T00:00:00Z"
            }
        });
        storage.set_item(API_KEYS_KEY, &raw.to_string()).unwrap();
        let store = CredentialStore::load(storage);
        assert!(!store.has_valid_key(ProviderId::Groq));
        assert_eq!(store.get_decrypted(ProviderId::Groq), None);
    }

    #[test]
    fn unknown_selected_provider_falls_back() {
        let storage = LocalStorage::open_in_memory().unwrap();
        storage.set_item(SELECTED_PROVIDER_KEY, "openai").unwrap();
        let store = CredentialStore::load(storage);
        assert_eq!(store.selected_provider(), ProviderId::Groq);
    }
}
