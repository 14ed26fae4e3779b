use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use super::{write_entries, EntryWriter, KeyValueStore, StoreError, StoreResult, StoreValue, StoredValue};

/// テスト用のインメモリストア
///
/// NVSと同じく1項目ずつ即時に反映されます。途中の項目で失敗した場合は
/// `write_entries`が書き込み済みの項目を元に戻します。
#[derive(Debug, Default)]
pub struct MemoryStore {
    namespaces: Mutex<HashMap<String, BTreeMap<String, StoredValue>>>,
    fail_open: AtomicBool,
    fail_key: Mutex<Option<String>>,
    commits: AtomicUsize,
}

/// 1つの名前空間への書き込み
struct NamespaceWriter<'a> {
    entries: &'a mut BTreeMap<String, StoredValue>,
    fail_key: Option<String>,
}

impl EntryWriter for NamespaceWriter<'_> {
    fn current(&mut self, key: &str, _like: StoreValue<'_>) -> StoreResult<Option<StoredValue>> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: StoreValue<'_>) -> StoreResult<()> {
        if self.fail_key.as_deref() == Some(key) {
            self.fail_key = None;
            return Err(StoreError::Write {
                key: key.to_string(),
                reason: "simulated write failure".to_string(),
            });
        }
        self.entries.insert(key.to_string(), value.into());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> StoreResult<()> {
        self.entries.remove(key);
        Ok(())
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// テスト用: 次回の書き込みでオープン失敗をシミュレート
    pub fn fail_next_open(&self) {
        self.fail_open.store(true, Ordering::SeqCst);
    }

    /// テスト用: 指定キーへの次回の書き込みを失敗させます
    pub fn fail_next_write_of(&self, key: &str) {
        *self.fail_key.lock().unwrap_or_else(|e| e.into_inner()) = Some(key.to_string());
    }

    /// テスト用: 成功した書き込み操作の回数
    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    /// テスト用: 名前空間内のキー一覧（ソート済み）
    pub fn keys(&self, namespace: &str) -> Vec<String> {
        let namespaces = self.namespaces.lock().unwrap_or_else(|e| e.into_inner());
        namespaces
            .get(namespace)
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn read(&self, namespace: &str, key: &str) -> Option<StoredValue> {
        let namespaces = self.namespaces.lock().unwrap_or_else(|e| e.into_inner());
        namespaces.get(namespace).and_then(|ns| ns.get(key)).cloned()
    }
}

fn type_mismatch(key: &str) -> StoreError {
    StoreError::Read {
        key: key.to_string(),
        reason: "type mismatch".to_string(),
    }
}

impl KeyValueStore for MemoryStore {
    fn get_str(&self, namespace: &str, key: &str) -> StoreResult<Option<String>> {
        match self.read(namespace, key) {
            None => Ok(None),
            Some(StoredValue::Str(value)) => Ok(Some(value)),
            Some(StoredValue::I32(_)) => Err(type_mismatch(key)),
        }
    }

    fn get_i32(&self, namespace: &str, key: &str) -> StoreResult<Option<i32>> {
        match self.read(namespace, key) {
            None => Ok(None),
            Some(StoredValue::I32(value)) => Ok(Some(value)),
            Some(StoredValue::Str(_)) => Err(type_mismatch(key)),
        }
    }

    fn write(&self, namespace: &str, entries: &[(&str, StoreValue<'_>)]) -> StoreResult<()> {
        let mut namespaces = self.namespaces.lock().unwrap_or_else(|e| e.into_inner());

        if self.fail_open.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Open {
                namespace: namespace.to_string(),
                reason: "simulated open failure".to_string(),
            });
        }

        let fail_key = {
            let mut pending = self.fail_key.lock().unwrap_or_else(|e| e.into_inner());
            if entries.iter().any(|(key, _)| pending.as_deref() == Some(*key)) {
                pending.take()
            } else {
                None
            }
        };
        let mut writer = NamespaceWriter {
            entries: namespaces.entry(namespace.to_string()).or_default(),
            fail_key,
        };
        write_entries(&mut writer, entries)?;
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
