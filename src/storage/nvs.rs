use std::sync::{Arc, Mutex};

use esp_idf_svc::nvs::{EspDefaultNvsPartition, EspNvs, NvsDefault};
use log::debug;

use super::{write_entries, EntryWriter, KeyValueStore, StoreError, StoreResult, StoreValue, StoredValue};

/// 文字列値の読み込みバッファサイズ（パスワード64バイト + 終端）
const READ_BUFFER_SIZE: usize = 128;

/// NVSパーティション上のキー/値ストア
///
/// `EspNvs`の`set_*`は項目ごとにコミットされるため、複数項目の書き込みは
/// `write_entries`で失敗時に以前の値へ戻します。
#[derive(Clone)]
pub struct NvsStore {
    partition: EspDefaultNvsPartition,
    lock: Arc<Mutex<()>>,
}

impl NvsStore {
    pub fn new(partition: EspDefaultNvsPartition) -> Self {
        Self {
            partition,
            lock: Arc::new(Mutex::new(())),
        }
    }

    fn open(&self, namespace: &str) -> StoreResult<EspNvs<NvsDefault>> {
        EspNvs::new(self.partition.clone(), namespace, true).map_err(|e| StoreError::Open {
            namespace: namespace.to_string(),
            reason: e.to_string(),
        })
    }
}

fn read_str(nvs: &EspNvs<NvsDefault>, key: &str) -> StoreResult<Option<String>> {
    let mut buffer = [0_u8; READ_BUFFER_SIZE];
    nvs.get_str(key, &mut buffer)
        .map(|value| value.map(str::to_string))
        .map_err(|e| StoreError::Read {
            key: key.to_string(),
            reason: e.to_string(),
        })
}

fn read_i32(nvs: &EspNvs<NvsDefault>, key: &str) -> StoreResult<Option<i32>> {
    nvs.get_i32(key).map_err(|e| StoreError::Read {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

impl EntryWriter for EspNvs<NvsDefault> {
    fn current(&mut self, key: &str, like: StoreValue<'_>) -> StoreResult<Option<StoredValue>> {
        Ok(match like {
            StoreValue::Str(_) => read_str(self, key)?.map(StoredValue::Str),
            StoreValue::I32(_) => read_i32(self, key)?.map(StoredValue::I32),
        })
    }

    fn set(&mut self, key: &str, value: StoreValue<'_>) -> StoreResult<()> {
        let result = match value {
            StoreValue::Str(s) => self.set_str(key, s),
            StoreValue::I32(v) => self.set_i32(key, v),
        };
        result.map_err(|e| StoreError::Write {
            key: key.to_string(),
            reason: e.to_string(),
        })
    }

    fn remove(&mut self, key: &str) -> StoreResult<()> {
        EspNvs::remove(self, key)
            .map(|_| ())
            .map_err(|e| StoreError::Write {
                key: key.to_string(),
                reason: e.to_string(),
            })
    }
}

impl KeyValueStore for NvsStore {
    fn get_str(&self, namespace: &str, key: &str) -> StoreResult<Option<String>> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        read_str(&self.open(namespace)?, key)
    }

    fn get_i32(&self, namespace: &str, key: &str) -> StoreResult<Option<i32>> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        read_i32(&self.open(namespace)?, key)
    }

    fn write(&self, namespace: &str, entries: &[(&str, StoreValue<'_>)]) -> StoreResult<()> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut nvs = self.open(namespace)?;
        write_entries(&mut nvs, entries)?;
        debug!("NVS write: {} entries in '{}'", entries.len(), namespace);
        Ok(())
    }
}
