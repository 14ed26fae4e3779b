//! 名前付きバックグラウンドタスクと停止シグナル
//!
//! 各ループは`StopSignal`を受け取り、反復の合間に停止要求を確認します。
//! 停止後はループが保持していたリソース（フレームバッファ等）はすべて解放済みです。

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, info, warn};

/// タスク用のスタックサイズ
pub const DEFAULT_STACK_SIZE: usize = 8 * 1024;

/// 協調的な停止シグナル
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        let (flag, cvar) = &*self.inner;
        *flag.lock().unwrap_or_else(|e| e.into_inner()) = true;
        cvar.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        *self.inner.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 停止要求まで最大`timeout`待機します。停止要求があれば`true`
    pub fn wait(&self, timeout: Duration) -> bool {
        let (flag, cvar) = &*self.inner;
        let guard = flag.lock().unwrap_or_else(|e| e.into_inner());
        let (guard, _) = cvar
            .wait_timeout_while(guard, timeout, |stopped| !*stopped)
            .unwrap_or_else(|e| e.into_inner());
        *guard
    }
}

/// タスク管理のエラー
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("task '{0}' is already running")]
    AlreadyRunning(String),
    #[error("failed to spawn task '{name}': {reason}")]
    Spawn { name: String, reason: String },
}

struct TaskEntry {
    stop: StopSignal,
    handle: JoinHandle<()>,
}

/// 名前で管理されるタスクの一覧
///
/// グローバルな状態を使わず、タスクの開始・停止をこの構造体に集約します。
#[derive(Clone, Default)]
pub struct TaskRegistry {
    tasks: Arc<Mutex<HashMap<String, TaskEntry>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 名前付きタスクを起動します
    ///
    /// タスク本体には専用の`StopSignal`が渡されます。
    pub fn spawn<F>(&self, name: &str, stack_size: usize, body: F) -> Result<StopSignal, TaskError>
    where
        F: FnOnce(StopSignal) + Send + 'static,
    {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = tasks.get(name) {
            if !entry.handle.is_finished() {
                return Err(TaskError::AlreadyRunning(name.to_string()));
            }
        }

        let stop = StopSignal::new();
        let task_stop = stop.clone();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .stack_size(stack_size)
            .spawn(move || body(task_stop))
            .map_err(|e| TaskError::Spawn {
                name: name.to_string(),
                reason: e.to_string(),
            })?;

        info!("Task '{}' started", name);
        tasks.insert(
            name.to_string(),
            TaskEntry {
                stop: stop.clone(),
                handle,
            },
        );
        Ok(stop)
    }

    pub fn is_running(&self, name: &str) -> bool {
        let tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        tasks
            .get(name)
            .map(|entry| !entry.handle.is_finished())
            .unwrap_or(false)
    }

    /// タスクに停止を要求し、終了を待ちます
    ///
    /// 登録されていない場合は`false`を返します。
    pub fn cancel(&self, name: &str) -> bool {
        let entry = {
            let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
            tasks.remove(name)
        };
        match entry {
            Some(entry) => {
                entry.stop.stop();
                if entry.handle.join().is_err() {
                    warn!("Task '{}' panicked before cancellation", name);
                }
                info!("Task '{}' cancelled", name);
                true
            }
            None => {
                debug!("Task '{}' is not running", name);
                false
            }
        }
    }

    /// すべてのタスクを停止し、停止したタスク名を返します
    pub fn cancel_all(&self) -> Vec<String> {
        self.names()
            .into_iter()
            .filter(|name| self.cancel(name))
            .collect()
    }

    pub fn names(&self) -> Vec<String> {
        let tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<String> = tasks.keys().cloned().collect();
        names.sort();
        names
    }
}
