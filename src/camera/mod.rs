//! カメラのフレーム取得と制御
//!
//! フレームバッファはバックエンドのプール（2〜3スロット）から借り出し、
//! `FrameBuffer`のドロップまたは`release`で必ず返却されます。
//! `FrameConsumer::acquire`は`&mut self`を借用するため、
//! 1つのコンシューマーが同時に2つのバッファを保持することはできません。

pub mod control;

#[cfg(feature = "esp")]
pub mod esp;

// Mock実装（テストとnon-espビルドで使用可能）
#[cfg(not(feature = "esp"))]
pub mod synthetic;

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};

pub use control::{led_level, CameraControl, ControlError, LedDimmer, NoLed, SensorSetting};

/// フレーム取得の既定の待ち時間
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_millis(1000);

/// ピクセルフォーマット
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Jpeg,
    Rgb565,
    Other(u32),
}

/// キャプチャ時刻（秒, マイクロ秒）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Timestamp {
    pub secs: i64,
    pub micros: i64,
}

impl fmt::Display for Timestamp {
    /// `X-Timestamp`ヘッダー形式（`<sec>.<usec 6桁>`）
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:06}", self.secs, self.micros)
    }
}

/// フレームのメタデータ
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameMeta {
    pub len: usize,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub timestamp: Timestamp,
}

/// フレーム取得のエラー
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CaptureError {
    /// タイムアウトまでにフレームが得られなかった（一時的）
    #[error("no frame available")]
    Unavailable,
    /// センサーパイプラインの初期化失敗（致命的）
    #[error("camera init failed: {0}")]
    Init(String),
    #[error("frame source closed")]
    Closed,
}

/// フレームバッファのプール
///
/// スロットはプールから借り出され、`recycle`で返却されます。
/// 返却後のスロットの同一性は保証されません（次の取得で再利用されうる）。
pub trait FramePool: Send + Sync {
    type Slot: Send;

    /// フレームを1枚取得します（最大`timeout`待機）
    fn grab(&self, timeout: Duration) -> Result<Self::Slot, CaptureError>;

    fn data<'a>(&'a self, slot: &'a Self::Slot) -> &'a [u8];

    fn meta(&self, slot: &Self::Slot) -> FrameMeta;

    /// スロットをプールに返却します
    fn recycle(&self, slot: Self::Slot);
}

/// 共有フレームソース
///
/// 複製して複数のタスクから利用できます。各タスクは`consumer()`で
/// 自分専用のコンシューマーを作ります。
pub struct FrameSource<P: FramePool> {
    pool: Arc<P>,
    timeout: Duration,
    outstanding: Arc<AtomicUsize>,
}

impl<P: FramePool> Clone for FrameSource<P> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            timeout: self.timeout,
            outstanding: self.outstanding.clone(),
        }
    }
}

impl<P: FramePool> FrameSource<P> {
    pub fn new(pool: P) -> Self {
        Self::with_timeout(pool, DEFAULT_ACQUIRE_TIMEOUT)
    }

    pub fn with_timeout(pool: P, timeout: Duration) -> Self {
        Self {
            pool: Arc::new(pool),
            timeout,
            outstanding: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn consumer(&self) -> FrameConsumer<P> {
        FrameConsumer {
            pool: self.pool.clone(),
            timeout: self.timeout,
            outstanding: self.outstanding.clone(),
        }
    }

    /// 全コンシューマー合計の貸出中バッファ数
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    pub fn pool(&self) -> &P {
        &self.pool
    }
}

/// 1つの実行コンテキスト専用のフレーム取得ハンドル
pub struct FrameConsumer<P: FramePool> {
    pool: Arc<P>,
    timeout: Duration,
    outstanding: Arc<AtomicUsize>,
}

impl<P: FramePool> FrameConsumer<P> {
    /// フレームを取得します
    ///
    /// 返される`FrameBuffer`が生存している間、このコンシューマーは借用されたままです。
    pub fn acquire(&mut self) -> Result<FrameBuffer<'_, P>, CaptureError> {
        let slot = self.pool.grab(self.timeout)?;
        self.outstanding.fetch_add(1, Ordering::SeqCst);
        let meta = self.pool.meta(&slot);
        debug!(
            "Frame acquired: {} bytes {}x{} ({:?})",
            meta.len, meta.width, meta.height, meta.format
        );
        Ok(FrameBuffer {
            pool: &self.pool,
            outstanding: &self.outstanding,
            slot: Some(slot),
            meta,
        })
    }
}

/// 取得済みフレーム（単一所有）
///
/// `release`またはドロップでプールへ返却されます。返却は1回だけ行われます。
pub struct FrameBuffer<'a, P: FramePool> {
    pool: &'a P,
    outstanding: &'a AtomicUsize,
    slot: Option<P::Slot>,
    meta: FrameMeta,
}

impl<'a, P: FramePool> FrameBuffer<'a, P> {
    pub fn data(&self) -> &[u8] {
        match &self.slot {
            Some(slot) => {
                let data = self.pool.data(slot);
                &data[..self.meta.len.min(data.len())]
            }
            None => &[],
        }
    }

    pub fn len(&self) -> usize {
        self.meta.len
    }

    pub fn is_empty(&self) -> bool {
        self.meta.len == 0
    }

    pub fn meta(&self) -> &FrameMeta {
        &self.meta
    }

    pub fn timestamp(&self) -> Timestamp {
        self.meta.timestamp
    }

    /// バッファをプールに返却します
    pub fn release(mut self) {
        self.recycle();
    }

    fn recycle(&mut self) {
        if let Some(slot) = self.slot.take() {
            self.pool.recycle(slot);
            if self.outstanding.fetch_sub(1, Ordering::SeqCst) == 0 {
                warn!("Frame outstanding counter underflow");
                self.outstanding.store(0, Ordering::SeqCst);
            }
        }
    }
}

impl<P: FramePool> Drop for FrameBuffer<'_, P> {
    fn drop(&mut self) {
        self.recycle();
    }
}

#[cfg(all(test, not(feature = "esp")))]
mod tests {
    use super::synthetic::SyntheticFramePool;
    use super::*;

    #[test]
    fn timestamp_formats_with_six_digit_micros() {
        let ts = Timestamp {
            secs: 12,
            micros: 345,
        };
        assert_eq!(ts.to_string(), "12.000345");
    }

    #[test]
    fn release_returns_slot_exactly_once() {
        let source = FrameSource::new(SyntheticFramePool::repeating(2, 100));
        let mut consumer = source.consumer();

        let frame = consumer.acquire().unwrap();
        assert_eq!(frame.len(), 100);
        assert_eq!(source.outstanding(), 1);
        frame.release();

        assert_eq!(source.outstanding(), 0);
        assert_eq!(source.pool().recycled(), 1);
        assert_eq!(source.pool().in_use(), 0);
    }

    #[test]
    fn drop_returns_slot_to_pool() {
        let source = FrameSource::new(SyntheticFramePool::repeating(2, 10));
        let mut consumer = source.consumer();
        {
            let _frame = consumer.acquire().unwrap();
            assert_eq!(source.pool().in_use(), 1);
        }
        assert_eq!(source.pool().in_use(), 0);
        assert_eq!(source.pool().recycled(), 1);
    }

    #[test]
    fn consumers_share_the_bounded_pool() {
        let source = FrameSource::with_timeout(
            SyntheticFramePool::repeating(2, 8),
            Duration::from_millis(20),
        );
        let mut a = source.consumer();
        let mut b = source.consumer();
        let mut c = source.consumer();

        let fa = a.acquire().unwrap();
        let fb = b.acquire().unwrap();
        assert_eq!(c.acquire().err(), Some(CaptureError::Unavailable));

        drop(fa);
        let fc = c.acquire().unwrap();
        assert_eq!(fc.len(), 8);
        drop(fb);
        drop(fc);
        assert_eq!(source.outstanding(), 0);
    }
}
