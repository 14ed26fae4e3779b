//! USBシリアル配信
//!
//! フレームの形式: `[0xFF 0xA0][0xFF 0xA1][len_lo len_hi][payload]`。
//! 本文は`chunk_size`（既定64バイト）以下に分割して書き込みます。

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use log::{debug, info, warn};

use super::{StreamError, StreamResult};
use crate::camera::{CaptureError, FrameConsumer, FramePool};
use crate::tasks::StopSignal;

/// フレームのヘッダー
pub const FRAME_HEADER: [u8; 2] = [0xFF, 0xA0];
/// フレームのマーカー
pub const FRAME_MARKER: [u8; 2] = [0xFF, 0xA1];

/// 1回の書き込みの上限
pub const MAX_CHUNK_SIZE: usize = 64;

/// 無期限に待機するタイムアウト値
pub const BLOCK: u32 = u32::MAX;

/// 受信パケットのバッファサイズ
pub const COMMAND_BUFFER_SIZE: usize = 256;

/// 0バイト書き込みが続いた場合に諦めるまでの回数
const MAX_ZERO_WRITES: u32 = 5;

/// シリアル通信インターフェースのトレイト
///
/// 実機（UART）とテスト用(Mock)の実装を切り替えます。
pub trait SerialLink: Send {
    /// 書き込んだバイト数を返します（一部だけの場合あり）
    fn write(&mut self, data: &[u8], timeout_ms: u32) -> StreamResult<usize>;

    /// タイムアウト時は`StreamError::Timeout`
    fn read(&mut self, buffer: &mut [u8], timeout_ms: u32) -> StreamResult<usize>;
}

/// 送信と受信のスレッドで共有するリンク
///
/// 1フレームの書き込み中はロックを保持し、応答がフレームの途中に混ざらないようにします。
pub type SharedLink<L> = Arc<Mutex<L>>;

fn lock_link<L>(link: &SharedLink<L>) -> MutexGuard<'_, L> {
    link.lock().unwrap_or_else(|e| e.into_inner())
}

/// ヘッダー・マーカー・長さ（リトルエンディアン）の6バイト
pub fn preamble(len: u16) -> [u8; 6] {
    let [lo, hi] = len.to_le_bytes();
    [
        FRAME_HEADER[0],
        FRAME_HEADER[1],
        FRAME_MARKER[0],
        FRAME_MARKER[1],
        lo,
        hi,
    ]
}

/// 一部書き込みを繰り返して全データを送ります
fn write_all<L: SerialLink + ?Sized>(link: &mut L, data: &[u8]) -> StreamResult<()> {
    let mut sent = 0;
    let mut zero_writes = 0;
    while sent < data.len() {
        match link.write(&data[sent..], BLOCK)? {
            0 => {
                zero_writes += 1;
                if zero_writes >= MAX_ZERO_WRITES {
                    return Err(StreamError::Link(format!(
                        "link accepted no data after {} attempts",
                        MAX_ZERO_WRITES
                    )));
                }
            }
            written => {
                sent += written;
                zero_writes = 0;
            }
        }
    }
    Ok(())
}

/// フレームをシリアル形式で書き込みます
#[derive(Debug, Clone, Copy)]
pub struct UsbFrameWriter {
    chunk_size: usize,
}

impl Default for UsbFrameWriter {
    fn default() -> Self {
        Self::new(MAX_CHUNK_SIZE)
    }
}

impl UsbFrameWriter {
    /// `chunk_size`は1..=64に丸められます
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.clamp(1, MAX_CHUNK_SIZE),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// 1フレームを書き込み、本文のバイト数を返します
    pub fn write_frame<L: SerialLink + ?Sized>(&self, link: &mut L, data: &[u8]) -> StreamResult<usize> {
        let len = u16::try_from(data.len()).map_err(|_| StreamError::FrameTooLarge(data.len()))?;

        write_all(link, &preamble(len))?;
        for chunk in data.chunks(self.chunk_size) {
            write_all(link, chunk)?;
        }
        debug!("USB frame sent: {} bytes", data.len());
        Ok(data.len())
    }
}

/// フレームを一定間隔でUSBシリアルに送り続けるループ
pub struct UsbStreamer<P: FramePool> {
    consumer: FrameConsumer<P>,
    writer: UsbFrameWriter,
    interval: Duration,
}

impl<P: FramePool> UsbStreamer<P> {
    pub fn new(consumer: FrameConsumer<P>, writer: UsbFrameWriter, interval: Duration) -> Self {
        Self {
            consumer,
            writer,
            interval,
        }
    }

    /// 停止要求か送信失敗まで配信します
    ///
    /// 16bitに収まらないフレームは警告を出して読み飛ばします。
    pub fn run<L: SerialLink>(&mut self, link: &SharedLink<L>, stop: &StopSignal) -> StreamResult<u64> {
        let mut frames = 0;
        info!("USB stream started (chunk {} bytes)", self.writer.chunk_size());
        while !stop.is_stopped() {
            match self.consumer.acquire() {
                Ok(frame) => {
                    let result = {
                        let mut link = lock_link(link);
                        self.writer.write_frame(&mut *link, frame.data())
                    };
                    frame.release();
                    match result {
                        Ok(_) => frames += 1,
                        Err(StreamError::FrameTooLarge(len)) => {
                            warn!("Skipping frame of {} bytes (too large for serial framing)", len)
                        }
                        Err(e) => {
                            warn!("USB stream ended after {} frames: {}", frames, e);
                            return Err(e);
                        }
                    }
                }
                Err(CaptureError::Closed) => return Err(StreamError::SourceClosed),
                Err(e) => warn!("Camera capture failed: {}", e),
            }
            if stop.wait(self.interval) {
                break;
            }
        }
        info!("USB stream stopped after {} frames", frames);
        Ok(frames)
    }
}

/// 受信パケットの組み立て
///
/// 改行（`\r`/`\n`）で区切られた行を返します。改行のないパケットも、
/// 受信が途切れた時点で1行として扱います。
pub struct ControlReader<L: SerialLink> {
    link: SharedLink<L>,
    pending: heapless::Vec<u8, COMMAND_BUFFER_SIZE>,
}

impl<L: SerialLink> ControlReader<L> {
    pub fn new(link: SharedLink<L>) -> Self {
        Self {
            link,
            pending: heapless::Vec::new(),
        }
    }

    /// 受信データを読み取り、完成した行を返します
    pub fn poll(&mut self, timeout_ms: u32) -> StreamResult<Vec<String>> {
        let mut buffer = [0u8; COMMAND_BUFFER_SIZE];
        let read = {
            let mut link = lock_link(&self.link);
            link.read(&mut buffer, timeout_ms)
        };

        let mut lines = Vec::new();
        match read {
            Ok(0) | Err(StreamError::Timeout) => {
                self.flush_into(&mut lines);
            }
            Ok(n) => {
                for &byte in &buffer[..n] {
                    if byte == b'\n' || byte == b'\r' {
                        self.flush_into(&mut lines);
                    } else if self.pending.push(byte).is_err() {
                        warn!(
                            "Control packet exceeds {} bytes, dropping",
                            COMMAND_BUFFER_SIZE
                        );
                        self.pending.clear();
                    }
                }
            }
            Err(e) => return Err(e),
        }
        Ok(lines)
    }

    /// 応答行（末尾に改行を付与）を書き込みます
    pub fn reply(&self, message: &str) -> StreamResult<()> {
        let mut link = lock_link(&self.link);
        write_all(&mut *link, message.as_bytes())?;
        write_all(&mut *link, b"\n")
    }

    fn flush_into(&mut self, lines: &mut Vec<String>) {
        if self.pending.is_empty() {
            return;
        }
        let line = String::from_utf8_lossy(&self.pending).trim().to_string();
        self.pending.clear();
        if !line.is_empty() {
            debug!("Control packet received: '{}'", line);
            lines.push(line);
        }
    }
}

#[cfg(not(feature = "esp"))]
pub use mock::MockSerialLink;

#[cfg(not(feature = "esp"))]
mod mock {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use super::{SerialLink, StreamError, StreamResult};

    /// テスト用のシリアルリンク
    ///
    /// 書き込みを1回ずつ記録し、読み取りはキューから返します。
    #[derive(Debug, Clone, Default)]
    pub struct MockSerialLink {
        pub writes: Arc<Mutex<Vec<Vec<u8>>>>,
        pub read_queue: Arc<Mutex<VecDeque<Vec<u8>>>>,
        /// 1回の書き込みで受け付ける最大バイト数（一部書き込みの再現）
        pub max_write: Arc<Mutex<Option<usize>>>,
        /// 指定回数の書き込み後にエラー
        pub fail_after_writes: Arc<Mutex<Option<usize>>>,
    }

    impl MockSerialLink {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn queue_read(&self, data: &[u8]) {
            self.read_queue.lock().unwrap().push_back(data.to_vec());
        }

        pub fn writes(&self) -> Vec<Vec<u8>> {
            self.writes.lock().unwrap().clone()
        }

        /// 書き込まれた全バイト
        pub fn written(&self) -> Vec<u8> {
            self.writes.lock().unwrap().concat()
        }

        pub fn clear(&self) {
            self.writes.lock().unwrap().clear();
        }

        pub fn set_max_write(&self, max: Option<usize>) {
            *self.max_write.lock().unwrap() = max;
        }

        pub fn set_fail_after_writes(&self, count: Option<usize>) {
            *self.fail_after_writes.lock().unwrap() = count;
        }
    }

    impl SerialLink for MockSerialLink {
        fn write(&mut self, data: &[u8], _timeout_ms: u32) -> StreamResult<usize> {
            let mut writes = self.writes.lock().unwrap();
            if let Some(limit) = *self.fail_after_writes.lock().unwrap() {
                if writes.len() >= limit {
                    return Err(StreamError::Link("Simulated write error".to_string()));
                }
            }
            let len = match *self.max_write.lock().unwrap() {
                Some(max) => data.len().min(max),
                None => data.len(),
            };
            writes.push(data[..len].to_vec());
            Ok(len)
        }

        fn read(&mut self, buffer: &mut [u8], _timeout_ms: u32) -> StreamResult<usize> {
            let mut queue = self.read_queue.lock().unwrap();
            match queue.pop_front() {
                Some(data) => {
                    let len = data.len().min(buffer.len());
                    buffer[..len].copy_from_slice(&data[..len]);
                    Ok(len)
                }
                None => Err(StreamError::Timeout),
            }
        }
    }
}
