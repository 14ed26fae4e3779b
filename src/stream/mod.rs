//! フレーム配信
//!
//! HTTP MJPEG（`mjpeg`）とUSBシリアル（`usb`）の2つの配信方式と、
//! 両方から共通で使う制御コマンド（`command`）。

pub mod command;
pub mod mjpeg;
pub mod usb;

#[cfg(feature = "esp")]
pub mod http;
#[cfg(feature = "esp")]
pub mod uart;

use std::time::{Duration, Instant};

pub use command::{
    parse_control_line, parse_control_query, CommandError, CommandParseError, CommandProcessor,
    ControlCommand,
};
pub use mjpeg::{MjpegStreamer, BOUNDARY, STREAM_CONTENT_TYPE};
pub use usb::{ControlReader, SerialLink, UsbFrameWriter, UsbStreamer};

/// 配信処理の結果の型
pub type StreamResult<T> = Result<T, StreamError>;

/// 配信のエラー
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StreamError {
    /// 送信失敗（クライアント切断など）。セッションを終了します
    #[error("send failed: {0}")]
    Send(String),
    #[error("serial link timed out")]
    Timeout,
    #[error("serial link error: {0}")]
    Link(String),
    /// 長さフィールド（16bit）に収まらないフレーム
    #[error("frame of {0} bytes does not fit the 16-bit length field")]
    FrameTooLarge(usize),
    #[error("frame source closed")]
    SourceClosed,
}

/// 配信先（HTTPレスポンス本文など）
pub trait FrameSink {
    fn send(&mut self, data: &[u8]) -> StreamResult<()>;
}

impl FrameSink for Vec<u8> {
    fn send(&mut self, data: &[u8]) -> StreamResult<()> {
        self.extend_from_slice(data);
        Ok(())
    }
}

/// 1フレーム送信ごとの統計
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameStats {
    pub len: usize,
    /// 前フレームからの経過時間（初回はゼロ）
    pub latency: Duration,
    pub fps: f32,
}

/// 接続ごとの配信状態（ログ用）
///
/// 接続が閉じるとセッションも破棄されます。
#[derive(Debug, Default)]
pub struct StreamSession {
    last_frame_time: Option<Instant>,
    frames: u64,
    bytes_sent: u64,
}

impl StreamSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    pub fn record(&mut self, len: usize) -> FrameStats {
        self.record_at(Instant::now(), len)
    }

    pub fn record_at(&mut self, now: Instant, len: usize) -> FrameStats {
        let latency = self
            .last_frame_time
            .map(|last| now.saturating_duration_since(last))
            .unwrap_or_default();
        self.last_frame_time = Some(now);
        self.frames += 1;
        self.bytes_sent += len as u64;

        let fps = if latency.is_zero() {
            0.0
        } else {
            1.0 / latency.as_secs_f32()
        };
        FrameStats { len, latency, fps }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_derives_fps_from_frame_interval() {
        let mut session = StreamSession::new();
        let start = Instant::now();

        let first = session.record_at(start, 1000);
        assert_eq!(first.latency, Duration::ZERO);
        assert_eq!(first.fps, 0.0);

        let second = session.record_at(start + Duration::from_millis(50), 2000);
        assert_eq!(second.latency, Duration::from_millis(50));
        assert!((second.fps - 20.0).abs() < 0.01);

        assert_eq!(session.frames(), 2);
        assert_eq!(session.bytes_sent(), 3000);
    }
}
