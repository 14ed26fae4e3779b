//! HTTP MJPEG（multipart/x-mixed-replace）配信

use log::{debug, info, warn};

use super::{FrameSink, StreamError, StreamResult, StreamSession};
use crate::camera::{CaptureError, FrameConsumer, FrameMeta, FramePool};
use crate::tasks::StopSignal;

/// パート境界のトークン
pub const BOUNDARY: &str = "123456789000000000000987654321";

pub const STREAM_CONTENT_TYPE: &str =
    "multipart/x-mixed-replace;boundary=123456789000000000000987654321";

const BOUNDARY_LINE: &str = "\r\n--123456789000000000000987654321\r\n";

/// レスポンスヘッダー（CORSとフレームレートの目安）
pub fn response_headers(fps_hint: &str) -> [(&'static str, &str); 3] {
    [
        ("Content-Type", STREAM_CONTENT_TYPE),
        ("Access-Control-Allow-Origin", "*"),
        ("X-Framerate", fps_hint),
    ]
}

/// 各パートのヘッダー
pub fn part_header(meta: &FrameMeta) -> String {
    format!(
        "Content-Type: image/jpeg\r\nContent-Length: {}\r\nX-Timestamp: {}\r\n\r\n",
        meta.len, meta.timestamp
    )
}

/// 1接続分のMJPEG配信
pub struct MjpegStreamer<P: FramePool> {
    consumer: FrameConsumer<P>,
    session: StreamSession,
}

impl<P: FramePool> MjpegStreamer<P> {
    pub fn new(consumer: FrameConsumer<P>) -> Self {
        Self {
            consumer,
            session: StreamSession::new(),
        }
    }

    pub fn session(&self) -> &StreamSession {
        &self.session
    }

    /// 送信失敗か停止要求までフレームを送り続けます
    ///
    /// 停止要求で終了した場合は`Ok`で送信フレーム数を返します。
    /// フレームは常に1つだけ保持し、送信結果にかかわらず直後に返却します。
    pub fn stream<S: FrameSink>(&mut self, sink: &mut S, stop: &StopSignal) -> StreamResult<u64> {
        info!("MJPEG stream started");
        while !stop.is_stopped() {
            sink.send(BOUNDARY_LINE.as_bytes())?;

            let frame = match self.consumer.acquire() {
                Ok(frame) => frame,
                Err(CaptureError::Closed) => return Err(StreamError::SourceClosed),
                Err(e) => {
                    warn!("Camera capture failed: {}", e);
                    continue;
                }
            };

            let meta = *frame.meta();
            let result = sink
                .send(part_header(&meta).as_bytes())
                .and_then(|_| sink.send(frame.data()));
            frame.release();
            if let Err(e) = result {
                info!(
                    "MJPEG stream ended after {} frames: {}",
                    self.session.frames(),
                    e
                );
                return Err(e);
            }

            let stats = self.session.record(meta.len);
            debug!(
                "MJPG: {}KB {}ms ({:.1}fps)",
                stats.len / 1024,
                stats.latency.as_millis(),
                stats.fps
            );
        }
        info!("MJPEG stream stopped");
        Ok(self.session.frames())
    }
}

#[cfg(all(test, not(feature = "esp")))]
mod tests {
    use super::*;
    use crate::camera::synthetic::SyntheticFramePool;
    use crate::camera::FrameSource;

    /// 指定回数の送信後に失敗する配信先
    struct FailingSink {
        sent: Vec<u8>,
        remaining: usize,
    }

    impl FrameSink for FailingSink {
        fn send(&mut self, data: &[u8]) -> StreamResult<()> {
            if self.remaining == 0 {
                return Err(StreamError::Send("connection reset".to_string()));
            }
            self.remaining -= 1;
            self.sent.extend_from_slice(data);
            Ok(())
        }
    }

    #[test]
    fn part_header_carries_length_and_timestamp() {
        let source = FrameSource::new(SyntheticFramePool::repeating(2, 10));
        let mut consumer = source.consumer();
        let frame = consumer.acquire().unwrap();
        assert_eq!(
            part_header(frame.meta()),
            "Content-Type: image/jpeg\r\nContent-Length: 10\r\nX-Timestamp: 1000.000000\r\n\r\n"
        );
    }

    #[test]
    fn send_failure_ends_stream_and_releases_frame() {
        let source = FrameSource::new(SyntheticFramePool::repeating(2, 64));
        let mut streamer = MjpegStreamer::new(source.consumer());
        // 境界・ヘッダー・本文 x 2フレーム + 3回目の境界
        let mut sink = FailingSink {
            sent: Vec::new(),
            remaining: 7,
        };

        let result = streamer.stream(&mut sink, &StopSignal::new());
        assert!(matches!(result, Err(StreamError::Send(_))));
        assert_eq!(streamer.session().frames(), 2);
        assert_eq!(source.outstanding(), 0);
        assert_eq!(source.pool().in_use(), 0);
    }

    #[test]
    fn failure_during_payload_still_releases_frame() {
        let source = FrameSource::new(SyntheticFramePool::repeating(2, 64));
        let mut streamer = MjpegStreamer::new(source.consumer());
        let mut sink = FailingSink {
            sent: Vec::new(),
            remaining: 2,
        };

        assert!(streamer.stream(&mut sink, &StopSignal::new()).is_err());
        assert_eq!(source.pool().grabbed(), 1);
        assert_eq!(source.pool().recycled(), 1);
    }

    #[test]
    fn stopped_signal_sends_nothing() {
        let source = FrameSource::new(SyntheticFramePool::repeating(2, 64));
        let mut streamer = MjpegStreamer::new(source.consumer());
        let stop = StopSignal::new();
        stop.stop();

        let mut sink = Vec::new();
        assert_eq!(streamer.stream(&mut sink, &stop), Ok(0));
        assert!(sink.is_empty());
    }

    #[test]
    fn closed_source_ends_stream() {
        let pool = SyntheticFramePool::repeating(2, 64);
        pool.close();
        let source = FrameSource::new(pool);
        let mut streamer = MjpegStreamer::new(source.consumer());

        let mut sink = Vec::new();
        assert_eq!(
            streamer.stream(&mut sink, &StopSignal::new()),
            Err(StreamError::SourceClosed)
        );
    }

    #[test]
    fn headers_advertise_cors_and_framerate() {
        let headers = response_headers("60");
        assert!(headers.contains(&("Access-Control-Allow-Origin", "*")));
        assert!(headers.contains(&("X-Framerate", "60")));
        assert!(headers[0].1.ends_with(BOUNDARY));
    }
}
