//! Stream Wire Format Integration Tests
//!
//! 合成フレームを使い、MJPEGとUSBシリアルの出力バイト列を解析して検証します。
#![cfg(not(feature = "esp"))]

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use paper_face_tracker::camera::synthetic::SyntheticFramePool;
use paper_face_tracker::stream::mjpeg::{MjpegStreamer, BOUNDARY};
use paper_face_tracker::stream::usb::{MockSerialLink, FRAME_HEADER, FRAME_MARKER};
use paper_face_tracker::stream::{FrameSink, StreamResult, UsbFrameWriter, UsbStreamer};
use paper_face_tracker::tasks::StopSignal;
use paper_face_tracker::FrameSource;

/// 指定回数の送信後に停止を要求する配信先
struct StoppingSink {
    out: Vec<u8>,
    sends: usize,
    limit: usize,
    stop: StopSignal,
}

impl FrameSink for StoppingSink {
    fn send(&mut self, data: &[u8]) -> StreamResult<()> {
        self.out.extend_from_slice(data);
        self.sends += 1;
        if self.sends == self.limit {
            self.stop.stop();
        }
        Ok(())
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// MJPEGの出力を (Content-Length, 本文) の列に分解します
fn parse_multipart(mut data: &[u8]) -> Vec<(usize, Vec<u8>)> {
    let boundary = format!("\r\n--{}\r\n", BOUNDARY);
    let mut parts = Vec::new();
    while !data.is_empty() {
        assert!(data.starts_with(boundary.as_bytes()), "boundary expected");
        data = &data[boundary.len()..];

        let header_end = find(data, b"\r\n\r\n").expect("header terminator");
        let header = std::str::from_utf8(&data[..header_end]).unwrap();
        let mut lines = header.split("\r\n");
        assert_eq!(lines.next(), Some("Content-Type: image/jpeg"));
        let len: usize = lines
            .next()
            .and_then(|l| l.strip_prefix("Content-Length: "))
            .and_then(|v| v.parse().ok())
            .expect("Content-Length header");
        let timestamp = lines
            .next()
            .and_then(|l| l.strip_prefix("X-Timestamp: "))
            .expect("X-Timestamp header");
        let (secs, micros) = timestamp.split_once('.').expect("sec.usec");
        assert!(secs.parse::<u64>().is_ok());
        assert_eq!(micros.len(), 6);

        data = &data[header_end + 4..];
        parts.push((len, data[..len].to_vec()));
        data = &data[len..];
    }
    parts
}

#[test]
fn test_mjpeg_stream_contains_one_part_per_frame() {
    const FRAMES: usize = 5;
    const LEN: usize = 1500;

    let source = FrameSource::new(SyntheticFramePool::repeating(2, LEN));
    let stop = StopSignal::new();
    let mut sink = StoppingSink {
        out: Vec::new(),
        sends: 0,
        limit: FRAMES * 3,
        stop: stop.clone(),
    };

    let mut streamer = MjpegStreamer::new(source.consumer());
    assert_eq!(streamer.stream(&mut sink, &stop), Ok(FRAMES as u64));

    let parts = parse_multipart(&sink.out);
    assert_eq!(parts.len(), FRAMES);
    for (len, payload) in &parts {
        assert_eq!(*len, LEN);
        assert_eq!(payload.len(), LEN);
    }
    assert_eq!(source.outstanding(), 0);
}

#[test]
fn test_mjpeg_skips_failed_captures_and_keeps_order() {
    let frames = vec![
        Some(vec![1u8; 10]),
        None,
        Some(vec![2u8; 20]),
        Some(vec![3u8; 30]),
    ];
    let source = FrameSource::with_timeout(
        SyntheticFramePool::scripted(2, frames),
        Duration::from_millis(1),
    );
    let stop = StopSignal::new();
    // 境界 x4 + (ヘッダー, 本文) x3
    let mut sink = StoppingSink {
        out: Vec::new(),
        sends: 0,
        limit: 10,
        stop: stop.clone(),
    };

    let mut streamer = MjpegStreamer::new(source.consumer());
    assert_eq!(streamer.stream(&mut sink, &stop), Ok(3));

    // 取得に失敗した回は境界だけが送られる
    let boundary = format!("\r\n--{}\r\n", BOUNDARY);
    let cleaned: Vec<u8> = {
        let doubled = format!("{0}{0}", boundary);
        let pos = find(&sink.out, doubled.as_bytes()).expect("empty part");
        let mut out = sink.out[..pos].to_vec();
        out.extend_from_slice(&sink.out[pos + boundary.len()..]);
        out
    };
    let payloads: Vec<Vec<u8>> = parse_multipart(&cleaned).into_iter().map(|(_, p)| p).collect();
    assert_eq!(payloads, vec![vec![1u8; 10], vec![2u8; 20], vec![3u8; 30]]);
}

#[test]
fn test_usb_frame_layout() {
    let mut link = MockSerialLink::new();
    let payload: Vec<u8> = (0..1000u32).map(|i| (i % 256) as u8).collect();

    UsbFrameWriter::new(64).write_frame(&mut link, &payload).unwrap();

    let written = link.written();
    assert_eq!(&written[..2], &FRAME_HEADER);
    assert_eq!(&written[2..4], &FRAME_MARKER);
    assert_eq!(u16::from_le_bytes([written[4], written[5]]), 1000);
    assert_eq!(&written[6..], &payload[..]);
    assert!(link.writes()[1..].iter().all(|chunk| chunk.len() <= 64));
}

#[test]
fn test_usb_streamer_stop_leaves_only_whole_frames() {
    const LEN: usize = 300;
    let source = FrameSource::new(SyntheticFramePool::repeating(2, LEN));
    let mock = MockSerialLink::new();
    let link = Arc::new(Mutex::new(mock.clone()));
    let stop = StopSignal::new();

    let worker = {
        let source = source.clone();
        let link = link.clone();
        let stop = stop.clone();
        thread::spawn(move || {
            let mut streamer = UsbStreamer::new(
                source.consumer(),
                UsbFrameWriter::default(),
                Duration::from_millis(2),
            );
            streamer.run(&link, &stop)
        })
    };
    thread::sleep(Duration::from_millis(50));
    stop.stop();
    let frames = worker.join().unwrap().unwrap();

    let written = mock.written();
    assert!(frames >= 1);
    assert_eq!(written.len(), frames as usize * (6 + LEN));
    for frame in written.chunks(6 + LEN) {
        assert_eq!(&frame[..4], &[0xFF, 0xA0, 0xFF, 0xA1]);
        assert_eq!(u16::from_le_bytes([frame[4], frame[5]]) as usize, LEN);
    }
    assert_eq!(source.outstanding(), 0);
}
