//! 配信用と制御用のHTTPサーバー
//!
//! MJPEGのハンドラーは接続が切れるまでサーバーのタスクを占有するため、
//! 制御系（`/control`、APモードの設定フォーム）は別ポートのサーバーに置きます。

use std::sync::{Arc, Mutex};

use esp_idf_svc::http::server::{Configuration, EspHttpServer};
use esp_idf_svc::http::Method;
use esp_idf_svc::io::Write;
use log::{info, warn};

use super::command::{parse_control_query, CommandError, CommandProcessor};
use super::mjpeg::{response_headers, MjpegStreamer};
use super::{FrameSink, StreamError, StreamResult};
use crate::camera::{CameraControl, FramePool, FrameSource, LedDimmer};
use crate::tasks::StopSignal;

/// 配信サーバーの内部制御ポート（制御サーバーの既定値32768と重ならない値）
const STREAM_CTRL_PORT: u16 = 32769;
const SERVER_STACK_SIZE: usize = 8 * 1024;

/// HTTPレスポンス本文への書き込み
struct ResponseSink<'r, W: Write>(&'r mut W);

impl<W: Write> FrameSink for ResponseSink<'_, W> {
    fn send(&mut self, data: &[u8]) -> StreamResult<()> {
        self.0
            .write_all(data)
            .map_err(|e| StreamError::Send(format!("{:?}", e)))
    }
}

/// MJPEG配信サーバーを起動します（`/`と`/stream`）
pub fn start_stream_server<P>(
    source: FrameSource<P>,
    port: u16,
    fps_hint: u32,
) -> anyhow::Result<EspHttpServer<'static>>
where
    P: FramePool + 'static,
{
    let conf = Configuration {
        http_port: port,
        ctrl_port: STREAM_CTRL_PORT,
        stack_size: SERVER_STACK_SIZE,
        ..Default::default()
    };
    let mut server = EspHttpServer::new(&conf)?;

    for uri in ["/", "/stream"] {
        let source = source.clone();
        let fps = fps_hint.to_string();
        server.fn_handler::<anyhow::Error, _>(uri, Method::Get, move |req| {
            let mut response = req.into_response(200, Some("OK"), &response_headers(&fps))?;
            info!("Stream client connected");

            let mut streamer = MjpegStreamer::new(source.consumer());
            streamer.stream(&mut ResponseSink(&mut response), &StopSignal::new())?;
            Ok(())
        })?;
    }

    info!("Stream server started on port {}", port);
    Ok(server)
}

/// 制御サーバーを起動します（`/control?var=..&val=..`）
pub fn start_control_server<C, L>(
    processor: Arc<Mutex<CommandProcessor<C, L>>>,
) -> anyhow::Result<EspHttpServer<'static>>
where
    C: CameraControl + 'static,
    L: LedDimmer + 'static,
{
    let conf = Configuration {
        stack_size: SERVER_STACK_SIZE,
        ..Default::default()
    };
    let mut server = EspHttpServer::new(&conf)?;

    server.fn_handler::<anyhow::Error, _>("/control", Method::Get, move |req| {
        let query = req
            .uri()
            .split_once('?')
            .map(|(_, query)| query.to_string())
            .unwrap_or_default();

        let result = parse_control_query(&query)
            .map_err(CommandError::from)
            .and_then(|command| {
                processor
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .execute(command)
            });

        match result {
            Ok(()) => {
                req.into_response(200, None, &[("Access-Control-Allow-Origin", "*")])?
                    .write_all(b"OK")?;
            }
            Err(e) => {
                warn!("Control request '{}' failed: {}", query, e);
                let status = match e {
                    CommandError::Parse(_) | CommandError::Control(_) => 400,
                    _ => 500,
                };
                req.into_status_response(status)?
                    .write_all(e.to_string().as_bytes())?;
            }
        }
        Ok(())
    })?;

    info!("Control server started");
    Ok(server)
}
