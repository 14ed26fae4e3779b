//! APモードの設定フォーム

use std::sync::Arc;

use anyhow::anyhow;
use esp_idf_svc::http::server::{EspHttpConnection, EspHttpServer, Request};
use esp_idf_svc::http::Method;
use esp_idf_svc::io::{Read, Write};
use log::{info, warn};

use super::form::{check_body_len, CONFIG_FORM_HTML, CONFIRMATION_BODY, MAX_FORM_BODY};
use super::service::ProvisioningService;
use super::shutdown::RestartTrigger;

/// 本文を上限付きで読み込みます
fn read_form_body(req: &mut Request<&mut EspHttpConnection<'_>>) -> anyhow::Result<Vec<u8>> {
    let len = req.content_len().unwrap_or(0) as usize;
    check_body_len(len)?;

    let mut body = vec![0_u8; len];
    if len > 0 {
        req.read_exact(&mut body)
            .map_err(|e| anyhow!("failed to read form body: {:?}", e))?;
    }
    Ok(body)
}

/// 設定フォームのハンドラーを登録します（`/`、`/config`、`/favicon.ico`）
///
/// `/config`の処理に失敗した場合は原因に応じた本文で500を返します。
pub fn register_provisioning_handlers<R>(
    server: &mut EspHttpServer<'static>,
    service: Arc<ProvisioningService<R>>,
) -> anyhow::Result<()>
where
    R: RestartTrigger + 'static,
{
    server.fn_handler::<anyhow::Error, _>("/", Method::Get, |req| {
        req.into_ok_response()?.write_all(CONFIG_FORM_HTML.as_bytes())?;
        Ok(())
    })?;

    server.fn_handler::<anyhow::Error, _>("/config", Method::Post, move |mut req| {
        let result = read_form_body(&mut req)
            .map_err(|e| (e, "Invalid configuration"))
            .and_then(|body| {
                service
                    .handle_config(&body)
                    .map_err(|e| {
                        let message = e.client_message();
                        (anyhow::Error::from(e), message)
                    })
            });
        match result {
            Ok(_) => {
                req.into_ok_response()?.write_all(CONFIRMATION_BODY.as_bytes())?;
            }
            Err((e, message)) => {
                warn!("Rejected provisioning request: {:#}", e);
                req.into_status_response(500)?.write_all(message.as_bytes())?;
            }
        }
        Ok(())
    })?;

    server.fn_handler::<anyhow::Error, _>("/favicon.ico", Method::Get, |req| {
        req.into_response(200, None, &[("Content-Type", "image/x-icon")])?;
        Ok(())
    })?;

    info!(
        "Provisioning handlers registered (form body limit {} bytes)",
        MAX_FORM_BODY
    );
    Ok(())
}
