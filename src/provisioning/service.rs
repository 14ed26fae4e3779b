//! 設定フォーム送信の処理: 解析、保存、再起動の予約

use log::{error, info};

use super::form::{parse_config_form, FormError};
use super::shutdown::{RestartTrigger, ShutdownError};
use crate::storage::{ConfigStore, StoreError, WifiCredentials};

#[derive(Debug, thiserror::Error)]
pub enum ProvisioningError {
    #[error("invalid form: {0}")]
    Form(#[from] FormError),
    #[error("failed to save credentials: {0}")]
    Store(#[from] StoreError),
    #[error("failed to schedule restart: {0}")]
    Restart(#[from] ShutdownError),
}

impl ProvisioningError {
    /// クライアントへ返すエラー本文（ステータスはいずれも500）
    pub fn client_message(&self) -> &'static str {
        match self {
            ProvisioningError::Form(_) => "Invalid configuration",
            ProvisioningError::Store(_) => "Failed to save configuration",
            ProvisioningError::Restart(_) => {
                "Configuration saved, but the restart failed. Please reset the device."
            }
        }
    }
}

/// プロビジョニングの処理本体（HTTPサーバーから独立）
pub struct ProvisioningService<R: RestartTrigger> {
    store: ConfigStore,
    restart: R,
    decode_html_entities: bool,
}

impl<R: RestartTrigger> ProvisioningService<R> {
    pub fn new(store: ConfigStore, restart: R, decode_html_entities: bool) -> Self {
        Self {
            store,
            restart,
            decode_html_entities,
        }
    }

    pub fn restart_trigger(&self) -> &R {
        &self.restart
    }

    /// フォーム本文を処理します
    ///
    /// 保存に失敗した場合は再起動を予約しません。
    pub fn handle_config(&self, body: &[u8]) -> Result<WifiCredentials, ProvisioningError> {
        let credentials = parse_config_form(body, self.decode_html_entities)?;
        info!("Received Wi-Fi configuration for SSID '{}'", credentials.ssid());

        if let Err(e) = self.store.save_credentials(&credentials) {
            error!("Failed to persist Wi-Fi configuration: {}", e);
            return Err(e.into());
        }

        if let Err(e) = self.restart.schedule_restart() {
            error!("Credentials saved but restart could not be scheduled: {}", e);
            return Err(e.into());
        }
        Ok(credentials)
    }
}
