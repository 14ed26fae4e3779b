//! Wi-Fiプロビジョニング
//!
//! APモードで設定フォームを提供し、受信した認証情報を保存して再起動します。

pub mod decode;
pub mod form;
pub mod service;
pub mod shutdown;

#[cfg(feature = "esp")]
pub mod server;

pub use decode::{decode_html_entities, url_decode, url_encode, DecodeError};
pub use form::{parse_config_form, FormError, CONFIG_FORM_HTML, CONFIRMATION_BODY, MAX_FORM_BODY};
pub use service::{ProvisioningError, ProvisioningService};
pub use shutdown::{RestartTrigger, ShutdownError, ShutdownSequence, ShutdownStep, SystemControl};
