//! UARTによるシリアルリンク

use esp_idf_svc::hal::delay::{TickType, BLOCK as HAL_BLOCK};
use esp_idf_svc::hal::gpio::AnyIOPin;
use esp_idf_svc::hal::peripheral::Peripheral;
use esp_idf_svc::hal::uart::{config::Config as UartConfig, Uart, UartDriver};
use esp_idf_svc::hal::units::Hertz;
use esp_idf_svc::sys::{self, EspError};
use log::debug;

use super::usb::{SerialLink, BLOCK};
use super::{StreamError, StreamResult};

const TX_BUFFER_SIZE: usize = 1024;
const RX_BUFFER_SIZE: usize = 1024;

impl From<EspError> for StreamError {
    fn from(error: EspError) -> Self {
        if error.code() == sys::ESP_ERR_TIMEOUT {
            StreamError::Timeout
        } else {
            StreamError::Link(format!("ESP-IDF error: {}", error))
        }
    }
}

/// UARTドライバーを管理する構造体
pub struct UartLink<'d> {
    driver: UartDriver<'d>,
}

impl<'d> UartLink<'d> {
    /// ボード定義のピン番号でUARTを初期化します
    ///
    /// # 引数
    ///
    /// * `uart` - UARTペリフェラル
    /// * `tx_pin` / `rx_pin` - GPIO番号
    /// * `baud_rate` - ボーレート（既定は3Mbps）
    pub fn new(
        uart: impl Peripheral<P = impl Uart> + 'd,
        tx_pin: i32,
        rx_pin: i32,
        baud_rate: u32,
    ) -> StreamResult<Self> {
        let config = UartConfig::new()
            .baudrate(Hertz(baud_rate))
            .tx_fifo_size(TX_BUFFER_SIZE)
            .rx_fifo_size(RX_BUFFER_SIZE);

        // ピン番号はボード定義の値で、他の用途には使われない
        let (tx, rx) = unsafe { (AnyIOPin::new(tx_pin), AnyIOPin::new(rx_pin)) };
        let driver = UartDriver::new(
            uart,
            tx,
            rx,
            Option::<AnyIOPin>::None,
            Option::<AnyIOPin>::None,
            &config,
        )
        .map_err(|e| StreamError::Link(format!("UART initialization failed: {}", e)))?;

        debug!(
            "UART initialized: {} baud, TX GPIO{}, RX GPIO{}",
            baud_rate, tx_pin, rx_pin
        );
        Ok(Self { driver })
    }
}

fn ticks(timeout_ms: u32) -> u32 {
    if timeout_ms == BLOCK {
        HAL_BLOCK
    } else {
        TickType::new_millis(timeout_ms as u64).ticks()
    }
}

impl SerialLink for UartLink<'_> {
    /// TXリングバッファに空きができるまでブロックします
    fn write(&mut self, data: &[u8], _timeout_ms: u32) -> StreamResult<usize> {
        Ok(self.driver.write(data)?)
    }

    fn read(&mut self, buffer: &mut [u8], timeout_ms: u32) -> StreamResult<usize> {
        Ok(self.driver.read(buffer, ticks(timeout_ms))?)
    }
}
