//! esp32-cameraドライバーによる実機実装

use std::ptr::{addr_of, NonNull};
use std::time::Duration;

use esp_idf_svc::hal::gpio::OutputPin;
use esp_idf_svc::hal::ledc::{
    config::TimerConfig, LedcChannel, LedcDriver, LedcTimer, LedcTimerDriver, Resolution,
};
use esp_idf_svc::hal::peripheral::Peripheral;
use esp_idf_svc::hal::prelude::*;
use esp_idf_svc::sys::camera;
use log::{info, warn};

use super::control::{CameraControl, ControlError, LedDimmer, SensorSetting};
use super::{CaptureError, FrameMeta, FramePool, PixelFormat, Timestamp};
use crate::config::{BoardProfile, FrameSize};

/// ドライバーが保持するフレームバッファへのハンドル
pub struct EspFrame(NonNull<camera::camera_fb_t>);

// esp_camera_fb_returnはどのタスクから呼んでもよい
unsafe impl Send for EspFrame {}

impl EspFrame {
    fn raw(&self) -> *mut camera::camera_fb_t {
        self.0.as_ptr()
    }
}

fn frame_size(size: FrameSize) -> camera::framesize_t {
    match size {
        FrameSize::Qvga => camera::framesize_t_FRAMESIZE_QVGA,
        FrameSize::Vga => camera::framesize_t_FRAMESIZE_VGA,
        FrameSize::Svga => camera::framesize_t_FRAMESIZE_SVGA,
    }
}

fn pixel_format(format: camera::pixformat_t) -> PixelFormat {
    match format {
        camera::pixformat_t_PIXFORMAT_JPEG => PixelFormat::Jpeg,
        camera::pixformat_t_PIXFORMAT_RGB565 => PixelFormat::Rgb565,
        other => PixelFormat::Other(other),
    }
}

/// esp32-cameraのフレームバッファプール
///
/// `esp_camera_fb_get`はドライバー内部のタイムアウトで待機するため、
/// `grab`の`timeout`は使用されません。
pub struct EspCameraPool {
    _private: (),
}

impl EspCameraPool {
    /// ボードのプロファイルに従ってカメラを初期化します
    pub fn init(profile: &BoardProfile) -> Result<Self, CaptureError> {
        let pins = &profile.camera;
        let mut config = camera::camera_config_t {
            pin_pwdn: pins.pwdn,
            pin_reset: pins.reset,
            pin_xclk: pins.xclk,
            pin_d0: pins.data[0],
            pin_d1: pins.data[1],
            pin_d2: pins.data[2],
            pin_d3: pins.data[3],
            pin_d4: pins.data[4],
            pin_d5: pins.data[5],
            pin_d6: pins.data[6],
            pin_d7: pins.data[7],
            pin_vsync: pins.vsync,
            pin_href: pins.href,
            pin_pclk: pins.pclk,
            xclk_freq_hz: profile.xclk_freq_hz,
            ledc_timer: camera::ledc_timer_t_LEDC_TIMER_0,
            ledc_channel: camera::ledc_channel_t_LEDC_CHANNEL_0,
            pixel_format: camera::pixformat_t_PIXFORMAT_JPEG,
            frame_size: frame_size(profile.frame_size),
            jpeg_quality: profile.jpeg_quality,
            fb_count: profile.fb_count,
            fb_location: camera::camera_fb_location_t_CAMERA_FB_IN_PSRAM,
            grab_mode: camera::camera_grab_mode_t_CAMERA_GRAB_LATEST,
            ..Default::default()
        };
        config.__bindgen_anon_1.pin_sccb_sda = pins.sda;
        config.__bindgen_anon_2.pin_sccb_scl = pins.scl;

        let err = unsafe { camera::esp_camera_init(&config) };
        if err != camera::ESP_OK {
            return Err(CaptureError::Init(format!("esp_camera_init returned 0x{:x}", err)));
        }

        let (width, height) = profile.frame_dimensions();
        info!(
            "Camera initialized: {} {}x{} quality={} fb_count={}",
            profile.id, width, height, profile.jpeg_quality, profile.fb_count
        );
        Ok(Self { _private: () })
    }
}

impl Drop for EspCameraPool {
    fn drop(&mut self) {
        let err = unsafe { camera::esp_camera_deinit() };
        if err != camera::ESP_OK {
            warn!("esp_camera_deinit returned 0x{:x}", err);
        }
    }
}

impl FramePool for EspCameraPool {
    type Slot = EspFrame;

    fn grab(&self, _timeout: Duration) -> Result<EspFrame, CaptureError> {
        let fb = unsafe { camera::esp_camera_fb_get() };
        NonNull::new(fb).map(EspFrame).ok_or(CaptureError::Unavailable)
    }

    fn data<'a>(&'a self, slot: &'a EspFrame) -> &'a [u8] {
        let fb = slot.raw();
        // フィールドが整列していない場合があるためread_unalignedで読む
        unsafe {
            let buf = addr_of!((*fb).buf).read_unaligned();
            let len = addr_of!((*fb).len).read_unaligned();
            if buf.is_null() {
                &[]
            } else {
                std::slice::from_raw_parts(buf, len)
            }
        }
    }

    fn meta(&self, slot: &EspFrame) -> FrameMeta {
        let fb = slot.raw();
        unsafe {
            let timestamp = addr_of!((*fb).timestamp).read_unaligned();
            FrameMeta {
                len: addr_of!((*fb).len).read_unaligned(),
                width: addr_of!((*fb).width).read_unaligned() as u32,
                height: addr_of!((*fb).height).read_unaligned() as u32,
                format: pixel_format(addr_of!((*fb).format).read_unaligned()),
                timestamp: Timestamp {
                    secs: timestamp.tv_sec as i64,
                    micros: timestamp.tv_usec as i64,
                },
            }
        }
    }

    fn recycle(&self, slot: EspFrame) {
        unsafe { camera::esp_camera_fb_return(slot.raw()) };
    }
}

/// esp32-cameraのセンサー制御
pub struct EspCameraControl {
    sensor: NonNull<camera::sensor_t>,
}

unsafe impl Send for EspCameraControl {}

impl EspCameraControl {
    /// カメラ初期化後に呼び出してください
    pub fn new() -> Result<Self, ControlError> {
        let sensor = unsafe { camera::esp_camera_sensor_get() };
        NonNull::new(sensor)
            .map(|sensor| Self { sensor })
            .ok_or(ControlError::NotAvailable)
    }

    fn call(
        &mut self,
        name: &'static str,
        f: Option<unsafe extern "C" fn(*mut camera::sensor_t, i32) -> i32>,
        value: i32,
    ) -> Result<(), ControlError> {
        let f = f.ok_or(ControlError::Unsupported(name))?;
        let code = unsafe { f(self.sensor.as_ptr(), value) };
        if code == 0 {
            Ok(())
        } else {
            Err(ControlError::Sensor { name, code })
        }
    }
}

impl CameraControl for EspCameraControl {
    fn apply(&mut self, setting: SensorSetting) -> Result<(), ControlError> {
        setting.validate()?;
        let name = setting.name();
        let s = unsafe { self.sensor.as_ref() };
        let (f, value) = match setting {
            SensorSetting::Brightness(v) => (s.set_brightness, v),
            SensorSetting::Contrast(v) => (s.set_contrast, v),
            SensorSetting::Saturation(v) => (s.set_saturation, v),
            SensorSetting::AeLevel(v) => (s.set_ae_level, v),
            SensorSetting::Exposure(v) => (s.set_aec_value, v),
            SensorSetting::Gain(v) => (s.set_agc_gain, v),
            SensorSetting::AutoExposure(on) => (s.set_exposure_ctrl, on as i32),
            SensorSetting::AutoGain(on) => (s.set_gain_ctrl, on as i32),
            SensorSetting::AutoWhiteBalance(on) => (s.set_whitebal, on as i32),
            SensorSetting::HorizontalMirror(on) => (s.set_hmirror, on as i32),
            SensorSetting::VerticalFlip(on) => (s.set_vflip, on as i32),
        };
        self.call(name, f, value)
    }
}

/// LEDCによる照明LEDの調光（8ビット、カメラのXCLKとは別タイマー）
pub struct LedcDimmer<'d> {
    driver: LedcDriver<'d>,
    level: u8,
}

impl<'d> LedcDimmer<'d> {
    pub fn new<C, T>(
        channel: impl Peripheral<P = C> + 'd,
        timer: impl Peripheral<P = T> + 'd,
        pin: impl Peripheral<P = impl OutputPin> + 'd,
    ) -> Result<Self, ControlError>
    where
        C: LedcChannel<SpeedMode = <T as LedcTimer>::SpeedMode>,
        T: LedcTimer + 'd,
    {
        let timer_config = TimerConfig::default()
            .frequency(5.kHz().into())
            .resolution(Resolution::Bits8);
        let timer = LedcTimerDriver::new(timer, &timer_config)
            .map_err(|e| ControlError::Pwm(format!("{:?}", e)))?;
        let driver = LedcDriver::new(channel, timer, pin)
            .map_err(|e| ControlError::Pwm(format!("{:?}", e)))?;
        let mut dimmer = Self { driver, level: 0 };
        dimmer.set_level(0)?;
        Ok(dimmer)
    }
}

impl LedDimmer for LedcDimmer<'_> {
    fn set_level(&mut self, level: u8) -> Result<(), ControlError> {
        self.driver
            .set_duty(level as u32)
            .map_err(|e| ControlError::Pwm(format!("{:?}", e)))?;
        self.level = level;
        Ok(())
    }

    fn level(&self) -> u8 {
        self.level
    }
}
