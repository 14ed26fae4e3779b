//! カメラセンサーとLEDの制御インターフェース

use std::ops::RangeInclusive;

/// 露出値の範囲（OV2640のAEC値）
pub const EXPOSURE_RANGE: RangeInclusive<i32> = 0..=1200;
/// 明るさ・コントラスト・彩度・AEレベルの範囲
pub const LEVEL_RANGE: RangeInclusive<i32> = -2..=2;
/// ゲインの範囲
pub const GAIN_RANGE: RangeInclusive<i32> = 0..=30;
/// LEDの明るさ（8ビットPWMデューティ）
pub const LED_RANGE: RangeInclusive<i32> = 0..=255;

/// 制御エラー
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ControlError {
    #[error("{name} out of range: {value} (expected {min}..={max})")]
    OutOfRange {
        name: &'static str,
        value: i32,
        min: i32,
        max: i32,
    },
    #[error("sensor does not support {0}")]
    Unsupported(&'static str),
    #[error("sensor rejected {name} (code {code})")]
    Sensor { name: &'static str, code: i32 },
    #[error("camera sensor not available")]
    NotAvailable,
    #[error("LED PWM error: {0}")]
    Pwm(String),
}

fn check_range(name: &'static str, value: i32, range: &RangeInclusive<i32>) -> Result<(), ControlError> {
    if range.contains(&value) {
        Ok(())
    } else {
        Err(ControlError::OutOfRange {
            name,
            value,
            min: *range.start(),
            max: *range.end(),
        })
    }
}

/// 名前付きのセンサー設定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorSetting {
    /// -2..=2
    Brightness(i32),
    /// -2..=2
    Contrast(i32),
    /// -2..=2
    Saturation(i32),
    /// 自動露出の補正レベル -2..=2
    AeLevel(i32),
    /// 手動露出値 0..=1200（自動露出が無効なときに有効）
    Exposure(i32),
    /// 手動ゲイン 0..=30
    Gain(i32),
    AutoExposure(bool),
    AutoGain(bool),
    AutoWhiteBalance(bool),
    HorizontalMirror(bool),
    VerticalFlip(bool),
}

impl SensorSetting {
    pub fn name(&self) -> &'static str {
        match self {
            SensorSetting::Brightness(_) => "brightness",
            SensorSetting::Contrast(_) => "contrast",
            SensorSetting::Saturation(_) => "saturation",
            SensorSetting::AeLevel(_) => "ae_level",
            SensorSetting::Exposure(_) => "exposure",
            SensorSetting::Gain(_) => "gain",
            SensorSetting::AutoExposure(_) => "auto_exposure",
            SensorSetting::AutoGain(_) => "auto_gain",
            SensorSetting::AutoWhiteBalance(_) => "auto_white_balance",
            SensorSetting::HorizontalMirror(_) => "hmirror",
            SensorSetting::VerticalFlip(_) => "vflip",
        }
    }

    /// 値が仕様範囲内か検証します
    pub fn validate(&self) -> Result<(), ControlError> {
        let name = self.name();
        match *self {
            SensorSetting::Brightness(v)
            | SensorSetting::Contrast(v)
            | SensorSetting::Saturation(v)
            | SensorSetting::AeLevel(v) => check_range(name, v, &LEVEL_RANGE),
            SensorSetting::Exposure(v) => check_range(name, v, &EXPOSURE_RANGE),
            SensorSetting::Gain(v) => check_range(name, v, &GAIN_RANGE),
            SensorSetting::AutoExposure(_)
            | SensorSetting::AutoGain(_)
            | SensorSetting::AutoWhiteBalance(_)
            | SensorSetting::HorizontalMirror(_)
            | SensorSetting::VerticalFlip(_) => Ok(()),
        }
    }
}

/// カメラセンサーの制御
///
/// 名前付き操作は`apply`に集約します。
pub trait CameraControl: Send {
    fn apply(&mut self, setting: SensorSetting) -> Result<(), ControlError>;

    /// 手動露出に切り替えて露出値を設定します
    fn set_manual_exposure(&mut self, exposure: i32) -> Result<(), ControlError> {
        let setting = SensorSetting::Exposure(exposure);
        setting.validate()?;
        self.apply(SensorSetting::AutoExposure(false))?;
        self.apply(setting)
    }
}

/// 照明LEDの調光
pub trait LedDimmer: Send {
    fn set_level(&mut self, level: u8) -> Result<(), ControlError>;

    fn level(&self) -> u8;
}

impl<T: LedDimmer + ?Sized> LedDimmer for Box<T> {
    fn set_level(&mut self, level: u8) -> Result<(), ControlError> {
        (**self).set_level(level)
    }

    fn level(&self) -> u8 {
        (**self).level()
    }
}

/// 制御チャネルの整数値をLEDレベルに変換します
pub fn led_level(value: i32) -> Result<u8, ControlError> {
    check_range("led_brightness", value, &LED_RANGE)?;
    Ok(value as u8)
}

/// LEDを持たないボード用
#[derive(Debug, Default)]
pub struct NoLed {
    level: u8,
}

impl LedDimmer for NoLed {
    fn set_level(&mut self, level: u8) -> Result<(), ControlError> {
        self.level = level;
        Ok(())
    }

    fn level(&self) -> u8 {
        self.level
    }
}

#[cfg(not(feature = "esp"))]
pub mod mock {
    use std::sync::{Arc, Mutex};

    use super::*;

    /// テスト用: 適用された設定を記録するセンサー
    #[derive(Debug, Clone, Default)]
    pub struct RecordingCameraControl {
        pub applied: Arc<Mutex<Vec<SensorSetting>>>,
        pub fail: Arc<Mutex<bool>>,
    }

    impl RecordingCameraControl {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn applied(&self) -> Vec<SensorSetting> {
            self.applied.lock().unwrap().clone()
        }

        pub fn set_fail(&self, enable: bool) {
            *self.fail.lock().unwrap() = enable;
        }
    }

    impl CameraControl for RecordingCameraControl {
        fn apply(&mut self, setting: SensorSetting) -> Result<(), ControlError> {
            setting.validate()?;
            if *self.fail.lock().unwrap() {
                return Err(ControlError::Sensor {
                    name: setting.name(),
                    code: -1,
                });
            }
            self.applied.lock().unwrap().push(setting);
            Ok(())
        }
    }

    /// テスト用: レベルを共有するLED
    #[derive(Debug, Clone, Default)]
    pub struct MockLed {
        pub level: Arc<Mutex<u8>>,
    }

    impl LedDimmer for MockLed {
        fn set_level(&mut self, level: u8) -> Result<(), ControlError> {
            *self.level.lock().unwrap() = level;
            Ok(())
        }

        fn level(&self) -> u8 {
            *self.level.lock().unwrap()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setting_ranges_are_enforced() {
        assert!(SensorSetting::Exposure(1200).validate().is_ok());
        assert_eq!(
            SensorSetting::Exposure(1201).validate(),
            Err(ControlError::OutOfRange {
                name: "exposure",
                value: 1201,
                min: 0,
                max: 1200,
            })
        );
        assert!(SensorSetting::Brightness(-2).validate().is_ok());
        assert!(SensorSetting::Brightness(3).validate().is_err());
        assert!(SensorSetting::Gain(31).validate().is_err());
        assert!(SensorSetting::VerticalFlip(true).validate().is_ok());
    }

    #[test]
    fn led_level_bounds() {
        assert_eq!(led_level(0), Ok(0));
        assert_eq!(led_level(255), Ok(255));
        assert!(led_level(256).is_err());
        assert!(led_level(-1).is_err());
    }
}
