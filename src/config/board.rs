//! ボード別のピン配置とカメラ既定値

use std::fmt;
use std::str::FromStr;

/// ピン未接続を表す値（esp32-cameraの慣例に合わせる）
pub const PIN_NONE: i32 = -1;

/// 対応ボード
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoardId {
    /// 標準のトラッカー基板（ESP32 + OV2640）
    PaperFaceTracker,
    XiaoEsp32s3Sense,
}

impl BoardId {
    pub const ALL: [BoardId; 2] = [BoardId::PaperFaceTracker, BoardId::XiaoEsp32s3Sense];

    pub fn as_str(&self) -> &'static str {
        match self {
            BoardId::PaperFaceTracker => "paper-face-tracker",
            BoardId::XiaoEsp32s3Sense => "xiao-esp32s3-sense",
        }
    }

    /// ボードのプロファイルを取得します
    pub fn profile(&self) -> &'static BoardProfile {
        match self {
            BoardId::PaperFaceTracker => &PAPER_FACE_TRACKER,
            BoardId::XiaoEsp32s3Sense => &XIAO_ESP32S3_SENSE,
        }
    }
}

impl fmt::Display for BoardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownBoard(pub String);

impl FromStr for BoardId {
    type Err = UnknownBoard;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        BoardId::ALL
            .into_iter()
            .find(|id| id.as_str() == normalized)
            .ok_or_else(|| UnknownBoard(s.to_string()))
    }
}

/// カメラ解像度
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameSize {
    Qvga,
    Vga,
    Svga,
}

impl FrameSize {
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            FrameSize::Qvga => (320, 240),
            FrameSize::Vga => (640, 480),
            FrameSize::Svga => (800, 600),
        }
    }
}

/// DVPカメラのピン配置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CameraPins {
    pub pwdn: i32,
    pub reset: i32,
    pub xclk: i32,
    pub sda: i32,
    pub scl: i32,
    /// D0〜D7
    pub data: [i32; 8],
    pub vsync: i32,
    pub href: i32,
    pub pclk: i32,
}

/// ボードごとの固定パラメータ
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoardProfile {
    pub id: BoardId,
    pub camera: CameraPins,
    pub xclk_freq_hz: i32,
    pub frame_size: FrameSize,
    /// 0〜63（小さいほど高画質）
    pub jpeg_quality: i32,
    pub fb_count: usize,
    /// LED調光用PWMピン（ない場合はNone）
    pub led_pin: Option<i32>,
    pub uart_tx: i32,
    pub uart_rx: i32,
}

impl BoardProfile {
    pub fn frame_dimensions(&self) -> (u32, u32) {
        self.frame_size.dimensions()
    }
}

static PAPER_FACE_TRACKER: BoardProfile = BoardProfile {
    id: BoardId::PaperFaceTracker,
    camera: CameraPins {
        pwdn: 0,
        reset: PIN_NONE,
        xclk: 8,
        sda: 4,
        scl: 5,
        data: [8, 17, 19, 18, 20, 11, 10, 9],
        vsync: 6,
        href: 7,
        pclk: 15,
    },
    xclk_freq_hz: 20_000_000,
    frame_size: FrameSize::Qvga,
    jpeg_quality: 12,
    fb_count: 2,
    led_pin: Some(21),
    uart_tx: 1,
    uart_rx: 3,
};

static XIAO_ESP32S3_SENSE: BoardProfile = BoardProfile {
    id: BoardId::XiaoEsp32s3Sense,
    camera: CameraPins {
        pwdn: PIN_NONE,
        reset: PIN_NONE,
        xclk: 10,
        sda: 40,
        scl: 39,
        data: [15, 17, 18, 16, 14, 12, 11, 48],
        vsync: 38,
        href: 47,
        pclk: 13,
    },
    xclk_freq_hz: 20_000_000,
    frame_size: FrameSize::Qvga,
    jpeg_quality: 12,
    fb_count: 2,
    led_pin: Some(21),
    uart_tx: 43,
    uart_rx: 44,
};
