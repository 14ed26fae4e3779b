use std::time::Duration;

/// 再接続の待ち時間の決め方
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// 待たずに再接続
    Immediate,
    /// `base * 2^(attempt-1)`（上限`max`）
    Exponential { base: Duration, max: Duration },
}

/// 接続済み状態からの切断時に適用する再接続ポリシー
///
/// 既定値は回数無制限・即時再接続です。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// `None`は無制限
    pub max_attempts: Option<u32>,
    pub backoff: Backoff,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: None,
            backoff: Backoff::Immediate,
        }
    }
}

impl ReconnectPolicy {
    pub fn bounded(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts: Some(max_attempts),
            backoff,
        }
    }

    /// `attempt`回目（1始まり）の再接続が許可されるか
    pub fn allows(&self, attempt: u32) -> bool {
        match self.max_attempts {
            None => true,
            Some(max) => attempt <= max,
        }
    }

    /// `attempt`回目（1始まり）の再接続前の待ち時間
    pub fn delay(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        match self.backoff {
            Backoff::Immediate => Duration::ZERO,
            Backoff::Exponential { base, max } => {
                let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
                base.saturating_mul(factor).min(max)
            }
        }
    }
}
