use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use super::{CaptureError, FrameMeta, FramePool, PixelFormat, Timestamp};

/// 返却されたバッファに書き込まれる値
pub const POISON_BYTE: u8 = 0xDE;

/// テスト用の合成フレームプール
///
/// 実際のカメラを使わずに、決められたフレーム列を返します。
/// `None`を積むとその回の取得が失敗します（一時的なキャプチャ失敗）。
/// 返却されたスロットは`POISON_BYTE`で塗りつぶされます。
#[derive(Debug)]
pub struct SyntheticFramePool {
    state: Mutex<PoolState>,
    slot_freed: Condvar,
    capacity: usize,
    width: u32,
    height: u32,
}

#[derive(Debug)]
struct PoolState {
    script: VecDeque<Option<Vec<u8>>>,
    repeat_len: Option<usize>,
    free: Vec<Vec<u8>>,
    in_use: usize,
    grabbed: usize,
    recycled: usize,
    sequence: u64,
    closed: bool,
}

/// 合成フレームのスロット
#[derive(Debug)]
pub struct SyntheticSlot {
    buffer: Vec<u8>,
    meta: FrameMeta,
}

impl SyntheticFramePool {
    /// 指定長のフレームを無限に返すプール
    pub fn repeating(capacity: usize, frame_len: usize) -> Self {
        Self::build(capacity, VecDeque::new(), Some(frame_len))
    }

    /// スクリプトのフレームを順に返し、尽きたら`Unavailable`を返すプール
    pub fn scripted(capacity: usize, frames: Vec<Option<Vec<u8>>>) -> Self {
        Self::build(capacity, frames.into(), None)
    }

    fn build(capacity: usize, script: VecDeque<Option<Vec<u8>>>, repeat_len: Option<usize>) -> Self {
        Self {
            state: Mutex::new(PoolState {
                script,
                repeat_len,
                free: (0..capacity).map(|_| Vec::new()).collect(),
                in_use: 0,
                grabbed: 0,
                recycled: 0,
                sequence: 0,
                closed: false,
            }),
            slot_freed: Condvar::new(),
            capacity,
            width: 320,
            height: 240,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 貸出中のスロット数
    pub fn in_use(&self) -> usize {
        self.lock().in_use
    }

    pub fn grabbed(&self) -> usize {
        self.lock().grabbed
    }

    pub fn recycled(&self) -> usize {
        self.lock().recycled
    }

    /// 以降の取得を`Closed`で失敗させます
    pub fn close(&self) {
        self.lock().closed = true;
        self.slot_freed.notify_all();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl FramePool for SyntheticFramePool {
    type Slot = SyntheticSlot;

    fn grab(&self, timeout: Duration) -> Result<SyntheticSlot, CaptureError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();

        while state.free.is_empty() && !state.closed {
            let now = Instant::now();
            if now >= deadline {
                return Err(CaptureError::Unavailable);
            }
            state = self
                .slot_freed
                .wait_timeout(state, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|e| e.into_inner().0);
        }
        if state.closed {
            return Err(CaptureError::Closed);
        }

        let payload = match state.script.pop_front() {
            Some(Some(frame)) => frame,
            Some(None) => return Err(CaptureError::Unavailable),
            None => match state.repeat_len {
                Some(len) => {
                    let fill = (state.sequence % 251) as u8;
                    vec![fill; len]
                }
                None => return Err(CaptureError::Unavailable),
            },
        };

        let mut buffer = state.free.pop().unwrap_or_default();
        buffer.clear();
        buffer.extend_from_slice(&payload);

        let sequence = state.sequence;
        state.sequence += 1;
        state.in_use += 1;
        state.grabbed += 1;

        let meta = FrameMeta {
            len: buffer.len(),
            width: self.width,
            height: self.height,
            format: PixelFormat::Jpeg,
            timestamp: Timestamp {
                secs: 1_000 + (sequence / 10) as i64,
                micros: ((sequence % 10) * 100_000) as i64,
            },
        };
        Ok(SyntheticSlot { buffer, meta })
    }

    fn data<'a>(&'a self, slot: &'a SyntheticSlot) -> &'a [u8] {
        &slot.buffer
    }

    fn meta(&self, slot: &SyntheticSlot) -> FrameMeta {
        slot.meta
    }

    fn recycle(&self, slot: SyntheticSlot) {
        let mut buffer = slot.buffer;
        buffer.iter_mut().for_each(|b| *b = POISON_BYTE);
        let mut state = self.lock();
        state.in_use = state.in_use.saturating_sub(1);
        state.recycled += 1;
        state.free.push(buffer);
        drop(state);
        self.slot_freed.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripted_frames_are_returned_in_order() {
        let pool = SyntheticFramePool::scripted(2, vec![Some(vec![1, 2]), None, Some(vec![3])]);
        let a = pool.grab(Duration::ZERO).unwrap();
        assert_eq!(pool.data(&a), &[1, 2]);
        pool.recycle(a);

        assert_eq!(pool.grab(Duration::ZERO).err(), Some(CaptureError::Unavailable));

        let b = pool.grab(Duration::ZERO).unwrap();
        assert_eq!(pool.data(&b), &[3]);
        pool.recycle(b);

        assert_eq!(pool.grab(Duration::ZERO).err(), Some(CaptureError::Unavailable));
    }

    #[test]
    fn recycled_slot_is_poisoned_before_reuse() {
        let pool = SyntheticFramePool::repeating(1, 4);
        let slot = pool.grab(Duration::ZERO).unwrap();
        pool.recycle(slot);

        let state = pool.lock();
        assert!(state.free[0].iter().all(|b| *b == POISON_BYTE));
    }

    #[test]
    fn closed_pool_rejects_grab() {
        let pool = SyntheticFramePool::repeating(1, 4);
        pool.close();
        assert_eq!(pool.grab(Duration::ZERO).err(), Some(CaptureError::Closed));
    }

    #[test]
    fn timestamps_advance_per_frame() {
        let pool = SyntheticFramePool::repeating(1, 1);
        let first = pool.grab(Duration::ZERO).unwrap();
        let t0 = pool.meta(&first).timestamp;
        pool.recycle(first);
        let second = pool.grab(Duration::ZERO).unwrap();
        let t1 = pool.meta(&second).timestamp;
        assert_eq!(t0.to_string(), "1000.000000");
        assert_eq!(t1.to_string(), "1000.100000");
    }
}
