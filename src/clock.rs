//! 時鐘抽象與輪詢迴圈。
//!
//! 所有「等待後重試」的流程（nonce 重試、授權與訂單狀態輪詢、本地預檢）都透過
//! [`Clock`] 取得時間與進行休眠，因此測試可以注入 [`FakeClock`]，不需真的等待。

use std::{
    fmt,
    sync::Mutex,
    thread,
    time::{Duration, Instant},
};

/// 提供目前時間與休眠能力的時鐘。
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration);
}

/// 使用系統時間與 `thread::sleep` 的時鐘。
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// 測試用時鐘：`sleep` 只推進內部時間，並記錄休眠次數。
#[derive(Debug)]
pub struct FakeClock {
    base: Instant,
    state: Mutex<FakeState>,
}

#[derive(Debug, Default)]
struct FakeState {
    elapsed: Duration,
    sleeps: u32,
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            state: Mutex::new(FakeState::default()),
        }
    }

    /// 自建立以來累積的（虛擬）休眠時間。
    pub fn elapsed(&self) -> Duration {
        self.state.lock().map(|s| s.elapsed).unwrap_or_default()
    }

    /// 已呼叫 `sleep` 的次數。
    pub fn sleeps(&self) -> u32 {
        self.state.lock().map(|s| s.sleeps).unwrap_or_default()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Instant {
        self.base + self.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        if let Ok(mut state) = self.state.lock() {
            state.elapsed += duration;
            state.sleeps += 1;
        }
    }
}

/// 固定間隔的輪詢器。
///
/// [`Poller::run`] 每一輪先檢查是否逾時，再執行一次 `step`；`step` 回傳 `Some` 即結束，
/// 回傳 `None` 則休眠一個間隔後再試。[`Poller::run_after_sleep`] 則是先休眠、執行、再檢查。
/// 逾時設定為 `None` 表示不設上限。
pub struct Poller<'a> {
    clock: &'a dyn Clock,
    interval: Duration,
    timeout: Option<Duration>,
}

impl<'a> Poller<'a> {
    /// 以秒為單位建立輪詢器，`timeout_secs` 為 0 表示無上限。
    pub fn new(clock: &'a dyn Clock, interval: Duration, timeout_secs: u64) -> Self {
        let timeout = (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs));
        Self {
            clock,
            interval,
            timeout,
        }
    }

    pub fn unbounded(clock: &'a dyn Clock, interval: Duration) -> Self {
        Self::new(clock, interval, 0)
    }

    /// 執行輪詢。`step` 收到的參數為目前是第幾輪（從 0 起算）。
    pub fn run<T, E>(
        &self,
        mut step: impl FnMut(u32) -> Result<Option<T>, E>,
        on_timeout: impl FnOnce(Duration) -> E,
    ) -> Result<T, E> {
        let start = self.clock.now();
        let mut attempt = 0u32;

        loop {
            if let Some(limit) = self.timeout {
                if self.clock.now().duration_since(start) > limit {
                    return Err(on_timeout(limit));
                }
            }

            if let Some(value) = step(attempt)? {
                return Ok(value);
            }

            attempt += 1;
            self.clock.sleep(self.interval);
        }
    }

    /// 先休眠一個間隔再執行 `step`，之後才檢查是否逾時。
    ///
    /// 適用於剛送出請求、手上狀態已過時的情況：逾時前 `step` 至少會執行一次，
    /// 即使上限短於輪詢間隔。
    pub fn run_after_sleep<T, E>(
        &self,
        mut step: impl FnMut(u32) -> Result<Option<T>, E>,
        on_timeout: impl FnOnce(Duration) -> E,
    ) -> Result<T, E> {
        let start = self.clock.now();
        let mut attempt = 0u32;

        loop {
            self.clock.sleep(self.interval);

            if let Some(value) = step(attempt)? {
                return Ok(value);
            }
            attempt += 1;

            if let Some(limit) = self.timeout {
                if self.clock.now().duration_since(start) > limit {
                    return Err(on_timeout(limit));
                }
            }
        }
    }
}
