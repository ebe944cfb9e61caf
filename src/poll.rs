//! CA 端非同步狀態的輪詢原語。
//!
//! 挑戰驗證與訂單簽發都是 CA 側的非同步過程：客戶端反覆取狀態，
//! 直到抵達終結狀態為止。這裡把「取一次狀態」的結果表示成明確的
//! 標記結果（完成／仍在等待），致命錯誤走一般的 `Err` 路徑，
//! 等待間隔由取狀態方建議（例如 `Retry-After`），缺席時用預設值。

use std::time::Duration;

/// 單次狀態查詢的結果。
#[derive(Debug)]
pub enum PollOutcome<T> {
    /// 已抵達預期的終結狀態，攜帶結果。
    Ready(T),
    /// 仍在等待中；可附帶 CA 建議的等待時間。
    Waiting(Option<Duration>),
}

/// 反覆執行 `fetch` 直到取得終結狀態。
///
/// 沒有嘗試次數上限：CA 自身的逾時行為是唯一的邊界。`fetch` 回傳
/// 錯誤時立即中止並往外傳遞。
///
/// # 參數
///
/// - `default_interval`: `fetch` 未建議等待時間時使用的間隔。
/// - `wait`: 等待函式，正式流程傳入 `thread::sleep`。
/// - `fetch`: 取一次狀態。
pub fn poll_until<T, E, F, W>(
    default_interval: Duration,
    mut wait: W,
    mut fetch: F,
) -> Result<T, E>
where
    F: FnMut() -> Result<PollOutcome<T>, E>,
    W: FnMut(Duration),
{
    loop {
        match fetch()? {
            PollOutcome::Ready(value) => return Ok(value),
            PollOutcome::Waiting(hint) => wait(hint.unwrap_or(default_interval)),
        }
    }
}
