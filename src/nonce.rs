use reqwest::header::HeaderMap;

/// 防重放 nonce 的持有狀態。
///
/// 整個行程只存在一份，由 session 獨佔：每次簽名請求以 [`take`]
/// 消耗當前值，每個回應（無論成功與否）以 [`absorb`] 補進下一個值，
/// 同一個 nonce 不會被使用兩次。
///
/// [`take`]: NonceState::take
/// [`absorb`]: NonceState::absorb
#[derive(Debug, Default)]
pub struct NonceState {
    current: Option<String>,
}

impl NonceState {
    /// 回應標頭中攜帶 nonce 的欄位名稱。
    pub const REPLAY_NONCE: &'static str = "Replay-Nonce";

    /// 建立一個空的 nonce 狀態。
    pub fn new() -> Self {
        Self::default()
    }

    /// 取出並清空當前持有的 nonce。
    pub fn take(&mut self) -> Option<String> {
        self.current.take()
    }

    /// 覆寫當前持有的 nonce。
    pub fn store(&mut self, value: impl Into<String>) {
        self.current = Some(value.into());
    }

    /// 從回應標頭擷取 `Replay-Nonce` 並存入狀態。
    ///
    /// 標頭不存在或值非 ASCII 時維持原狀，留待下次請求重新向
    /// CA 取得。
    pub fn absorb(&mut self, headers: &HeaderMap) {
        if let Some(value) = headers
            .get(Self::REPLAY_NONCE)
            .and_then(|v| v.to_str().ok())
        {
            self.current = Some(value.to_string());
        }
    }

    /// 查看當前持有的 nonce，不改變狀態。
    pub fn peek(&self) -> Option<&str> {
        self.current.as_deref()
    }
}
