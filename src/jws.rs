//! JWS 信封的組裝與序列化。

use serde::Serialize;
use thiserror::Error;

/// 表示一個 JSON Web Signature (JWS) 物件。
///
/// 三個部分皆為已完成 URL-safe Base64 編碼的字串；`payload` 為空字串時
/// 代表 POST-as-GET 請求。
#[derive(Serialize, Debug)]
pub struct Jws {
    /// 對應 JWS 中的 "protected" 欄位，包含已編碼的保護頭。
    #[serde(rename = "protected")]
    header: String,
    /// JWS 中的 payload 部分。
    payload: String,
    /// JWS 中的簽名部分。
    signature: String,
}

/// 表示與 JWS 相關的錯誤。
#[derive(Error, Debug)]
pub enum JwsError {
    /// JSON 序列化過程中發生錯誤時回傳此錯誤。
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

type Result<T> = std::result::Result<T, JwsError>;

impl Jws {
    /// 以三段已編碼的字串組成 `Jws` 實例。
    pub fn new(
        header_b64: impl Into<String>,
        payload_b64: impl Into<String>,
        signature_b64: impl Into<String>,
    ) -> Self {
        Jws {
            header: header_b64.into(),
            payload: payload_b64.into(),
            signature: signature_b64.into(),
        }
    }

    /// 將 `Jws` 實例序列化為 JSON 字串，作為 `application/jose+json`
    /// 請求本體送出。
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
