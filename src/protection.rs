use serde::Serialize;
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::{base64, jwk::Jwk, jwk::JwkError};

/// 定義保護頭生成過程中可能產生的錯誤類型。
#[derive(Debug, Error)]
pub enum ProtectionError {
    /// JSON 序列化錯誤
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// JWK 轉換錯誤
    #[error("JWK error: {0}")]
    Jwk(#[from] JwkError),
}

/// 自定義的結果型別，錯誤類型為 [`ProtectionError`]
type Result<T> = std::result::Result<T, ProtectionError>;

/// 簽名請求的身分表示方式。
///
/// ACME 規定保護頭必須恰好攜帶 `jwk` 與 `kid` 其中之一：
/// 帳戶建立請求送出完整公鑰，之後的所有請求改用帳戶 URL。
/// 以列舉表達讓「兩者皆有」在型別上不可能出現。
pub enum Identity<'a> {
    /// 完整公鑰，僅用於 newAccount 請求。
    Jwk(&'a Jwk),
    /// 帳戶識別 URL，用於其餘所有請求。
    Kid(&'a str),
}

/// JWS 保護頭，包含演算法、nonce、目標 URL 與請求身分。
#[derive(Debug, Serialize)]
pub struct ProtectedHeader {
    /// 簽章演算法
    alg: &'static str,
    /// 用於防止重放攻擊的一次性值
    nonce: String,
    /// 請求目標 URL
    url: String,
    /// 完整公鑰（與 `kid` 互斥）
    #[serde(skip_serializing_if = "Option::is_none")]
    jwk: Option<JsonValue>,
    /// 帳戶識別 URL（與 `jwk` 互斥）
    #[serde(skip_serializing_if = "Option::is_none")]
    kid: Option<String>,
}

impl ProtectedHeader {
    /// 建立一個新的保護頭。
    ///
    /// # 參數
    ///
    /// - `nonce`: 本次請求消耗的 nonce。
    /// - `url`: 請求目標 URL。
    /// - `identity`: 身分表示，見 [`Identity`]。
    pub fn new(nonce: impl Into<String>, url: impl Into<String>, identity: Identity<'_>) -> Result<Self> {
        let (jwk, kid) = match identity {
            Identity::Jwk(jwk) => (Some(jwk.to_value()?), None),
            Identity::Kid(kid) => (None, Some(kid.to_string())),
        };

        Ok(ProtectedHeader {
            alg: "RS256",
            nonce: nonce.into(),
            url: url.into(),
            jwk,
            kid,
        })
    }

    /// 將保護頭序列化後轉換為 URL-safe Base64 字串。
    pub fn to_base64(&self) -> Result<String> {
        let json = serde_json::to_string(self)?;
        Ok(base64::encode_url(json.as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use openssl::rsa::Rsa;

    use crate::key_pair::AccountKey;

    fn test_jwk() -> Jwk {
        let rsa = Rsa::generate(2048).unwrap();
        let key = AccountKey::from_pem(&rsa.private_key_to_pem().unwrap()).unwrap();
        Jwk::new(&key).unwrap()
    }

    #[test]
    fn test_jwk_identity_excludes_kid() {
        let jwk = test_jwk();
        let header =
            ProtectedHeader::new("nonce", "https://example.com/new-account", Identity::Jwk(&jwk))
                .unwrap();
        let json = serde_json::to_value(&header).unwrap();
        assert!(json.get("jwk").is_some());
        assert!(json.get("kid").is_none());
    }

    #[test]
    fn test_kid_identity_excludes_jwk() {
        let header = ProtectedHeader::new(
            "nonce",
            "https://example.com/order",
            Identity::Kid("https://example.com/acct/1"),
        )
        .unwrap();
        let json = serde_json::to_value(&header).unwrap();
        assert!(json.get("jwk").is_none());
        assert_eq!(json["kid"], "https://example.com/acct/1");
    }

    #[test]
    fn test_header_carries_alg_nonce_and_url() {
        let header =
            ProtectedHeader::new("abc-123", "https://example.com/x", Identity::Kid("kid")).unwrap();
        let json = serde_json::to_value(&header).unwrap();
        assert_eq!(json["alg"], "RS256");
        assert_eq!(json["nonce"], "abc-123");
        assert_eq!(json["url"], "https://example.com/x");
    }
}
