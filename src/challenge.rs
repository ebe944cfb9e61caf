use openssl::hash::{hash, MessageDigest};
use serde::Deserialize;
use thiserror::Error;

use crate::base64;

/// 定義與挑戰（Challenge）相關的錯誤類型。
#[derive(Debug, Error)]
pub enum ChallengeError {
    #[error("Digest error: {0}")]
    Digest(#[from] openssl::error::ErrorStack),
}

/// 表示 ACME 挑戰的類型。
///
/// 本客戶端只會選用 DNS-01，其餘類型僅為完整反序列化授權資源而保留；
/// 未知類型落入 `Unknown` 而不是讓整個授權解析失敗。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChallengeType {
    Http01,
    Dns01,
    TlsAlpn01,
    Unknown,
}

impl ChallengeType {
    /// 根據字串返回對應的挑戰類型。
    fn from_str(s: &str) -> Self {
        match s {
            "http-01" => Self::Http01,
            "dns-01" => Self::Dns01,
            "tls-alpn-01" => Self::TlsAlpn01,
            _ => Self::Unknown,
        }
    }

    /// 返回挑戰類型對應的字串表示。
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http01 => "http-01",
            Self::Dns01 => "dns-01",
            Self::TlsAlpn01 => "tls-alpn-01",
            Self::Unknown => "unknown",
        }
    }
}

impl<'de> Deserialize<'de> for ChallengeType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::from_str(&raw))
    }
}

/// 表示 ACME 挑戰的狀態。
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeStatus {
    Pending,
    Processing,
    Valid,
    Invalid,
}

impl ChallengeStatus {
    /// 該狀態是否仍會繼續變化。`pending` 與 `processing` 都是
    /// 等待中的狀態，輪詢時視為可重試。
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Pending | Self::Processing)
    }
}

/// CA 回傳的問題文件，挑戰失敗時附帶於挑戰資源中。
#[derive(Debug, Clone, Deserialize)]
pub struct Problem {
    #[serde(rename = "type")]
    pub problem_type: Option<String>,
    pub detail: Option<String>,
}

/// 表示一個 ACME 驗證挑戰資源。
#[derive(Debug, Clone, Deserialize)]
pub struct Challenge {
    /// 挑戰類型
    #[serde(rename = "type")]
    pub challenge_type: ChallengeType,
    /// 挑戰資源的 URL
    pub url: String,
    /// 挑戰 token，用於生成 key authorization
    pub token: String,
    /// 當前挑戰狀態
    pub status: ChallengeStatus,
    /// 驗證失敗時 CA 附帶的問題文件
    #[serde(default)]
    pub error: Option<Problem>,
}

impl Challenge {
    /// 組合挑戰的 key authorization 字串：`token "." thumbprint`。
    pub fn key_authorization(&self, thumbprint: &str) -> String {
        format!("{}.{}", self.token, thumbprint)
    }

    /// 計算 DNS TXT 記錄值：key authorization 的 SHA-256 摘要，
    /// 以 URL-safe Base64 編碼。
    pub fn dns_txt_digest(&self, thumbprint: &str) -> Result<String, ChallengeError> {
        let key_authorization = self.key_authorization(thumbprint);
        let digest = hash(MessageDigest::sha256(), key_authorization.as_bytes())?;
        Ok(base64::encode_url(&*digest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use openssl::sha::sha256;

    fn dns_challenge(token: &str) -> Challenge {
        Challenge {
            challenge_type: ChallengeType::Dns01,
            url: "https://ca.example/chal/1".to_string(),
            token: token.to_string(),
            status: ChallengeStatus::Pending,
            error: None,
        }
    }

    #[test]
    fn test_key_authorization_shape() {
        let challenge = dns_challenge("abc123");
        assert_eq!(
            challenge.key_authorization("THUMB"),
            "abc123.THUMB"
        );
    }

    #[test]
    fn test_dns_txt_digest_is_reproducible() {
        let challenge = dns_challenge("abc123");
        let thumbprint = "6nicxzh6WETQlrvdchkz-U3e3DOQZ4heJKU63rfqMqQ";

        let expected = base64::encode_url(sha256(
            format!("abc123.{}", thumbprint).as_bytes(),
        ));
        assert_eq!(challenge.dns_txt_digest(thumbprint).unwrap(), expected);
        // 同一組輸入重算結果不變
        assert_eq!(
            challenge.dns_txt_digest(thumbprint).unwrap(),
            challenge.dns_txt_digest(thumbprint).unwrap()
        );
    }

    #[test]
    fn test_unknown_challenge_type_deserializes() {
        let json = r#"{
            "type": "quantum-01",
            "url": "https://ca.example/chal/9",
            "token": "tok",
            "status": "pending"
        }"#;
        let challenge: Challenge = serde_json::from_str(json).unwrap();
        assert_eq!(challenge.challenge_type, ChallengeType::Unknown);
    }

    #[test]
    fn test_status_retryability() {
        assert!(ChallengeStatus::Pending.is_retryable());
        assert!(ChallengeStatus::Processing.is_retryable());
        assert!(!ChallengeStatus::Valid.is_retryable());
        assert!(!ChallengeStatus::Invalid.is_retryable());
    }
}
