use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::{base64, key_pair::AccountKey};

/// JWK 相關操作的錯誤類型。
#[derive(Debug, Error)]
pub enum JwkError {
    /// 不支援的演算法。
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),
    /// 金鑰轉換失敗。
    #[error("Failed to convert key: {0}")]
    KeyConversionError(String),
    /// 序列化錯誤。
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// JSON Web Key (JWK) 的封裝，目前僅支援 RSA 格式。
#[derive(Debug, Serialize)]
#[serde(tag = "kty")]
pub enum Jwk {
    /// RSA 格式的 JWK。
    #[serde(rename = "RSA")]
    Rsa(RsaJwk),
}

/// RSA 格式的 JWK 結構，僅包含公開參數。
#[derive(Debug, Serialize)]
pub struct RsaJwk {
    n: String,
    e: String,
}

impl RsaJwk {
    fn from_account_key(key: &AccountKey) -> Result<Self, JwkError> {
        let rsa = key
            .pub_key
            .rsa()
            .map_err(|e| JwkError::KeyConversionError(e.to_string()))?;

        let n = base64::encode_url(rsa.n().to_vec());
        let e = base64::encode_url(rsa.e().to_vec());

        Ok(RsaJwk { n, e })
    }

    /// 產生符合 ACME 協議 thumbprint 要求的 JSON 表示。
    ///
    /// 欄位順序固定為 `e`、`kty`、`n`，與 RFC 7638 的字典序一致，
    /// 確保雜湊輸入在不同執行間完全相同。
    pub fn to_acme_json(&self) -> Result<String, JwkError> {
        let mut map = Map::new();
        map.insert("e".to_string(), Value::String(self.e.clone()));
        map.insert("kty".to_string(), Value::String("RSA".to_string()));
        map.insert("n".to_string(), Value::String(self.n.clone()));

        serde_json::to_string(&Value::Object(map)).map_err(JwkError::from)
    }
}

impl Jwk {
    /// 根據帳戶金鑰建立對應的 JWK。
    ///
    /// # 錯誤
    ///
    /// 金鑰演算法不受支援時回傳 `JwkError::UnsupportedAlgorithm`。
    pub fn new(key: &AccountKey) -> Result<Self, JwkError> {
        match key.alg_name.as_str() {
            "RSA" => Ok(Jwk::Rsa(RsaJwk::from_account_key(key)?)),
            alg => Err(JwkError::UnsupportedAlgorithm(alg.to_string())),
        }
    }

    /// 將 JWK 序列化為 JSON 值，供 JWS 保護頭的 `jwk` 欄位使用。
    pub fn to_value(&self) -> Result<Value, JwkError> {
        serde_json::to_value(self).map_err(JwkError::from)
    }

    /// 產生 thumbprint 計算所需的標準 JSON 表示。
    pub fn to_acme_json(&self) -> Result<String, JwkError> {
        match self {
            Jwk::Rsa(jwk) => jwk.to_acme_json(),
        }
    }
}
