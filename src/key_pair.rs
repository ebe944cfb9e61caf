use std::{io, path::Path};

use openssl::{
    error::ErrorStack,
    pkey::{Id, PKey, Private, Public},
    rsa::Rsa,
    sha::sha256,
};
use thiserror::Error;

use crate::{
    base64,
    jwk::{Jwk, JwkError},
};

/// 帳戶金鑰相關操作的錯誤列舉，涵蓋 OpenSSL、檔案讀取與 JWK 轉換錯誤。
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("OpenSSL error: {0}")]
    OpenSSL(#[from] ErrorStack),
    #[error("Failed to read key file: {0}")]
    Io(#[from] io::Error),
    #[error("Unsupported algorithm")]
    UnsupportedAlgorithm,
    #[error("JWK error: {0}")]
    Jwk(#[from] JwkError),
}

/// 本模組使用的結果類型，當中錯誤皆為 `KeyError`。
type Result<T> = std::result::Result<T, KeyError>;

/// ACME 帳戶金鑰。
///
/// 由操作者提供的 RSA 私鑰載入而來，公鑰自私鑰派生。整個簽發流程中
/// 此結構為唯讀：JWS 簽章、JWK 表示與 thumbprint 皆以它為來源。
#[derive(Debug)]
pub struct AccountKey {
    /// 加密演算法名稱，目前僅支援 "RSA"。
    pub alg_name: String,
    /// 私鑰，使用 OpenSSL 的 `PKey` 封裝。
    pub pri_key: PKey<Private>,
    /// 公鑰，從私鑰派生而來。
    pub pub_key: PKey<Public>,
}

impl AccountKey {
    /// 根據 PEM 格式的私鑰資料建立帳戶金鑰。
    ///
    /// # 錯誤
    ///
    /// 私鑰無法解析時回傳 OpenSSL 錯誤；私鑰不是 RSA 金鑰時回傳
    /// `KeyError::UnsupportedAlgorithm`。
    pub fn from_pem(pri_key_pem: &[u8]) -> Result<Self> {
        let pri_key = PKey::private_key_from_pem(pri_key_pem)?;
        let pub_key = Self::derive_public_key(&pri_key)?;

        Ok(Self {
            alg_name: "RSA".to_owned(),
            pri_key,
            pub_key,
        })
    }

    /// 從指定的檔案路徑讀取 PEM 格式的私鑰並建立帳戶金鑰。
    pub fn from_pem_file(path: impl AsRef<Path>) -> Result<Self> {
        let pri_key_pem = std::fs::read(path)?;
        Self::from_pem(&pri_key_pem)
    }

    /// 根據私鑰派生出對應的公鑰。
    fn derive_public_key(pri_key: &PKey<Private>) -> Result<PKey<Public>> {
        match pri_key.id() {
            Id::RSA => {
                let rsa = pri_key.rsa()?;
                let pub_rsa =
                    Rsa::from_public_components(rsa.n().to_owned()?, rsa.e().to_owned()?)?;
                Ok(PKey::from_rsa(pub_rsa)?)
            }
            _ => Err(KeyError::UnsupportedAlgorithm),
        }
    }

    /// 計算並回傳金鑰的縮影（thumbprint）。
    ///
    /// 對標準排序的 JWK JSON 表示做 SHA-256 雜湊，再以 URL-safe Base64
    /// 編碼。同一把金鑰的計算結果恆定，挑戰的 key authorization 依賴
    /// 這個性質。
    pub fn thumbprint(&self) -> Result<String> {
        let jwk = Jwk::new(self)?;
        let hash = sha256(jwk.to_acme_json()?.as_bytes());
        Ok(base64::encode_url(hash))
    }
}
