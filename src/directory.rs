use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 表示處理目錄操作時可能發生的錯誤類型。
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// HTTP 請求錯誤。
    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),
}

/// 簡化目錄操作結果的型別。
type DirectoryResult<T> = std::result::Result<T, DirectoryError>;

/// ACME 目錄，包含本客戶端會用到的各個 API 端點與中繼資料。
#[derive(Debug, Deserialize, Serialize)]
pub struct Directory {
    /// 用於新帳號註冊的 API 路徑。
    #[serde(rename = "newAccount")]
    pub new_account: String,
    /// 用於取得新的 nonce 值的 API 路徑。
    #[serde(rename = "newNonce")]
    pub new_nonce: String,
    /// 用於建立新訂單的 API 路徑。
    #[serde(rename = "newOrder")]
    pub new_order: String,
    /// 目錄中繼資料，可能缺席。
    #[serde(default)]
    pub meta: DirectoryMeta,
}

/// 目錄的中繼資料，目前僅使用服務條款 URL。
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct DirectoryMeta {
    #[serde(rename = "termsOfService")]
    pub terms_of_service: Option<String>,
}

impl Directory {
    /// 從指定 URL 取得目錄資料。
    ///
    /// # 參數
    ///
    /// - `client`: 共用的 HTTP 客戶端，已帶有 User-Agent 等預設標頭。
    /// - `url`: CA 目錄 URL。
    ///
    /// # 回傳
    ///
    /// 成功時回傳 `Directory` 實例，否則回傳 `DirectoryError` 錯誤。
    pub fn fetch(client: &Client, url: &str) -> DirectoryResult<Self> {
        let response = client.get(url).send()?;
        let directory: Directory = response.json()?;
        Ok(directory)
    }

    /// 回傳 CA 公布的服務條款 URL（若有）。
    pub fn terms_of_service(&self) -> Option<&str> {
        self.meta.terms_of_service.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_with_meta() {
        let json = r#"{
            "newAccount": "https://ca.example/acme/new-acct",
            "newNonce": "https://ca.example/acme/new-nonce",
            "newOrder": "https://ca.example/acme/new-order",
            "revokeCert": "https://ca.example/acme/revoke-cert",
            "meta": {"termsOfService": "https://ca.example/terms.pdf"}
        }"#;
        let directory: Directory = serde_json::from_str(json).unwrap();
        assert_eq!(directory.new_nonce, "https://ca.example/acme/new-nonce");
        assert_eq!(
            directory.terms_of_service(),
            Some("https://ca.example/terms.pdf")
        );
    }

    #[test]
    fn test_deserialize_without_meta() {
        let json = r#"{
            "newAccount": "https://ca.example/a",
            "newNonce": "https://ca.example/n",
            "newOrder": "https://ca.example/o"
        }"#;
        let directory: Directory = serde_json::from_str(json).unwrap();
        assert_eq!(directory.terms_of_service(), None);
    }
}
