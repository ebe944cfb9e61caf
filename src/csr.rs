//! 憑證簽署請求（CSR）的載入與域名萃取。

use std::{io, path::Path, result};

use openssl::x509::X509Req;
use thiserror::Error;
use x509_parser::{
    certification_request::X509CertificationRequest,
    extensions::{GeneralName, ParsedExtension},
    prelude::FromDer,
};

use crate::{base64, key_pair::AccountKey};

/// 用於描述解析 CSR 過程中可能發生的錯誤。
#[derive(Debug, Error)]
pub enum CsrError {
    #[error("Openssl error: {0}")]
    OpensslError(#[from] openssl::error::ErrorStack),
    #[error("Failed to read CSR file: {0}")]
    Io(#[from] io::Error),
    #[error("Failed to parse CSR: {0}")]
    ParseError(String),
    #[error("Didn't find any domain to validate in the provided CSR")]
    NoDomains,
    #[error("CSR public key must differ from the account key")]
    KeyMatchesAccount,
}

/// 為簡化錯誤處理定義 Result 類型
type Result<T> = result::Result<T, CsrError>;

/// 已解析的憑證簽署請求。
///
/// 載入時即萃取出待驗證的域名集合：主體的 Common Name（若有）加上
/// 所有 DNS 型的 Subject Alternative Name，依出現順序去除重複。
pub struct CsrRequest {
    req: X509Req,
    der: Vec<u8>,
    domains: Vec<String>,
}

impl CsrRequest {
    /// 從 PEM 或 DER 位元組建立 `CsrRequest`，依內容自動判斷格式。
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let req = if data.windows(10).any(|w| w == b"-----BEGIN") {
            X509Req::from_pem(data)?
        } else {
            X509Req::from_der(data)?
        };

        let der = req.to_der()?;
        let domains = extract_domains(&der)?;
        if domains.is_empty() {
            return Err(CsrError::NoDomains);
        }

        Ok(CsrRequest { req, der, domains })
    }

    /// 從指定的檔案路徑讀取 CSR。
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read(path)?;
        Self::from_bytes(&data)
    }

    /// 回傳待驗證的域名集合，至少含一個元素。
    pub fn domains(&self) -> &[String] {
        &self.domains
    }

    /// 回傳 DER 編碼的 URL-safe Base64 字串，供 finalize 請求使用。
    pub fn to_der_base64(&self) -> String {
        base64::encode_url(&self.der)
    }

    /// 確認 CSR 的公鑰與帳戶金鑰不同。
    ///
    /// 帳戶金鑰與憑證金鑰共用會讓帳戶被挾持時連帶失去憑證私鑰的
    /// 隔離，協議也禁止這種用法。此檢查在任何網絡活動前執行。
    pub fn ensure_distinct_key(&self, account: &AccountKey) -> Result<()> {
        let csr_key = self.req.public_key()?;
        if csr_key.public_eq(&account.pub_key) {
            return Err(CsrError::KeyMatchesAccount);
        }
        Ok(())
    }
}

/// 從 DER 編碼的 CSR 萃取域名：CN 在前，其後為 DNS 型 SAN，
/// 重複的名稱只保留第一次出現。
fn extract_domains(der: &[u8]) -> Result<Vec<String>> {
    let (_, csr) = X509CertificationRequest::from_der(der)
        .map_err(|e| CsrError::ParseError(e.to_string()))?;

    let mut domains: Vec<String> = Vec::new();
    let mut push_unique = |name: String| {
        if !domains.contains(&name) {
            domains.push(name);
        }
    };

    for attribute in csr.certification_request_info.subject.iter_common_name() {
        if let Ok(common_name) = attribute.as_str() {
            push_unique(common_name.to_string());
        }
    }

    if let Some(extensions) = csr.requested_extensions() {
        for extension in extensions {
            if let ParsedExtension::SubjectAlternativeName(san) = extension {
                for general_name in &san.general_names {
                    if let GeneralName::DNSName(dns_name) = general_name {
                        push_unique(dns_name.to_string());
                    }
                }
            }
        }
    }

    Ok(domains)
}
