//! 操作者設定檔的載入與驗證。
//!
//! 任何必要設定缺席都在這裡攔下，確保設定錯誤不會觸發任何網絡活動。

use std::{io, net::IpAddr, path::Path, path::PathBuf, time::Duration};

use serde::Deserialize;
use thiserror::Error;

/// 設定載入與驗證的錯誤類型。
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] io::Error),
    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Some required settings are missing: {0}")]
    Missing(&'static str),
    #[error("Invalid setting: {0}")]
    Invalid(String),
}

type Result<T> = std::result::Result<T, ConfigError>;

/// 完整的執行設定，對應 TOML 設定檔的三個區段。
#[derive(Debug, Deserialize)]
pub struct Config {
    /// ACME 相關設定。
    pub acme: AcmeConfig,
    /// DNS 查詢與動態更新設定。
    #[serde(default)]
    pub dns: DnsConfig,
    /// TSIG 金鑰材料。
    pub tsig: TsigConfig,
}

/// `[acme]` 區段。
#[derive(Debug, Deserialize)]
pub struct AcmeConfig {
    /// CA 目錄 URL，預設指向 Let's Encrypt 測試環境。
    #[serde(default = "default_directory_url")]
    pub directory_url: String,
    /// 帳戶私鑰（PEM）路徑。
    pub account_key_file: PathBuf,
    /// 憑證簽署請求（PEM 或 DER）路徑。
    pub csr_file: PathBuf,
    /// 帳戶聯絡資訊，可為空。
    #[serde(default)]
    pub contacts: Vec<String>,
    /// 送往 CA 的 Accept-Language。
    #[serde(default = "default_language")]
    pub language: String,
    /// 憑證下載請求的 Accept 內容類型。
    #[serde(default = "default_certificate_format")]
    pub certificate_format: String,
    /// HTTP 請求逾時（秒）。
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

/// `[dns]` 區段，全部欄位皆有預設值。
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DnsConfig {
    /// 自我檢查使用的遞迴伺服器；空清單時沿用系統設定。
    pub nameservers: Vec<IpAddr>,
    /// 動態更新的目標埠。
    pub update_port: u16,
    /// 挑戰記錄的 TTL（秒），同時是自我檢查的等待間隔。
    pub ttl_secs: u32,
    /// DNS 查詢與更新的逾時（秒）。
    pub timeout_secs: u64,
    /// 自我檢查的嘗試次數上限。
    pub self_check_attempts: u32,
}

impl Default for DnsConfig {
    fn default() -> Self {
        DnsConfig {
            nameservers: Vec::new(),
            update_port: 53,
            ttl_secs: 10,
            timeout_secs: 10,
            self_check_attempts: 10,
        }
    }
}

/// `[tsig]` 區段，三個欄位皆為必要。
#[derive(Debug, Deserialize)]
pub struct TsigConfig {
    /// TSIG 金鑰名稱。
    pub key_name: String,
    /// Base64 編碼的共享密鑰。
    pub key_value: String,
    /// 演算法名稱，例如 `hmac-sha256`。
    pub algorithm: String,
}

fn default_directory_url() -> String {
    "https://acme-staging-v02.api.letsencrypt.org/directory".to_string()
}

fn default_language() -> String {
    "en".to_string()
}

fn default_certificate_format() -> String {
    "application/pem-certificate-chain".to_string()
}

fn default_timeout() -> u64 {
    10
}

impl Config {
    /// 自 TOML 檔案載入設定並完成驗證。
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&raw)?;
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    /// 正規化聯絡資訊：濾掉空白項目，沒有 URL scheme 的項目補上
    /// `mailto:` 前綴。
    fn normalize(&mut self) {
        self.acme.contacts = self
            .acme
            .contacts
            .iter()
            .map(|contact| contact.trim())
            .filter(|contact| !contact.is_empty())
            .map(|contact| {
                if contact.contains(':') {
                    contact.to_string()
                } else {
                    format!("mailto:{}", contact)
                }
            })
            .collect();
    }

    fn validate(&self) -> Result<()> {
        if self.acme.account_key_file.as_os_str().is_empty() {
            return Err(ConfigError::Missing("acme.account_key_file"));
        }
        if self.acme.csr_file.as_os_str().is_empty() {
            return Err(ConfigError::Missing("acme.csr_file"));
        }
        if self.tsig.key_name.is_empty() {
            return Err(ConfigError::Missing("tsig.key_name"));
        }
        if self.tsig.key_value.is_empty() {
            return Err(ConfigError::Missing("tsig.key_value"));
        }
        if self.tsig.algorithm.is_empty() {
            return Err(ConfigError::Missing("tsig.algorithm"));
        }
        if self.dns.self_check_attempts == 0 {
            return Err(ConfigError::Invalid(
                "dns.self_check_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// HTTP 請求逾時。
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.acme.timeout_secs)
    }

    /// DNS 查詢與更新逾時。
    pub fn dns_timeout(&self) -> Duration {
        Duration::from_secs(self.dns.timeout_secs)
    }
}
