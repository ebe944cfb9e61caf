use serde::{Deserialize, Serialize};
use std::error::Error;

use crate::base64;

/// 定義所有 API 載荷（Payload）必須實作的功能。
///
/// 該 trait 要求實作者能夠序列化，並提供轉換成 JSON 字串與 Base64
/// 表示的功能，同時必須實作自定義的驗證邏輯。
pub trait PayloadT: Serialize + for<'de> Deserialize<'de> {
    /// 將載荷轉換成 JSON 格式的字串。
    fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// 將載荷先轉換成 JSON 字串，再以 URL-safe Base64 編碼。
    fn to_base64(&self) -> Result<String, serde_json::Error> {
        let json_string = self.to_json_string()?;
        Ok(base64::encode_url(json_string.as_bytes()))
    }

    /// 驗證載荷資料是否符合預期的規範。
    fn validate(&self) -> Result<(), Box<dyn Error>>;
}

/// 表示建立新帳號所需的載荷資料。
///
/// 聯絡資訊為可選；只有在 CA 公布服務條款時才送出
/// `termsOfServiceAgreed` 欄位。
#[derive(Debug, Serialize, Deserialize)]
pub struct NewAccountPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    contact: Option<Vec<String>>,
    #[serde(
        rename = "termsOfServiceAgreed",
        skip_serializing_if = "Option::is_none"
    )]
    terms_of_service_agreed: Option<bool>,
}

impl NewAccountPayload {
    /// 建立一個新的 `NewAccountPayload` 實例。
    ///
    /// # 參數
    ///
    /// - `contacts`: 聯絡資訊清單，空清單時整個欄位省略。
    /// - `agree_terms`: CA 是否公布了服務條款；為真時自動同意。
    pub fn new(contacts: &[String], agree_terms: bool) -> Self {
        NewAccountPayload {
            contact: if contacts.is_empty() {
                None
            } else {
                Some(contacts.to_vec())
            },
            terms_of_service_agreed: if agree_terms { Some(true) } else { None },
        }
    }
}

impl PayloadT for NewAccountPayload {
    fn validate(&self) -> Result<(), Box<dyn Error>> {
        if let Some(contacts) = &self.contact {
            if contacts.iter().any(|c| c.is_empty()) {
                return Err("Contact entries cannot be empty".into());
            }
        }
        Ok(())
    }
}

/// 帳戶聯絡資訊更新的載荷，僅在請求與 CA 記錄不一致時送出。
#[derive(Debug, Serialize, Deserialize)]
pub struct AccountUpdatePayload {
    contact: Vec<String>,
}

impl AccountUpdatePayload {
    pub fn new(contacts: &[String]) -> Self {
        AccountUpdatePayload {
            contact: contacts.to_vec(),
        }
    }
}

impl PayloadT for AccountUpdatePayload {
    fn validate(&self) -> Result<(), Box<dyn Error>> {
        if self.contact.is_empty() {
            return Err("Contact information is required".into());
        }
        Ok(())
    }
}

/// 表示一個識別項，用來描述訂單所涵蓋的主機名稱。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identifier {
    #[serde(rename = "type")]
    pub type_: String,
    pub value: String,
}

/// 表示建立新訂單時所需的載荷資料。
#[derive(Debug, Serialize, Deserialize)]
pub struct NewOrderPayload {
    pub identifiers: Vec<Identifier>,
}

impl NewOrderPayload {
    /// 給定一組域名，為每個域名建立一個類型固定為 `"dns"` 的識別項。
    pub fn new<S: AsRef<str>>(domains: &[S]) -> Self {
        let identifiers = domains
            .iter()
            .map(|domain| Identifier {
                type_: "dns".to_string(),
                value: domain.as_ref().to_string(),
            })
            .collect();

        NewOrderPayload { identifiers }
    }
}

impl PayloadT for NewOrderPayload {
    fn validate(&self) -> Result<(), Box<dyn Error>> {
        if self.identifiers.is_empty() {
            return Err("At least one identifier is required".into());
        }
        for identifier in &self.identifiers {
            if identifier.type_ != "dns" {
                return Err("Identifier type must be 'dns'".into());
            }
            if identifier.value.is_empty() {
                return Err("Identifier value cannot be empty".into());
            }
        }
        Ok(())
    }
}

/// 通知 CA 挑戰已就緒的載荷。
///
/// 協議要求本體為空的 JSON 物件 `{}`，與 POST-as-GET 的空字串不同。
#[derive(Debug, Serialize, Deserialize, Default)]
pub struct ChallengeReadyPayload {}

impl ChallengeReadyPayload {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PayloadT for ChallengeReadyPayload {
    fn validate(&self) -> Result<(), Box<dyn Error>> {
        Ok(())
    }
}

/// 表示最終化訂單時所需的載荷資料，包含 CSR 的 URL-safe Base64 DER。
#[derive(Debug, Serialize, Deserialize)]
pub struct FinalizeOrderPayload {
    #[serde(rename = "csr")]
    csr_b64_str: String,
}

impl FinalizeOrderPayload {
    pub fn new(csr_der_b64: impl Into<String>) -> Self {
        FinalizeOrderPayload {
            csr_b64_str: csr_der_b64.into(),
        }
    }
}

impl PayloadT for FinalizeOrderPayload {
    fn validate(&self) -> Result<(), Box<dyn Error>> {
        if self.csr_b64_str.is_empty() {
            return Err("CSR cannot be empty".into());
        }
        Ok(())
    }
}
