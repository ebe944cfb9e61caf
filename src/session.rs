//! 與 CA 的簽名交換通道。
//!
//! [`Session`] 是整個流程中唯一會觸碰 nonce 的元件：送出請求前取出
//! 持有的 nonce（沒有就向 `newNonce` 端點要一個），收到回應後無論
//! 成敗一律吸收 `Replay-Nonce` 標頭，確保單次失敗不會讓通道停擺。

use std::time::Duration;

use reqwest::{
    blocking::Client,
    header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CONTENT_TYPE},
    StatusCode,
};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::{
    directory::Directory,
    jwk::{Jwk, JwkError},
    jws::{Jws, JwsError},
    key_pair::{AccountKey, KeyError},
    nonce::NonceState,
    payload::PayloadT,
    protection::{Identity, ProtectedHeader, ProtectionError},
    signature::{create_signature, SignatureError},
};

/// 簽名交換過程中可能發生的錯誤。
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Request header error: {0}")]
    RequestHeaderError(#[from] reqwest::header::ToStrError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("No Replay-Nonce header found in response")]
    NoNonceHeader,
    #[error("JWK error: {0}")]
    Jwk(#[from] JwkError),
    #[error("Key error: {0}")]
    Key(#[from] KeyError),
    #[error("Protection error: {0}")]
    Protection(#[from] ProtectionError),
    #[error("Signature error: {0}")]
    Signature(#[from] SignatureError),
    #[error("JWS error: {0}")]
    Jws(#[from] JwsError),
    #[error("Missing Location header: {status:?}, {body:?}")]
    MissingLocationHeader { status: StatusCode, body: String },
}

type Result<T> = std::result::Result<T, SessionError>;

/// 建立與 CA 交互所用的 HTTP 客戶端。
///
/// 所有請求共用同一份預設標頭：User-Agent 帶本 crate 名稱與版本，
/// Accept-Language 來自操作者設定。
pub fn http_client(language: &str, timeout: Duration) -> Result<Client> {
    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(language) {
        headers.insert(ACCEPT_LANGUAGE, value);
    }

    let client = Client::builder()
        .user_agent(concat!(
            env!("CARGO_PKG_NAME"),
            "/",
            env!("CARGO_PKG_VERSION")
        ))
        .default_headers(headers)
        .timeout(timeout)
        .build()?;

    Ok(client)
}

/// 一次簽名交換的正規化結果。
///
/// 無論 CA 回覆成功或拒絕，都以同樣的形狀回傳；呼叫端依狀態碼與
/// 本體內容決定是否為致命錯誤。
#[derive(Debug)]
pub struct AcmeResponse {
    /// HTTP 狀態碼。
    pub status: StatusCode,
    /// 回應標頭。
    pub headers: HeaderMap,
    /// 解析後的 JSON 本體；本體為空或非 JSON 時為空物件。
    pub body: Value,
    /// 原始回應文字，憑證下載等非 JSON 回應由此取得。
    pub text: String,
}

impl AcmeResponse {
    /// 讀取指定名稱的回應標頭。
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// 讀取 `Location` 標頭，缺席時回傳帶有完整回應內容的錯誤。
    pub fn location(&self) -> Result<String> {
        self.header("Location")
            .map(str::to_string)
            .ok_or_else(|| SessionError::MissingLocationHeader {
                status: self.status,
                body: self.text.clone(),
            })
    }

    /// 解析 `Retry-After` 標頭為秒數，缺席或無法解析時回傳 `None`。
    pub fn retry_after(&self) -> Option<u64> {
        self.header("Retry-After")?.trim().parse().ok()
    }

    /// 取出 CA 問題文件中的 `detail` 欄位，沒有則回傳整段本體文字。
    pub fn detail(&self) -> String {
        self.body["detail"]
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| self.text.clone())
    }

    /// 狀態碼是否為 2xx。
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

/// 與 CA 的會話，持有帳戶金鑰、目錄與唯一的 nonce 狀態。
#[derive(Debug)]
pub struct Session {
    client: Client,
    /// ACME 服務目錄。
    pub dir: Directory,
    key: AccountKey,
    jwk: Jwk,
    thumbprint: String,
    kid: Option<String>,
    nonce: NonceState,
}

impl Session {
    /// 建立一個新的會話。
    ///
    /// JWK 與 thumbprint 在此一次算好，之後的每個請求直接取用。
    pub fn new(client: Client, dir: Directory, key: AccountKey) -> Result<Self> {
        let jwk = Jwk::new(&key)?;
        let thumbprint = key.thumbprint()?;

        Ok(Session {
            client,
            dir,
            key,
            jwk,
            thumbprint,
            kid: None,
            nonce: NonceState::new(),
        })
    }

    /// 回傳帳戶金鑰的 thumbprint。
    pub fn thumbprint(&self) -> &str {
        &self.thumbprint
    }

    /// 註冊完成後記下帳戶識別 URL，之後的請求改以 `kid` 署名。
    pub fn set_kid(&mut self, kid: impl Into<String>) {
        self.kid = Some(kid.into());
    }

    /// 回傳帳戶識別 URL（若已註冊）。
    pub fn kid(&self) -> Option<&str> {
        self.kid.as_deref()
    }

    /// 送出帶載荷的簽名請求。
    pub fn post<P: PayloadT>(&mut self, url: &str, payload: &P) -> Result<AcmeResponse> {
        let payload_b64 = payload.to_base64()?;
        self.dispatch(url, payload_b64, None)
    }

    /// 送出 POST-as-GET 請求（空字串載荷）。
    pub fn post_as_get(&mut self, url: &str) -> Result<AcmeResponse> {
        self.dispatch(url, String::new(), None)
    }

    /// 送出帶自訂 `Accept` 標頭的 POST-as-GET 請求，用於憑證下載。
    pub fn post_as_get_accept(&mut self, url: &str, accept: &str) -> Result<AcmeResponse> {
        self.dispatch(url, String::new(), Some(accept))
    }

    /// 簽名請求的共同路徑：取 nonce、組保護頭、簽名、送出、吸收
    /// 回應的 nonce，最後正規化為 [`AcmeResponse`]。
    fn dispatch(
        &mut self,
        url: &str,
        payload_b64: String,
        accept: Option<&str>,
    ) -> Result<AcmeResponse> {
        let nonce = match self.nonce.take() {
            Some(nonce) => nonce,
            None => self.fetch_nonce()?,
        };

        let identity = match &self.kid {
            Some(kid) => Identity::Kid(kid),
            None => Identity::Jwk(&self.jwk),
        };
        let protected_b64 = ProtectedHeader::new(nonce, url, identity)?.to_base64()?;
        let signature = create_signature(&protected_b64, &payload_b64, &self.key)?;
        let jws = Jws::new(protected_b64, payload_b64, signature);

        let mut request = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/jose+json");
        if let Some(accept) = accept {
            request = request.header(ACCEPT, accept);
        }
        let response = request.body(jws.to_json()?).send()?;

        // 先補 nonce 再看狀態碼，失敗的交換也會帶回下一個 nonce
        self.nonce.absorb(response.headers());

        let status = response.status();
        let headers = response.headers().clone();
        let text = response.text()?;
        let body = serde_json::from_str(&text).unwrap_or_else(|_| Value::Object(Map::new()));

        Ok(AcmeResponse {
            status,
            headers,
            body,
            text,
        })
    }

    /// 向 CA 的 `newNonce` 端點請求一個新的 nonce。
    fn fetch_nonce(&self) -> Result<String> {
        let response = self.client.head(&self.dir.new_nonce).send()?;

        match response.headers().get(NonceState::REPLAY_NONCE) {
            Some(nonce) => Ok(nonce.to_str()?.to_string()),
            None => Err(SessionError::NoNonceHeader),
        }
    }
}
