//! 訂單狀態機：下單、逐一完成授權、最終化、輪詢簽發、下載憑證鏈。

use std::{thread, time::Duration};

use hickory_resolver::Name;
use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    challenge::{Challenge, ChallengeError, ChallengeStatus, ChallengeType},
    csr::CsrRequest,
    dns_update::{DnsUpdateError, Provisioner, TxtRecord},
    payload::{ChallengeReadyPayload, FinalizeOrderPayload, Identifier, NewOrderPayload},
    poll::{poll_until, PollOutcome},
    resolver::{wait_until_visible, Lookup, ResolverError},
    session::{Session, SessionError},
};

/// 定義訂單流程各步驟可能產生的錯誤。
///
/// 凡是 CA 拒絕或回覆非預期狀態的變體，一律原封帶出 CA 的狀態碼與
/// 回應內容，方便事後診斷。
#[derive(Debug, Error)]
pub enum OrderError {
    #[error("Session error: {0}")]
    Session(#[from] SessionError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Challenge error: {0}")]
    Challenge(#[from] ChallengeError),
    #[error("Resolver error: {0}")]
    Resolver(#[from] ResolverError),
    #[error("DNS update error: {0}")]
    DnsUpdate(#[from] DnsUpdateError),
    #[error("Invalid challenge record name: {0}")]
    RecordName(#[from] hickory_resolver::proto::error::ProtoError),
    #[error("Error getting new order: {status} {detail}")]
    OrderRejected { status: StatusCode, detail: String },
    #[error(
        "Order creation failed ({detail}). Read the terms of service ({link:?}), \
         then follow your CA instructions: {instance:?}"
    )]
    UserActionRequired {
        detail: String,
        link: Option<String>,
        instance: Option<String>,
    },
    #[error("Order status is neither pending nor ready, we can't use it: {status:?} {detail}")]
    UnusableOrder { status: OrderStatus, detail: String },
    #[error("Error fetching authorization: {status} {detail}")]
    AuthorizationFetch { status: StatusCode, detail: String },
    #[error("Authorization for the domain {domain} can't be validated: the authorization is {status:?}")]
    AuthorizationUnusable {
        domain: String,
        status: AuthorizationStatus,
    },
    #[error("Unable to find a DNS challenge to resolve for domain {domain}")]
    NoDnsChallenge { domain: String },
    #[error("Error triggering challenge: {status} {detail}")]
    ChallengeTrigger { status: StatusCode, detail: String },
    #[error("Error during challenge validation: {status} {detail}")]
    ChallengePoll { status: StatusCode, detail: String },
    #[error("Challenge for domain {domain} did not pass: {detail}")]
    ChallengeFailed { domain: String, detail: String },
    #[error("Error while sending the CSR: {status} {detail}")]
    FinalizeRejected { status: StatusCode, detail: String },
    #[error("Finalizing order got errors: {detail}")]
    IssuanceFailed { detail: String },
    #[error("Order is valid but carries no certificate URL")]
    MissingCertificateUrl,
    #[error("Error downloading certificate: {status} {detail}")]
    DownloadRejected { status: StatusCode, detail: String },
}

type Result<T> = std::result::Result<T, OrderError>;

/// 挑戰狀態輪詢的固定間隔。
const CHALLENGE_POLL_INTERVAL: Duration = Duration::from_secs(2);
/// 訂單輪詢在 CA 未建議 `Retry-After` 時的預設間隔。
const ORDER_POLL_FALLBACK: Duration = Duration::from_secs(2);
/// CA 要求使用者先採取行動（例如閱讀服務條款）時的問題類型。
const USER_ACTION_REQUIRED: &str = "urn:ietf:params:acme:error:userActionRequired";

/// 訂單狀態。`processing` 是可重試的等待狀態，`valid` 與 `invalid`
/// 為終結狀態。
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Ready,
    Processing,
    Valid,
    Invalid,
}

/// 授權狀態。`pending` 以外的非 `valid` 狀態都無法繼續處理。
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthorizationStatus {
    Pending,
    Valid,
    Invalid,
    Deactivated,
    Expired,
    Revoked,
}

/// CA 回傳的訂單資源。
#[derive(Debug, Deserialize)]
pub struct Order {
    /// 訂單當前狀態
    pub status: OrderStatus,
    /// 證書主題（Domain）識別符
    #[serde(default)]
    pub identifiers: Vec<Identifier>,
    /// 授權 URL 列表
    #[serde(default)]
    pub authorizations: Vec<String>,
    /// 最終確認 URL
    pub finalize: String,
    /// 憑證 URL（僅在簽發完成後存在）
    #[serde(default)]
    pub certificate: Option<String>,
}

/// CA 回傳的授權資源。
#[derive(Debug, Deserialize)]
pub struct Authorization {
    /// 此授權綁定的域名
    pub identifier: Identifier,
    /// 授權當前狀態
    pub status: AuthorizationStatus,
    /// 可用的挑戰列表
    #[serde(default)]
    pub challenges: Vec<Challenge>,
}

/// 證書簽發流程的協調者。
///
/// 流程嚴格循序：一個域名的授權完整處理完（安裝記錄、自我檢查、
/// CA 驗證、清理）才輪到下一個；全部授權有效後才進入最終化與下載。
pub struct CertificateFlow<'a> {
    session: &'a mut Session,
    csr: &'a CsrRequest,
    lookup: &'a dyn Lookup,
    provisioner: Provisioner<'a>,
    ttl: u32,
    self_check_attempts: u32,
    certificate_format: &'a str,
}

impl<'a> CertificateFlow<'a> {
    /// 建立流程協調者。
    ///
    /// # 參數
    ///
    /// - `session`: 已完成帳戶註冊的會話。
    /// - `csr`: 已載入的憑證簽署請求。
    /// - `lookup`: 遞迴解析能力，用於 CNAME 轉向與自我檢查。
    /// - `provisioner`: 挑戰記錄的安裝與移除。
    /// - `ttl`: 挑戰記錄的 TTL，同時是自我檢查的等待間隔（秒）。
    /// - `self_check_attempts`: 自我檢查的嘗試次數上限。
    /// - `certificate_format`: 下載憑證時送出的 `Accept` 內容類型。
    pub fn new(
        session: &'a mut Session,
        csr: &'a CsrRequest,
        lookup: &'a dyn Lookup,
        provisioner: Provisioner<'a>,
        ttl: u32,
        self_check_attempts: u32,
        certificate_format: &'a str,
    ) -> Self {
        CertificateFlow {
            session,
            csr,
            lookup,
            provisioner,
            ttl,
            self_check_attempts,
            certificate_format,
        }
    }

    /// 執行完整流程，成功時回傳 PEM 憑證鏈。
    pub fn run(&mut self) -> Result<String> {
        let domains = self.csr.domains().to_vec();
        info!(domains = ?domains, "requesting an order to validate domains");
        let (order, order_url) = self.place_order(&domains)?;

        if order.status == OrderStatus::Ready {
            info!("no challenge to process: order is already ready");
        } else {
            for authorization_url in &order.authorizations {
                self.process_authorization(authorization_url)?;
            }
        }

        info!("requesting to finalize the order");
        self.finalize_order(&order.finalize)?;

        let issued = self.await_issuance(&order_url)?;
        let certificate_url = issued
            .certificate
            .ok_or(OrderError::MissingCertificateUrl)?;
        self.download_chain(&certificate_url)
    }

    /// 提交新訂單。只接受 `pending` 或 `ready` 的訂單；CA 要求使用者
    /// 先採取行動（條款未同意）時轉為對應的致命錯誤。
    fn place_order(&mut self, domains: &[String]) -> Result<(Order, String)> {
        let payload = NewOrderPayload::new(domains);
        let new_order_url = self.session.dir.new_order.clone();
        let response = self.session.post(&new_order_url, &payload)?;

        match response.status {
            StatusCode::CREATED => {
                let order_url = response.location()?;
                let order: Order = serde_json::from_value(response.body.clone())?;
                if !matches!(order.status, OrderStatus::Pending | OrderStatus::Ready) {
                    return Err(OrderError::UnusableOrder {
                        status: order.status,
                        detail: response.text,
                    });
                }
                debug!(order = %order_url, "order received");
                Ok((order, order_url))
            }
            StatusCode::FORBIDDEN if response.body["type"] == USER_ACTION_REQUIRED => {
                Err(OrderError::UserActionRequired {
                    detail: response.detail(),
                    link: response.header("Link").map(str::to_string),
                    instance: response.body["instance"].as_str().map(str::to_string),
                })
            }
            status => Err(OrderError::OrderRejected {
                status,
                detail: response.detail(),
            }),
        }
    }

    /// 處理一個授權：挑選 DNS-01 挑戰、安裝記錄、驗證、清理。
    ///
    /// 記錄一旦安裝成功，之後不論哪一步失敗都會先移除記錄再把錯誤
    /// 往外傳；已完成授權的記錄不在此範圍內。
    fn process_authorization(&mut self, authorization_url: &str) -> Result<()> {
        info!(authorization = %authorization_url, "processing challenge for authorization");
        let response = self.session.post_as_get(authorization_url)?;
        if response.status != StatusCode::OK {
            return Err(OrderError::AuthorizationFetch {
                status: response.status,
                detail: response.detail(),
            });
        }
        let authorization: Authorization = serde_json::from_value(response.body.clone())?;
        let domain = authorization.identifier.value.clone();

        match authorization.status {
            AuthorizationStatus::Valid => {
                info!(domain = %domain, "authorization already validated, skipping");
                return Ok(());
            }
            AuthorizationStatus::Pending => {}
            status => return Err(OrderError::AuthorizationUnusable { domain, status }),
        }

        let challenge = authorization
            .challenges
            .iter()
            .find(|challenge| challenge.challenge_type == ChallengeType::Dns01)
            .ok_or_else(|| OrderError::NoDnsChallenge {
                domain: domain.clone(),
            })?;

        let digest = challenge.dns_txt_digest(self.session.thumbprint())?;
        let record_name = self.challenge_record_name(&domain)?;
        let record = TxtRecord::new(record_name, self.ttl, digest.clone());

        info!(domain = %domain, record = %record.name, "installing DNS TXT resource");
        self.provisioner.install(&record)?;

        let outcome = self.validate_challenge(&domain, challenge, &record, &digest);

        // 成敗都要把記錄收走，授權處理範圍以外不留痕跡
        match (outcome, self.provisioner.remove(&record)) {
            (Ok(()), Ok(())) => Ok(()),
            (Ok(()), Err(cleanup_error)) => Err(cleanup_error.into()),
            (Err(error), Ok(())) => Err(error),
            (Err(error), Err(cleanup_error)) => {
                warn!(error = %cleanup_error, "failed to remove the challenge record during cleanup");
                Err(error)
            }
        }
    }

    /// 決定挑戰記錄的安裝名稱。
    ///
    /// `_acme-challenge.<domain>.` 上若設有 CNAME（進階 TSIG 配置的
    /// 慣用手法），改在其目標安裝 TXT；CNAME 目標必須是非 CNAME
    /// 記錄，不處理遞迴轉向。
    fn challenge_record_name(&self, domain: &str) -> Result<Name> {
        let record_name = Name::from_ascii(format!("_acme-challenge.{}.", domain))?;
        match self.lookup.cname(&record_name) {
            Ok(Some(target)) => {
                info!(
                    record = %record_name,
                    target = %target,
                    "a CNAME resource has been found, TXT will be installed on its target"
                );
                Ok(target)
            }
            Ok(None) => {
                debug!(record = %record_name, "no CNAME resource found, TXT will be installed directly");
                Ok(record_name)
            }
            Err(e) => {
                debug!(record = %record_name, error = %e, "CNAME lookup failed, TXT will be installed directly");
                Ok(record_name)
            }
        }
    }

    /// 等待記錄可見、通知 CA、輪詢挑戰直到 `valid`。
    fn validate_challenge(
        &mut self,
        domain: &str,
        challenge: &Challenge,
        record: &TxtRecord,
        digest: &str,
    ) -> Result<()> {
        wait_until_visible(
            self.lookup,
            &record.name,
            digest,
            Duration::from_secs(u64::from(self.ttl)),
            self.self_check_attempts,
            thread::sleep,
        )?;

        info!(domain = %domain, "asking the ACME server to validate the challenge");
        let response = self
            .session
            .post(&challenge.url, &ChallengeReadyPayload::new())?;
        if response.status != StatusCode::OK {
            return Err(OrderError::ChallengeTrigger {
                status: response.status,
                detail: response.detail(),
            });
        }

        let session = &mut *self.session;
        let challenge_url = challenge.url.clone();
        poll_until(CHALLENGE_POLL_INTERVAL, thread::sleep, || {
            let response = session.post_as_get(&challenge_url)?;
            if response.status != StatusCode::OK {
                return Err(OrderError::ChallengePoll {
                    status: response.status,
                    detail: response.detail(),
                });
            }
            let status: ChallengeStatus =
                serde_json::from_value(response.body["status"].clone())?;
            if status == ChallengeStatus::Valid {
                Ok(PollOutcome::Ready(()))
            } else if status.is_retryable() {
                Ok(PollOutcome::Waiting(None))
            } else {
                Err(OrderError::ChallengeFailed {
                    domain: domain.to_string(),
                    detail: response.text,
                })
            }
        })?;

        info!(domain = %domain, "the ACME server has verified the challenge");
        Ok(())
    }

    /// 將 CSR 提交到訂單的 finalize 端點。
    fn finalize_order(&mut self, finalize_url: &str) -> Result<()> {
        let payload = FinalizeOrderPayload::new(self.csr.to_der_base64());
        let response = self.session.post(finalize_url, &payload)?;
        if !response.is_success() {
            return Err(OrderError::FinalizeRejected {
                status: response.status,
                detail: response.detail(),
            });
        }
        Ok(())
    }

    /// 輪詢訂單直到簽發完成。`processing` 依 CA 建議的 `Retry-After`
    /// 等待（缺席時用預設間隔），`valid` 結束輪詢，其餘狀態為致命錯誤。
    fn await_issuance(&mut self, order_url: &str) -> Result<Order> {
        let session = &mut *self.session;
        let order = poll_until(ORDER_POLL_FALLBACK, thread::sleep, || {
            let response = session.post_as_get(order_url)?;
            let order: Order = serde_json::from_value(response.body.clone())?;
            match order.status {
                OrderStatus::Processing => Ok(PollOutcome::Waiting(
                    response.retry_after().map(Duration::from_secs),
                )),
                OrderStatus::Valid => Ok(PollOutcome::Ready(order)),
                _ => Err(OrderError::IssuanceFailed {
                    detail: response.text,
                }),
            }
        })?;
        info!("order finalized");
        Ok(order)
    }

    /// 下載憑證鏈，預設要求 PEM 格式。
    fn download_chain(&mut self, certificate_url: &str) -> Result<String> {
        let response = self
            .session
            .post_as_get_accept(certificate_url, self.certificate_format)?;
        if !response.is_success() {
            return Err(OrderError::DownloadRejected {
                status: response.status,
                detail: response.detail(),
            });
        }

        if let Some(link) = response.header("Link") {
            info!(link = %link, "certificate links given by the server");
        }
        info!(certificate = %certificate_url, "certificate signed and chain received");
        Ok(response.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_deserialization() {
        let json = r#"{
            "status": "pending",
            "expires": "2026-09-01T00:00:00Z",
            "identifiers": [{"type": "dns", "value": "example.com"}],
            "authorizations": ["https://ca.example/authz/1"],
            "finalize": "https://ca.example/order/1/finalize"
        }"#;
        let order: Order = serde_json::from_str(json).unwrap();
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.authorizations.len(), 1);
        assert!(order.certificate.is_none());
    }

    #[test]
    fn test_valid_order_carries_certificate_url() {
        let json = r#"{
            "status": "valid",
            "finalize": "https://ca.example/order/1/finalize",
            "certificate": "https://ca.example/cert/1"
        }"#;
        let order: Order = serde_json::from_str(json).unwrap();
        assert_eq!(order.status, OrderStatus::Valid);
        assert_eq!(
            order.certificate.as_deref(),
            Some("https://ca.example/cert/1")
        );
    }

    #[test]
    fn test_authorization_deserialization() {
        let json = r#"{
            "identifier": {"type": "dns", "value": "example.com"},
            "status": "pending",
            "challenges": [
                {"type": "http-01", "url": "https://ca.example/chal/1", "token": "a", "status": "pending"},
                {"type": "dns-01", "url": "https://ca.example/chal/2", "token": "b", "status": "pending"}
            ]
        }"#;
        let authorization: Authorization = serde_json::from_str(json).unwrap();
        assert_eq!(authorization.status, AuthorizationStatus::Pending);

        let dns_challenge = authorization
            .challenges
            .iter()
            .find(|c| c.challenge_type == ChallengeType::Dns01)
            .unwrap();
        assert_eq!(dns_challenge.token, "b");
    }

    #[test]
    fn test_unexpected_authorization_status_deserializes() {
        let json = r#"{
            "identifier": {"type": "dns", "value": "example.com"},
            "status": "deactivated",
            "challenges": []
        }"#;
        let authorization: Authorization = serde_json::from_str(json).unwrap();
        assert_eq!(authorization.status, AuthorizationStatus::Deactivated);
    }
}
