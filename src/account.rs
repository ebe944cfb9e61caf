//! ACME 帳戶的註冊與重新探索。

use std::collections::BTreeSet;

use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    payload::{AccountUpdatePayload, NewAccountPayload, PayloadT},
    session::{Session, SessionError},
};

/// 帳戶操作可能發生的錯誤。
#[derive(Debug, Error)]
pub enum AccountError {
    #[error("Session error: {0}")]
    Session(#[from] SessionError),
    #[error("Error registering account: {status} {detail}")]
    Registration { status: StatusCode, detail: String },
    #[error("Error updating account contacts: {status} {detail}")]
    ContactUpdate { status: StatusCode, detail: String },
}

type Result<T> = std::result::Result<T, AccountError>;

/// 向 CA 註冊帳戶，或重新取得既有帳戶的識別 URL。
///
/// 帳戶由 session 持有的金鑰唯一決定：CA 回覆 201 表示新建，200 表示
/// 金鑰已有對應帳戶（此時再以 POST-as-GET 取回帳戶內容）。兩種情況
/// 都會把 `Location` 標頭中的帳戶 URL 設為 session 的 `kid`。
/// 之後比對請求的聯絡資訊與 CA 記錄，不一致時送出更新。
///
/// # 參數
///
/// - `session`: 已建立的會話，註冊成功後其 `kid` 會被設定。
/// - `contacts`: 請求的聯絡資訊（`mailto:` URL），可為空。
///
/// # 錯誤
///
/// 回應既非「已建立」也非「已存在」、或聯絡資訊更新被拒時，
/// 回傳帶有 CA 狀態碼與內容的 [`AccountError`]。
pub fn register(session: &mut Session, contacts: &[String]) -> Result<()> {
    let terms = session.dir.terms_of_service().map(str::to_string);
    if let Some(terms_url) = &terms {
        warn!(
            terms = %terms_url,
            "terms of service will be automatically agreed, you should read them"
        );
    }

    let payload = NewAccountPayload::new(contacts, terms.is_some());
    let new_account_url = session.dir.new_account.clone();
    let response = session.post(&new_account_url, &payload)?;

    let (kid, account_info): (String, Value) = match response.status {
        StatusCode::CREATED => {
            let kid = response.location()?;
            info!(account = %kid, "registered a new account");
            session.set_kid(kid.clone());
            (kid, response.body)
        }
        StatusCode::OK => {
            let kid = response.location()?;
            debug!(account = %kid, "account is already registered");
            session.set_kid(kid.clone());
            // 既有帳戶：再取一次帳戶內容以便比對聯絡資訊
            let body = session.post_as_get(&kid)?.body;
            (kid, body)
        }
        status => {
            return Err(AccountError::Registration {
                status,
                detail: response.detail(),
            })
        }
    };

    reconcile_contacts(session, &kid, contacts, &account_info)
}

/// 比對請求與 CA 回傳的聯絡資訊集合，不一致時送出更新。
fn reconcile_contacts(
    session: &mut Session,
    kid: &str,
    requested: &[String],
    account_info: &Value,
) -> Result<()> {
    if requested.is_empty() {
        return Ok(());
    }

    let requested_set: BTreeSet<&str> = requested.iter().map(String::as_str).collect();
    let registered_set: BTreeSet<&str> = account_info["contact"]
        .as_array()
        .map(|values| values.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    if requested_set == registered_set {
        return Ok(());
    }

    let response = session.post(kid, &AccountUpdatePayload::new(requested))?;
    if response.status != StatusCode::OK {
        return Err(AccountError::ContactUpdate {
            status: response.status,
            detail: response.detail(),
        });
    }
    debug!("account updated with latest contact information");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_contact_sets_compare_order_insensitively() {
        let requested = vec![
            "mailto:a@example.com".to_string(),
            "mailto:b@example.com".to_string(),
        ];
        let registered = json!({
            "contact": ["mailto:b@example.com", "mailto:a@example.com"]
        });

        let requested_set: BTreeSet<&str> = requested.iter().map(String::as_str).collect();
        let registered_set: BTreeSet<&str> = registered["contact"]
            .as_array()
            .map(|v| v.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();
        assert_eq!(requested_set, registered_set);
    }
}
