//! 以 TSIG 簽署的 RFC 2136 動態更新安裝與移除挑戰記錄。

use std::{fmt, net::SocketAddr, time::Duration};

use hickory_client::{
    client::{Client, SyncClient},
    error::ClientError,
    proto::{
        error::ProtoError,
        op::ResponseCode,
        rr::{
            dnssec::{rdata::tsig::TsigAlgorithm, tsig::TSigner},
            rdata::TXT,
            Name, RData, RecordSet, RecordType,
        },
    },
    tcp::TcpClientConnection,
};
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
    base64::{self, DecodeError},
    resolver::{authoritative_server_ips, Lookup, ResolverError},
};

/// 動態更新過程中可能發生的錯誤。
#[derive(Debug, Error)]
pub enum DnsUpdateError {
    #[error("Resolver error: {0}")]
    Resolver(#[from] ResolverError),
    #[error("DNS protocol error: {0}")]
    Proto(#[from] ProtoError),
    #[error("Invalid TSIG secret: {0}")]
    Secret(#[from] DecodeError),
    #[error("Unsupported TSIG algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error("DNS client error: {0}")]
    Client(#[from] ClientError),
    #[error("Unable to {action} DNS resource to {name}")]
    NoServerAccepted { action: UpdateAction, name: String },
}

type Result<T> = std::result::Result<T, DnsUpdateError>;

/// 動態更新的 TSIG 簽名有效時間窗（秒）。
const TSIG_FUDGE: u16 = 300;

/// 挑戰用的 TXT 記錄。
///
/// `value` 為裸摘要字串；區域檔呈現時的引號屬於展示層，
/// 線上格式只攜帶字符資料。
#[derive(Debug, Clone)]
pub struct TxtRecord {
    /// 完整限定的記錄名稱，例如 `_acme-challenge.example.com.`。
    pub name: Name,
    /// 記錄 TTL（秒）。
    pub ttl: u32,
    /// TXT 記錄值。
    pub value: String,
}

impl TxtRecord {
    pub fn new(name: Name, ttl: u32, value: impl Into<String>) -> Self {
        TxtRecord {
            name,
            ttl,
            value: value.into(),
        }
    }

    /// 轉換為動態更新訊息所需的 RRset。
    fn to_record_set(&self) -> RecordSet {
        let mut rrset = RecordSet::with_ttl(self.name.clone(), RecordType::TXT, self.ttl);
        rrset.add_rdata(RData::TXT(TXT::new(vec![self.value.clone()])));
        rrset
    }
}

/// 動態更新的動作種類。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateAction {
    Add,
    Delete,
}

impl fmt::Display for UpdateAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Add => write!(f, "add"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

/// 將一筆經過認證的更新送往單一目標伺服器的能力。
pub trait UpdateTransport {
    /// 對 `target` 送出一筆更新。回傳 `Ok` 代表伺服器有回應，
    /// 呼叫端即停止嘗試其他候選位址。
    fn send(
        &self,
        target: SocketAddr,
        zone: &Name,
        action: UpdateAction,
        record: &TxtRecord,
    ) -> Result<()>;
}

/// 以 TSIG 簽署、TCP 傳送的動態更新實作。
pub struct TsigUpdate {
    key_name: Name,
    key: Vec<u8>,
    algorithm: TsigAlgorithm,
    timeout: Duration,
}

impl TsigUpdate {
    /// 依操作者提供的金鑰材料建立更新通道。
    ///
    /// # 參數
    ///
    /// - `key_name`: TSIG 金鑰名稱。
    /// - `secret_b64`: Base64 編碼的共享密鑰。
    /// - `algorithm`: 演算法名稱，例如 `hmac-sha256`。
    /// - `timeout`: 單次 TCP 交換的逾時。
    pub fn new(
        key_name: &str,
        secret_b64: &str,
        algorithm: &str,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(TsigUpdate {
            key_name: Name::from_ascii(key_name)?,
            key: base64::decode(secret_b64)?,
            algorithm: tsig_algorithm(algorithm)?,
            timeout,
        })
    }
}

impl UpdateTransport for TsigUpdate {
    fn send(
        &self,
        target: SocketAddr,
        zone: &Name,
        action: UpdateAction,
        record: &TxtRecord,
    ) -> Result<()> {
        let connection = TcpClientConnection::with_timeout(target, self.timeout)?;
        let signer = TSigner::new(
            self.key.clone(),
            self.algorithm.clone(),
            self.key_name.clone(),
            TSIG_FUDGE,
        )?;
        let client = SyncClient::with_tsigner(connection, signer);

        let response = match action {
            UpdateAction::Add => client.append(record.to_record_set(), zone.clone(), false)?,
            UpdateAction::Delete => client.delete_by_rdata(record.to_record_set(), zone.clone())?,
        };

        if response.response_code() != ResponseCode::NoError {
            warn!(
                rcode = %response.response_code(),
                record = %record.name,
                "dynamic update returned a non-NOERROR response"
            );
        }
        Ok(())
    }
}

/// 將操作者設定的演算法名稱對應到 TSIG 演算法。
fn tsig_algorithm(name: &str) -> Result<TsigAlgorithm> {
    match name.to_ascii_lowercase().as_str() {
        "hmac-md5" | "hmac-md5.sig-alg.reg.int" => Ok(TsigAlgorithm::HmacMd5),
        "hmac-sha1" => Ok(TsigAlgorithm::HmacSha1),
        "hmac-sha256" => Ok(TsigAlgorithm::HmacSha256),
        "hmac-sha384" => Ok(TsigAlgorithm::HmacSha384),
        "hmac-sha512" => Ok(TsigAlgorithm::HmacSha512),
        other => Err(DnsUpdateError::UnsupportedAlgorithm(other.to_string())),
    }
}

/// 挑戰記錄的安裝與移除。
///
/// 每次操作都重新探索區域與其權威伺服器，依偏好順序逐一嘗試，
/// 第一個有回應的伺服器即視為完成；傳輸層錯誤記錄後換下一個候選。
pub struct Provisioner<'a> {
    lookup: &'a dyn Lookup,
    transport: &'a dyn UpdateTransport,
    port: u16,
}

impl<'a> Provisioner<'a> {
    pub fn new(lookup: &'a dyn Lookup, transport: &'a dyn UpdateTransport, port: u16) -> Self {
        Provisioner {
            lookup,
            transport,
            port,
        }
    }

    /// 安裝挑戰記錄。
    pub fn install(&self, record: &TxtRecord) -> Result<()> {
        self.apply(UpdateAction::Add, record)
    }

    /// 移除挑戰記錄。
    pub fn remove(&self, record: &TxtRecord) -> Result<()> {
        self.apply(UpdateAction::Delete, record)
    }

    fn apply(&self, action: UpdateAction, record: &TxtRecord) -> Result<()> {
        let zone = self.lookup.zone_for(&record.name)?;
        let candidates = authoritative_server_ips(self.lookup, &zone)?;

        for ip in candidates {
            let target = SocketAddr::new(ip, self.port);
            match self.transport.send(target, &zone, action, record) {
                Ok(()) => {
                    debug!(%target, %action, record = %record.name, "dynamic update accepted");
                    return Ok(());
                }
                Err(e) => {
                    debug!(
                        %target,
                        %action,
                        error = %e,
                        "unable to update on this server, trying the next candidate"
                    );
                }
            }
        }

        Err(DnsUpdateError::NoServerAccepted {
            action,
            name: record.name.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        cell::RefCell,
        collections::HashMap,
        net::{Ipv4Addr, Ipv6Addr},
    };

    use crate::resolver::ResolverError;

    fn name(s: &str) -> Name {
        Name::from_ascii(s).unwrap()
    }

    /// 固定區域拓撲的查詢樁：example.com，主伺服器 ns1，次伺服器 ns2。
    struct FixedZone;

    impl Lookup for FixedZone {
        fn soa_primary(&self, zone: &Name) -> std::result::Result<Option<Name>, ResolverError> {
            if *zone == name("example.com.") {
                Ok(Some(name("ns1.example.com.")))
            } else {
                Ok(None)
            }
        }

        fn name_servers(&self, _zone: &Name) -> std::result::Result<Vec<Name>, ResolverError> {
            Ok(vec![name("ns1.example.com."), name("ns2.example.com.")])
        }

        fn ipv4(&self, host: &Name) -> std::result::Result<Vec<Ipv4Addr>, ResolverError> {
            if *host == name("ns1.example.com.") {
                Ok(vec!["192.0.2.1".parse().unwrap()])
            } else {
                Ok(vec!["192.0.2.2".parse().unwrap()])
            }
        }

        fn ipv6(&self, _host: &Name) -> std::result::Result<Vec<Ipv6Addr>, ResolverError> {
            Ok(Vec::new())
        }

        fn txt(&self, _name: &Name) -> std::result::Result<Vec<String>, ResolverError> {
            Ok(Vec::new())
        }

        fn cname(&self, _name: &Name) -> std::result::Result<Option<Name>, ResolverError> {
            Ok(None)
        }
    }

    /// 權威伺服器樁：在記憶體中維護名稱到 TXT 值的對應。
    #[derive(Default)]
    struct StubServer {
        records: RefCell<HashMap<String, Vec<String>>>,
        failing: Vec<SocketAddr>,
        contacted: RefCell<Vec<SocketAddr>>,
    }

    impl UpdateTransport for StubServer {
        fn send(
            &self,
            target: SocketAddr,
            _zone: &Name,
            action: UpdateAction,
            record: &TxtRecord,
        ) -> Result<()> {
            self.contacted.borrow_mut().push(target);
            if self.failing.contains(&target) {
                return Err(DnsUpdateError::NoServerAccepted {
                    action,
                    name: record.name.to_string(),
                });
            }

            let key = record.name.to_ascii().to_lowercase();
            let mut records = self.records.borrow_mut();
            match action {
                UpdateAction::Add => {
                    records.entry(key).or_default().push(record.value.clone());
                }
                UpdateAction::Delete => {
                    if let Some(values) = records.get_mut(&key) {
                        values.retain(|value| value != &record.value);
                        if values.is_empty() {
                            records.remove(&key);
                        }
                    }
                }
            }
            Ok(())
        }
    }

    fn challenge_record() -> TxtRecord {
        TxtRecord::new(name("_acme-challenge.example.com."), 10, "digest-value")
    }

    #[test]
    fn test_add_then_remove_restores_server_state() {
        let zone = FixedZone;
        let server = StubServer::default();
        server
            .records
            .borrow_mut()
            .insert("www.example.com.".to_string(), vec!["unrelated".to_string()]);
        let before = server.records.borrow().clone();

        let provisioner = Provisioner::new(&zone, &server, 53);
        let record = challenge_record();
        provisioner.install(&record).unwrap();
        assert!(server
            .records
            .borrow()
            .contains_key("_acme-challenge.example.com."));
        provisioner.remove(&record).unwrap();

        assert_eq!(*server.records.borrow(), before);
    }

    #[test]
    fn test_failover_to_next_candidate() {
        let zone = FixedZone;
        let server = StubServer {
            failing: vec!["192.0.2.1:53".parse().unwrap()],
            ..Default::default()
        };

        let provisioner = Provisioner::new(&zone, &server, 53);
        provisioner.install(&challenge_record()).unwrap();

        let contacted = server.contacted.borrow();
        let expected: Vec<SocketAddr> = vec![
            "192.0.2.1:53".parse().unwrap(),
            "192.0.2.2:53".parse().unwrap(),
        ];
        assert_eq!(*contacted, expected);
    }

    #[test]
    fn test_all_candidates_failing_is_fatal() {
        let zone = FixedZone;
        let server = StubServer {
            failing: vec![
                "192.0.2.1:53".parse().unwrap(),
                "192.0.2.2:53".parse().unwrap(),
            ],
            ..Default::default()
        };

        let provisioner = Provisioner::new(&zone, &server, 53);
        assert!(matches!(
            provisioner.install(&challenge_record()),
            Err(DnsUpdateError::NoServerAccepted {
                action: UpdateAction::Add,
                ..
            })
        ));
    }

    #[test]
    fn test_first_success_stops_the_scan() {
        let zone = FixedZone;
        let server = StubServer::default();
        let provisioner = Provisioner::new(&zone, &server, 53);
        provisioner.install(&challenge_record()).unwrap();
        assert_eq!(server.contacted.borrow().len(), 1);
    }

    #[test]
    fn test_tsig_algorithm_mapping() {
        assert!(matches!(
            tsig_algorithm("HMAC-SHA256"),
            Ok(TsigAlgorithm::HmacSha256)
        ));
        assert!(matches!(
            tsig_algorithm("hmac-md5.sig-alg.reg.int"),
            Ok(TsigAlgorithm::HmacMd5)
        ));
        assert!(matches!(
            tsig_algorithm("hmac-crc32"),
            Err(DnsUpdateError::UnsupportedAlgorithm(_))
        ));
    }

    #[test]
    fn test_update_port_is_applied() {
        let zone = FixedZone;
        let server = StubServer::default();
        let provisioner = Provisioner::new(&zone, &server, 5353);
        provisioner.install(&challenge_record()).unwrap();
        let first: SocketAddr = "192.0.2.1:5353".parse().unwrap();
        assert_eq!(server.contacted.borrow()[0], first);
    }
}
