//! 遞迴 DNS 查詢能力與挑戰記錄的自我檢查。
//!
//! [`Lookup`] 是本 crate 與外部 DNS 解析能力的邊界：區域探索、
//! 權威伺服器列舉與 TXT 自我檢查都只透過這個 trait 取得答案，
//! 正式實作包裝 hickory 的同步解析器。

use std::{
    io,
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr},
    time::Duration,
};

use hickory_resolver::{
    config::{NameServerConfig, Protocol, ResolverConfig, ResolverOpts},
    error::{ResolveError, ResolveErrorKind},
    proto::rr::{RData, RecordType},
    system_conf::read_system_conf,
    Name, Resolver,
};
use thiserror::Error;
use tracing::{debug, info};

/// DNS 查詢相關錯誤。
#[derive(Debug, Error)]
pub enum ResolverError {
    #[error("Failed to initialise resolver: {0}")]
    Init(#[from] io::Error),
    #[error("DNS lookup failed: {0}")]
    Resolve(#[from] ResolveError),
    #[error("Unable to determine the zone for {0}")]
    ZoneNotFound(String),
    #[error("Error checking challenge, value not found: {expected}")]
    NotVisible { expected: String, attempts: u32 },
}

type Result<T> = std::result::Result<T, ResolverError>;

/// 遞迴解析能力的抽象介面。
///
/// 「查無記錄」一律以空答案表示而非錯誤，對應遞迴查詢中常見的
/// NXDOMAIN／NODATA；其餘失敗（逾時、拒答）以錯誤回傳。
pub trait Lookup {
    /// 查詢區域 SOA 記錄的主伺服器名稱（MNAME），區域不存在時為 `None`。
    fn soa_primary(&self, zone: &Name) -> Result<Option<Name>>;

    /// 查詢區域的 NS 記錄。
    fn name_servers(&self, zone: &Name) -> Result<Vec<Name>>;

    /// 解析主機名稱的 IPv4 位址。
    fn ipv4(&self, host: &Name) -> Result<Vec<Ipv4Addr>>;

    /// 解析主機名稱的 IPv6 位址。
    fn ipv6(&self, host: &Name) -> Result<Vec<Ipv6Addr>>;

    /// 查詢名稱下所有 TXT 值，每筆記錄的分段已串接為單一字串。
    fn txt(&self, name: &Name) -> Result<Vec<String>>;

    /// 查詢名稱的 CNAME 目標（若有）。
    fn cname(&self, name: &Name) -> Result<Option<Name>>;

    /// 找出涵蓋指定名稱的區域：自名稱本身往根方向逐層查 SOA，
    /// 第一個有 SOA 的名稱即為區域頂點。
    fn zone_for(&self, name: &Name) -> Result<Name> {
        let mut candidate = name.clone();
        loop {
            if self.soa_primary(&candidate)?.is_some() {
                return Ok(candidate);
            }
            if candidate.num_labels() <= 1 {
                return Err(ResolverError::ZoneNotFound(name.to_string()));
            }
            candidate = candidate.base_name();
        }
    }
}

/// 以 hickory 同步解析器實作的遞迴查詢。
pub struct RecursiveLookup {
    resolver: Resolver,
}

impl RecursiveLookup {
    /// 建立解析器。
    ///
    /// # 參數
    ///
    /// - `nameservers`: 操作者指定的遞迴伺服器；空清單時沿用系統
    ///   解析設定。
    /// - `timeout`: 單次查詢的逾時。
    pub fn new(nameservers: &[IpAddr], timeout: Duration) -> Result<Self> {
        let (config, mut opts) = if nameservers.is_empty() {
            read_system_conf()?
        } else {
            let mut config = ResolverConfig::new();
            for ip in nameservers {
                config.add_name_server(NameServerConfig::new(
                    SocketAddr::new(*ip, 53),
                    Protocol::Udp,
                ));
            }
            (config, ResolverOpts::default())
        };
        opts.timeout = timeout;

        Ok(RecursiveLookup {
            resolver: Resolver::new(config, opts)?,
        })
    }
}

/// 將「查無記錄」正規化為 `None`，其餘錯誤維持原樣。
fn none_on_no_records<T>(
    result: std::result::Result<T, ResolveError>,
) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if matches!(e.kind(), ResolveErrorKind::NoRecordsFound { .. }) => Ok(None),
        Err(e) => Err(ResolverError::Resolve(e)),
    }
}

impl Lookup for RecursiveLookup {
    fn soa_primary(&self, zone: &Name) -> Result<Option<Name>> {
        let lookup = none_on_no_records(self.resolver.soa_lookup(zone.clone()))?;
        Ok(lookup.and_then(|soa| soa.iter().next().map(|record| record.mname().clone())))
    }

    fn name_servers(&self, zone: &Name) -> Result<Vec<Name>> {
        let lookup = none_on_no_records(self.resolver.ns_lookup(zone.clone()))?;
        Ok(lookup
            .map(|ns| ns.iter().map(|record| record.0.clone()).collect())
            .unwrap_or_default())
    }

    fn ipv4(&self, host: &Name) -> Result<Vec<Ipv4Addr>> {
        let lookup = none_on_no_records(self.resolver.ipv4_lookup(host.clone()))?;
        Ok(lookup
            .map(|a| a.iter().map(|record| record.0).collect())
            .unwrap_or_default())
    }

    fn ipv6(&self, host: &Name) -> Result<Vec<Ipv6Addr>> {
        let lookup = none_on_no_records(self.resolver.ipv6_lookup(host.clone()))?;
        Ok(lookup
            .map(|aaaa| aaaa.iter().map(|record| record.0).collect())
            .unwrap_or_default())
    }

    fn txt(&self, name: &Name) -> Result<Vec<String>> {
        let lookup = none_on_no_records(self.resolver.txt_lookup(name.clone()))?;
        Ok(lookup
            .map(|txt| {
                txt.iter()
                    .map(|record| {
                        record
                            .txt_data()
                            .iter()
                            .map(|segment| String::from_utf8_lossy(segment).into_owned())
                            .collect::<String>()
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    fn cname(&self, name: &Name) -> Result<Option<Name>> {
        let lookup = none_on_no_records(self.resolver.lookup(name.clone(), RecordType::CNAME))?;
        Ok(lookup.and_then(|answers| {
            answers.iter().find_map(|rdata| match rdata {
                RData::CNAME(target) => Some(target.0.clone()),
                _ => None,
            })
        }))
    }
}

/// 列出區域動態更新的候選目標位址。
///
/// 依動態更新的慣例，SOA 主伺服器（MNAME）優先；同一家族內主伺服器
/// 的位址排最前，整體 IPv6 位址先於 IPv4，重複位址只保留第一次出現。
/// 主伺服器只有在同時出現於 NS 集合時才會被查詢。
pub fn authoritative_server_ips(lookup: &dyn Lookup, zone: &Name) -> Result<Vec<IpAddr>> {
    let primary = lookup.soa_primary(zone)?;
    let nameservers = lookup.name_servers(zone)?;

    let mut v6: Vec<Ipv6Addr> = Vec::new();
    let mut v4: Vec<Ipv4Addr> = Vec::new();

    if let Some(primary) = &primary {
        if nameservers.contains(primary) {
            v6.extend(lookup.ipv6(primary)?);
            v4.extend(lookup.ipv4(primary)?);
        }
    }

    for nameserver in nameservers
        .iter()
        .filter(|ns| primary.as_ref() != Some(*ns))
    {
        v6.extend(lookup.ipv6(nameserver)?);
        v4.extend(lookup.ipv4(nameserver)?);
    }

    let mut candidates: Vec<IpAddr> = Vec::new();
    for ip in v6
        .into_iter()
        .map(IpAddr::V6)
        .chain(v4.into_iter().map(IpAddr::V4))
    {
        if !candidates.contains(&ip) {
            candidates.push(ip);
        }
    }

    Ok(candidates)
}

/// 等待挑戰 TXT 記錄在遞迴解析器上可見。
///
/// 先等一個 TTL 讓快取失效，之後每次嘗試查一次 TXT 並比對期望的
/// 摘要值，任何一筆相符即成功。查詢錯誤（例如記錄尚未出現）視為
/// 可重試；嘗試次數用盡即失敗，錯誤中帶出期望值。
///
/// # 參數
///
/// - `interval`: 等待間隔，等同於記錄的 TTL。
/// - `max_attempts`: 嘗試次數上限。
/// - `wait`: 等待函式，正式流程傳入 `thread::sleep`。
pub fn wait_until_visible(
    lookup: &dyn Lookup,
    record_name: &Name,
    expected: &str,
    interval: Duration,
    max_attempts: u32,
    mut wait: impl FnMut(Duration),
) -> Result<()> {
    info!(
        seconds = interval.as_secs(),
        "waiting one TTL to ensure DNS caches are cleared"
    );
    wait(interval);

    for attempt in 1..=max_attempts {
        info!(attempt, record = %record_name, value = expected, "self test: checking TXT record");
        match lookup.txt(record_name) {
            Ok(values) => {
                for value in &values {
                    debug!(value = %value, "found TXT value");
                }
                if values.iter().any(|value| value == expected) {
                    return Ok(());
                }
            }
            Err(e) => {
                info!(error = %e, "will retry, a DNS error occurred while checking the challenge");
            }
        }
        if attempt < max_attempts {
            wait(interval);
        }
    }

    Err(ResolverError::NotVisible {
        expected: expected.to_string(),
        attempts: max_attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::collections::HashMap;

    #[derive(Default)]
    struct StubLookup {
        soa: HashMap<String, Name>,
        ns: HashMap<String, Vec<Name>>,
        v4: HashMap<String, Vec<Ipv4Addr>>,
        v6: HashMap<String, Vec<Ipv6Addr>>,
        txt_values: Vec<String>,
        txt_calls: Cell<u32>,
    }

    fn name(s: &str) -> Name {
        Name::from_ascii(s).unwrap()
    }

    fn key(n: &Name) -> String {
        n.to_ascii().to_lowercase()
    }

    impl Lookup for StubLookup {
        fn soa_primary(&self, zone: &Name) -> Result<Option<Name>> {
            Ok(self.soa.get(&key(zone)).cloned())
        }

        fn name_servers(&self, zone: &Name) -> Result<Vec<Name>> {
            Ok(self.ns.get(&key(zone)).cloned().unwrap_or_default())
        }

        fn ipv4(&self, host: &Name) -> Result<Vec<Ipv4Addr>> {
            Ok(self.v4.get(&key(host)).cloned().unwrap_or_default())
        }

        fn ipv6(&self, host: &Name) -> Result<Vec<Ipv6Addr>> {
            Ok(self.v6.get(&key(host)).cloned().unwrap_or_default())
        }

        fn txt(&self, _name: &Name) -> Result<Vec<String>> {
            self.txt_calls.set(self.txt_calls.get() + 1);
            Ok(self.txt_values.clone())
        }

        fn cname(&self, _name: &Name) -> Result<Option<Name>> {
            Ok(None)
        }
    }

    #[test]
    fn test_zone_for_walks_toward_the_root() {
        let mut stub = StubLookup::default();
        stub.soa
            .insert("example.com.".to_string(), name("ns1.example.com."));

        let zone = stub
            .zone_for(&name("_acme-challenge.www.example.com."))
            .unwrap();
        assert_eq!(zone, name("example.com."));
    }

    #[test]
    fn test_zone_for_fails_when_no_soa_exists() {
        let stub = StubLookup::default();
        assert!(matches!(
            stub.zone_for(&name("a.b.c.")),
            Err(ResolverError::ZoneNotFound(_))
        ));
    }

    #[test]
    fn test_candidate_ordering_prefers_primary_and_ipv6() {
        let mut stub = StubLookup::default();
        let zone = name("example.com.");
        stub.soa.insert(key(&zone), name("ns1.example.com."));
        stub.ns.insert(
            key(&zone),
            vec![name("ns2.example.com."), name("ns1.example.com.")],
        );
        stub.v6.insert(
            "ns1.example.com.".to_string(),
            vec!["2001:db8::1".parse().unwrap()],
        );
        stub.v4
            .insert("ns1.example.com.".to_string(), vec!["192.0.2.1".parse().unwrap()]);
        stub.v6.insert(
            "ns2.example.com.".to_string(),
            vec!["2001:db8::2".parse().unwrap()],
        );
        stub.v4
            .insert("ns2.example.com.".to_string(), vec!["192.0.2.2".parse().unwrap()]);

        let candidates = authoritative_server_ips(&stub, &zone).unwrap();
        let expected: Vec<IpAddr> = vec![
            "2001:db8::1".parse().unwrap(),
            "2001:db8::2".parse().unwrap(),
            "192.0.2.1".parse().unwrap(),
            "192.0.2.2".parse().unwrap(),
        ];
        assert_eq!(candidates, expected);
    }

    #[test]
    fn test_candidate_ordering_skips_primary_outside_ns_set() {
        let mut stub = StubLookup::default();
        let zone = name("example.com.");
        // 主伺服器為隱藏主機，不在 NS 集合內
        stub.soa.insert(key(&zone), name("hidden.example.com."));
        stub.ns.insert(key(&zone), vec![name("ns2.example.com.")]);
        stub.v4
            .insert("hidden.example.com.".to_string(), vec!["192.0.2.9".parse().unwrap()]);
        stub.v4
            .insert("ns2.example.com.".to_string(), vec!["192.0.2.2".parse().unwrap()]);

        let candidates = authoritative_server_ips(&stub, &zone).unwrap();
        let expected: Vec<IpAddr> = vec!["192.0.2.2".parse().unwrap()];
        assert_eq!(candidates, expected);
    }

    #[test]
    fn test_duplicate_addresses_are_removed() {
        let mut stub = StubLookup::default();
        let zone = name("example.com.");
        stub.soa.insert(key(&zone), name("ns1.example.com."));
        stub.ns.insert(
            key(&zone),
            vec![name("ns1.example.com."), name("ns2.example.com.")],
        );
        stub.v4
            .insert("ns1.example.com.".to_string(), vec!["192.0.2.1".parse().unwrap()]);
        stub.v4
            .insert("ns2.example.com.".to_string(), vec!["192.0.2.1".parse().unwrap()]);

        let candidates = authoritative_server_ips(&stub, &zone).unwrap();
        let expected: Vec<IpAddr> = vec!["192.0.2.1".parse().unwrap()];
        assert_eq!(candidates, expected);
    }

    #[test]
    fn test_self_check_fails_after_exact_attempt_count() {
        let stub = StubLookup {
            txt_values: vec!["not-the-digest".to_string()],
            ..Default::default()
        };

        let result = wait_until_visible(
            &stub,
            &name("_acme-challenge.example.com."),
            "expected-digest",
            Duration::ZERO,
            10,
            |_| {},
        );

        assert_eq!(stub.txt_calls.get(), 10);
        match result {
            Err(ResolverError::NotVisible { expected, attempts }) => {
                assert_eq!(expected, "expected-digest");
                assert_eq!(attempts, 10);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_self_check_succeeds_on_first_match() {
        let stub = StubLookup {
            txt_values: vec!["other".to_string(), "the-digest".to_string()],
            ..Default::default()
        };

        wait_until_visible(
            &stub,
            &name("_acme-challenge.example.com."),
            "the-digest",
            Duration::ZERO,
            10,
            |_| {},
        )
        .unwrap();
        assert_eq!(stub.txt_calls.get(), 1);
    }
}
