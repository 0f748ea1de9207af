use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::FetchError;

/// Organization recorded when the leaf certificate subject carries no `O`.
pub const NO_ORGANIZATION: &str = "NONE";

/// One `host:port` string handed to exactly one worker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DialTarget(String);

impl DialTarget {
    pub fn new(target: impl Into<String>) -> Self {
        Self(target.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Host part of the target, without the port and without IPv6 brackets.
    /// Used as the TLS server name.
    pub fn host(&self) -> &str {
        let host = match self.0.rsplit_once(':') {
            Some((host, _)) => host,
            None => &self.0,
        };
        host.trim_start_matches('[').trim_end_matches(']')
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for DialTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DialTarget {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Identity fields read from a leaf certificate.
///
/// `names[0]` is the subject common name (empty when absent), followed by every
/// DNS subject alternative name in encoded order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LeafIdentity {
    pub organization: Option<String>,
    pub names: Vec<String>,
}

/// Certificate identity for one successfully dialed target.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CertificateRecord {
    pub ip: String,
    pub organization: String,
    pub common_name: String,
    pub subject_alt_names: Vec<String>,
}

impl CertificateRecord {
    pub fn from_identity(target: &DialTarget, identity: LeafIdentity) -> Self {
        let mut names = identity.names.into_iter();
        let common_name = names.next().unwrap_or_default();
        Self {
            ip: target.as_str().to_string(),
            organization: identity
                .organization
                .unwrap_or_else(|| NO_ORGANIZATION.to_string()),
            common_name,
            subject_alt_names: names.collect(),
        }
    }

    /// Common name followed by the SANs, as fetched.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.common_name.as_str())
            .chain(self.subject_alt_names.iter().map(String::as_str))
    }

    /// Non-empty SANs joined with `sep`.
    pub fn joined_sans(&self, sep: &str) -> String {
        self.subject_alt_names
            .iter()
            .filter(|s| !s.is_empty())
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(sep)
    }
}

/// Outcome of one fetch attempt.
#[derive(Debug)]
pub enum ScanResult {
    Success {
        ip: DialTarget,
        record: CertificateRecord,
    },
    Failure {
        ip: DialTarget,
        error: FetchError,
    },
}

impl ScanResult {
    pub fn target(&self) -> &DialTarget {
        match self {
            ScanResult::Success { ip, .. } | ScanResult::Failure { ip, .. } => ip,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ScanResult::Success { .. })
    }
}

/// Persisted row; SANs are stored as one comma-joined string.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct StoredCertificate {
    pub ip: String,
    pub organization: String,
    #[serde(rename = "commonName")]
    pub common_name: String,
    #[serde(rename = "SAN")]
    pub san: String,
}

impl From<&CertificateRecord> for StoredCertificate {
    fn from(record: &CertificateRecord) -> Self {
        Self {
            ip: record.ip.clone(),
            organization: record.organization.clone(),
            common_name: record.common_name.clone(),
            san: record.subject_alt_names.join(","),
        }
    }
}

/// Counters reported once a scan has stopped.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub dispatched: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub persisted: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_strips_port_and_brackets() {
        assert_eq!(DialTarget::from("example.test:8443").host(), "example.test");
        assert_eq!(DialTarget::from("10.0.0.1:443").host(), "10.0.0.1");
        assert_eq!(DialTarget::from("[2001:db8::1]:443").host(), "2001:db8::1");
        assert_eq!(DialTarget::from("bare").host(), "bare");
    }

    #[test]
    fn record_splits_common_name_from_sans() {
        let identity = LeafIdentity {
            organization: None,
            names: vec!["cn.test".into(), "a.test".into(), "b.test".into()],
        };
        let rec = CertificateRecord::from_identity(&"1.2.3.4:443".into(), identity);
        assert_eq!(rec.ip, "1.2.3.4:443");
        assert_eq!(rec.organization, NO_ORGANIZATION);
        assert_eq!(rec.common_name, "cn.test");
        assert_eq!(rec.subject_alt_names, vec!["a.test", "b.test"]);
        assert_eq!(
            rec.names().collect::<Vec<_>>(),
            vec!["cn.test", "a.test", "b.test"]
        );
    }

    #[test]
    fn stored_projection_joins_sans() {
        let rec = CertificateRecord {
            ip: "1.2.3.4:443".into(),
            organization: "Acme Corp".into(),
            common_name: "acme.test".into(),
            subject_alt_names: vec!["www.acme.test".into(), "api.acme.test".into()],
        };
        let row = StoredCertificate::from(&rec);
        assert_eq!(row.san, "www.acme.test,api.acme.test");
        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["commonName"], "acme.test");
        assert_eq!(json["SAN"], "www.acme.test,api.acme.test");
        assert!(json.get("san").is_none());
    }

    #[test]
    fn joined_sans_skips_empty_entries() {
        let rec = CertificateRecord {
            ip: "h:1".into(),
            organization: "O".into(),
            common_name: String::new(),
            subject_alt_names: vec!["a".into(), String::new(), "b".into()],
        };
        assert_eq!(rec.joined_sans(", "), "a, b");
    }
}
