use std::collections::HashSet;
use std::io::{self, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cert_recon_rs::error::FetchError;
use cert_recon_rs::fetch::CertFetcher;
use cert_recon_rs::scanner::{
    collect_with, persist_reporting, persist_with, stream_with, ScanConfig,
};
use cert_recon_rs::sink::{OutputFormat, StreamSink};
use cert_recon_rs::store::{CertStore, QueryFilter};
use cert_recon_rs::targets::TargetSpec;
use cert_recon_rs::types::{DialTarget, LeafIdentity, ScanResult};

/// Deterministic fetcher: hosts ending in .1 fail, everything else presents a
/// certificate whose names are derived from the target. `generation` is baked
/// into the organization so repeated scans can present changed certificates.
struct FakeFetcher {
    generation: u64,
    calls: AtomicU64,
}

impl FakeFetcher {
    fn new(generation: u64) -> Self {
        Self {
            generation,
            calls: AtomicU64::new(0),
        }
    }
}

impl CertFetcher for FakeFetcher {
    async fn fetch(&self, target: &DialTarget) -> Result<LeafIdentity, FetchError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        // Uneven latency shuffles completion order across workers.
        let jitter = target.as_str().len() as u64 % 3;
        tokio::time::sleep(Duration::from_millis(jitter)).await;
        if target.host().ends_with(".1") {
            return Err(FetchError::Timeout(Duration::from_millis(1)));
        }
        let host = target.host().to_string();
        Ok(LeafIdentity {
            organization: Some(format!("Org gen{}", self.generation)),
            names: vec![
                format!("cn-{host}"),
                format!("www-{host}"),
                format!("api-{host}"),
            ],
        })
    }
}

fn outcome_set(results: &[ScanResult]) -> HashSet<String> {
    results
        .iter()
        .map(|r| match r {
            ScanResult::Success { ip, record } => format!(
                "ok {ip} {} {} {}",
                record.organization,
                record.common_name,
                record.subject_alt_names.join(",")
            ),
            ScanResult::Failure { ip, .. } => format!("fail {ip}"),
        })
        .collect()
}

#[tokio::test]
async fn worker_count_does_not_change_result_set() {
    let spec = TargetSpec::parse("10.0.0.0/27,10.0.1.0/29", &[443, 8443]).unwrap();
    let expected = spec.targets().count() as u64;

    let (s1, r1) = collect_with(&spec, Arc::new(FakeFetcher::new(1)), 1).await;
    let (s100, r100) = collect_with(&spec, Arc::new(FakeFetcher::new(1)), 100).await;

    assert_eq!(s1.dispatched, expected);
    assert_eq!(s100.dispatched, expected);
    assert_eq!(r1.len() as u64, expected);
    assert_eq!(r100.len() as u64, expected);
    assert_eq!(s1.succeeded, s100.succeeded);
    assert_eq!(outcome_set(&r1), outcome_set(&r100));
}

#[tokio::test]
async fn each_target_is_fetched_exactly_once() {
    let spec = TargetSpec::parse("10.0.0.0/28,10.0.0.5", &[443]).unwrap();
    let fetcher = Arc::new(FakeFetcher::new(1));
    let (summary, results) = collect_with(&spec, fetcher.clone(), 7).await;
    assert_eq!(fetcher.calls.load(Ordering::Relaxed), 15);
    assert_eq!(summary.dispatched, 15);
    assert_eq!(summary.succeeded + summary.failed, 15);
    assert_eq!(summary.failed, 1);
    assert!(results
        .iter()
        .any(|r| !r.is_success() && r.target().as_str() == "10.0.0.1:443"));
}

#[tokio::test]
async fn common_name_first_then_sans_in_order() {
    let spec = TargetSpec::parse("edge.test:9443", &[443]).unwrap();
    let (_, results) = collect_with(&spec, Arc::new(FakeFetcher::new(1)), 4).await;
    match &results[..] {
        [ScanResult::Success { record, .. }] => {
            assert_eq!(record.ip, "edge.test:9443");
            assert_eq!(record.common_name, "cn-edge.test");
            assert_eq!(
                record.subject_alt_names,
                vec!["www-edge.test", "api-edge.test"]
            );
        }
        other => panic!("unexpected results: {other:?}"),
    }
}

#[tokio::test]
async fn persist_upserts_latest_fields_without_duplicates() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("certificates.db");
    let spec = TargetSpec::parse("10.0.0.0/28", &[443]).unwrap();
    let config = ScanConfig {
        concurrency: 50,
        ..ScanConfig::default()
    };

    let first = persist_with(
        &spec,
        Arc::new(FakeFetcher::new(1)),
        &config,
        CertStore::open(&db).unwrap(),
    )
    .await
    .unwrap();
    assert_eq!(first.dispatched, 14);
    assert_eq!(first.failed, 1);
    assert_eq!(first.persisted, 13);

    let second = persist_with(
        &spec,
        Arc::new(FakeFetcher::new(2)),
        &config,
        CertStore::open(&db).unwrap(),
    )
    .await
    .unwrap();
    assert_eq!(second.persisted, 13);

    let store = CertStore::open_read_only(&db).unwrap();
    assert_eq!(store.count().unwrap(), 13);
    let rows = store.all().unwrap();
    assert!(rows.iter().all(|r| r.organization == "Org gen2"));
    assert!(rows.iter().all(|r| r.ip != "10.0.0.1:443"));
    let row = store
        .query(&QueryFilter::IpPrefix("10.0.0.14:".into()))
        .unwrap();
    assert_eq!(row.len(), 1);
    assert_eq!(row[0].common_name, "cn-10.0.0.14");
    assert_eq!(row[0].san, "www-10.0.0.14,api-10.0.0.14");
}

#[tokio::test]
async fn concurrent_duplicate_targets_leave_one_row() {
    let spec = TargetSpec::parse(&vec!["10.9.9.9"; 40].join(","), &[443]).unwrap();
    let config = ScanConfig {
        concurrency: 40,
        ..ScanConfig::default()
    };
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("dup.db");
    let summary = persist_with(
        &spec,
        Arc::new(FakeFetcher::new(1)),
        &config,
        CertStore::open(&db).unwrap(),
    )
    .await
    .unwrap();
    assert_eq!(summary.dispatched, 40);
    assert_eq!(summary.persisted, 40);
    assert_eq!(CertStore::open_read_only(&db).unwrap().count().unwrap(), 1);
}

#[derive(Clone, Default)]
struct Capture(Arc<Mutex<Vec<u8>>>);

impl Write for Capture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn stream_lines_are_whole_under_concurrency() {
    let spec = TargetSpec::parse("10.0.0.0/26", &[443]).unwrap();
    let cap = Capture::default();
    let config = ScanConfig {
        concurrency: 32,
        show_failures: true,
        ..ScanConfig::default()
    };
    let out = StreamSink::new(cap.clone(), OutputFormat::Json, true);
    let summary = stream_with(&spec, Arc::new(FakeFetcher::new(1)), &config, out).await;
    assert_eq!(summary.dispatched, 62);

    let text = String::from_utf8(cap.0.lock().unwrap().clone()).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 62);
    let mut json_lines = 0;
    for line in lines {
        if line.starts_with("Failed to get SSL certificate from ") {
            continue;
        }
        let v: serde_json::Value = serde_json::from_str(line).unwrap();
        assert_eq!(v["organization"], "Org gen1");
        json_lines += 1;
    }
    assert_eq!(json_lines, 61);
}

#[tokio::test]
async fn store_scan_prints_failed_targets_when_asked() {
    let spec = TargetSpec::parse("10.0.0.0/28", &[443]).unwrap();
    let config = ScanConfig {
        concurrency: 8,
        show_failures: true,
        ..ScanConfig::default()
    };
    let cap = Capture::default();
    let out = StreamSink::new(cap.clone(), config.format, true);
    let summary = persist_reporting(
        &spec,
        Arc::new(FakeFetcher::new(1)),
        &config,
        CertStore::open_in_memory().unwrap(),
        Some(out),
    )
    .await
    .unwrap();
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.persisted, 13);

    let text = String::from_utf8(cap.0.lock().unwrap().clone()).unwrap();
    assert_eq!(text, "Failed to get SSL certificate from 10.0.0.1:443\n");
}
