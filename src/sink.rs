//! Result sinks: where a worker hands each `ScanResult`.
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::SinkError;
use crate::types::{CertificateRecord, ScanResult, StoredCertificate};
use crate::writer::WriterHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Plain,
    Json,
}

/// JSON line emitted per successful fetch in stream mode.
#[derive(Serialize)]
struct JsonLine<'a> {
    ip: &'a str,
    organization: &'a str,
    #[serde(rename = "commonName")]
    common_name: &'a str,
    #[serde(rename = "SAN")]
    san: String,
}

/// Prints results as they arrive, one line per result, from whichever worker
/// produced them. Each line is written under one lock so lines never interleave.
#[derive(Clone)]
pub struct StreamSink {
    out: Arc<Mutex<Box<dyn Write + Send>>>,
    format: OutputFormat,
    show_failures: bool,
}

impl StreamSink {
    pub fn new(out: impl Write + Send + 'static, format: OutputFormat, show_failures: bool) -> Self {
        Self {
            out: Arc::new(Mutex::new(Box::new(out))),
            format,
            show_failures,
        }
    }

    pub fn stdout(format: OutputFormat, show_failures: bool) -> Self {
        Self::new(io::stdout(), format, show_failures)
    }

    /// Line for `result`, or `None` when it should not be shown.
    pub fn render(&self, result: &ScanResult) -> io::Result<Option<String>> {
        match result {
            ScanResult::Success { record, .. } => self.render_record(record).map(Some),
            ScanResult::Failure { ip, .. } if self.show_failures => {
                Ok(Some(format!("Failed to get SSL certificate from {ip}")))
            }
            ScanResult::Failure { .. } => Ok(None),
        }
    }

    fn render_record(&self, record: &CertificateRecord) -> io::Result<String> {
        match self.format {
            OutputFormat::Plain => Ok(format!(
                "Got SSL certificate from {}: [{}]",
                record.ip,
                record.names().collect::<Vec<_>>().join(", ")
            )),
            OutputFormat::Json => {
                let line = JsonLine {
                    ip: &record.ip,
                    organization: &record.organization,
                    common_name: &record.common_name,
                    san: record.joined_sans(", "),
                };
                serde_json::to_string(&line).map_err(io::Error::from)
            }
        }
    }

    fn emit(&self, result: &ScanResult) -> io::Result<()> {
        let Some(line) = self.render(result)? else {
            return Ok(());
        };
        let mut out = self.out.lock().unwrap_or_else(|e| e.into_inner());
        writeln!(out, "{line}")?;
        out.flush()
    }
}

/// Where workers send their results.
#[derive(Clone)]
pub enum Sink {
    /// Print inline from each worker.
    Stream(StreamSink),
    /// Forward successes to the single store writer. Failures are never
    /// stored; they are printed through `failures` when it is set.
    Persist {
        writer: WriterHandle,
        failures: Option<StreamSink>,
    },
    /// Hand every result to a caller-owned consumer.
    Channel(mpsc::Sender<ScanResult>),
}

impl Sink {
    pub async fn accept(&self, result: ScanResult) -> Result<(), SinkError> {
        match self {
            Sink::Stream(stream) => stream.emit(&result).map_err(SinkError::from),
            Sink::Persist { writer, failures } => match &result {
                ScanResult::Success { record, .. } => writer
                    .submit(StoredCertificate::from(record))
                    .await
                    .map_err(|_| SinkError::Closed),
                ScanResult::Failure { ip, error } => {
                    debug!(addr = %ip, %error, "failed to get certificate");
                    match failures {
                        Some(out) => out.emit(&result).map_err(SinkError::from),
                        None => Ok(()),
                    }
                }
            },
            Sink::Channel(tx) => tx.send(result).await.map_err(|_| SinkError::Closed),
        }
    }
}
