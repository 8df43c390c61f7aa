//! InfluxDB v2 write client
//!
//! The core treats the time-series sink as opaque: batched datapoints go
//! in, success or an error comes back. Failures are never fatal; the
//! caller logs and drops the batch.

use chrono::{DateTime, Utc};

use crate::decode::FieldValue;
use crate::error::{Result, VitoError};

/// One sample: a measurement name, a timestamp, and named numeric fields
#[derive(Debug, Clone, PartialEq)]
pub struct DataPoint {
    pub measurement: String,
    pub time: DateTime<Utc>,
    pub fields: Vec<(String, FieldValue)>,
}

/// Connection settings for the InfluxDB v2 write API
#[derive(Debug, Clone)]
pub struct SinkConfig {
    pub url: String,
    pub token: String,
    pub org: String,
    pub bucket: String,
}

/// Write client for the InfluxDB v2 `/api/v2/write` endpoint
pub struct InfluxSink {
    client: reqwest::Client,
    write_url: String,
    token: String,
    org: String,
    bucket: String,
}

impl InfluxSink {
    pub fn new(config: SinkConfig) -> Self {
        let write_url = format!("{}/api/v2/write", config.url.trim_end_matches('/'));
        Self {
            client: reqwest::Client::new(),
            write_url,
            token: config.token,
            org: config.org,
            bucket: config.bucket,
        }
    }

    /// Write a batch of datapoints as one line-protocol request
    pub async fn write(&self, points: &[DataPoint]) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }

        let body = line_protocol(points);
        tracing::debug!("Writing {} datapoint(s) to {}", points.len(), self.write_url);

        let response = self
            .client
            .post(&self.write_url)
            .query(&[
                ("org", self.org.as_str()),
                ("bucket", self.bucket.as_str()),
                ("precision", "ns"),
            ])
            .header("Authorization", format!("Token {}", self.token))
            .body(body)
            .send()
            .await
            .map_err(|e| VitoError::Sink(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let reason = response.text().await.unwrap_or_default();
            return Err(VitoError::Sink(format!("HTTP {}: {}", status, reason)));
        }

        Ok(())
    }
}

/// Render datapoints as InfluxDB line protocol, one line per point
fn line_protocol(points: &[DataPoint]) -> String {
    let mut out = String::new();

    for point in points {
        if point.fields.is_empty() {
            continue;
        }

        out.push_str(&escape_measurement(&point.measurement));
        out.push(' ');

        for (i, (key, value)) in point.fields.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            out.push_str(&escape_key(key));
            out.push('=');
            match value {
                FieldValue::Integer(v) => out.push_str(&format!("{}i", v)),
                FieldValue::Float(v) => out.push_str(&format!("{}", v)),
            }
        }

        out.push(' ');
        out.push_str(&point.time.timestamp_nanos_opt().unwrap_or_default().to_string());
        out.push('\n');
    }

    out
}

fn escape_measurement(s: &str) -> String {
    s.replace(',', "\\,").replace(' ', "\\ ")
}

fn escape_key(s: &str) -> String {
    s.replace(',', "\\,").replace('=', "\\=").replace(' ', "\\ ")
}
