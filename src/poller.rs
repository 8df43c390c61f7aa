//! Periodic polling of the variable list
//!
//! One pass queries every descriptor in declared order through the shared
//! link; successful samples are decoded, logged, and (when flagged)
//! collected into a datapoint. Datapoints are deferred and flushed to the
//! sink in batches so a flaky database does not slow the polling cadence.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::decode::FieldValue;
use crate::error::VitoError;
use crate::protocol::telegram::hexlify;
use crate::sink::{DataPoint, InfluxSink};
use crate::transport::OptolinkLink;
use crate::varlist::VariableDescriptor;

/// Tuning for the polling loop
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Measurement name for submitted datapoints
    pub measurement: String,
    /// Pause between polling passes
    pub sleep: Duration,
    /// Number of passes per sink submission
    pub batch_submit: u32,
}

/// The polling orchestrator
pub struct Poller {
    link: Arc<OptolinkLink>,
    varlist: Vec<VariableDescriptor>,
    sink: Option<InfluxSink>,
    config: PollerConfig,
}

impl Poller {
    pub fn new(
        link: Arc<OptolinkLink>,
        varlist: Vec<VariableDescriptor>,
        sink: Option<InfluxSink>,
        config: PollerConfig,
    ) -> Self {
        Self {
            link,
            varlist,
            sink,
            config,
        }
    }

    /// Run the polling loop forever
    pub async fn run(self) {
        let mut poll_ctr = 0u32;
        let mut deferred: Vec<DataPoint> = Vec::new();

        loop {
            tracing::info!("=== Poll controller ===");
            let fields = self.poll_all().await;

            if !fields.is_empty() {
                deferred.push(DataPoint {
                    measurement: self.config.measurement.clone(),
                    time: Utc::now(),
                    fields,
                });
            }

            poll_ctr += 1;
            if poll_ctr >= self.config.batch_submit {
                if let Some(sink) = &self.sink {
                    if let Err(e) = sink.write(&deferred).await {
                        tracing::error!("Error writing to InfluxDB: {}", e);
                    }
                }
                // Dropped on failure as well; there is no retry queue
                deferred.clear();
                poll_ctr = 0;
            }

            tokio::time::sleep(self.config.sleep).await;
        }
    }

    /// One pass over the variable list; returns the fields to forward
    async fn poll_all(&self) -> Vec<(String, FieldValue)> {
        let mut fields = Vec::new();

        for item in &self.varlist {
            let record = match self.link.query(item.addr, item.codec.payload_len).await {
                Ok(record) => record,
                Err(VitoError::NotSynced) => {
                    // Still unsynced; the rest of the pass would only fail too
                    tracing::info!("Controller is not ready, skipping");
                    break;
                }
                Err(e) => {
                    tracing::error!(
                        "{} [{:04x}/{}] error {} while talking to controller",
                        item.name,
                        item.addr,
                        item.codec.payload_len,
                        e
                    );
                    continue;
                }
            };

            let value = match item.codec.decode(&record.payload) {
                Ok(value) => value,
                Err(e) => {
                    tracing::error!(
                        "{:<12} ERR, raw={}, {}",
                        item.name,
                        hexlify(&record.payload),
                        e
                    );
                    continue;
                }
            };

            tracing::info!("{:<12} {}", item.name, item.codec.format.render(&value));

            if item.forward {
                match value.as_field() {
                    Some(field) => fields.push((item.name.clone(), field)),
                    None => {
                        tracing::debug!("{} is not numeric, not forwarded", item.name)
                    }
                }
            }
        }

        fields
    }
}
