//! Sensor polling loop.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::collector::{GaugeSet, SharedGaugeSet};
use crate::registry::{SensorEntry, SensorRegistry};
use crate::sensor::SensorError;

/// Outcome of one poll of the registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollSummary {
    /// Sensors whose gauges were updated.
    pub updated: usize,
    /// Sensors whose read failed.
    pub failed: usize,
}

/// Read one sensor and publish its rounded reading.
///
/// Never fails: errors, including a panicking driver, are logged and leave
/// the sensor's gauges at their last value. Returns whether the gauges were
/// updated.
pub fn read_sensor(entry: &mut SensorEntry, gauges: &GaugeSet) -> bool {
    let result = panic::catch_unwind(AssertUnwindSafe(|| entry.handle.read()))
        .unwrap_or_else(|payload| Err(SensorError::Unexpected(panic_message(payload.as_ref()))));

    match result {
        Ok(reading) => {
            let reading = reading.rounded();
            gauges.record(entry.label(), &reading);
            debug!(
                sensor = %entry.label(),
                temperature = reading.temperature,
                humidity = reading.humidity,
                "Sensor read"
            );
            true
        }
        Err(e) if e.is_transient() => {
            gauges.record_failure(true);
            warn!(sensor = %entry.label(), error = %e, "Failed to read sensor");
            false
        }
        Err(e) => {
            gauges.record_failure(false);
            error!(
                sensor = %entry.label(),
                error = %e,
                details = ?e,
                "Unexpected error reading sensor"
            );
            false
        }
    }
}

/// Read every sensor once, in registry order.
pub fn poll_once(registry: &mut SensorRegistry, gauges: &GaugeSet) -> PollSummary {
    let mut summary = PollSummary::default();

    for entry in registry.entries_mut() {
        if read_sensor(entry, gauges) {
            summary.updated += 1;
        } else {
            summary.failed += 1;
        }
    }

    gauges.record_poll();
    summary
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("driver panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("driver panicked: {}", s)
    } else {
        "driver panicked".to_string()
    }
}

/// Polls the registry on a fixed interval until shutdown.
pub struct SensorPoller {
    registry: Arc<Mutex<SensorRegistry>>,
    gauges: SharedGaugeSet,
    interval: Duration,
}

impl SensorPoller {
    /// Create a poller over a built registry.
    pub fn new(registry: SensorRegistry, gauges: SharedGaugeSet, interval: Duration) -> Self {
        Self {
            registry: Arc::new(Mutex::new(registry)),
            gauges,
            interval,
        }
    }

    /// Poll every sensor once.
    ///
    /// Bus I/O blocks, so the poll runs on the blocking thread pool and the
    /// HTTP server keeps answering scrapes meanwhile.
    pub async fn poll(&self) -> Option<PollSummary> {
        let registry = self.registry.clone();
        let gauges = self.gauges.clone();

        match tokio::task::spawn_blocking(move || poll_once(&mut registry.lock(), &gauges)).await
        {
            Ok(summary) => Some(summary),
            Err(e) => {
                error!(error = %e, "Poll task failed");
                None
            }
        }
    }

    /// Run the polling loop until the shutdown signal is received.
    ///
    /// Every poll retries every sensor; a failing sensor is never dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let sensors = self.registry.lock().len();

        info!(
            sensors,
            interval_secs = self.interval.as_secs_f64(),
            "Starting sensor poller"
        );

        loop {
            tokio::select! {
                summary = self.poll() => {
                    if let Some(summary) = summary {
                        debug!(
                            updated = summary.updated,
                            failed = summary.failed,
                            "Poll complete"
                        );
                    }
                }
                _ = wait_for_shutdown(&mut shutdown) => break,
            }

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = wait_for_shutdown(&mut shutdown) => break,
            }
        }

        info!("Sensor poller stopped");
    }
}

/// Resolve once the shutdown flag is set or its sender is gone.
pub(crate) async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            break;
        }
        if shutdown.changed().await.is_err() {
            break;
        }
    }
}
