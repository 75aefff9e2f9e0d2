//! Sensor registry built once at startup.

use tracing::{info, warn};

use crate::error::{ExporterError, Result};
use crate::sensor::{SensorFactory, SensorHandle, SensorLabel};

/// A sensor together with its metric label.
pub struct SensorEntry {
    pub(crate) handle: Box<dyn SensorHandle>,
    label: SensorLabel,
}

impl SensorEntry {
    pub fn new(handle: Box<dyn SensorHandle>, label: SensorLabel) -> Self {
        Self { handle, label }
    }

    pub fn label(&self) -> &SensorLabel {
        &self.label
    }
}

/// Ordered, read-only set of the sensors that initialized.
pub struct SensorRegistry {
    entries: Vec<SensorEntry>,
}

impl SensorRegistry {
    /// Build the registry for bus positions `0..requested`.
    ///
    /// A position whose sensor fails to initialize is logged and skipped;
    /// the others keep the label of their own position. An empty result is
    /// [`ExporterError::NoSensors`]. A request for zero sensors fails without
    /// calling the factory.
    pub fn build<F: SensorFactory + ?Sized>(requested: usize, factory: &F) -> Result<Self> {
        if requested == 0 {
            return Err(ExporterError::NoSensors { requested });
        }

        let mut entries = Vec::with_capacity(requested);

        for index in 0..requested {
            let label = SensorLabel::for_index(index);
            match factory.create(index) {
                Ok(handle) => {
                    info!(sensor = %label, index, "Sensor initialized");
                    entries.push(SensorEntry::new(handle, label));
                }
                Err(e) => {
                    warn!(
                        sensor = %label,
                        index,
                        error = %e,
                        "Failed to initialize sensor, skipping"
                    );
                }
            }
        }

        if entries.is_empty() {
            return Err(ExporterError::NoSensors { requested });
        }

        info!(
            initialized = entries.len(),
            requested, "Sensor registry ready"
        );

        Ok(Self { entries })
    }

    /// Number of registered sensors.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Labels in registry order.
    pub fn labels(&self) -> impl Iterator<Item = &SensorLabel> {
        self.entries.iter().map(SensorEntry::label)
    }

    pub(crate) fn entries_mut(&mut self) -> impl Iterator<Item = &mut SensorEntry> {
        self.entries.iter_mut()
    }
}
