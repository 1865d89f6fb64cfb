//! Supplier availability collaborator.

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;
use wgp_common::{SupplierType, TimeWindow};

use crate::EngineError;

/// A supplier's free time, as answered to a match-job request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityRecord {
    pub supplier_id: String,
    pub supplier_type: SupplierType,
    /// Day the slots belong to, in seconds since the unix epoch.
    #[serde(default)]
    pub date: u64,
    #[serde(default)]
    pub slots: Vec<TimeWindow>,
}

#[async_trait]
pub trait AvailabilityProvider: Send + Sync {
    /// Suppliers of one of `types` free for at least `duration` seconds inside
    /// `window`, best match first.
    async fn query(
        &self,
        types: &[SupplierType],
        window: TimeWindow,
        duration: u64,
    ) -> Result<Vec<AvailabilityRecord>, EngineError>;
}

/// Static calendar of supplier slots.
#[derive(Clone, Debug, Default)]
pub struct CalendarAvailability {
    calendar: Vec<AvailabilityRecord>,
}

impl CalendarAvailability {
    pub fn new(calendar: Vec<AvailabilityRecord>) -> Self {
        Self { calendar }
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let calendar: Vec<AvailabilityRecord> = serde_json::from_str(&raw).map_err(|err| {
            EngineError::Config(format!("availability calendar {}: {}", path.display(), err))
        })?;
        info!(path = %path.display(), suppliers = calendar.len(), "loaded availability calendar");
        Ok(Self::new(calendar))
    }

    pub fn len(&self) -> usize {
        self.calendar.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calendar.is_empty()
    }
}

#[async_trait]
impl AvailabilityProvider for CalendarAvailability {
    async fn query(
        &self,
        types: &[SupplierType],
        window: TimeWindow,
        duration: u64,
    ) -> Result<Vec<AvailabilityRecord>, EngineError> {
        let mut eligible: Vec<AvailabilityRecord> = self
            .calendar
            .iter()
            .filter(|record| types.contains(&record.supplier_type))
            .filter_map(|record| {
                let slots: Vec<TimeWindow> = record
                    .slots
                    .iter()
                    .filter_map(|slot| slot.intersect(&window))
                    .filter(|slot| slot.duration() >= duration)
                    .collect();
                (!slots.is_empty()).then(|| AvailabilityRecord {
                    slots,
                    ..record.clone()
                })
            })
            .collect();

        // earliest free slot first
        eligible.sort_by_key(|record| record.slots.iter().map(|s| s.start).min());
        Ok(eligible)
    }
}
