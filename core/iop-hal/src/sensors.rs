//! Sensor bundle contract.
//!
//! The hardware drivers (DHT-family air probe, 1-Wire soil probe, ADC
//! resistivity) are out of the control plane's scope; the loop consumes
//! one operation that samples everything at once.

use serde::{Deserialize, Serialize};

/// One measurement tick across the whole probe bundle.
///
/// Field names serialize to the exact wire keys the `/v1/event` endpoint
/// expects. A failed probe reports NaN for its float fields rather than
/// failing the whole reading — the server treats NaN as "sensor absent".
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reading {
    pub air_temp_c: f32,
    pub air_humidity_pct: f32,
    pub air_heat_index_c: f32,
    pub soil_temp_c: f32,
    pub soil_resistivity_raw: u16,
}

impl Reading {
    /// The all-probes-failed reading.
    pub fn unavailable() -> Self {
        Self {
            air_temp_c: f32::NAN,
            air_humidity_pct: f32::NAN,
            air_heat_index_c: f32::NAN,
            soil_temp_c: f32::NAN,
            soil_resistivity_raw: 0,
        }
    }
}

/// The sensor bundle attached to the plant.
pub trait SensorsInterface {
    /// One-time probe initialization at boot.
    fn setup(&mut self);

    /// Samples every probe. Individual failures surface as NaN fields.
    fn measure(&mut self) -> Reading;
}
