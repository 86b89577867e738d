//! Persisted leveling counters.
//!
//! A small flat record that survives disconnects and restarts. Serialized as
//! JSON with the keys `first_time`, `prints`, `last_mesh` (`DD/MM/YYYY`),
//! `abl_always`, `last_bedtemp`, `last_hetemp`. Any key missing from an older
//! record is backfilled with its default on load.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Mutex;

use crate::config::defaults::MESH_DATE_FORMAT;

// ============================================================================
// Clock
// ============================================================================

/// Source of "today" for mesh-age arithmetic.
pub trait Clock: Send + Sync {
    fn today(&self) -> NaiveDate;
}

/// Local wall-clock date.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        chrono::Local::now().date_naive()
    }
}

/// Settable clock for tests and replays.
#[derive(Debug)]
pub struct FixedClock {
    today: Mutex<NaiveDate>,
}

impl FixedClock {
    pub fn new(today: NaiveDate) -> Self {
        Self {
            today: Mutex::new(today),
        }
    }

    pub fn set(&self, today: NaiveDate) {
        *self.today.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = today;
    }
}

impl Clock for FixedClock {
    fn today(&self) -> NaiveDate {
        *self.today.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

// ============================================================================
// Record
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedCounters {
    /// No leveling-and-save cycle has completed yet
    #[serde(default = "default_first_time")]
    pub first_time: bool,

    /// Prints completed since the last saved mesh
    #[serde(rename = "prints", default)]
    pub prints_since_mesh: u32,

    /// Date of the last saved mesh
    #[serde(rename = "last_mesh", with = "mesh_date", default = "local_today")]
    pub last_mesh_date: NaiveDate,

    /// Operator override: re-level before every print
    #[serde(rename = "abl_always", default)]
    pub always_relevel: bool,

    /// Last commanded bed target (°C)
    #[serde(rename = "last_bedtemp", default)]
    pub last_bed_temp: i32,

    /// Last commanded hotend target (°C)
    #[serde(rename = "last_hetemp", default)]
    pub last_hotend_temp: i32,
}

fn default_first_time() -> bool {
    true
}

fn local_today() -> NaiveDate {
    SystemClock.today()
}

impl PersistedCounters {
    /// Record for a fresh install.
    pub fn fresh(today: NaiveDate) -> Self {
        Self {
            first_time: true,
            prints_since_mesh: 0,
            last_mesh_date: today,
            always_relevel: false,
            last_bed_temp: 0,
            last_hotend_temp: 0,
        }
    }

    /// Whole days elapsed since the last saved mesh. Never negative.
    pub fn days_since_mesh(&self, today: NaiveDate) -> i64 {
        (today - self.last_mesh_date).num_days().max(0)
    }

    /// Apply a completed leveling-and-save cycle.
    pub fn record_mesh_saved(&mut self, today: NaiveDate) {
        self.first_time = false;
        self.prints_since_mesh = 0;
        self.last_mesh_date = today;
    }
}

impl fmt::Display for PersistedCounters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "State(first_time={}, prints={}, last_mesh={}, abl_always={}, last_bedtemp={}, last_hetemp={})",
            self.first_time,
            self.prints_since_mesh,
            self.last_mesh_date.format(MESH_DATE_FORMAT),
            self.always_relevel,
            self.last_bed_temp,
            self.last_hotend_temp,
        )
    }
}

/// `DD/MM/YYYY` (de)serialization for `NaiveDate`.
mod mesh_date {
    use super::MESH_DATE_FORMAT;
    use chrono::NaiveDate;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(date: &NaiveDate, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(&date.format(MESH_DATE_FORMAT))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDate, D::Error> {
        let raw = String::deserialize(d)?;
        NaiveDate::parse_from_str(&raw, MESH_DATE_FORMAT).map_err(serde::de::Error::custom)
    }
}
