//! Shot data handed to the application once a putt has been validated.

use serde::{Deserialize, Serialize};

use crate::core::bluetooth::ShotRecord;

/// Which putting device produced the shot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PuttType {
    #[serde(rename = "oneputt")]
    OnePutt,
}

/// The unit-normalised shot forwarded beyond the device layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BallData {
    /// Ball speed in mph
    pub speed: f64,
    /// Horizontal launch angle in degrees
    pub hla: f64,
    /// Vertical launch angle in degrees
    pub vla: f64,
    pub putt_type: PuttType,
    pub good_shot: bool,
    pub club: String,
}

impl BallData {
    /// Builds ball data from a raw measurement, scaling speed and rounding to 2 decimals.
    pub fn from_shot(shot: &ShotRecord, speed_scale: f64, putt_type: PuttType, club: &str) -> Self {
        Self {
            speed: round2(f64::from(shot.speed) * speed_scale),
            hla: round2(f64::from(shot.hla)),
            vla: round2(f64::from(shot.vla)),
            putt_type,
            good_shot: true,
            club: club.to_string(),
        }
    }
}

/// Two decimals, exact ties to even.
fn round2(value: f64) -> f64 {
    (value * 100.0).round_ties_even() / 100.0
}
