use serde::{Deserialize, Serialize};

use crate::geo::Coord;
use crate::gps::GpsFix;

/// Out-of-range latitude signalling an unmatched fix.
pub const INVALID_LAT: f64 = 91.0;
/// Out-of-range longitude signalling an unmatched fix.
pub const INVALID_LON: f64 = 181.0;

/// A road edge still plausible as the true location, carried between
/// estimation steps.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub edge_id: i64,
    pub weight: f64,
    pub length: f64,
}

/// Outbound message for one step of the streaming protocol.
#[derive(Clone, Debug, Serialize)]
pub struct MapMatchRequest {
    pub gps_point: GpsFix,
    /// Logical step number, starting at 1.
    pub k: u64,
    pub candidates: Vec<Candidate>,
    pub speed_mean_k: f64,
    pub speed_std_k: f64,
    pub last_bearing: f64,
}

/// The matcher's answer for a single fix.
#[derive(Clone, Debug, Deserialize)]
pub struct MatchedGpsPoint {
    #[serde(default)]
    pub gps_point: Option<GpsFix>,
    pub edge_id: i64,
    pub matched_coord: Coord,
    pub predicted_gps_coord: Coord,
    #[serde(default)]
    pub edge_initial_bearing: f64,
}

impl MatchedGpsPoint {
    /// The server could not match this fix; the coordinates carry the
    /// out-of-range sentinel and no usable position.
    pub fn is_unmatched(&self) -> bool {
        self.matched_coord.lat == INVALID_LAT && self.matched_coord.lon == INVALID_LON
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct MatchPayload {
    pub matched_gps_point: MatchedGpsPoint,
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    pub speed_mean_k: f64,
    pub speed_std_k: f64,
    pub edge_initial_bearing: f64,
}

/// Inbound message envelope.
#[derive(Clone, Debug, Deserialize)]
pub struct MapMatchResponse {
    pub data: MatchPayload,
}
