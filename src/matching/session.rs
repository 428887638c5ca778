use crate::geo::Coord;
use crate::gps::GpsFix;

use super::protocol::{Candidate, MapMatchRequest, MapMatchResponse};

/// Cross-step estimation state: carried from the response of step `k` into
/// the request of step `k + 1`.
#[derive(Clone, Debug, PartialEq)]
pub struct EstimationState {
    pub candidates: Vec<Candidate>,
    pub speed_mean_k: f64,
    pub speed_std_k: f64,
    pub last_bearing: f64,
}

impl Default for EstimationState {
    fn default() -> Self {
        EstimationState {
            candidates: Vec::new(),
            speed_mean_k: 500.0,
            speed_std_k: 500.0,
            last_bearing: 0.0,
        }
    }
}

/// What a server message did to the session.
#[derive(Clone, Debug)]
pub enum MatchOutcome {
    /// Unmatched-fix sentinel: estimation state went back to defaults, the
    /// published position is untouched.
    Reset,
    Matched {
        snapped_edge_id: i64,
        matched_coord: Coord,
        predicted_coord: Coord,
        speed_mean_k: f64,
    },
}

/// Synthetic edge id published before any fix has been matched.
pub const NOT_STARTED_EDGE_ID: i64 = 0;

/// Step-indexed state of one streaming map-match session. Requests are
/// correlated with responses only through this state: each response mutates
/// it in place and the next outgoing request consumes it.
#[derive(Debug)]
pub struct MatchSession {
    step: u64,
    est: EstimationState,
    snapped_edge_id: i64,
    matched_coord: Option<Coord>,
}

impl MatchSession {
    pub fn new() -> Self {
        MatchSession {
            step: 1,
            est: EstimationState::default(),
            snapped_edge_id: NOT_STARTED_EDGE_ID,
            matched_coord: None,
        }
    }

    /// Logical sequence number of the next outgoing fix.
    pub fn step(&self) -> u64 {
        self.step
    }

    /// Road edge the latest valid response snapped to
    /// (`NOT_STARTED_EDGE_ID` before the first).
    pub fn snapped_edge_id(&self) -> i64 {
        self.snapped_edge_id
    }

    pub fn matched_coord(&self) -> Option<Coord> {
        self.matched_coord
    }

    pub fn estimation(&self) -> &EstimationState {
        &self.est
    }

    /// Build the outbound message for `fix` from the state of the most
    /// recently processed response, then advance the step counter. A response
    /// that has not arrived yet simply leaves the older state in place; the
    /// server tolerates slightly stale candidate sets.
    pub fn next_request(&mut self, fix: &GpsFix) -> MapMatchRequest {
        let request = build_request(fix, self.step, &self.est);
        self.step += 1;
        request
    }

    pub fn handle_response(&mut self, response: MapMatchResponse) -> MatchOutcome {
        let payload = response.data;
        if payload.matched_gps_point.is_unmatched() {
            self.est = EstimationState::default();
            return MatchOutcome::Reset;
        }

        let matched = payload.matched_gps_point;
        self.est = EstimationState {
            candidates: payload.candidates,
            speed_mean_k: payload.speed_mean_k,
            speed_std_k: payload.speed_std_k,
            last_bearing: payload.edge_initial_bearing,
        };
        self.snapped_edge_id = matched.edge_id;
        self.matched_coord = Some(matched.matched_coord);

        MatchOutcome::Matched {
            snapped_edge_id: matched.edge_id,
            matched_coord: matched.matched_coord,
            predicted_coord: matched.predicted_gps_coord,
            speed_mean_k: payload.speed_mean_k,
        }
    }

    /// Recovery for malformed inbound messages: same as the sentinel.
    pub fn reset_estimation(&mut self) {
        self.est = EstimationState::default();
    }

    /// Session start/stop: step back to 1, estimation state and published
    /// outputs back to defaults.
    pub fn reset(&mut self) {
        *self = MatchSession::new();
    }
}

impl Default for MatchSession {
    fn default() -> Self {
        Self::new()
    }
}

/// Pure request construction from explicit state.
pub fn build_request(fix: &GpsFix, k: u64, est: &EstimationState) -> MapMatchRequest {
    MapMatchRequest {
        gps_point: fix.clone(),
        k,
        candidates: est.candidates.clone(),
        speed_mean_k: est.speed_mean_k,
        speed_std_k: est.speed_std_k,
        last_bearing: est.last_bearing,
    }
}
