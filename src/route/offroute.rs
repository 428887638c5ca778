use crate::matching::session::NOT_STARTED_EDGE_ID;

use super::model::Route;

/// Off-route iff the snapped edge appears in no direction of the route. Edge
/// id 0 belongs to no route and is therefore always off-route; the skip
/// condition below suppresses it before the first real match.
pub fn is_off_route(snapped_edge_id: i64, route: &Route) -> bool {
    !route.contains_edge(snapped_edge_id)
}

/// Spurious-re-route suppression before the first matched fix: the snapped
/// edge still holds the not-started id, or no fix has been emitted yet.
pub fn should_skip(snapped_edge_id: i64, step: u64) -> bool {
    snapped_edge_id == NOT_STARTED_EDGE_ID || step == 1
}

/// Serializes re-route requests: while one is outstanding, further off-route
/// ticks do not issue another. The stale route stays active; the first
/// off-route tick after completion retries.
#[derive(Debug, Default)]
pub struct ReRouteGuard {
    in_flight: bool,
}

impl ReRouteGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the single slot; false while a request is outstanding.
    pub fn try_begin(&mut self) -> bool {
        if self.in_flight {
            return false;
        }
        self.in_flight = true;
        true
    }

    pub fn finish(&mut self) {
        self.in_flight = false;
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn reset(&mut self) {
        self.in_flight = false;
    }
}
