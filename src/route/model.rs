use serde::{Deserialize, Serialize};

use crate::geo::Coord;

/// One instruction leg of a route, tied to the underlying road edges it
/// covers.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Direction {
    #[serde(default)]
    pub instruction: String,
    pub turn_point: Coord,
    #[serde(default)]
    pub street_name: String,
    #[serde(default)]
    pub travel_time: f64,
    #[serde(default)]
    pub distance: f64,
    #[serde(default)]
    pub edge_ids: Vec<i64>,
    #[serde(default)]
    pub polyline: String,
    #[serde(default)]
    pub turn_bearing: f64,
    #[serde(default)]
    pub turn_type: String,
}

impl Direction {
    pub fn contains_edge(&self, edge_id: i64) -> bool {
        self.edge_ids.contains(&edge_id)
    }
}

/// A computed route. `path` stays an encoded polyline; decoding is the
/// renderer's job. `distance` is kilometers once normalized by the routing
/// client (the wire reports meters).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Route {
    #[serde(default)]
    pub travel_time: f64,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub distance: f64,
    #[serde(default)]
    pub driving_directions: Vec<Direction>,
}

impl Route {
    pub fn contains_edge(&self, edge_id: i64) -> bool {
        self.driving_directions
            .iter()
            .any(|direction| direction.contains_edge(edge_id))
    }
}

/// The active route plus its alternatives. Index 0 is the primary; entries
/// are replaced in place and never reordered.
#[derive(Clone, Debug, Default)]
pub struct RouteSet {
    routes: Vec<Route>,
    active: usize,
}

impl RouteSet {
    pub fn new(routes: Vec<Route>) -> Self {
        RouteSet { routes, active: 0 }
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn active_index(&self) -> usize {
        self.active
    }

    pub fn active(&self) -> Option<&Route> {
        self.routes.get(self.active)
    }

    /// Select which entry is active. Out-of-range indices are ignored.
    pub fn set_active(&mut self, index: usize) {
        if index < self.routes.len() {
            self.active = index;
        }
    }

    /// Replace only the active entry; alternates are never touched.
    pub fn replace_active(&mut self, route: Route) {
        if let Some(slot) = self.routes.get_mut(self.active) {
            *slot = route;
        }
    }
}
