//! Live route tracking against a navigation backend: a streaming map-match
//! client with dead reckoning, route-progress reporting, and off-route
//! recovery.
//!
//! The heavy lifting (Hidden-Markov matching, route planning) runs server
//! side; this crate drives the client protocol and state machine over an
//! unreliable sensor and network.

pub mod geo;
pub mod gps;
pub mod matching;
pub mod route;
pub mod tracker;

pub use geo::{distance_km, Coord};
pub use gps::{GpsFix, GpsSampler, WatchError, WatchEvent};
pub use matching::{EstimationState, MatchSession};
pub use route::{Direction, Route, RouteSet, RoutingClient};
pub use tracker::{SessionHandle, TrackerConfig, TrackerError, TrackerEvent};
