pub mod api;
pub mod model;
pub mod offroute;
pub mod progress;

pub use api::{RouteRequest, RoutingClient, RoutingError};
pub use model::{Direction, Route, RouteSet};
pub use offroute::{is_off_route, should_skip, ReRouteGuard};
pub use progress::{direction_index, distance_to_next_turn_m, progress, RouteProgress};
