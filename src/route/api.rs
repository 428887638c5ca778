use std::fmt::{Display, Formatter};
use std::time::Duration;

use serde::Deserialize;

use super::model::Route;

/// Routing service failures, worded as they are surfaced to the user.
#[derive(Debug, Clone)]
pub enum RoutingError {
    /// HTTP 502 from the routing engine.
    Maintenance,
    Http { status: u16, text: String },
    Network(String),
    Decode(String),
}

impl Display for RoutingError {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            RoutingError::Maintenance => write!(f, "routing engine under maintenance"),
            RoutingError::Http { status, text } => {
                write!(f, "server error ({}): {}", status, text)
            }
            RoutingError::Network(_) => write!(f, "fetch route error"),
            RoutingError::Decode(msg) => write!(f, "malformed route response: {}", msg),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct RouteRequest {
    pub src_lat: f64,
    pub src_lon: f64,
    pub dest_lat: f64,
    pub dest_lon: f64,
}

#[derive(Deserialize)]
struct RouteWrapper {
    data: Route,
}

#[derive(Deserialize)]
struct AlternativesWrapper {
    data: AlternativesPayload,
}

#[derive(Deserialize)]
struct AlternativesPayload {
    #[serde(default)]
    alternative_routes: Vec<Route>,
}

/// HTTP client for the route computation service.
#[derive(Clone)]
pub struct RoutingClient {
    client: reqwest::Client,
    base_url: String,
}

impl RoutingClient {
    pub fn new(base_url: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("route-tracker/0.1.0")
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        RoutingClient {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Compute a route between two coordinates.
    pub async fn compute_route(&self, request: &RouteRequest) -> Result<Route, RoutingError> {
        let url = format!(
            "{}/api/computeRoutes?origin_lat={}&origin_lon={}&destination_lat={}&destination_lon={}",
            self.base_url, request.src_lat, request.src_lon, request.dest_lat, request.dest_lon
        );
        let wrapper: RouteWrapper = self.get_json(&url).await?;
        Ok(normalize_route(wrapper.data))
    }

    /// Compute up to `count` alternative routes for the same endpoints.
    pub async fn compute_alternatives(
        &self,
        request: &RouteRequest,
        count: u32,
    ) -> Result<Vec<Route>, RoutingError> {
        let url = format!(
            "{}/api/computeAlternativeRoutes?origin_lat={}&origin_lon={}&destination_lat={}&destination_lon={}&k={}",
            self.base_url, request.src_lat, request.src_lon, request.dest_lat, request.dest_lon, count
        );
        let wrapper: AlternativesWrapper = self.get_json(&url).await?;
        Ok(wrapper
            .data
            .alternative_routes
            .into_iter()
            .map(normalize_route)
            .collect())
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, RoutingError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| RoutingError::Network(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 502 {
            return Err(RoutingError::Maintenance);
        }
        if !status.is_success() {
            return Err(RoutingError::Http {
                status: status.as_u16(),
                text: status.canonical_reason().unwrap_or("").to_string(),
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| RoutingError::Decode(e.to_string()))
    }
}

/// The wire reports meters; routes are stored in kilometers, two decimals.
fn normalize_route(mut route: Route) -> Route {
    route.distance = (route.distance / 1000.0 * 100.0).round() / 100.0;
    route
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages_match_the_user_surface() {
        assert_eq!(
            RoutingError::Maintenance.to_string(),
            "routing engine under maintenance"
        );
        assert_eq!(
            RoutingError::Http {
                status: 404,
                text: "Not Found".to_string()
            }
            .to_string(),
            "server error (404): Not Found"
        );
        assert_eq!(
            RoutingError::Network("dns".to_string()).to_string(),
            "fetch route error"
        );
    }

    #[test]
    fn distance_normalizes_to_km_with_two_decimals() {
        let route = normalize_route(Route {
            distance: 12_345.0,
            ..Route::default()
        });
        assert_eq!(route.distance, 12.35);

        let route = normalize_route(Route {
            distance: 500.0,
            ..Route::default()
        });
        assert_eq!(route.distance, 0.5);
    }

    #[test]
    fn parses_route_wrapper() {
        let raw = r#"{
            "data": {
                "travel_time": 840.0,
                "path": "a~encodedPolyline",
                "distance": 5200.0,
                "driving_directions": [
                    {
                        "instruction": "Head north",
                        "turn_point": {"lat": -6.17, "lon": 106.82},
                        "street_name": "Jl. Medan Merdeka",
                        "travel_time": 60.0,
                        "distance": 400.0,
                        "edge_ids": [11, 12],
                        "polyline": "",
                        "turn_bearing": 0.0,
                        "turn_type": "straight"
                    }
                ]
            }
        }"#;
        let wrapper: RouteWrapper = serde_json::from_str(raw).unwrap();
        let route = normalize_route(wrapper.data);
        assert_eq!(route.distance, 5.2);
        assert_eq!(route.driving_directions.len(), 1);
        assert_eq!(route.driving_directions[0].edge_ids, vec![11, 12]);
        assert_eq!(route.driving_directions[0].turn_point.lat, -6.17);
    }

    #[test]
    fn parses_alternatives_wrapper_with_missing_list() {
        let wrapper: AlternativesWrapper = serde_json::from_str(r#"{"data": {}}"#).unwrap();
        assert!(wrapper.data.alternative_routes.is_empty());
    }

    // Requires a running routing service.
    #[tokio::test]
    #[ignore]
    async fn compute_route_integration() {
        let client = RoutingClient::new("http://localhost:5000");
        let request = RouteRequest {
            src_lat: -6.17539,
            src_lon: 106.82719,
            dest_lat: -6.13756,
            dest_lon: 106.81713,
        };
        match client.compute_route(&request).await {
            Ok(route) => assert!(!route.driving_directions.is_empty()),
            Err(e) => panic!("route fetch failed: {}", e),
        }
    }
}
