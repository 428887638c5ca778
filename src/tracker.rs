use std::fmt::{Display, Formatter};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::geo::Coord;
use crate::gps::{GpsSampler, WatchEvent};
use crate::matching::protocol::MapMatchRequest;
use crate::matching::session::{MatchOutcome, MatchSession};
use crate::matching::stream::{self, MatchMessages, MatchStream, ServerEvent, StreamError};
use crate::route::api::{RouteRequest, RoutingClient, RoutingError};
use crate::route::model::{Route, RouteSet};
use crate::route::offroute::{is_off_route, should_skip, ReRouteGuard};
use crate::route::progress::progress;

/// What a tracking session reports to its consumer (renderer, logger, UI).
#[derive(Clone, Debug)]
pub enum TrackerEvent {
    /// Corrected position published by a valid match.
    Matched { coord: Coord, snapped_edge_id: i64 },
    /// Compass heading observation, degrees from North (0 when unavailable).
    Heading(f64),
    Progress {
        direction_index: usize,
        distance_to_next_turn_m: f64,
    },
    /// A re-route replaced the route at this index of the route set.
    RouteReplaced { index: usize, route: Route },
    /// Non-fatal, user-visible condition.
    Notice(String),
    Stopped,
}

#[derive(Debug)]
pub enum TrackerError {
    /// The route set has no active route with at least one direction.
    NoActiveRoute,
    Stream(StreamError),
}

impl Display for TrackerError {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            TrackerError::NoActiveRoute => write!(f, "no active route to track"),
            TrackerError::Stream(e) => write!(f, "{}", e),
        }
    }
}

#[derive(Clone, Debug)]
pub struct TrackerConfig {
    /// Map-match WebSocket endpoint.
    pub match_ws_url: String,
    /// Routing service base URL, used for re-routing.
    pub routing_base_url: String,
}

/// Outcome of one server message at the session level.
#[derive(Debug, Default)]
pub struct ServerReaction {
    pub events: Vec<TrackerEvent>,
    /// When set, a re-route from this coordinate should be issued.
    pub reroute_from: Option<Coord>,
}

/// Everything one tracking session mutates. Owned by the event-loop task, so
/// watch callbacks, server messages, and re-route results are applied from a
/// single place and a request always reflects the most recently processed
/// response.
pub struct SessionCore {
    sampler: GpsSampler,
    session: MatchSession,
    routes: RouteSet,
    destination: Coord,
    reroute: ReRouteGuard,
}

impl SessionCore {
    pub fn new(routes: RouteSet, destination: Coord) -> Self {
        SessionCore {
            sampler: GpsSampler::new(),
            session: MatchSession::new(),
            routes,
            destination,
            reroute: ReRouteGuard::new(),
        }
    }

    pub fn destination(&self) -> Coord {
        self.destination
    }

    pub fn routes(&self) -> &RouteSet {
        &self.routes
    }

    pub fn session(&self) -> &MatchSession {
        &self.session
    }

    /// One watch callback: at most one outbound request plus observations.
    pub fn handle_watch_event(
        &mut self,
        event: WatchEvent,
    ) -> (Option<MapMatchRequest>, Vec<TrackerEvent>) {
        match event {
            WatchEvent::Position {
                lat,
                lon,
                heading,
                time,
            } => {
                let fix = self.sampler.on_position(lat, lon, time);
                let request = self.session.next_request(&fix);
                (
                    Some(request),
                    vec![TrackerEvent::Heading(heading.unwrap_or(0.0))],
                )
            }
            WatchEvent::Failure { error, time } => match self.sampler.on_failure(error, time) {
                Some(fix) => (Some(self.session.next_request(&fix)), Vec::new()),
                None => (None, Vec::new()),
            },
        }
    }

    /// One server message: published outputs, progress, and possibly a
    /// re-route origin to act on.
    pub fn handle_server_event(&mut self, event: ServerEvent) -> ServerReaction {
        match event {
            ServerEvent::Response(response) => match self.session.handle_response(response) {
                MatchOutcome::Reset => ServerReaction::default(),
                MatchOutcome::Matched {
                    snapped_edge_id,
                    matched_coord,
                    predicted_coord,
                    speed_mean_k,
                } => {
                    self.sampler.anchor_to_prediction(&predicted_coord, speed_mean_k);

                    let mut events = vec![TrackerEvent::Matched {
                        coord: matched_coord,
                        snapped_edge_id,
                    }];
                    if let Some(route) = self.routes.active() {
                        if !route.driving_directions.is_empty() {
                            let p =
                                progress(snapped_edge_id, &matched_coord, &route.driving_directions);
                            events.push(TrackerEvent::Progress {
                                direction_index: p.direction_index,
                                distance_to_next_turn_m: p.distance_to_next_turn_m,
                            });
                        }
                    }

                    let reroute_from = self.offroute_origin(snapped_edge_id, matched_coord);
                    ServerReaction {
                        events,
                        reroute_from,
                    }
                }
            },
            ServerEvent::Malformed(err) => {
                self.session.reset_estimation();
                ServerReaction {
                    events: vec![TrackerEvent::Notice(format!(
                        "failed to parse server message: {}",
                        err
                    ))],
                    reroute_from: None,
                }
            }
            ServerEvent::Closed => ServerReaction::default(),
        }
    }

    fn offroute_origin(&mut self, snapped_edge_id: i64, matched_coord: Coord) -> Option<Coord> {
        if should_skip(snapped_edge_id, self.session.step()) {
            return None;
        }
        let route = self.routes.active()?;
        if !is_off_route(snapped_edge_id, route) {
            return None;
        }
        if !self.reroute.try_begin() {
            return None;
        }
        Some(matched_coord)
    }

    /// Apply a finished re-route. Success swaps only the active entry of the
    /// route set; failure keeps the last-known-good route active.
    pub fn handle_reroute_result(&mut self, result: Result<Route, RoutingError>) -> Vec<TrackerEvent> {
        self.reroute.finish();
        match result {
            Ok(route) => {
                let index = self.routes.active_index();
                self.routes.replace_active(route.clone());
                vec![TrackerEvent::RouteReplaced { index, route }]
            }
            Err(e) => vec![TrackerEvent::Notice(format!(
                "failed to fetch route (re-routing): {}",
                e
            ))],
        }
    }

    /// Stop/teardown: every per-session field back to its default.
    pub fn reset(&mut self) {
        self.sampler.reset();
        self.session.reset();
        self.reroute.reset();
    }
}

/// Handle to a running session. Stopping is idempotent.
pub struct SessionHandle {
    stop_tx: Option<mpsc::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl SessionHandle {
    /// Stop the session: closes the transport with a normal-closure frame,
    /// stops consuming the watch, resets all per-session state. A second call
    /// is a no-op.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(()).await;
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

/// Start a tracking session: validates the route set, opens the map-match
/// connection, and spawns the event loop over the supplied position watch.
pub async fn start_session(
    config: TrackerConfig,
    routes: RouteSet,
    destination: Coord,
    watch_rx: mpsc::Receiver<WatchEvent>,
    events_tx: mpsc::Sender<TrackerEvent>,
) -> Result<SessionHandle, TrackerError> {
    let has_directions = routes
        .active()
        .map(|route| !route.driving_directions.is_empty())
        .unwrap_or(false);
    if !has_directions {
        return Err(TrackerError::NoActiveRoute);
    }

    let (stream, messages) = stream::connect(&config.match_ws_url)
        .await
        .map_err(TrackerError::Stream)?;
    let routing = RoutingClient::new(&config.routing_base_url);
    let core = SessionCore::new(routes, destination);

    let (stop_tx, stop_rx) = mpsc::channel::<()>(1);
    let task = tokio::spawn(run_session(
        core, stream, messages, routing, watch_rx, stop_rx, events_tx,
    ));

    Ok(SessionHandle {
        stop_tx: Some(stop_tx),
        task: Some(task),
    })
}

async fn run_session(
    mut core: SessionCore,
    mut stream: MatchStream,
    mut messages: MatchMessages,
    routing: RoutingClient,
    mut watch_rx: mpsc::Receiver<WatchEvent>,
    mut stop_rx: mpsc::Receiver<()>,
    events_tx: mpsc::Sender<TrackerEvent>,
) {
    let (reroute_tx, mut reroute_rx) = mpsc::channel::<Result<Route, RoutingError>>(4);

    loop {
        tokio::select! {
            _ = stop_rx.recv() => break,

            maybe = watch_rx.recv() => match maybe {
                Some(event) => {
                    let (request, events) = core.handle_watch_event(event);
                    emit(&events_tx, events).await;
                    if let Some(request) = request {
                        // Best-effort: the stream drops and counts the step
                        // when the transport is not open.
                        stream.send_fix(&request).await;
                    }
                }
                None => {
                    emit(
                        &events_tx,
                        vec![TrackerEvent::Notice("position watch ended".to_string())],
                    )
                    .await;
                    break;
                }
            },

            maybe = messages.next_event() => match maybe {
                None | Some(ServerEvent::Closed) => {
                    emit(
                        &events_tx,
                        vec![TrackerEvent::Notice("map-match connection closed".to_string())],
                    )
                    .await;
                    break;
                }
                Some(event) => {
                    let reaction = core.handle_server_event(event);
                    emit(&events_tx, reaction.events).await;
                    if let Some(origin) = reaction.reroute_from {
                        let destination = core.destination();
                        let request = RouteRequest {
                            src_lat: origin.lat,
                            src_lon: origin.lon,
                            dest_lat: destination.lat,
                            dest_lon: destination.lon,
                        };
                        let routing = routing.clone();
                        let tx = reroute_tx.clone();
                        tokio::spawn(async move {
                            let result = routing.compute_route(&request).await;
                            let _ = tx.send(result).await;
                        });
                    }
                }
            },

            Some(result) = reroute_rx.recv() => {
                let events = core.handle_reroute_result(result);
                emit(&events_tx, events).await;
            }
        }
    }

    if stream.dropped_sends() > 0 {
        log::info!(
            "[tracker] {} steps dropped on a non-open transport",
            stream.dropped_sends()
        );
    }
    stream.close().await;
    core.reset();
    // Non-blocking: the consumer may already be gone, and a full buffer must
    // not keep the task alive past teardown.
    let _ = events_tx.try_send(TrackerEvent::Stopped);
}

async fn emit(tx: &mpsc::Sender<TrackerEvent>, events: Vec<TrackerEvent>) {
    for event in events {
        if tx.send(event).await.is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gps::WatchError;
    use crate::matching::protocol::{
        Candidate, MapMatchResponse, MatchPayload, MatchedGpsPoint, INVALID_LAT, INVALID_LON,
    };
    use crate::route::model::Direction;
    use chrono::{TimeZone, Utc};

    fn t(ms: i64) -> chrono::DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).unwrap()
    }

    fn direction(edge_ids: Vec<i64>, turn: (f64, f64)) -> Direction {
        Direction {
            edge_ids,
            turn_point: Coord::new(turn.0, turn.1),
            ..Direction::default()
        }
    }

    fn test_routes() -> RouteSet {
        let primary = Route {
            path: "primary".to_string(),
            driving_directions: vec![
                direction(vec![1, 2], (-6.1700, 106.8200)),
                direction(vec![42, 43], (-6.1600, 106.8100)),
                direction(vec![44], (-6.1500, 106.8000)),
            ],
            ..Route::default()
        };
        let alternate = Route {
            path: "alternate".to_string(),
            driving_directions: vec![direction(vec![7], (-6.1800, 106.8300))],
            ..Route::default()
        };
        RouteSet::new(vec![primary, alternate])
    }

    fn core() -> SessionCore {
        SessionCore::new(test_routes(), Coord::new(-6.1376, 106.8171))
    }

    fn position(lat: f64, lon: f64, at_ms: i64) -> WatchEvent {
        WatchEvent::Position {
            lat,
            lon,
            heading: Some(180.0),
            time: t(at_ms),
        }
    }

    fn matched_response(edge_id: i64) -> ServerEvent {
        ServerEvent::Response(MapMatchResponse {
            data: MatchPayload {
                matched_gps_point: MatchedGpsPoint {
                    gps_point: None,
                    edge_id,
                    matched_coord: Coord::new(-6.1702, 106.8203),
                    predicted_gps_coord: Coord::new(-6.1703, 106.8204),
                    edge_initial_bearing: 10.0,
                },
                candidates: vec![Candidate {
                    edge_id,
                    weight: 1.0,
                    length: 50.0,
                }],
                speed_mean_k: 450.0,
                speed_std_k: 120.0,
                edge_initial_bearing: 10.0,
            },
        })
    }

    fn sentinel_response() -> ServerEvent {
        ServerEvent::Response(MapMatchResponse {
            data: MatchPayload {
                matched_gps_point: MatchedGpsPoint {
                    gps_point: None,
                    edge_id: 0,
                    matched_coord: Coord::new(INVALID_LAT, INVALID_LON),
                    predicted_gps_coord: Coord::default(),
                    edge_initial_bearing: 0.0,
                },
                candidates: Vec::new(),
                speed_mean_k: 0.0,
                speed_std_k: 0.0,
                edge_initial_bearing: 0.0,
            },
        })
    }

    #[test]
    fn first_fix_then_match_reports_progress_without_reroute() {
        let mut core = core();

        // Session starts, sampler emits the first fix.
        let (request, events) = core.handle_watch_event(position(-6.1754, 106.8272, 0));
        let request = request.unwrap();
        assert_eq!(request.k, 1);
        assert!(request.candidates.is_empty());
        assert!(matches!(events.as_slice(), [TrackerEvent::Heading(h)] if *h == 180.0));

        // Server matches onto edge 42, which belongs to leg index 1.
        let reaction = core.handle_server_event(matched_response(42));
        assert!(reaction.reroute_from.is_none(), "edge 42 is on-route");

        let mut saw_match = false;
        let mut saw_progress = false;
        for event in &reaction.events {
            match event {
                TrackerEvent::Matched {
                    snapped_edge_id, ..
                } => {
                    assert_eq!(*snapped_edge_id, 42);
                    saw_match = true;
                }
                TrackerEvent::Progress {
                    direction_index,
                    distance_to_next_turn_m,
                } => {
                    assert_eq!(*direction_index, 1);
                    assert!(*distance_to_next_turn_m > 0.0);
                    saw_progress = true;
                }
                other => panic!("unexpected event: {:?}", other),
            }
        }
        assert!(saw_match && saw_progress);
    }

    #[test]
    fn heading_defaults_to_zero_when_unavailable() {
        let mut core = core();
        let (_, events) = core.handle_watch_event(WatchEvent::Position {
            lat: -6.1754,
            lon: 106.8272,
            heading: None,
            time: t(0),
        });
        assert!(matches!(events.as_slice(), [TrackerEvent::Heading(h)] if *h == 0.0));
    }

    #[test]
    fn failure_before_threshold_emits_nothing() {
        let mut core = core();
        core.handle_watch_event(position(-6.1754, 106.8272, 0));
        let (request, events) = core.handle_watch_event(WatchEvent::Failure {
            error: WatchError::Timeout,
            time: t(500),
        });
        assert!(request.is_none());
        assert!(events.is_empty());
    }

    #[test]
    fn dead_reckoned_fix_advances_the_step_counter() {
        let mut core = core();
        core.handle_watch_event(position(-6.1754, 106.8272, 0));
        let (request, _) = core.handle_watch_event(WatchEvent::Failure {
            error: WatchError::Timeout,
            time: t(3000),
        });
        let request = request.unwrap();
        assert_eq!(request.k, 2);
        assert!(request.gps_point.dead_reckoning);
        assert_eq!(core.session().step(), 3);
    }

    #[test]
    fn off_route_match_requests_a_single_reroute() {
        let mut core = core();
        core.handle_watch_event(position(-6.1754, 106.8272, 0));
        core.handle_watch_event(position(-6.1755, 106.8273, 1000));

        // Edge 99 is on no leg of the active route.
        let reaction = core.handle_server_event(matched_response(99));
        let origin = reaction.reroute_from.expect("off-route should re-route");
        assert_eq!(origin, Coord::new(-6.1702, 106.8203));

        // A second off-route tick while the request is outstanding is absorbed.
        let reaction = core.handle_server_event(matched_response(99));
        assert!(reaction.reroute_from.is_none());

        // Completion clears the guard; the next off-route tick retries.
        core.handle_reroute_result(Err(RoutingError::Maintenance));
        let reaction = core.handle_server_event(matched_response(99));
        assert!(reaction.reroute_from.is_some());
    }

    #[test]
    fn reroute_success_replaces_only_the_active_route() {
        let mut core = core();
        core.handle_watch_event(position(-6.1754, 106.8272, 0));
        core.handle_watch_event(position(-6.1755, 106.8273, 1000));
        core.handle_server_event(matched_response(99));

        let fresh = Route {
            path: "fresh".to_string(),
            driving_directions: vec![direction(vec![99, 100], (-6.1600, 106.8100))],
            ..Route::default()
        };
        let events = core.handle_reroute_result(Ok(fresh));

        assert!(matches!(
            events.as_slice(),
            [TrackerEvent::RouteReplaced { index: 0, .. }]
        ));
        assert_eq!(core.routes().routes()[0].path, "fresh");
        assert_eq!(core.routes().routes()[1].path, "alternate");
        assert_eq!(core.routes().routes()[1].driving_directions[0].edge_ids, vec![7]);
    }

    #[test]
    fn reroute_failure_keeps_the_stale_route_and_notices() {
        let mut core = core();
        core.handle_watch_event(position(-6.1754, 106.8272, 0));
        core.handle_watch_event(position(-6.1755, 106.8273, 1000));
        core.handle_server_event(matched_response(99));

        let events = core.handle_reroute_result(Err(RoutingError::Maintenance));
        match events.as_slice() {
            [TrackerEvent::Notice(msg)] => {
                assert!(msg.contains("routing engine under maintenance"));
            }
            other => panic!("unexpected events: {:?}", other),
        }
        assert_eq!(core.routes().routes()[0].path, "primary");
    }

    #[test]
    fn reroute_is_skipped_before_any_fix_was_sent() {
        let mut core = core();
        // A response sneaks in before the first request: step is still 1.
        let reaction = core.handle_server_event(matched_response(99));
        assert!(reaction.reroute_from.is_none());
    }

    #[test]
    fn sentinel_response_produces_no_events_and_no_reroute() {
        let mut core = core();
        core.handle_watch_event(position(-6.1754, 106.8272, 0));
        core.handle_server_event(matched_response(42));

        let reaction = core.handle_server_event(sentinel_response());
        assert!(reaction.events.is_empty());
        assert!(reaction.reroute_from.is_none());
        // Estimation went back to defaults; the next request shows it.
        let (request, _) = core.handle_watch_event(position(-6.1756, 106.8274, 2000));
        let request = request.unwrap();
        assert!(request.candidates.is_empty());
        assert_eq!(request.speed_mean_k, 500.0);
    }

    #[test]
    fn malformed_message_resets_estimation_and_notices() {
        let mut core = core();
        core.handle_watch_event(position(-6.1754, 106.8272, 0));
        core.handle_server_event(matched_response(42));

        let reaction = core.handle_server_event(ServerEvent::Malformed("bad json".to_string()));
        assert!(matches!(reaction.events.as_slice(), [TrackerEvent::Notice(_)]));
        let (request, _) = core.handle_watch_event(position(-6.1756, 106.8274, 2000));
        assert!(request.unwrap().candidates.is_empty());
    }

    #[test]
    fn dead_reckoning_anchor_uses_the_predicted_coordinate() {
        let mut core = core();
        core.handle_watch_event(position(-6.1754, 106.8272, 0));
        core.handle_watch_event(WatchEvent::Failure {
            error: WatchError::Timeout,
            time: t(3000),
        });

        // The valid response re-anchors the previous fix to the prediction.
        core.handle_server_event(matched_response(42));
        let (request, _) = core.handle_watch_event(position(-6.1703, 106.8204, 63_000));
        let request = request.unwrap();
        // Standing exactly on the predicted coordinate: zero distance covered.
        assert_eq!(request.gps_point.speed, 0.0);
    }

    #[test]
    fn reset_restores_initial_state() {
        let mut core = core();
        core.handle_watch_event(position(-6.1754, 106.8272, 0));
        core.handle_watch_event(position(-6.1755, 106.8273, 1000));
        core.handle_server_event(matched_response(99));

        core.reset();
        assert_eq!(core.session().step(), 1);
        assert_eq!(core.session().snapped_edge_id(), 0);
        assert!(core.session().matched_coord().is_none());

        // Guard is clear again and the first fix is a session-first fix.
        let (request, _) = core.handle_watch_event(position(-6.1754, 106.8272, 5000));
        let request = request.unwrap();
        assert_eq!(request.k, 1);
        assert_eq!(request.gps_point.delta_time, 0.0);
    }
}
