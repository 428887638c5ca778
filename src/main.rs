use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use clap::Parser;
use std::time::Duration;
use tokio::sync::mpsc;

use route_tracker_rs::geo::Coord;
use route_tracker_rs::gps::{self, WatchEvent};
use route_tracker_rs::route::api::{RouteRequest, RoutingClient};
use route_tracker_rs::route::model::RouteSet;
use route_tracker_rs::tracker::{self, TrackerConfig, TrackerEvent};

#[derive(Parser, Debug)]
#[command(name = "route_tracker")]
#[command(about = "Live map-matched route tracking against a navigation backend", long_about = None)]
struct Args {
    /// Source coordinate as "lat,lon"
    #[arg(long)]
    source: String,

    /// Destination coordinate as "lat,lon"
    #[arg(long)]
    dest: String,

    /// Map-match WebSocket endpoint
    #[arg(long, default_value = "ws://localhost:6060/ws")]
    match_url: String,

    /// Routing service base URL
    #[arg(long, default_value = "http://localhost:5000")]
    routing_url: String,

    /// Also fetch alternative routes
    #[arg(long)]
    alternatives: bool,

    /// Duration in seconds (0 = until interrupted)
    #[arg(long, default_value = "0")]
    duration: u64,

    /// Use the synthetic position source instead of the device probe
    #[arg(long)]
    mock_gps: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let source = parse_coord(&args.source).context("invalid --source")?;
    let destination = parse_coord(&args.dest).context("invalid --dest")?;

    if !args.mock_gps && !gps::probe_available() {
        anyhow::bail!("no position source available (install termux-location or pass --mock-gps)");
    }

    println!("[{}] Route Tracker starting", ts_now());
    println!("  Source: {},{}", source.lat, source.lon);
    println!("  Destination: {},{}", destination.lat, destination.lon);
    println!("  Match endpoint: {}", args.match_url);
    println!("  Routing endpoint: {}", args.routing_url);

    let routing = RoutingClient::new(&args.routing_url);
    let request = RouteRequest {
        src_lat: source.lat,
        src_lon: source.lon,
        dest_lat: destination.lat,
        dest_lon: destination.lon,
    };

    let mut routes = vec![routing
        .compute_route(&request)
        .await
        .map_err(|e| anyhow!("{}", e))?];
    if args.alternatives {
        match routing.compute_alternatives(&request, 2).await {
            Ok(alternatives) => routes.extend(alternatives),
            Err(e) => println!("[{}] alternatives unavailable: {}", ts_now(), e),
        }
    }
    println!(
        "[{}] {} route(s); primary {:.2} km, {} legs",
        ts_now(),
        routes.len(),
        routes[0].distance,
        routes[0].driving_directions.len()
    );

    let (watch_tx, watch_rx) = mpsc::channel::<WatchEvent>(100);
    let _watch_handle = tokio::spawn(gps::watch_loop(watch_tx, args.mock_gps));

    let (events_tx, mut events_rx) = mpsc::channel::<TrackerEvent>(100);
    let config = TrackerConfig {
        match_ws_url: args.match_url.clone(),
        routing_base_url: args.routing_url.clone(),
    };
    let mut handle = tracker::start_session(
        config,
        RouteSet::new(routes),
        destination,
        watch_rx,
        events_tx,
    )
    .await
    .map_err(|e| anyhow!("{}", e))?;

    println!("[{}] Session started", ts_now());

    let deadline = async {
        if args.duration > 0 {
            tokio::time::sleep(Duration::from_secs(args.duration)).await;
        } else {
            std::future::pending::<()>().await;
        }
    };
    tokio::pin!(deadline);
    let mut stopping = false;

    loop {
        tokio::select! {
            maybe = events_rx.recv() => match maybe {
                Some(TrackerEvent::Stopped) | None => break,
                Some(event) => print_event(&event),
            },
            _ = &mut deadline, if !stopping => {
                println!("[{}] Duration reached, stopping...", ts_now());
                stopping = true;
                handle.stop().await;
            },
            _ = tokio::signal::ctrl_c(), if !stopping => {
                println!("[{}] Interrupted, stopping...", ts_now());
                stopping = true;
                handle.stop().await;
            },
        }
    }

    println!("[{}] Session stopped", ts_now());
    Ok(())
}

fn print_event(event: &TrackerEvent) {
    match event {
        TrackerEvent::Matched {
            coord,
            snapped_edge_id,
        } => println!(
            "[{}] matched {:.6},{:.6} on edge {}",
            ts_now(),
            coord.lat,
            coord.lon,
            snapped_edge_id
        ),
        TrackerEvent::Heading(heading) => {
            log::debug!("[main] heading {:.1} deg", heading);
        }
        TrackerEvent::Progress {
            direction_index,
            distance_to_next_turn_m,
        } => println!(
            "[{}] leg {}, next turn in {:.0} m",
            ts_now(),
            direction_index,
            distance_to_next_turn_m
        ),
        TrackerEvent::RouteReplaced { index, route } => println!(
            "[{}] re-routed: slot {} now {:.2} km, {} legs",
            ts_now(),
            index,
            route.distance,
            route.driving_directions.len()
        ),
        TrackerEvent::Notice(msg) => println!("[{}] notice: {}", ts_now(), msg),
        TrackerEvent::Stopped => {}
    }
}

fn parse_coord(input: &str) -> Result<Coord> {
    let (lat, lon) = input
        .split_once(',')
        .ok_or_else(|| anyhow!("expected \"lat,lon\""))?;
    let lat: f64 = lat.trim().parse().context("latitude")?;
    let lon: f64 = lon.trim().parse().context("longitude")?;
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
        anyhow::bail!("coordinate out of range: {},{}", lat, lon);
    }
    Ok(Coord::new(lat, lon))
}

fn ts_now() -> String {
    Utc::now().format("%H:%M:%S").to_string()
}
