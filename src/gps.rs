use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::process::Command;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::Sender;
use tokio::time::{interval, timeout};

use crate::geo::{distance_km, Coord};

/// Interval between position probes, milliseconds.
pub const SAMPLING_INTERVAL_MS: u64 = 80;
/// Sensor silence beyond this threshold activates dead reckoning.
pub const LOST_GPS_THRESHOLD_MS: i64 = 2000;
/// Assumed speed for dead-reckoned fixes, meters per minute.
pub const DEAD_RECKONING_SPEED: f64 = 500.0;
/// Per-request position acquisition timeout, milliseconds.
pub const POSITION_TIMEOUT_MS: u64 = 5000;

/// One accepted (or synthesized) GPS sample. The serialized field names are
/// the wire form of the map-match request's `gps_point`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GpsFix {
    pub lat: f64,
    pub lon: f64,
    /// Meters per minute.
    pub speed: f64,
    pub time: DateTime<Utc>,
    /// Minutes since the previous fix.
    pub delta_time: f64,
    pub dead_reckoning: bool,
}

/// A raw position-watch callback: either a device position or a failure.
#[derive(Clone, Debug)]
pub enum WatchEvent {
    Position {
        lat: f64,
        lon: f64,
        /// Compass heading in degrees from North, when the device reports one.
        heading: Option<f64>,
        time: DateTime<Utc>,
    },
    Failure {
        error: WatchError,
        time: DateTime<Utc>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WatchError {
    PositionUnavailable,
    Timeout,
    PermissionDenied,
}

/// Turns raw watch callbacks into `GpsFix` values: per-sample speed and
/// elapsed time on success, dead-reckoning synthesis once the sensor has been
/// silent past `LOST_GPS_THRESHOLD_MS`.
#[derive(Debug, Default)]
pub struct GpsSampler {
    prev_fix: Option<GpsFix>,
    last_send_time: Option<DateTime<Utc>>,
    dead_reckoning: bool,
}

impl GpsSampler {
    pub fn new() -> Self {
        Self::default()
    }

    /// True while the most recently emitted fix was synthesized.
    pub fn is_dead_reckoning(&self) -> bool {
        self.dead_reckoning
    }

    /// Build a fix from a successful position update. The first update of a
    /// session emits `delta_time = 0, speed = 0`; later updates derive speed
    /// from the haversine distance to the previous fix, with a zero guard on
    /// non-positive elapsed time.
    pub fn on_position(&mut self, lat: f64, lon: f64, now: DateTime<Utc>) -> GpsFix {
        self.dead_reckoning = false;
        let (delta_time, speed) = match &self.prev_fix {
            Some(prev) => {
                let delta_time = minutes_between(prev.time, now);
                let meters = distance_km(prev.lat, prev.lon, lat, lon) * 1000.0;
                let speed = if delta_time > 0.0 { meters / delta_time } else { 0.0 };
                (delta_time, speed)
            }
            None => (0.0, 0.0),
        };
        let fix = GpsFix {
            lat,
            lon,
            speed,
            time: now,
            delta_time,
            dead_reckoning: false,
        };
        self.prev_fix = Some(fix.clone());
        self.last_send_time = Some(now);
        fix
    }

    /// Classify a watch failure. Position-unavailable and timeout errors
    /// synthesize a fix at the previous coordinates with the constant assumed
    /// speed, but only once the loss threshold has passed; other failures are
    /// not recovered here.
    pub fn on_failure(&mut self, error: WatchError, now: DateTime<Utc>) -> Option<GpsFix> {
        if !matches!(error, WatchError::PositionUnavailable | WatchError::Timeout) {
            return None;
        }
        let prev = self.prev_fix.as_ref()?;
        if (now - prev.time).num_milliseconds() <= LOST_GPS_THRESHOLD_MS {
            return None;
        }
        self.dead_reckoning = true;
        let delta_time = match self.last_send_time {
            Some(sent) => minutes_between(sent, now),
            // No send yet: fall back to the raw sampling interval, units and
            // all, matching the behavior downstream consumers were tuned on.
            None => SAMPLING_INTERVAL_MS as f64,
        };
        let fix = GpsFix {
            lat: prev.lat,
            lon: prev.lon,
            speed: DEAD_RECKONING_SPEED,
            time: now,
            delta_time,
            dead_reckoning: true,
        };
        self.last_send_time = Some(now);
        Some(fix)
    }

    /// After a dead-reckoned step, anchor the next speed computation on the
    /// filter's predicted coordinate instead of the stale device fix. No-op
    /// unless the sampler is currently dead-reckoned.
    pub fn anchor_to_prediction(&mut self, predicted: &Coord, speed_mean_k: f64) {
        if !self.dead_reckoning {
            return;
        }
        let time = self
            .last_send_time
            .or_else(|| self.prev_fix.as_ref().map(|f| f.time));
        let Some(time) = time else { return };
        self.prev_fix = Some(GpsFix {
            lat: predicted.lat,
            lon: predicted.lon,
            speed: speed_mean_k,
            time,
            delta_time: 0.0,
            dead_reckoning: true,
        });
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

fn minutes_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 / 60_000.0
}

/// True when the external location probe is present on this system.
pub fn probe_available() -> bool {
    Command::new("termux-location").arg("--help").output().is_ok()
}

/// Continuous position watch: probes `termux-location` (or a synthetic source
/// for bench runs) every `SAMPLING_INTERVAL_MS`, classifies failures, and
/// pushes events into the channel. Drops samples when the channel is full and
/// exits when it closes.
pub async fn watch_loop(tx: Sender<WatchEvent>, use_mock: bool) {
    let mut ticker = interval(Duration::from_millis(SAMPLING_INTERVAL_MS));
    let mut sample_count = 0u64;

    loop {
        ticker.tick().await;

        let event = match timeout(
            Duration::from_millis(POSITION_TIMEOUT_MS),
            read_position(use_mock),
        )
        .await
        {
            Ok(Some((lat, lon, heading))) => WatchEvent::Position {
                lat,
                lon,
                heading,
                time: Utc::now(),
            },
            Ok(None) => WatchEvent::Failure {
                error: WatchError::PositionUnavailable,
                time: Utc::now(),
            },
            Err(_) => WatchEvent::Failure {
                error: WatchError::Timeout,
                time: Utc::now(),
            },
        };

        match tx.try_send(event) {
            Ok(()) => {
                sample_count += 1;
                if sample_count % 100 == 0 {
                    log::debug!("[watch] {} samples", sample_count);
                }
            }
            Err(TrySendError::Closed(_)) => {
                log::info!("[watch] channel closed after {} samples", sample_count);
                break;
            }
            Err(TrySendError::Full(_)) => {
                // Channel full, drop this sample
            }
        }
    }
}

async fn read_position(use_mock: bool) -> Option<(f64, f64, Option<f64>)> {
    if use_mock {
        return Some(mock_position());
    }
    // -r once requests a fresh fix, never a cached one.
    let output = tokio::task::spawn_blocking(|| {
        Command::new("termux-location")
            .arg("-p")
            .arg("gps")
            .arg("-r")
            .arg("once")
            .output()
    })
    .await
    .ok()?
    .ok()?;
    parse_location_json(&String::from_utf8_lossy(&output.stdout))
}

fn parse_location_json(text: &str) -> Option<(f64, f64, Option<f64>)> {
    let value: serde_json::Value = serde_json::from_str(text.trim()).ok()?;
    let lat = value.get("latitude")?.as_f64()?;
    let lon = value.get("longitude")?.as_f64()?;
    let heading = value.get("bearing").and_then(|b| b.as_f64());
    Some((lat, lon, heading))
}

fn mock_position() -> (f64, f64, Option<f64>) {
    static COUNTER: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);
    let seq = COUNTER.fetch_add(1, std::sync::atomic::Ordering::Relaxed) as f64;

    // Crawls north-east from central Jakarta.
    (-6.17539 + seq * 0.00001, 106.82719 + seq * 0.00001, Some(45.0))
}
