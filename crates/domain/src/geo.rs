use crate::DomainResult;
use crate::error::DomainError;

pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

const MS_PER_MINUTE: i64 = 60_000;

/// Great-circle distance between two WGS84 coordinates, in meters (haversine).
pub fn distance_meters(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let delta_phi = (lat2 - lat1).to_radians();
    let delta_lambda = (lon2 - lon1).to_radians();

    let a = (delta_phi / 2.0).sin().powi(2)
        + phi1.cos() * phi2.cos() * (delta_lambda / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_METERS * c
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CheckInWindow {
    pub opens_at_ms: i64,
    pub closes_at_ms: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WindowPosition {
    Open,
    TooEarly { minutes_until_open: i64 },
    TooLate { minutes_since_close: i64 },
}

pub fn check_in_window(
    scheduled_at_ms: i64,
    before_minutes: i64,
    after_minutes: i64,
) -> CheckInWindow {
    CheckInWindow {
        opens_at_ms: scheduled_at_ms - before_minutes * MS_PER_MINUTE,
        closes_at_ms: scheduled_at_ms + after_minutes * MS_PER_MINUTE,
    }
}

pub fn window_position(now_ms: i64, window: &CheckInWindow) -> WindowPosition {
    if now_ms < window.opens_at_ms {
        return WindowPosition::TooEarly {
            minutes_until_open: minutes_ceil(window.opens_at_ms - now_ms),
        };
    }
    if now_ms > window.closes_at_ms {
        return WindowPosition::TooLate {
            minutes_since_close: minutes_ceil(now_ms - window.closes_at_ms),
        };
    }
    WindowPosition::Open
}

pub fn ensure_within_window(
    now_ms: i64,
    scheduled_at_ms: i64,
    before_minutes: i64,
    after_minutes: i64,
) -> DomainResult<()> {
    let window = check_in_window(scheduled_at_ms, before_minutes, after_minutes);
    match window_position(now_ms, &window) {
        WindowPosition::Open => Ok(()),
        WindowPosition::TooEarly { minutes_until_open } => {
            Err(DomainError::CheckInTooEarly { minutes_until_open })
        }
        WindowPosition::TooLate {
            minutes_since_close,
        } => Err(DomainError::CheckInTooLate {
            minutes_since_close,
        }),
    }
}

/// Returns the measured distance when within the radius.
pub fn ensure_within_radius(
    actor_lat: f64,
    actor_lon: f64,
    venue_lat: f64,
    venue_lon: f64,
    radius_meters: f64,
) -> DomainResult<f64> {
    let distance = distance_meters(actor_lat, actor_lon, venue_lat, venue_lon);
    if distance > radius_meters {
        return Err(DomainError::TooFarFromVenue {
            distance_meters: distance,
            radius_meters,
        });
    }
    Ok(distance)
}

// rounds up so "1 ms outside" reports 1 minute, never 0
fn minutes_ceil(delta_ms: i64) -> i64 {
    (delta_ms + MS_PER_MINUTE - 1) / MS_PER_MINUTE
}
