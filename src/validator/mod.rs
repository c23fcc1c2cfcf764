//! Per-field validation.
//!
//! Pure, stateless predicates used by the Transformer. Nothing here touches
//! I/O or the network; every function is deterministic given its inputs and
//! the current time.

use std::collections::HashSet;

use chrono::{Duration, Utc};

use crate::model::Location;

/// Result of a single validation check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationOutcome {
    pub ok: bool,
    pub reason: Option<&'static str>,
}

impl ValidationOutcome {
    pub const fn pass() -> Self {
        Self {
            ok: true,
            reason: None,
        }
    }

    pub const fn fail(reason: &'static str) -> Self {
        Self {
            ok: false,
            reason: Some(reason),
        }
    }
}

/// Canonical BSSID grammar: six lowercase hex octets, colon-separated.
const CANONICAL_BSSID_LEN: usize = 17;

/// Accepts `:` or `-` separated hex octets, case-insensitively, and
/// normalizes to the canonical lowercase colon-separated form. Returns
/// `None` if the input does not match the MAC-address grammar at all.
pub fn canonicalize_bssid(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.len() != CANONICAL_BSSID_LEN {
        return None;
    }
    let mut out = String::with_capacity(CANONICAL_BSSID_LEN);
    for (i, part) in raw.split(|c| c == ':' || c == '-').enumerate() {
        if i > 0 {
            out.push(':');
        }
        if part.len() != 2 || !part.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        out.push_str(&part.to_ascii_lowercase());
    }
    if out.len() == CANONICAL_BSSID_LEN {
        Some(out)
    } else {
        None
    }
}

/// Validates an already-canonicalized BSSID string.
///
/// Fails if null/empty (checked by the caller passing `None`), not matching
/// the canonical grammar, or equal to the all-zero/all-ff sentinel values.
pub fn validate_bssid(canonical: Option<&str>) -> ValidationOutcome {
    let Some(bssid) = canonical else {
        return ValidationOutcome::fail("bssid_missing");
    };
    if bssid.len() != CANONICAL_BSSID_LEN
        || !bssid
            .split(':')
            .all(|o| o.len() == 2 && o.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()))
    {
        return ValidationOutcome::fail("bssid_malformed");
    }
    if bssid == crate::model::ALL_ZERO_BSSID || bssid == crate::model::ALL_FF_BSSID {
        return ValidationOutcome::fail("bssid_sentinel");
    }
    ValidationOutcome::pass()
}

/// Validates RSSI against the configured inclusive range.
pub fn validate_rssi(rssi: Option<i32>, rssi_min: i32, rssi_max: i32) -> ValidationOutcome {
    match rssi {
        None => ValidationOutcome::fail("rssi_missing"),
        Some(r) if r < rssi_min || r > rssi_max => ValidationOutcome::fail("rssi_out_of_range"),
        Some(_) => ValidationOutcome::pass(),
    }
}

/// Validates a location fix: coordinate ranges and the configured accuracy
/// ceiling.
pub fn validate_location(loc: Option<&Location>, accuracy_max: f64) -> ValidationOutcome {
    let Some(loc) = loc else {
        return ValidationOutcome::fail("location_missing");
    };
    if !(-90.0..=90.0).contains(&loc.lat) {
        return ValidationOutcome::fail("lat_out_of_range");
    }
    if !(-180.0..=180.0).contains(&loc.lon) {
        return ValidationOutcome::fail("lon_out_of_range");
    }
    if loc.accuracy > accuracy_max {
        return ValidationOutcome::fail("accuracy_exceeded");
    }
    if let Some(alt) = loc.altitude {
        if !(-1000.0..=10000.0).contains(&alt) {
            return ValidationOutcome::fail("altitude_out_of_range");
        }
    }
    if let Some(speed) = loc.speed {
        if !(0.0..=1000.0).contains(&speed) {
            return ValidationOutcome::fail("speed_out_of_range");
        }
    }
    ValidationOutcome::pass()
}

/// Validates a device-reported epoch-millis timestamp: present, not in the
/// future, and not older than one year.
pub fn validate_timestamp(ts_millis: Option<i64>) -> ValidationOutcome {
    let Some(ts_millis) = ts_millis else {
        return ValidationOutcome::fail("timestamp_missing");
    };
    let now = Utc::now();
    let Some(ts) = chrono::DateTime::from_timestamp_millis(ts_millis) else {
        return ValidationOutcome::fail("timestamp_unrepresentable");
    };
    if ts > now {
        return ValidationOutcome::fail("timestamp_in_future");
    }
    if ts < now - Duration::days(365) {
        return ValidationOutcome::fail("timestamp_too_old");
    }
    ValidationOutcome::pass()
}

/// Action to take when a mobile-hotspot OUI match is detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HotspotAction {
    Exclude,
    Flag,
    LogOnly,
}

impl HotspotAction {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "EXCLUDE" => Some(Self::Exclude),
            "FLAG" => Some(Self::Flag),
            "LOG_ONLY" | "LOGONLY" => Some(Self::LogOnly),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HotspotCheck {
    pub checked: bool,
    pub detected: bool,
    pub oui: Option<String>,
    pub action: HotspotAction,
}

/// Checks a canonical BSSID's OUI (upper 3 octets) against the configured
/// blacklist. When disabled, always returns `checked: false` and never
/// alters the caller's emission decision.
pub fn detect_mobile_hotspot(
    bssid_canonical: &str,
    enabled: bool,
    blacklist: &HashSet<String>,
    action: HotspotAction,
) -> HotspotCheck {
    if !enabled {
        return HotspotCheck {
            checked: false,
            detected: false,
            oui: None,
            action,
        };
    }
    let oui = bssid_canonical
        .splitn(4, ':')
        .take(3)
        .collect::<Vec<_>>()
        .join(":")
        .to_ascii_uppercase();
    let detected = blacklist.contains(&oui);
    HotspotCheck {
        checked: true,
        detected,
        oui: Some(oui),
        action,
    }
}
