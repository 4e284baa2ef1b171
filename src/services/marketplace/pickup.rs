//! Pickup proposal parsing and lead-time validation.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::Deserialize;
use utoipa::ToSchema;

use crate::errors::ServiceError;

const OFFSET_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%dT%H:%M%:z",
    "%Y-%m-%d %H:%M%:z",
];

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Seller-supplied pickup details, as received
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct PickupProposal {
    /// ISO-8601 timestamp; naive values are taken as UTC
    #[schema(example = "2025-03-01T09:30:00+08:00")]
    #[serde(default)]
    pub pickup_at: Option<String>,
    #[schema(example = "Iba Town Hall")]
    #[serde(default)]
    pub pickup_location: Option<String>,
}

/// Pickup details that passed validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidPickup {
    pub pickup_at: DateTime<Utc>,
    pub pickup_location: String,
}

impl PickupProposal {
    pub fn new(pickup_at: impl Into<String>, pickup_location: impl Into<String>) -> Self {
        Self {
            pickup_at: Some(pickup_at.into()),
            pickup_location: Some(pickup_location.into()),
        }
    }

    /// Checks presence, parses the timestamp and enforces the lead time
    /// relative to `now`.
    pub fn validate_at(
        &self,
        now: DateTime<Utc>,
        lead_minutes: i64,
    ) -> Result<ValidPickup, ServiceError> {
        let raw = self
            .pickup_at
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ServiceError::ValidationError("pickup_at is required".into()))?;
        let location = self
            .pickup_location
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ServiceError::ValidationError("pickup_location is required".into()))?;

        let pickup_at = parse_pickup_at(raw)?;
        ensure_lead_time(pickup_at, now, lead_minutes)?;

        Ok(ValidPickup {
            pickup_at,
            pickup_location: location.to_string(),
        })
    }
}

/// Parses an ISO-8601 timestamp. `Z` and numeric offsets are honoured;
/// values without an offset are interpreted as UTC, and a bare date means
/// midnight UTC.
pub fn parse_pickup_at(raw: &str) -> Result<DateTime<Utc>, ServiceError> {
    let s = raw.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    for fmt in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(s, fmt) {
            return Ok(dt.with_timezone(&Utc));
        }
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }
    if let Some(midnight) = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
    {
        return Ok(Utc.from_utc_datetime(&midnight));
    }

    Err(ServiceError::ValidationError(
        "pickup_at must be ISO-8601".into(),
    ))
}

/// `pickup_at` must fall strictly after `now + lead_minutes`.
pub fn ensure_lead_time(
    pickup_at: DateTime<Utc>,
    now: DateTime<Utc>,
    lead_minutes: i64,
) -> Result<(), ServiceError> {
    if pickup_at <= now + Duration::minutes(lead_minutes) {
        return Err(ServiceError::ValidationError(format!(
            "pickup_at must be at least {} minutes in the future",
            lead_minutes
        )));
    }
    Ok(())
}
