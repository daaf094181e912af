//! Raw record → canonical record.
//!
//! Titles and prices are mandatory; a record without them is rejected with a
//! [`ValidationError`] and the rest of the batch carries on. Coordinates are
//! best effort: anything unparsable becomes NULL.

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::ValidationError;
use crate::record::{CanonicalRecord, Currency, RawRecord};

const FOREIGN_MARKER: &str = r"(?i)u\$s|us\$|usd";
const CURRENCY_MARKERS: &str = r"(?i)u\$s|us\$|usd|ars|\$";

fn foreign_marker() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(FOREIGN_MARKER).expect("valid foreign currency pattern"))
}

fn currency_markers() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(CURRENCY_MARKERS).expect("valid currency pattern"))
}

/// Result of normalizing a whole artifact.
#[derive(Debug, Default)]
pub struct NormalizedBatch {
    pub records: Vec<CanonicalRecord>,
    /// (record label, cause) for every record that was dropped.
    pub rejected: Vec<(String, ValidationError)>,
}

/// Normalize every record, keeping input order. Rejections never stop the batch.
pub fn normalize_batch(raws: &[RawRecord]) -> NormalizedBatch {
    let mut batch = NormalizedBatch::default();
    for raw in raws {
        match normalize(raw) {
            Ok(record) => batch.records.push(record),
            Err(e) => {
                let label = raw.label();
                warn!(title = %label, reason = %e, "Discarded record");
                batch.rejected.push((label, e));
            }
        }
    }
    batch
}

pub fn normalize(raw: &RawRecord) -> Result<CanonicalRecord, ValidationError> {
    let title = raw.text("titulo");
    let price = raw.get("precio").filter(|v| !is_blank(v));
    let (title, price) = match (title, price) {
        (Some(t), Some(p)) => (t, p),
        _ => {
            return Err(ValidationError::new(
                "missing required field: 'titulo' or 'precio'",
            ))
        }
    };

    let (price_amount, currency) = match price {
        Value::String(s) => parse_price(s)?,
        Value::Number(n) => {
            let amount = n
                .as_f64()
                .filter(|a| a.is_finite() && *a >= 0.0)
                .ok_or_else(|| ValidationError::new(format!("invalid price: {n}")))?;
            let currency = raw
                .text("moneda")
                .and_then(|c| Currency::from_code(&c))
                .unwrap_or(Currency::Domestic);
            (amount, currency)
        }
        other => {
            return Err(ValidationError::new(format!(
                "invalid price format (not text): {other}"
            )))
        }
    };

    let mut record = CanonicalRecord::new(title, price_amount, currency);
    record.id = raw.text("id").and_then(|s| Uuid::parse_str(&s).ok());
    record.created_at = raw
        .text("fecha_creacion")
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|d| d.with_timezone(&Utc));
    record.description = raw.text("descripcion");
    record.address = raw.text("direccion");
    record.surface = raw.text("superficie");
    record.link = raw.text("enlace");
    record.latitude = parse_coordinate(raw, "lat");
    record.longitude = parse_coordinate(raw, "lon");
    Ok(record)
}

/// `"USD 35.000"` → `(35000.0, Foreign)`, `"$ 2.500.000"` → `(2500000.0, Domestic)`.
///
/// `.` and `,` are thousands separators on the source site, never decimals.
pub fn parse_price(raw: &str) -> Result<(f64, Currency), ValidationError> {
    let currency = if foreign_marker().is_match(raw) {
        Currency::Foreign
    } else {
        Currency::Domestic
    };

    let stripped = currency_markers().replace_all(raw, "");
    let digits = stripped.replace(['.', ','], "");
    let amount = digits
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|a| a.is_finite() && *a >= 0.0)
        .ok_or_else(|| ValidationError::new(format!("invalid price: {raw}")))?;

    Ok((amount, currency))
}

fn parse_coordinate(raw: &RawRecord, key: &str) -> Option<f64> {
    let value = raw.get(key)?;
    let parsed = match value {
        Value::Null => return None,
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() || s == "-" {
                return None;
            }
            s.replace(',', ".").parse::<f64>().ok()
        }
        _ => None,
    };

    match parsed.filter(|v| v.is_finite()) {
        Some(v) => Some(v),
        None => {
            debug!(field = key, value = %value, "Malformed coordinate, storing NULL");
            None
        }
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}
