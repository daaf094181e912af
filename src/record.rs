use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use uuid::Uuid;

/// One listing exactly as the crawl wrote it. No field is guaranteed.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord(pub Map<String, Value>);

impl RawRecord {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Non-empty trimmed text for `key`. Numbers are rendered as text.
    pub fn text(&self, key: &str) -> Option<String> {
        let text = match self.0.get(key)? {
            Value::String(s) => s.trim().to_string(),
            Value::Number(n) => n.to_string(),
            _ => return None,
        };
        (!text.is_empty()).then_some(text)
    }

    /// Title used to identify the record in logs, even when it is invalid.
    pub fn label(&self) -> String {
        self.text("titulo").unwrap_or_else(|| "untitled".to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Currency {
    /// Pesos, the listing site's local currency.
    Domestic,
    Foreign,
}

impl Currency {
    pub fn code(self) -> &'static str {
        match self {
            Currency::Domestic => "ARS",
            Currency::Foreign => "USD",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim().to_ascii_uppercase().as_str() {
            "ARS" => Some(Currency::Domestic),
            "USD" => Some(Currency::Foreign),
            _ => None,
        }
    }
}

/// A validated listing. `title` and `price_amount` are always present.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalRecord {
    pub id: Option<Uuid>,
    pub created_at: Option<DateTime<Utc>>,
    pub title: String,
    pub description: Option<String>,
    pub address: Option<String>,
    pub price_amount: f64,
    pub currency: Currency,
    pub surface: Option<String>,
    /// External identity of the listing across runs.
    pub link: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl CanonicalRecord {
    pub fn new(title: impl Into<String>, price_amount: f64, currency: Currency) -> Self {
        Self {
            id: None,
            created_at: None,
            title: title.into(),
            description: None,
            address: None,
            price_amount,
            currency,
            surface: None,
            link: None,
            latitude: None,
            longitude: None,
        }
    }
}
