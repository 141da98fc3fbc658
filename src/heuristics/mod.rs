// src/heuristics/mod.rs

mod fields;

use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeMap;

/// Confidence assigned to any record produced by pattern extraction.
/// Flat for now; not adjusted per-field.
pub const PATTERN_CONFIDENCE: f64 = 0.7;

/// Average residential rate in pesos per kWh. Used to estimate consumption
/// from the total amount when no explicit kWh figure can be found.
pub const AVERAGE_RATE_PER_KWH: f64 = 11.5;

/// The metering window as printed on the bill. Dates are kept verbatim —
/// OCR output is too inconsistent to normalise safely here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillingPeriod {
    pub from: String,
    pub to: String,
}

/// Consumption for the billing period. `current`/`previous` are the meter
/// readings the kWh figure was derived from, or 0 when it was stated
/// directly on the bill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Consumption {
    pub current: f64,
    pub previous: f64,
    pub kwh: f64,
}

/// Raw meter readings, stored whenever both are present in the text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeterReading {
    pub current: f64,
    pub previous: f64,
}

/// The fixed set of line-item charge categories a bill may break out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChargeCategory {
    Generation,
    Transmission,
    Distribution,
    SystemLoss,
    Subsidies,
    Taxes,
    UniversalCharges,
    FitAll,
}

/// All structured data we can extract from a bill's OCR text.
///
/// Every field is optional — a pattern that fails to match simply leaves
/// its field absent. The serde shape (camelCase, absent-when-None) is also
/// the JSON schema the LLM tier is instructed to return.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedBill {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub billing_period: Option<BillingPeriod>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_amount: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumption: Option<Consumption>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meter_reading: Option<MeterReading>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub charges: Option<BTreeMap<ChargeCategory, f64>>,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

fn default_confidence() -> f64 {
    PATTERN_CONFIDENCE
}

impl Default for ParsedBill {
    fn default() -> Self {
        ParsedBill {
            account_number: None,
            account_name: None,
            billing_period: None,
            due_date: None,
            total_amount: None,
            consumption: None,
            meter_reading: None,
            charges: None,
            confidence: PATTERN_CONFIDENCE,
        }
    }
}

impl ParsedBill {
    /// How many of the scalar field groups were successfully extracted.
    pub fn coverage(&self) -> (usize, usize) {
        let total = 8;
        let filled = [
            self.account_number.is_some(),
            self.account_name.is_some(),
            self.billing_period.is_some(),
            self.due_date.is_some(),
            self.total_amount.is_some(),
            self.consumption.is_some(),
            self.meter_reading.is_some(),
            self.charges.is_some(),
        ]
        .iter()
        .filter(|&&v| v)
        .count();
        (filled, total)
    }

    /// Overlay `other` onto `self`: every field `other` managed to fill
    /// replaces the corresponding field here. Field-level, not deep — a
    /// found charges map replaces the whole map. This is how pattern
    /// results are merged over an LLM base record.
    pub fn merge_from(&mut self, other: ParsedBill) {
        if other.account_number.is_some() {
            self.account_number = other.account_number;
        }
        if other.account_name.is_some() {
            self.account_name = other.account_name;
        }
        if other.billing_period.is_some() {
            self.billing_period = other.billing_period;
        }
        if other.due_date.is_some() {
            self.due_date = other.due_date;
        }
        if other.total_amount.is_some() {
            self.total_amount = other.total_amount;
        }
        if other.consumption.is_some() {
            self.consumption = other.consumption;
        }
        if other.meter_reading.is_some() {
            self.meter_reading = other.meter_reading;
        }
        if other.charges.is_some() {
            self.charges = other.charges;
        }
        self.confidence = other.confidence;
    }
}

/// Extract a structured bill record from raw OCR text.
///
/// `rate_per_kwh` feeds the last-resort consumption estimate; pass
/// [`AVERAGE_RATE_PER_KWH`] unless configuration overrides it.
pub fn extract_bill(text: &str, rate_per_kwh: f64) -> ParsedBill {
    fields::extract(text, rate_per_kwh)
}
