// src/parser.rs

use crate::config::{Config, LlmBackend};
use crate::error::ParseError;
use crate::heuristics::{self, ParsedBill};
use crate::llm_extract;
use reqwest::Client;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

/// Parser processing state. Each invocation transitions
/// idle → processing → idle (success) or error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserState {
    Idle,
    Processing,
    Error,
}

const STATE_IDLE: u8 = 0;
const STATE_PROCESSING: u8 = 1;
const STATE_ERROR: u8 = 2;

/// Point-in-time snapshot of the parser's observability wrapper.
#[derive(Debug, Clone, PartialEq)]
pub struct ParserStatus {
    pub state: ParserState,
    /// Cumulative across invocations; never blocks a subsequent parse.
    pub error_count: u64,
    pub last_processed: Option<SystemTime>,
}

/// One parse's result: the record plus provenance metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseOutcome {
    pub bill: ParsedBill,
    /// OCR confidence (0–100), passed through unchanged — informational
    /// only, the parser does not gate on it.
    pub ocr_confidence: f64,
    pub elapsed: Duration,
}

/// Converts raw OCR text into a [`ParsedBill`].
///
/// Two tiers: an optional LLM pass whose output seeds the record, and the
/// deterministic pattern pass that always runs and overwrites any field it
/// can extract. With the `patterns` backend (the default) the whole parse
/// is pure CPU work, so independent bills may be parsed concurrently on
/// one instance — the status wrapper is all atomics.
pub struct BillParser {
    config: Config,
    client: Client,
    state: AtomicU8,
    error_count: AtomicU64,
    /// Unix millis of the last successful parse; 0 = never.
    last_processed_ms: AtomicU64,
}

impl BillParser {
    pub fn new(config: Config) -> Self {
        BillParser {
            config,
            client: Client::new(),
            state: AtomicU8::new(STATE_IDLE),
            error_count: AtomicU64::new(0),
            last_processed_ms: AtomicU64::new(0),
        }
    }

    pub fn status(&self) -> ParserStatus {
        let state = match self.state.load(Ordering::Relaxed) {
            STATE_PROCESSING => ParserState::Processing,
            STATE_ERROR => ParserState::Error,
            _ => ParserState::Idle,
        };
        let last_ms = self.last_processed_ms.load(Ordering::Relaxed);
        ParserStatus {
            state,
            error_count: self.error_count.load(Ordering::Relaxed),
            last_processed: (last_ms > 0).then(|| UNIX_EPOCH + Duration::from_millis(last_ms)),
        }
    }

    /// Parse one bill. The only failure is empty input; a tier-1 outage
    /// degrades to pattern-only extraction and still succeeds.
    pub async fn parse(
        &self,
        raw_text: &str,
        ocr_confidence: f64,
    ) -> Result<ParseOutcome, ParseError> {
        let started = Instant::now();
        self.state.store(STATE_PROCESSING, Ordering::Relaxed);

        if raw_text.trim().is_empty() {
            self.state.store(STATE_ERROR, Ordering::Relaxed);
            self.error_count.fetch_add(1, Ordering::Relaxed);
            return Err(ParseError::EmptyInput);
        }

        info!(chars = raw_text.len(), ocr_confidence, "Parsing bill text");

        // Tier 1: optional LLM pass. Any error means "unavailable".
        let tier1 = match self.config.llm.backend {
            LlmBackend::Patterns => None,
            _ => match llm_extract::run_llm_extraction(&self.client, &self.config.llm, raw_text)
                .await
            {
                Ok(bill) => Some(bill),
                Err(e) => {
                    warn!(error = %e, "LLM extraction failed — falling back to patterns");
                    None
                }
            },
        };

        // Tier 2: always runs; authoritative for every field it finds.
        let pattern_bill =
            heuristics::extract_bill(raw_text, self.config.rates.average_rate_per_kwh);
        let bill = match tier1 {
            Some(mut base) => {
                base.merge_from(pattern_bill);
                base
            }
            None => pattern_bill,
        };

        let (filled, total) = bill.coverage();
        info!(
            filled,
            total,
            account = ?bill.account_number,
            total_amount = ?bill.total_amount,
            kwh = ?bill.consumption.as_ref().map(|c| c.kwh),
            "Parse complete"
        );

        self.state.store(STATE_IDLE, Ordering::Relaxed);
        if let Ok(now) = SystemTime::now().duration_since(UNIX_EPOCH) {
            self.last_processed_ms
                .store(now.as_millis() as u64, Ordering::Relaxed);
        }

        Ok(ParseOutcome {
            bill,
            ocr_confidence,
            elapsed: started.elapsed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heuristics::{ChargeCategory, PATTERN_CONFIDENCE};

    fn pattern_parser() -> BillParser {
        BillParser::new(Config::default())
    }

    #[tokio::test]
    async fn empty_input_is_rejected_before_extraction() {
        let parser = pattern_parser();
        assert_eq!(parser.parse("", 90.0).await.unwrap_err(), ParseError::EmptyInput);
        assert_eq!(parser.parse("   \n\t", 90.0).await.unwrap_err(), ParseError::EmptyInput);

        let status = parser.status();
        assert_eq!(status.state, ParserState::Error);
        assert_eq!(status.error_count, 2);
        assert_eq!(status.last_processed, None);
    }

    #[tokio::test]
    async fn errors_do_not_block_later_parses() {
        let parser = pattern_parser();
        let _ = parser.parse("", 90.0).await;
        let outcome = parser.parse("Total Amount: PHP 3450.00", 90.0).await.unwrap();
        assert_eq!(outcome.bill.total_amount, Some(3450.0));

        let status = parser.status();
        assert_eq!(status.state, ParserState::Idle);
        assert_eq!(status.error_count, 1);
        assert!(status.last_processed.is_some());
    }

    #[tokio::test]
    async fn repeated_parses_are_bit_identical() {
        let parser = pattern_parser();
        let text = "Account Number: 12345678901\nTotal Amount: PHP 3,364.86\n78 kWh";
        let first = parser.parse(text, 85.0).await.unwrap();
        let second = parser.parse(text, 85.0).await.unwrap();
        assert_eq!(first.bill, second.bill);
    }

    #[tokio::test]
    async fn meralco_bill_scenario() {
        let parser = pattern_parser();
        let text = "Account Number: 12345678901\nTotal Amount: PHP 3,364.86\n78 kWh\n\
                    Generation: 897.50\nTransmission: 210.30";
        let outcome = parser.parse(text, 92.0).await.unwrap();

        let bill = &outcome.bill;
        assert_eq!(bill.account_number.as_deref(), Some("12345678901"));
        assert_eq!(bill.total_amount, Some(3364.86));
        let c = bill.consumption.as_ref().unwrap();
        assert_eq!((c.kwh, c.current, c.previous), (78.0, 0.0, 0.0));
        let charges = bill.charges.as_ref().unwrap();
        assert_eq!(charges.len(), 2);
        assert_eq!(charges[&ChargeCategory::Generation], 897.5);
        assert_eq!(charges[&ChargeCategory::Transmission], 210.3);
        assert_eq!(bill.confidence, PATTERN_CONFIDENCE);

        // Provenance metadata rides along unchanged.
        assert_eq!(outcome.ocr_confidence, 92.0);
    }

    #[tokio::test]
    async fn meter_readings_scenario() {
        let parser = pattern_parser();
        let outcome = parser.parse("Present: 1500\nPrevious: 1420", 75.0).await.unwrap();

        let reading = outcome.bill.meter_reading.as_ref().unwrap();
        assert_eq!((reading.current, reading.previous), (1500.0, 1420.0));
        let c = outcome.bill.consumption.as_ref().unwrap();
        assert_eq!((c.kwh, c.current, c.previous), (80.0, 1500.0, 1420.0));
    }

    #[tokio::test]
    async fn configured_rate_drives_the_estimate() {
        let mut config = Config::default();
        config.rates.average_rate_per_kwh = 10.0;
        let parser = BillParser::new(config);

        let outcome = parser.parse("Total Amount: PHP 3450.00", 90.0).await.unwrap();
        assert_eq!(outcome.bill.consumption.as_ref().unwrap().kwh, 345.0);
    }

    #[tokio::test]
    async fn unrelated_text_degrades_gracefully() {
        let parser = pattern_parser();
        let outcome = parser
            .parse("The quick brown fox jumps over the lazy dog.", 40.0)
            .await
            .unwrap();
        assert_eq!(outcome.bill.coverage(), (0, 8));
        assert_eq!(outcome.bill.confidence, PATTERN_CONFIDENCE);
        assert_eq!(parser.status().state, ParserState::Idle);
    }
}
