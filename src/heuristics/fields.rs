use super::{
    BillingPeriod, ChargeCategory, Consumption, MeterReading, ParsedBill, PATTERN_CONFIDENCE,
};
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;

/// Main extraction entry point — keyword-anchored regex patterns over the
/// whole OCR text, followed by the consumption derivation rules.
pub fn extract(text: &str, rate_per_kwh: f64) -> ParsedBill {
    let mut bill = ParsedBill {
        account_number: extract_account_number(text),
        account_name: extract_account_name(text),
        billing_period: extract_billing_period(text),
        due_date: extract_due_date(text),
        total_amount: extract_total_amount(text),
        consumption: extract_consumption(text),
        meter_reading: extract_meter_reading(text),
        charges: extract_charges(text),
        confidence: PATTERN_CONFIDENCE,
    };
    derive_consumption(&mut bill, rate_per_kwh);
    bill
}

/// Strip thousands separators and parse as a decimal.
fn parse_number(raw: &str) -> Option<f64> {
    raw.replace(',', "").parse::<f64>().ok()
}

// ---------------------------------------------------------------------------
// Scalar field extractors
// ---------------------------------------------------------------------------

fn extract_account_number(text: &str) -> Option<String> {
    // 11-digit id near an "account"/"acct"/"service id" label, tolerating
    // an intervening "Number"/"No." word ("Account Number: 12345678901").
    let re = Regex::new(r"(?i)(?:account|acct|service\s*id)(?:\s*(?:number|no\.?))?[\s#:]*(\d{11})")
        .ok()?;
    re.captures(text).map(|c| c[1].to_string())
}

fn extract_account_name(text: &str) -> Option<String> {
    // Capitalised run after a "name" label, terminated at a newline or the
    // word "account" (bills often print "... NAME account no ..." inline).
    let re = Regex::new(r"(?i)(?:name|account name)[:\s]*([A-Z][A-Z\s,\.]+?)(?:\n|account)").ok()?;
    re.captures(text).map(|c| c[1].trim().to_string())
}

fn extract_billing_period(text: &str) -> Option<BillingPeriod> {
    let re = Regex::new(
        r"(?i)(?:billing period|period covered)[:\s]*(\d{1,2}/\d{1,2}/\d{2,4})\s*(?:to|-)\s*(\d{1,2}/\d{1,2}/\d{2,4})",
    )
    .ok()?;
    re.captures(text).map(|c| BillingPeriod {
        from: c[1].to_string(),
        to: c[2].to_string(),
    })
}

fn extract_due_date(text: &str) -> Option<String> {
    let re = Regex::new(r"(?i)(?:due date|pay before)[:\s]*(\d{1,2}/\d{1,2}/\d{2,4})").ok()?;
    re.captures(text).map(|c| c[1].to_string())
}

// ---------------------------------------------------------------------------
// Ordered pattern tables
// ---------------------------------------------------------------------------

/// Total-amount candidates, strongest label first. First match wins —
/// later patterns are never consulted once one succeeds.
static AMOUNT_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)(?:total amount|amount due|total\s*due)[:\s]*(?:PHP|₱|P)?\s*([\d,]+\.?\d*)",
        r"(?:PHP|₱|P)\s*([\d,]+\.?\d*)",
        r"(?i)amount[:\s]*(?:PHP|₱|P)?\s*([\d,]+\.?\d*)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("amount pattern"))
    .collect()
});

/// Direct kWh-statement candidates, strongest first.
static KWH_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)(\d+(?:,\d+)?)\s*kWh",
        r"(?i)consumption[:\s]*(\d+(?:,\d+)?)",
        r"(?i)total\s*consumption[:\s]*(\d+(?:,\d+)?)",
        r"(?i)kwh[:\s]*(\d+(?:,\d+)?)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("kwh pattern"))
    .collect()
});

/// Charge-category rows: label synonyms → captured amount. Unlike the
/// ordered tables above, every row is evaluated — the categories are
/// disjoint and a bill may break out any subset of them.
static CHARGE_PATTERNS: LazyLock<Vec<(ChargeCategory, Regex)>> = LazyLock::new(|| {
    [
        (
            ChargeCategory::Generation,
            r"(?i)generation[:\s]*(?:PHP|₱|P)?\s*([\d,]+\.?\d*)",
        ),
        (
            ChargeCategory::Transmission,
            r"(?i)transmission[:\s]*(?:PHP|₱|P)?\s*([\d,]+\.?\d*)",
        ),
        (
            ChargeCategory::Distribution,
            r"(?i)(?:distribution|supply|system)[:\s]*(?:PHP|₱|P)?\s*([\d,]+\.?\d*)",
        ),
        (
            ChargeCategory::SystemLoss,
            r"(?i)(?:system loss|slc)[:\s]*(?:PHP|₱|P)?\s*([\d,]+\.?\d*)",
        ),
        // Tolerates a leading minus; subsidies are stored as the amount
        // subsidised, not a signed delta.
        (
            ChargeCategory::Subsidies,
            r"(?i)(?:subsidy|subsidies|discount|senior)[:\s]*(?:PHP|₱|P)?\s*-?\s*([\d,]+\.?\d*)",
        ),
        (
            ChargeCategory::Taxes,
            r"(?i)(?:taxes|tax|vat|withholding)[:\s]*(?:PHP|₱|P)?\s*([\d,]+\.?\d*)",
        ),
        (
            ChargeCategory::UniversalCharges,
            r"(?i)(?:universal charges?|uc|environmental)[:\s]*(?:PHP|₱|P)?\s*([\d,]+\.?\d*)",
        ),
        (
            ChargeCategory::FitAll,
            r"(?i)(?:fit-all|fit all|feed-in)[:\s]*(?:PHP|₱|P)?\s*([\d,]+\.?\d*)",
        ),
    ]
    .iter()
    .map(|(cat, p)| (*cat, Regex::new(p).expect("charge pattern")))
    .collect()
});

fn extract_total_amount(text: &str) -> Option<f64> {
    for re in AMOUNT_PATTERNS.iter() {
        if let Some(value) = re.captures(text).and_then(|c| parse_number(&c[1])) {
            return Some(value);
        }
    }
    None
}

fn extract_consumption(text: &str) -> Option<Consumption> {
    for re in KWH_PATTERNS.iter() {
        if let Some(kwh) = re.captures(text).and_then(|c| parse_number(&c[1])) {
            // Readings default to 0 for a directly-stated figure; the
            // meter-delta rule only runs when this extractor found nothing.
            return Some(Consumption {
                current: 0.0,
                previous: 0.0,
                kwh,
            });
        }
    }
    None
}

fn extract_meter_reading(text: &str) -> Option<MeterReading> {
    let current_re = Regex::new(r"(?i)(?:present|current)[:\s]*(\d+(?:,\d+)?)").ok()?;
    let previous_re = Regex::new(r"(?i)previous[:\s]*(\d+(?:,\d+)?)").ok()?;

    let current = parse_number(&current_re.captures(text)?[1])?;
    let previous = parse_number(&previous_re.captures(text)?[1])?;
    Some(MeterReading { current, previous })
}

fn extract_charges(text: &str) -> Option<BTreeMap<ChargeCategory, f64>> {
    let mut charges = BTreeMap::new();
    for (category, re) in CHARGE_PATTERNS.iter() {
        if let Some(value) = re.captures(text).and_then(|c| parse_number(&c[1])) {
            charges.insert(*category, value);
        }
    }
    if charges.is_empty() {
        None
    } else {
        Some(charges)
    }
}

// ---------------------------------------------------------------------------
// Consumption derivation
// ---------------------------------------------------------------------------

/// Fill `consumption` from weaker sources when no kWh figure was stated.
///
/// Precedence: explicit statement > meter-reading delta > amount-based
/// estimate. The delta is clamped at 0 so a misread reading pair can never
/// yield negative consumption; the raw readings stay verbatim.
fn derive_consumption(bill: &mut ParsedBill, rate_per_kwh: f64) {
    if bill.consumption.is_none() {
        if let Some(reading) = &bill.meter_reading {
            bill.consumption = Some(Consumption {
                current: reading.current,
                previous: reading.previous,
                kwh: (reading.current - reading.previous).max(0.0),
            });
        }
    }

    if bill.consumption.is_none() {
        if let Some(total) = bill.total_amount {
            bill.consumption = Some(Consumption {
                current: 0.0,
                previous: 0.0,
                kwh: (total / rate_per_kwh).round(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::AVERAGE_RATE_PER_KWH;
    use super::*;

    fn extract_default(text: &str) -> ParsedBill {
        extract(text, AVERAGE_RATE_PER_KWH)
    }

    #[test]
    fn account_number_label_variants() {
        for text in [
            "Account Number: 12345678901",
            "Acct # 12345678901",
            "Service ID: 12345678901",
            "ACCOUNT NO. 12345678901",
        ] {
            let bill = extract_default(text);
            assert_eq!(
                bill.account_number.as_deref(),
                Some("12345678901"),
                "failed for {text:?}"
            );
        }
    }

    #[test]
    fn account_number_requires_eleven_digits() {
        let bill = extract_default("Account Number: 1234567890");
        assert_eq!(bill.account_number, None);
    }

    #[test]
    fn account_name_terminates_at_newline() {
        let bill = extract_default("Account Name: JUAN DELA CRUZ\nAddress: Manila");
        assert_eq!(bill.account_name.as_deref(), Some("JUAN DELA CRUZ"));
    }

    #[test]
    fn amount_prefers_labelled_total_over_bare_currency() {
        // The bare ₱ figure appears first in the text; the labelled total
        // still wins because patterns are tried in table order.
        let bill = extract_default("Previous balance ₱ 999.99\nTotal Amount: PHP 1,234.56");
        assert_eq!(bill.total_amount, Some(1234.56));
    }

    #[test]
    fn amount_strips_thousands_separators() {
        let bill = extract_default("Amount Due: ₱12,345.67");
        assert_eq!(bill.total_amount, Some(12345.67));
    }

    #[test]
    fn amount_falls_back_to_bare_label() {
        let bill = extract_default("amount: 850.25");
        assert_eq!(bill.total_amount, Some(850.25));
    }

    #[test]
    fn kwh_direct_statement() {
        let bill = extract_default("Consumption this month: 250 kWh");
        let c = bill.consumption.unwrap();
        assert_eq!(c.kwh, 250.0);
        assert_eq!(c.current, 0.0);
        assert_eq!(c.previous, 0.0);
    }

    #[test]
    fn kwh_from_consumption_label() {
        let bill = extract_default("Total Consumption: 312");
        assert_eq!(bill.consumption.unwrap().kwh, 312.0);
    }

    #[test]
    fn explicit_kwh_beats_meter_delta() {
        let bill = extract_default("78 kWh\nCurrent: 500\nPrevious: 400");
        assert_eq!(bill.consumption.as_ref().unwrap().kwh, 78.0);
        // The readings are still recorded on their own.
        let reading = bill.meter_reading.unwrap();
        assert_eq!(reading.current, 500.0);
        assert_eq!(reading.previous, 400.0);
    }

    #[test]
    fn meter_delta_fills_missing_kwh() {
        let bill = extract_default("Present: 1500\nPrevious: 1420");
        let reading = bill.meter_reading.as_ref().unwrap();
        assert_eq!(reading.current, 1500.0);
        assert_eq!(reading.previous, 1420.0);
        let c = bill.consumption.unwrap();
        assert_eq!(c.kwh, 80.0);
        assert_eq!(c.current, 1500.0);
        assert_eq!(c.previous, 1420.0);
    }

    #[test]
    fn meter_delta_requires_both_readings() {
        let bill = extract_default("Present: 1500");
        assert_eq!(bill.meter_reading, None);
        assert_eq!(bill.consumption, None);
    }

    #[test]
    fn negative_meter_delta_clamps_to_zero() {
        let bill = extract_default("Current: 100\nPrevious: 250");
        assert_eq!(bill.consumption.unwrap().kwh, 0.0);
        let reading = bill.meter_reading.unwrap();
        assert_eq!(reading.current, 100.0);
        assert_eq!(reading.previous, 250.0);
    }

    #[test]
    fn kwh_estimated_from_amount_as_last_resort() {
        let bill = extract_default("Total Amount: PHP 3450.00");
        assert_eq!(bill.total_amount, Some(3450.0));
        let c = bill.consumption.unwrap();
        assert_eq!(c.kwh, 300.0);
        assert_eq!(c.current, 0.0);
        assert_eq!(c.previous, 0.0);
    }

    #[test]
    fn billing_period_and_due_date() {
        let bill = extract_default(
            "Billing Period: 1/15/2025 to 2/14/2025\nDue Date: 3/1/2025",
        );
        let period = bill.billing_period.unwrap();
        assert_eq!(period.from, "1/15/2025");
        assert_eq!(period.to, "2/14/2025");
        assert_eq!(bill.due_date.as_deref(), Some("3/1/2025"));
    }

    #[test]
    fn charges_only_contain_found_categories() {
        let bill = extract_default("Generation: ₱897.50\nTransmission: ₱210.30");
        let charges = bill.charges.unwrap();
        assert_eq!(charges.len(), 2);
        assert_eq!(charges[&ChargeCategory::Generation], 897.5);
        assert_eq!(charges[&ChargeCategory::Transmission], 210.3);
    }

    #[test]
    fn subsidy_stored_as_positive_magnitude() {
        let bill = extract_default("Senior Citizen Subsidy: -172.68");
        let charges = bill.charges.unwrap();
        assert_eq!(charges[&ChargeCategory::Subsidies], 172.68);
    }

    #[test]
    fn full_charge_breakdown() {
        let text = "Generation: 897.50\nTransmission: 210.30\nDistribution: 430.12\n\
                    System Loss: 45.20\nTaxes: 120.00\nUniversal Charges: 15.75\nFIT-All: 8.90";
        let bill = extract_default(text);
        let charges = bill.charges.unwrap();
        assert_eq!(charges[&ChargeCategory::Generation], 897.5);
        assert_eq!(charges[&ChargeCategory::Transmission], 210.3);
        assert_eq!(charges[&ChargeCategory::Distribution], 430.12);
        assert_eq!(charges[&ChargeCategory::SystemLoss], 45.2);
        assert_eq!(charges[&ChargeCategory::Taxes], 120.0);
        assert_eq!(charges[&ChargeCategory::UniversalCharges], 15.75);
        assert_eq!(charges[&ChargeCategory::FitAll], 8.9);
    }

    #[test]
    fn unrelated_text_leaves_every_field_absent() {
        let bill = extract_default("The quick brown fox jumps over the lazy dog.");
        assert_eq!(bill.coverage(), (0, 8));
        assert_eq!(bill.confidence, PATTERN_CONFIDENCE);
    }

    #[test]
    fn meralco_style_bill_end_to_end() {
        let text = "Account Number: 12345678901\nTotal Amount: PHP 3,364.86\n78 kWh\n\
                    Generation: 897.50\nTransmission: 210.30";
        let bill = extract_default(text);
        assert_eq!(bill.account_number.as_deref(), Some("12345678901"));
        assert_eq!(bill.total_amount, Some(3364.86));
        let c = bill.consumption.unwrap();
        assert_eq!((c.kwh, c.current, c.previous), (78.0, 0.0, 0.0));
        let charges = bill.charges.unwrap();
        assert_eq!(charges.len(), 2);
        assert_eq!(charges[&ChargeCategory::Generation], 897.5);
        assert_eq!(charges[&ChargeCategory::Transmission], 210.3);
    }
}
