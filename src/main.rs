use billtext::config::Config;
use billtext::parser::BillParser;
use std::io::Read;
use tracing::info;

/// Operator CLI: run the parser over a saved OCR text dump and print the
/// structured record as JSON.
///
/// Usage: `billtext <text-file | -> [ocr-confidence] [config.toml]`
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // init tracing
    tracing_subscriber::fmt()
        .with_target(true)
        .with_level(true)
        .with_env_filter("info")
        .init();

    let mut args = std::env::args().skip(1);
    let Some(input) = args.next() else {
        eprintln!("usage: billtext <text-file | -> [ocr-confidence] [config.toml]");
        std::process::exit(2);
    };
    let ocr_confidence: f64 = match args.next() {
        Some(raw) => raw.parse()?,
        None => 100.0,
    };
    let config = match args.next() {
        Some(path) => Config::load(&path)?,
        None => Config::load_or_default(".config/billtext.toml"),
    };

    let raw_text = if input == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        std::fs::read_to_string(&input)?
    };

    let parser = BillParser::new(config);
    let outcome = parser.parse(&raw_text, ocr_confidence).await?;

    let (filled, total) = outcome.bill.coverage();
    info!(
        filled,
        total,
        elapsed_ms = outcome.elapsed.as_millis() as u64,
        ocr_confidence = outcome.ocr_confidence,
        "Bill parsed"
    );
    println!("{}", serde_json::to_string_pretty(&outcome.bill)?);

    Ok(())
}
