pub mod config;
pub mod error;
pub mod heuristics;
pub mod llm_extract;
pub mod parser;

pub use config::Config;
pub use error::ParseError;
pub use heuristics::ParsedBill;
pub use parser::{BillParser, ParseOutcome, ParserState, ParserStatus};
