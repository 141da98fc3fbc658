use thiserror::Error;

/// The parser's only boundary failure. Anything else — a tier-1 outage, a
/// pattern that does not match — degrades to a sparser record instead.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("no bill text provided")]
    EmptyInput,
}
