//! Exchange event parsing into canonical records.
//!
//! Parsing is a pure function of `(context, raw event)`. Anything that is not a
//! known order or trade event comes back as [`ParsedEvent::Unrecognized`].

pub mod binance;
pub mod fields;
pub mod okx;

pub use binance::BinanceEventParser;
pub use okx::OkxEventParser;

use crate::models::{AccountId, ExchangeId, Record, BINANCE, OKX};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Owner of the session an event arrived on
#[derive(Debug, Clone, Copy)]
pub struct ParseContext<'a> {
    pub account_id: AccountId,
    pub exchange: &'a str,
    pub market: &'a str,
}

/// Result of parsing one inbound event
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedEvent {
    /// Order state change (new, partial fill, fill, cancel, ...)
    OrderUpdate(Record),
    /// Individual fill
    Trade(Record),
    /// Several order changes pushed in one message, in push order
    OrderUpdates(Vec<Record>),
    /// Event kind this parser does not map, or a malformed payload
    Unrecognized,
}

impl ParsedEvent {
    /// Records to persist, in the order they should be applied
    pub fn into_records(self) -> Vec<Record> {
        let records = match self {
            ParsedEvent::OrderUpdate(record) | ParsedEvent::Trade(record) => vec![record],
            ParsedEvent::OrderUpdates(records) => records,
            ParsedEvent::Unrecognized => Vec::new(),
        };
        records.into_iter().filter(Record::has_id).collect()
    }

    pub fn is_recognized(&self) -> bool {
        !matches!(self, ParsedEvent::Unrecognized)
    }
}

/// Exchange-specific event parser
pub trait EventParser: Send + Sync {
    fn parse(&self, ctx: &ParseContext<'_>, event: &Value) -> ParsedEvent;
}

/// Parsers selected by exchange identifier
#[derive(Clone, Default)]
pub struct ParserRegistry {
    parsers: HashMap<ExchangeId, Arc<dyn EventParser>>,
}

impl ParserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in exchange parser
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(BINANCE, Arc::new(BinanceEventParser));
        registry.register(OKX, Arc::new(OkxEventParser));
        registry
    }

    pub fn register(&mut self, exchange: impl Into<ExchangeId>, parser: Arc<dyn EventParser>) {
        self.parsers.insert(exchange.into(), parser);
    }

    pub fn supports(&self, exchange: &str) -> bool {
        self.parsers.contains_key(exchange)
    }

    pub fn parse(&self, ctx: &ParseContext<'_>, event: &Value) -> ParsedEvent {
        match self.parsers.get(ctx.exchange) {
            Some(parser) => parser.parse(ctx, event),
            None => ParsedEvent::Unrecognized,
        }
    }
}
