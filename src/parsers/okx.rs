use crate::models::Record;
use crate::parsers::fields;
use crate::parsers::{EventParser, ParseContext, ParsedEvent};
use chrono::Utc;
use serde_json::Value;

/// OKX private `orders` channel parser
#[derive(Debug, Clone, Copy, Default)]
pub struct OkxEventParser;

impl EventParser for OkxEventParser {
    fn parse(&self, ctx: &ParseContext<'_>, event: &Value) -> ParsedEvent {
        let channel = event
            .get("arg")
            .and_then(|arg| arg.get("channel"))
            .and_then(Value::as_str);
        if channel != Some("orders") {
            return ParsedEvent::Unrecognized;
        }

        let records: Vec<Record> = event
            .get("data")
            .and_then(Value::as_array)
            .map(|orders| orders.iter().filter_map(|order| parse_order(ctx, order)).collect())
            .unwrap_or_default();
        if records.is_empty() {
            return ParsedEvent::Unrecognized;
        }
        ParsedEvent::OrderUpdates(records)
    }
}

fn parse_order(ctx: &ParseContext<'_>, order: &Value) -> Option<Record> {
    if !order.is_object() {
        return None;
    }
    let id = fields::string(order, "ordId");
    if id.is_empty() {
        return None;
    }

    let time = fields::millis(order, "uTime")
        .or_else(|| fields::millis(order, "cTime"))
        .unwrap_or_else(Utc::now);
    let mut record = Record::new(id.clone(), ctx.account_id, ctx.exchange, ctx.market, time);
    record.symbol = fields::string(order, "instId");
    record.status = fields::string(order, "state");
    record.side = fields::string(order, "side");
    record.order_type = fields::string(order, "ordType");
    record.price = fields::decimal(order, "px");
    record.quantity = fields::decimal(order, "sz");
    record.executed_quantity = fields::decimal(order, "accFillSz");
    record.avg_price = fields::decimal(order, "avgPx");
    record.commission = fields::decimal(order, "fee");
    record.commission_asset = fields::string(order, "feeCcy");
    record.order_id = Some(id);
    record.position_side = fields::optional_string(order, "posSide");
    record.is_maker = fields::optional_string(order, "execType").map(|t| t == "M");
    Some(record)
}
