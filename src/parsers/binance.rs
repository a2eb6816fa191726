use crate::models::Record;
use crate::parsers::fields;
use crate::parsers::{EventParser, ParseContext, ParsedEvent};
use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::Value;

/// Binance user-data stream parser (spot and USDⓈ-M futures)
#[derive(Debug, Clone, Copy, Default)]
pub struct BinanceEventParser;

impl EventParser for BinanceEventParser {
    fn parse(&self, ctx: &ParseContext<'_>, event: &Value) -> ParsedEvent {
        match event.get("e").and_then(Value::as_str) {
            Some("executionReport") => parse_spot_execution(ctx, event),
            Some("ORDER_TRADE_UPDATE") => match event.get("o") {
                Some(order) if order.is_object() => parse_futures_order(ctx, event, order),
                _ => ParsedEvent::Unrecognized,
            },
            Some("TRADE_LITE") => parse_trade_lite(ctx, event),
            _ => ParsedEvent::Unrecognized,
        }
    }
}

fn base_record(ctx: &ParseContext<'_>, id: String, data: &Value, fallback: &Value) -> Record {
    let time = fields::millis(data, "T")
        .or_else(|| fields::millis(fallback, "E"))
        .unwrap_or_else(Utc::now);
    Record::new(id, ctx.account_id, ctx.exchange, ctx.market, time)
}

/// Spot `executionReport`. Spot reports carry no average price, so it is
/// derived from cumulative quote quantity over cumulative filled quantity.
fn parse_spot_execution(ctx: &ParseContext<'_>, event: &Value) -> ParsedEvent {
    let id = fields::string(event, "i");
    if id.is_empty() {
        return ParsedEvent::Unrecognized;
    }

    let mut record = base_record(ctx, id.clone(), event, event);
    record.symbol = fields::string(event, "s");
    record.side = fields::string(event, "S");
    record.order_type = fields::string(event, "o");
    record.status = fields::string(event, "X");
    record.price = fields::decimal(event, "p");
    record.quantity = fields::decimal(event, "q");
    record.executed_quantity = fields::decimal(event, "z");
    record.commission = fields::decimal(event, "n");
    record.commission_asset = fields::string(event, "N");
    record.order_id = Some(id);
    record.is_maker = fields::boolean(event, "m");

    let cumulative_quote = fields::decimal(event, "Z");
    if !record.executed_quantity.is_zero() {
        record.avg_price = cumulative_quote
            .checked_div(record.executed_quantity)
            .unwrap_or_default();
        record.quote_quantity = Some(cumulative_quote);
    }

    ParsedEvent::OrderUpdate(record)
}

fn parse_futures_order(ctx: &ParseContext<'_>, event: &Value, order: &Value) -> ParsedEvent {
    let id = fields::string(order, "i");
    if id.is_empty() {
        return ParsedEvent::Unrecognized;
    }

    let mut record = base_record(ctx, id.clone(), order, event);
    record.symbol = fields::string(order, "s");
    record.side = fields::string(order, "S");
    record.order_type = fields::string(order, "o");
    record.status = fields::string(order, "X");
    record.price = fields::decimal(order, "p");
    record.quantity = fields::decimal(order, "q");
    record.executed_quantity = fields::decimal(order, "z");
    record.avg_price = fields::decimal(order, "ap");
    record.commission = fields::decimal(order, "n");
    record.commission_asset = fields::string(order, "N");
    record.order_id = Some(id);
    record.position_side = fields::optional_string(order, "ps");
    record.is_maker = fields::boolean(order, "m");

    ParsedEvent::OrderUpdate(record)
}

/// Futures `TRADE_LITE`: a single fill, keyed by trade id
fn parse_trade_lite(ctx: &ParseContext<'_>, event: &Value) -> ParsedEvent {
    let id = fields::string(event, "t");
    if id.is_empty() {
        return ParsedEvent::Unrecognized;
    }

    let mut record = base_record(ctx, id, event, event);
    let fill_price = fields::decimal(event, "L");
    let fill_qty = fields::decimal(event, "l");

    record.symbol = fields::string(event, "s");
    record.side = fields::string(event, "S");
    record.order_type = "TRADE".to_string();
    record.status = "FILLED".to_string();
    record.price = fill_price;
    record.quantity = fill_qty;
    record.executed_quantity = fill_qty;
    record.avg_price = fill_price;
    record.quote_quantity = fill_price.checked_mul(fill_qty);
    record.commission = Decimal::ZERO;
    record.order_id = fields::optional_string(event, "i");
    record.is_maker = fields::boolean(event, "m");

    ParsedEvent::Trade(record)
}
