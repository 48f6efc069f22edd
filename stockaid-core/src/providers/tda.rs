//! `TDA` provider: TD Ameritrade market data (price history, quotes, option
//! chains). Every call authenticates with the `TDA` key-chain entry, sent as
//! the `apikey` query parameter.

use chrono::DateTime;
use polars::prelude::*;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use super::transport::HttpTransport;
use crate::api::{CachePolicy, Fetcher, Params, ProviderSpec, RateLimit};
use crate::error::ApiError;
use crate::table::{date_column, ColumnType, TableSchema};

pub const PROVIDER: &str = "TDA";

const BASE_URL: &str = "https://api.tdameritrade.com/v1/marketdata/";

pub fn default_rate_limit() -> RateLimit {
    RateLimit::new(120, Duration::from_secs(60))
}

/// API names with their default TTLs.
pub const APIS: &[(&str, Duration)] = &[
    ("history", Duration::from_secs(86_400)),
    ("quote", Duration::from_secs(60)),
    ("chains", Duration::from_secs(180)),
];

const HISTORY_PARAMS: &[&str] = &["periodType", "period", "frequencyType"];
const CHAIN_PARAMS: &[&str] = &[
    "symbol",
    "includeQuotes",
    "range",
    "fromDate",
    "toDate",
    "optionType",
];

pub fn chains_schema() -> TableSchema {
    TableSchema::new(&[
        ("symbol", ColumnType::Text),
        ("expDate", ColumnType::Text),
        ("strike", ColumnType::Float),
        ("underlying", ColumnType::Text),
        ("underlyingLast", ColumnType::Float),
    ])
}

pub fn quote_schema() -> TableSchema {
    TableSchema::new(&[("symbol", ColumnType::Text)])
}

// ── Wire formats ────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct PriceHistory {
    #[serde(default)]
    candles: Vec<Candle>,
    #[serde(default)]
    empty: bool,
}

#[derive(Debug, Deserialize)]
struct Candle {
    open: Option<f64>,
    high: Option<f64>,
    low: Option<f64>,
    close: Option<f64>,
    volume: Option<f64>,
    /// Milliseconds since the epoch.
    datetime: i64,
}

#[derive(Debug, Deserialize)]
struct OptionChain {
    symbol: Option<String>,
    underlying: Option<Underlying>,
    #[serde(rename = "underlyingPrice")]
    underlying_price: Option<f64>,
    #[serde(rename = "callExpDateMap", default)]
    calls: BTreeMap<String, BTreeMap<String, Vec<Map<String, Value>>>>,
    #[serde(rename = "putExpDateMap", default)]
    puts: BTreeMap<String, BTreeMap<String, Vec<Map<String, Value>>>>,
}

#[derive(Debug, Deserialize)]
struct Underlying {
    symbol: Option<String>,
    last: Option<f64>,
}

// ── Parsers ─────────────────────────────────────────────────────────

/// Parse a `pricehistory` response into a date-sorted OHLCV frame.
///
/// Candles are sorted by timestamp; a second candle on the same calendar
/// date is dropped. An `empty` response yields a frame with no rows.
pub fn parse_price_history(body: &str) -> Result<DataFrame, ApiError> {
    let history: PriceHistory = serde_json::from_str(body)
        .map_err(|e| ApiError::DataFormat(format!("price history: {e}")))?;

    let mut candles = if history.empty {
        Vec::new()
    } else {
        history.candles
    };
    candles.sort_by_key(|c| c.datetime);

    let mut dates = Vec::with_capacity(candles.len());
    let mut datetimes = Vec::with_capacity(candles.len());
    let mut ohlcv: [Vec<f64>; 5] = Default::default();

    for candle in &candles {
        let date = DateTime::from_timestamp_millis(candle.datetime)
            .map(|dt| dt.date_naive())
            .ok_or_else(|| {
                ApiError::DataFormat(format!("invalid candle timestamp {}", candle.datetime))
            })?;
        if dates.last() == Some(&date) {
            continue;
        }
        dates.push(date);
        datetimes.push(candle.datetime);
        let values = [candle.open, candle.high, candle.low, candle.close, candle.volume];
        for (column, value) in ohlcv.iter_mut().zip(values) {
            column.push(value.unwrap_or(f64::NAN));
        }
    }

    let [open, high, low, close, volume] = ohlcv;
    Ok(DataFrame::new(vec![
        date_column("date", &dates)?,
        Column::new("datetime".into(), datetimes),
        Column::new("open".into(), open),
        Column::new("high".into(), high),
        Column::new("low".into(), low),
        Column::new("close".into(), close),
        Column::new("volume".into(), volume),
    ])?)
}

/// Parse a `quotes` response (`{symbol: {field: value}}`) into one row per
/// symbol.
pub fn parse_quote(body: &str) -> Result<DataFrame, ApiError> {
    let quotes: BTreeMap<String, Map<String, Value>> = serde_json::from_str(body)
        .map_err(|e| ApiError::DataFormat(format!("quote: {e}")))?;
    let records = quotes
        .into_iter()
        .map(|(symbol, mut fields)| {
            fields.insert("symbol".into(), Value::String(symbol));
            fields
        })
        .collect::<Vec<_>>();
    records_to_frame(&records, &quote_schema())
}

/// Parse a `chains` response, flattening the call and put maps to one row per
/// contract with `expDate`, `strike`, `underlying` and `underlyingLast` added.
pub fn parse_chains(body: &str) -> Result<DataFrame, ApiError> {
    let chain: OptionChain = serde_json::from_str(body)
        .map_err(|e| ApiError::DataFormat(format!("option chain: {e}")))?;

    let underlying = chain
        .underlying
        .as_ref()
        .and_then(|u| u.symbol.clone())
        .or(chain.symbol.clone())
        .unwrap_or_default();
    let underlying_last = chain
        .underlying
        .as_ref()
        .and_then(|u| u.last)
        .or(chain.underlying_price);

    let mut records = Vec::new();
    for map in [&chain.calls, &chain.puts] {
        for (exp_date, strikes) in map {
            for (strike, contracts) in strikes {
                for contract in contracts {
                    let mut record = contract.clone();
                    record.insert("expDate".into(), Value::String(exp_date.clone()));
                    record.insert(
                        "strike".into(),
                        strike
                            .parse::<f64>()
                            .ok()
                            .and_then(serde_json::Number::from_f64)
                            .map_or(Value::Null, Value::Number),
                    );
                    record.insert("underlying".into(), Value::String(underlying.clone()));
                    record.insert(
                        "underlyingLast".into(),
                        underlying_last
                            .and_then(serde_json::Number::from_f64)
                            .map_or(Value::Null, Value::Number),
                    );
                    records.push(record);
                }
            }
        }
    }
    records_to_frame(&records, &chains_schema())
}

/// Build a frame from JSON records.
///
/// Schema columns come first and are coerced to their declared type. Other
/// columns are `Float64` when every present value is a number, `String`
/// otherwise (nested values are kept as JSON text).
fn records_to_frame(records: &[Map<String, Value>], schema: &TableSchema) -> Result<DataFrame, ApiError> {
    let mut columns = Vec::new();
    let mut done = BTreeSet::new();

    for (name, ty) in schema.columns() {
        done.insert(name.to_string());
        columns.push(match ty {
            ColumnType::Float => float_column(name, records),
            ColumnType::Text => text_column(name, records),
            ColumnType::Date => {
                return Err(ApiError::DataFormat(format!(
                    "date column {name} not supported in JSON records"
                )))
            }
        });
    }

    let extra: BTreeSet<&String> = records
        .iter()
        .flat_map(|r| r.keys())
        .filter(|k| !done.contains(*k))
        .collect();
    for name in extra {
        let numeric = records
            .iter()
            .filter_map(|r| r.get(name))
            .all(|v| v.is_number() || v.is_null());
        columns.push(if numeric {
            float_column(name, records)
        } else {
            text_column(name, records)
        });
    }

    Ok(DataFrame::new(columns)?)
}

fn float_column(name: &str, records: &[Map<String, Value>]) -> Column {
    let values: Vec<Option<f64>> = records
        .iter()
        .map(|r| match r.get(name) {
            Some(Value::Number(n)) => n.as_f64(),
            Some(Value::String(s)) => s.parse().ok(),
            _ => None,
        })
        .collect();
    Column::new(name.into(), values)
}

fn text_column(name: &str, records: &[Map<String, Value>]) -> Column {
    let values: Vec<Option<String>> = records
        .iter()
        .map(|r| match r.get(name) {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Null) | None => None,
            Some(other) => Some(other.to_string()),
        })
        .collect();
    Column::new(name.into(), values)
}

// ── Fetchers ────────────────────────────────────────────────────────

fn required<'a>(params: &'a Params, name: &str, key: &str) -> Result<&'a str, ApiError> {
    params
        .get(key)
        .map(String::as_str)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::Configuration(format!("{PROVIDER}/{name} requires '{key}'")))
}

fn query(params: &Params, keys: &[&str], credential: Option<&str>) -> Vec<(String, String)> {
    let mut query: Vec<(String, String)> = keys
        .iter()
        .filter_map(|k| params.get(*k).map(|v| (k.to_string(), v.clone())))
        .collect();
    if let Some(key) = credential {
        query.push(("apikey".into(), key.to_string()));
    }
    query
}

/// `history`: `{symbol}/pricehistory`.
pub struct HistoryFetcher {
    transport: Arc<dyn HttpTransport>,
}

impl Fetcher for HistoryFetcher {
    fn fetch(&self, params: &Params, credential: Option<&str>) -> Result<DataFrame, ApiError> {
        let symbol = required(params, "history", "symbol")?;
        let url = format!("{BASE_URL}{symbol}/pricehistory");
        let body = self
            .transport
            .get(&url, &query(params, HISTORY_PARAMS, credential))
            .map_err(|e| e.for_call(PROVIDER, "history"))?;
        parse_price_history(&body)
    }
}

/// `quote`: `{symbol}/quotes`.
pub struct QuoteFetcher {
    transport: Arc<dyn HttpTransport>,
}

impl Fetcher for QuoteFetcher {
    fn fetch(&self, params: &Params, credential: Option<&str>) -> Result<DataFrame, ApiError> {
        let symbol = required(params, "quote", "symbol")?;
        let url = format!("{BASE_URL}{symbol}/quotes");
        let body = self
            .transport
            .get(&url, &query(params, &[], credential))
            .map_err(|e| e.for_call(PROVIDER, "quote"))?;
        parse_quote(&body)
    }
}

/// `chains`: option chains for an underlying.
pub struct ChainsFetcher {
    transport: Arc<dyn HttpTransport>,
}

impl Fetcher for ChainsFetcher {
    fn fetch(&self, params: &Params, credential: Option<&str>) -> Result<DataFrame, ApiError> {
        required(params, "chains", "symbol")?;
        let url = format!("{BASE_URL}chains");
        let body = self
            .transport
            .get(&url, &query(params, CHAIN_PARAMS, credential))
            .map_err(|e| e.for_call(PROVIDER, "chains"))?;
        parse_chains(&body)
    }
}

/// Specs for the TDA APIs.
pub fn specs(transport: Arc<dyn HttpTransport>, policy: impl Fn(&str) -> CachePolicy) -> Vec<ProviderSpec> {
    vec![
        ProviderSpec::new(
            PROVIDER,
            "history",
            HistoryFetcher {
                transport: Arc::clone(&transport),
            },
            policy("history"),
        )
        .with_schema(TableSchema::price_history()),
        ProviderSpec::new(
            PROVIDER,
            "quote",
            QuoteFetcher {
                transport: Arc::clone(&transport),
            },
            policy("quote"),
        )
        .with_schema(quote_schema()),
        ProviderSpec::new(PROVIDER, "chains", ChainsFetcher { transport }, policy("chains"))
            .with_schema(chains_schema()),
    ]
}
