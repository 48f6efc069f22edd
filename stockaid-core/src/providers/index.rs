//! `index` provider: index membership scraped from Wikipedia edit pages.

use polars::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use super::transport::HttpTransport;
use super::wiki::{self, WikiTable};
use crate::api::{CachePolicy, Fetcher, Params, ProviderSpec, RateLimit};
use crate::error::ApiError;
use crate::table::TableSchema;

pub const PROVIDER: &str = "index";

const EDIT_URL: &str = "https://en.wikipedia.org/w/index.php";

/// One week.
pub const DEFAULT_TTL: Duration = Duration::from_secs(604_800);

pub fn default_rate_limit() -> RateLimit {
    RateLimit::per_minute(10)
}

/// Known indexes: (api name, page title, page section).
pub const INDEXES: &[(&str, &str, u32)] = &[
    ("sp500", "List_of_S&P_500_companies", 1),
    ("OEX", "S&P_100", 3),
    ("midcap", "List_of_S&P_400_companies", 1),
    ("smallcap", "List_of_S&P_600_companies", 1),
    ("nasdaq100", "Nasdaq-100", 13),
    ("DJIA", "Dow_Jones_Industrial_Average", 1),
];

const SYMBOL_HEADERS: &[&str] = &["Symbol", "Ticker", "Ticker symbol"];

/// Fetches one index page and turns its table into a frame.
pub struct IndexFetcher {
    name: String,
    title: String,
    section: u32,
    transport: Arc<dyn HttpTransport>,
}

impl IndexFetcher {
    pub fn new(name: &str, title: &str, section: u32, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            name: name.to_string(),
            title: title.to_string(),
            section,
            transport,
        }
    }
}

impl Fetcher for IndexFetcher {
    fn fetch(&self, _params: &Params, _credential: Option<&str>) -> Result<DataFrame, ApiError> {
        let query = vec![
            ("title".to_string(), self.title.clone()),
            ("action".to_string(), "edit".to_string()),
            ("section".to_string(), self.section.to_string()),
        ];
        let html = self
            .transport
            .get(EDIT_URL, &query)
            .map_err(|e| e.for_call(PROVIDER, &self.name))?;
        let table = wiki::parse_table(&wiki::extract_source(&html)?)?;
        members_frame(&table)
    }
}

/// Convert a membership table into a frame: a canonical `symbol` column
/// followed by every table column as strings. Rows without a symbol are
/// dropped.
pub fn members_frame(table: &WikiTable) -> Result<DataFrame, ApiError> {
    let symbol_idx = table.find_column(SYMBOL_HEADERS).ok_or_else(|| {
        ApiError::DataFormat(format!(
            "index table has no symbol column (columns: {:?})",
            table.columns
        ))
    })?;

    let rows: Vec<&Vec<String>> = table
        .rows
        .iter()
        .filter(|r| !r[symbol_idx].is_empty())
        .collect();

    let mut seen = HashSet::new();
    seen.insert("symbol".to_string());
    let mut columns = vec![Column::new(
        "symbol".into(),
        rows.iter()
            .map(|r| r[symbol_idx].clone())
            .collect::<Vec<String>>(),
    )];

    for (i, name) in table.columns.iter().enumerate() {
        let mut unique = if name.is_empty() {
            format!("column_{i}")
        } else {
            name.clone()
        };
        while !seen.insert(unique.clone()) {
            unique.push('_');
        }
        let values: Vec<String> = rows.iter().map(|r| r[i].clone()).collect();
        columns.push(Column::new(unique.as_str().into(), values));
    }

    Ok(DataFrame::new(columns)?)
}

/// Specs for every known index.
pub fn specs(transport: Arc<dyn HttpTransport>, policy: impl Fn(&str) -> CachePolicy) -> Vec<ProviderSpec> {
    INDEXES
        .iter()
        .map(|(name, title, section)| {
            ProviderSpec::new(
                PROVIDER,
                *name,
                IndexFetcher::new(name, title, *section, Arc::clone(&transport)),
                policy(name),
            )
            .with_schema(TableSchema::index_members())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::transport::testing::CannedTransport;
    use crate::table::read_strings;

    const PAGE: &str = r#"<html><body><form><textarea id="wpTextbox1">{| class="wikitable sortable"
|-
! Company !! Exchange !! Symbol
|-
| [[3M]] || [[New York Stock Exchange|NYSE]] || {{NyseSymbol|MMM}}
|-
| [[Apple Inc.]] || [[Nasdaq]] || {{NasdaqSymbol|AAPL}}
|-
| Placeholder || ||
|}</textarea></form></body></html>"#;

    #[test]
    fn fetcher_builds_symbol_frame() {
        let transport = Arc::new(CannedTransport::default().with(EDIT_URL, PAGE));
        let fetcher = IndexFetcher::new("DJIA", "Dow_Jones_Industrial_Average", 1, transport.clone());

        let df = fetcher.fetch(&Params::new(), None).unwrap();
        assert_eq!(read_strings(&df, "symbol").unwrap(), vec!["MMM", "AAPL"]);
        assert_eq!(read_strings(&df, "Company").unwrap(), vec!["3M", "Apple Inc."]);
        assert!(TableSchema::index_members().validate(&df).is_ok());

        let requests = transport.requests.lock().unwrap();
        assert!(requests[0]
            .1
            .contains(&("action".to_string(), "edit".to_string())));
    }

    #[test]
    fn table_without_symbol_column_is_rejected() {
        let table = WikiTable {
            columns: vec!["Company".into()],
            rows: vec![vec!["3M".into()]],
        };
        assert!(matches!(
            members_frame(&table).unwrap_err(),
            ApiError::DataFormat(_)
        ));
    }

    #[test]
    fn duplicate_headers_get_unique_names() {
        let table = WikiTable {
            columns: vec!["Ticker".into(), "Note".into(), "Note".into()],
            rows: vec![vec!["A".into(), "x".into(), "y".into()]],
        };
        let df = members_frame(&table).unwrap();
        assert_eq!(df.width(), 4);
        assert_eq!(read_strings(&df, "Note_").unwrap(), vec!["y"]);
    }

    #[test]
    fn transport_errors_name_the_index() {
        let transport = Arc::new(CannedTransport::default().failing(EDIT_URL, 503));
        let fetcher = IndexFetcher::new("sp500", "List_of_S&P_500_companies", 1, transport);
        match fetcher.fetch(&Params::new(), None).unwrap_err() {
            ApiError::Fetch { provider, name, .. } => {
                assert_eq!(provider, "index");
                assert_eq!(name, "sp500");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
