pub mod error;
pub mod movie;
pub mod permission;

use std::{fmt::Display, future::Future, str::FromStr as _, time::Duration};

pub use error::{Error, ValidationErrors};
use serde::{Deserialize, Serialize};
pub use sqlx::Error as SqlxError;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tracing::debug;

use crate::error::Result;

pub type ChosenDB = sqlx::Sqlite;
pub type ChosenRow = sqlx::sqlite::SqliteRow;
pub type Pool = sqlx::Pool<ChosenDB>;

/// Upper bound for every single storage call.
pub const QUERY_TIMEOUT: Duration = Duration::from_secs(3);

pub const DEFAULT_MAX_CONNECTIONS: u32 = 25;
pub const MAX_PAGE: u32 = 10_000_000;
pub const MAX_PAGE_SIZE: u32 = 100;
pub const DEFAULT_PAGE_SIZE: u32 = 20;

pub async fn new_pool(database_url: &str) -> Result<Pool> {
    new_pool_with_size(database_url, DEFAULT_MAX_CONNECTIONS).await
}

fn is_in_memory(database_url: &str) -> bool {
    database_url.contains(":memory:") || database_url.contains("mode=memory")
}

/// Opens the pool and brings the schema up to date.
///
/// An in-memory database lives only as long as its connection, so such URLs
/// get a single connection that is never reaped.
pub async fn new_pool_with_size(database_url: &str, max_connections: u32) -> Result<Pool> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(true);
    let pool_options = if is_in_memory(database_url) {
        if max_connections > 1 {
            debug!("In-memory database {database_url}, using a single connection");
        }
        SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        SqlitePoolOptions::new().max_connections(max_connections)
    };
    let pool = pool_options.connect_with(options).await?;
    migrate(&pool).await?;
    Ok(pool)
}

pub async fn migrate(pool: &Pool) -> Result<()> {
    sqlx::migrate!("../../migrations").run(pool).await?;
    Ok(())
}

/// Runs a storage operation bounded by [`QUERY_TIMEOUT`].
///
/// When the deadline passes the future is dropped, which aborts the in-flight
/// statement, and [`Error::Timeout`] is returned.
pub(crate) async fn timed<T, F>(operation: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(QUERY_TIMEOUT, operation).await {
        Ok(res) => res,
        Err(_) => {
            tracing::error!("Storage operation exceeded {QUERY_TIMEOUT:?}");
            Err(Error::Timeout(QUERY_TIMEOUT))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    fn as_sql(&self) -> &'static str {
        match self {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        }
    }
}

/// Sort column taken from an allow-list, plus direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    column: &'static str,
    direction: Direction,
}

impl Order {
    pub fn asc(column: &'static str) -> Self {
        Self {
            column,
            direction: Direction::Asc,
        }
    }

    /// Parses `column` or `-column`. Returns `None` unless the column is one of `valid_fields`.
    pub fn parse(token: &str, valid_fields: &[&'static str]) -> Option<Self> {
        let token = token.trim();
        let (name, direction) = match token.strip_prefix('-') {
            Some(name) => (name, Direction::Desc),
            None => (token, Direction::Asc),
        };
        valid_fields
            .iter()
            .copied()
            .find(|f| *f == name)
            .map(|column| Self { column, direction })
    }

    pub fn column(&self) -> &'static str {
        self.column
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }
}

impl Display for Order {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.direction {
            Direction::Asc => write!(f, "{}", self.column),
            Direction::Desc => write!(f, "{} DESC", self.column),
        }
    }
}

/// Client supplied paging and sorting, not yet checked.
#[derive(Debug, Clone)]
pub struct Filters {
    pub page: u32,
    pub page_size: u32,
    pub sort: String,
}

impl Default for Filters {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
            sort: "id".to_string(),
        }
    }
}

impl Filters {
    /// Checks bounds and sort column, reporting every problem found.
    pub fn into_listing_params(self, valid_fields: &[&'static str]) -> Result<ListingParams> {
        let mut errors = ValidationErrors::new();
        errors.check(self.page > 0, "page", "must be greater than zero");
        errors.check(
            self.page <= MAX_PAGE,
            "page",
            format!("must be a maximum of {MAX_PAGE}"),
        );
        errors.check(self.page_size > 0, "page_size", "must be greater than zero");
        errors.check(
            self.page_size <= MAX_PAGE_SIZE,
            "page_size",
            format!("must be a maximum of {MAX_PAGE_SIZE}"),
        );
        let order = Order::parse(&self.sort, valid_fields);
        errors.check(order.is_some(), "sort", "invalid sort value");
        errors.into_result()?;

        Ok(ListingParams {
            page: self.page,
            page_size: self.page_size,
            // checked just above
            order: order.unwrap_or_else(|| Order::asc("id")),
        })
    }
}

/// Validated paging window and ordering.
#[derive(Debug, Clone)]
pub struct ListingParams {
    pub page: u32,
    pub page_size: u32,
    pub order: Order,
}

impl Default for ListingParams {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
            order: Order::asc("id"),
        }
    }
}

impl ListingParams {
    pub fn new(page: u32, page_size: u32) -> Self {
        Self {
            page,
            page_size,
            ..Default::default()
        }
    }

    pub fn with_order(mut self, order: Order) -> Self {
        self.order = order;
        self
    }

    pub fn limit(&self) -> i64 {
        i64::from(self.page_size)
    }

    pub fn offset(&self) -> i64 {
        i64::from(self.page.saturating_sub(1)) * i64::from(self.page_size)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub current_page: u32,
    pub page_size: u32,
    pub first_page: u32,
    pub last_page: u64,
    pub total_records: u64,
}

impl Metadata {
    pub fn calculate(total_records: u64, page: u32, page_size: u32) -> Self {
        if total_records == 0 {
            return Metadata::default();
        }
        Self {
            current_page: page,
            page_size,
            first_page: 1,
            last_page: total_records.div_ceil(u64::from(page_size.max(1))),
            total_records,
        }
    }
}

/// One page of rows together with its metadata.
#[derive(Debug, Serialize)]
pub struct Batch<T> {
    pub rows: Vec<T>,
    pub metadata: Metadata,
}
