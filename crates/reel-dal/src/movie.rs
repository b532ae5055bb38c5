use std::{fmt::Display, str::FromStr};

use async_trait::async_trait;
use garde::Validate;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sqlx::{FromRow, QueryBuilder, Row, types::Json};
use time::OffsetDateTime;
use tracing::debug;

use crate::{
    Batch, ChosenDB, ChosenRow, Error, ListingParams, Metadata, Pool, error::Result, timed,
};

pub const VALID_ORDER_FIELDS: &[&str] = &["id", "title", "year", "runtime"];

/// Year of the first known motion picture.
pub const MIN_YEAR: i32 = 1888;

/// Running time in minutes, `"<n> mins"` on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, sqlx::Type)]
#[sqlx(transparent)]
pub struct Runtime(pub i32);

impl Display for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} mins", self.0)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid runtime format, expected \"<minutes> mins\"")]
pub struct InvalidRuntimeFormat;

impl FromStr for Runtime {
    type Err = InvalidRuntimeFormat;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (value, unit) = s.split_once(' ').ok_or(InvalidRuntimeFormat)?;
        if unit != "mins" {
            return Err(InvalidRuntimeFormat);
        }
        value
            .parse::<i32>()
            .map(Runtime)
            .map_err(|_| InvalidRuntimeFormat)
    }
}

impl Serialize for Runtime {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Runtime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

fn unknown_creation() -> OffsetDateTime {
    OffsetDateTime::UNIX_EPOCH
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Movie {
    pub id: i64,
    #[serde(skip, default = "unknown_creation")]
    pub created_at: OffsetDateTime,
    pub title: String,
    pub year: i32,
    pub runtime: Runtime,
    #[sqlx(json)]
    pub genres: Vec<String>,
    pub version: i32,
}

fn valid_year(year: &i32, _ctx: &()) -> garde::Result {
    let current = OffsetDateTime::now_utc().year();
    if *year == 0 {
        Err(garde::Error::new("must be provided"))
    } else if !(MIN_YEAR..=current).contains(year) {
        Err(garde::Error::new(format!(
            "must be between {MIN_YEAR} and {current}"
        )))
    } else {
        Ok(())
    }
}

fn positive_runtime(runtime: &Runtime, _ctx: &()) -> garde::Result {
    if runtime.0 > 0 {
        Ok(())
    } else {
        Err(garde::Error::new("must be a positive integer"))
    }
}

#[allow(clippy::ptr_arg)]
fn unique_genres(genres: &Vec<String>, _ctx: &()) -> garde::Result {
    for (i, genre) in genres.iter().enumerate() {
        if genres[..i].contains(genre) {
            return Err(garde::Error::new("must not contain duplicate values"));
        }
    }
    Ok(())
}

/// Missing fields deserialize to empty values and are reported by validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct CreateMovie {
    #[garde(length(bytes, min = 1, max = 500))]
    pub title: String,
    #[garde(custom(valid_year))]
    pub year: i32,
    #[garde(custom(positive_runtime))]
    pub runtime: Runtime,
    #[garde(length(min = 1, max = 5), inner(length(min = 1, max = 255)), custom(unique_genres))]
    pub genres: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct UpdateMovie {
    #[garde(length(bytes, min = 1, max = 500))]
    pub title: String,
    #[garde(custom(valid_year))]
    pub year: i32,
    #[garde(custom(positive_runtime))]
    pub runtime: Runtime,
    #[garde(length(min = 1, max = 5), inner(length(min = 1, max = 255)), custom(unique_genres))]
    pub genres: Vec<String>,
    #[garde(range(min = 1))]
    pub version: i32,
}

impl From<CreateMovie> for Movie {
    fn from(value: CreateMovie) -> Self {
        Movie {
            id: 0,
            created_at: unknown_creation(),
            title: value.title,
            year: value.year,
            runtime: value.runtime,
            genres: value.genres,
            version: 0,
        }
    }
}

impl Movie {
    /// Replaces mutable fields; `version` becomes the version the caller expects to overwrite.
    pub fn apply(&mut self, update: UpdateMovie) {
        self.title = update.title;
        self.year = update.year;
        self.runtime = update.runtime;
        self.genres = update.genres;
        self.version = update.version;
    }
}

/// Title and genre predicates for listing.
#[derive(Debug, Clone, Default)]
pub struct MovieFilter {
    pub title: String,
    pub genres: Vec<String>,
}

impl MovieFilter {
    pub fn new(title: impl Into<String>, genres: Vec<String>) -> Self {
        Self {
            title: title.into(),
            genres,
        }
    }
}

#[derive(Debug, PartialEq)]
enum TitleMatch {
    Any,
    Terms(String),
    Nothing,
}

/// Tokenizes a search term the way the `unicode61` index tokenizer does.
///
/// Every token must be present in the title. A term without any word
/// characters cannot match anything.
fn title_match(term: &str) -> TitleMatch {
    if term.trim().is_empty() {
        return TitleMatch::Any;
    }
    let tokens = term
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{}\"", t.to_lowercase()))
        .collect::<Vec<_>>();
    if tokens.is_empty() {
        TitleMatch::Nothing
    } else {
        TitleMatch::Terms(tokens.join(" "))
    }
}

fn push_clause(builder: &mut QueryBuilder<'_, ChosenDB>, has_where: &mut bool) {
    builder.push(if *has_where { " AND " } else { " WHERE " });
    *has_where = true;
}

fn push_filters(builder: &mut QueryBuilder<'_, ChosenDB>, title: &TitleMatch, genres: &[String]) {
    let mut has_where = false;

    match title {
        TitleMatch::Any => {}
        TitleMatch::Terms(query) => {
            push_clause(builder, &mut has_where);
            builder
                .push("m.id IN (SELECT rowid FROM movies_fts WHERE movies_fts MATCH ")
                .push_bind(query.clone())
                .push(")");
        }
        TitleMatch::Nothing => {
            push_clause(builder, &mut has_where);
            builder.push("0 = 1");
        }
    }

    // overlap: at least one genre in common
    if !genres.is_empty() {
        push_clause(builder, &mut has_where);
        builder
            .push("EXISTS (SELECT 1 FROM json_each(m.genres) AS g WHERE g.value IN (SELECT value FROM json_each(")
            .push_bind(Json(genres.to_vec()))
            .push(")))");
    }
}

const PAGE_COLUMNS: &str = "page.id AS id, page.created_at AS created_at, page.title AS title, \
     page.year AS year, page.runtime AS runtime, page.genres AS genres, page.version AS version";

/// One result row of a listing: the match count plus a movie, absent when the page is empty.
struct PageRow {
    total_records: i64,
    movie: Option<Movie>,
}

impl<'r> FromRow<'r, ChosenRow> for PageRow {
    fn from_row(row: &'r ChosenRow) -> std::result::Result<Self, sqlx::Error> {
        let total_records = row.try_get("total_records")?;
        let movie = match row.try_get::<Option<i64>, _>("id")? {
            Some(_) => Some(Movie::from_row(row)?),
            None => None,
        };
        Ok(Self {
            total_records,
            movie,
        })
    }
}

/// Storage operations for movies.
#[async_trait]
pub trait MovieStore: Send + Sync {
    async fn get(&self, id: i64) -> Result<Movie>;
    /// Stores a new movie, filling in `id`, `created_at` and `version`.
    async fn insert(&self, movie: &mut Movie) -> Result<()>;
    /// Writes the movie if its `version` is still the stored one, then bumps `version`.
    async fn update(&self, movie: &mut Movie) -> Result<()>;
    async fn delete(&self, id: i64) -> Result<()>;
    async fn list(&self, filter: &MovieFilter, params: &ListingParams) -> Result<Batch<Movie>>;
}

pub type MovieRepository = MovieRepositoryImpl<Pool>;

pub struct MovieRepositoryImpl<E> {
    executor: E,
}

impl<'c, E> MovieRepositoryImpl<E>
where
    for<'a> &'a E: sqlx::Executor<'c, Database = ChosenDB>,
{
    pub fn new(executor: E) -> Self {
        Self { executor }
    }

    pub async fn get(&self, id: i64) -> Result<Movie> {
        if id < 1 {
            return Err(Error::RecordNotFound(format!("Movie {id}")));
        }
        timed(async {
            let record = sqlx::query_as::<_, Movie>(
                "SELECT id, created_at, title, year, runtime, genres, version FROM movies WHERE id = ?",
            )
            .bind(id)
            .fetch_optional(&self.executor)
            .await?;
            record.ok_or_else(|| Error::RecordNotFound(format!("Movie {id}")))
        })
        .await
    }

    pub async fn insert(&self, movie: &mut Movie) -> Result<()> {
        let (id, created_at, version) = timed(async {
            let row: (i64, OffsetDateTime, i32) = sqlx::query_as(
                "INSERT INTO movies (title, year, runtime, genres) VALUES (?, ?, ?, ?) RETURNING id, created_at, version",
            )
            .bind(&movie.title)
            .bind(movie.year)
            .bind(movie.runtime)
            .bind(Json(&movie.genres))
            .fetch_one(&self.executor)
            .await?;
            Ok(row)
        })
        .await?;

        movie.id = id;
        movie.created_at = created_at;
        movie.version = version;
        Ok(())
    }

    pub async fn update(&self, movie: &mut Movie) -> Result<()> {
        let (id, expected_version) = (movie.id, movie.version);
        let updated = timed(async {
            let row: Option<(i32, OffsetDateTime)> = sqlx::query_as(
                "UPDATE movies SET title = ?, year = ?, runtime = ?, genres = ?, version = version + 1 \
                 WHERE id = ? AND version = ? RETURNING version, created_at",
            )
            .bind(&movie.title)
            .bind(movie.year)
            .bind(movie.runtime)
            .bind(Json(&movie.genres))
            .bind(id)
            .bind(expected_version)
            .fetch_optional(&self.executor)
            .await?;
            Ok(row)
        })
        .await?;

        match updated {
            Some((version, created_at)) => {
                movie.version = version;
                movie.created_at = created_at;
                Ok(())
            }
            None => {
                debug!("Movie {id} not updated, version {expected_version} is not current");
                Err(Error::EditConflict {
                    id,
                    version: expected_version,
                })
            }
        }
    }

    pub async fn delete(&self, id: i64) -> Result<()> {
        if id < 1 {
            return Err(Error::RecordNotFound(format!("Movie {id}")));
        }
        let res = timed(async {
            let res = sqlx::query("DELETE FROM movies WHERE id = ?")
                .bind(id)
                .execute(&self.executor)
                .await?;
            Ok(res)
        })
        .await?;

        if res.rows_affected() == 0 {
            Err(Error::RecordNotFound(format!("Movie {id}")))
        } else {
            Ok(())
        }
    }

    /// Lists one page of movies matching `filter`, with the total match count.
    ///
    /// Page and count come from a single statement, so they always agree.
    pub async fn list(&self, filter: &MovieFilter, params: &ListingParams) -> Result<Batch<Movie>> {
        let title = title_match(&filter.title);
        let column = params.order.column();
        let direction = params.order.direction().as_sql();
        timed(async {
            let mut builder = QueryBuilder::<ChosenDB>::new("WITH matched AS (SELECT m.* FROM movies m");
            push_filters(&mut builder, &title, &filter.genres);
            builder
                .push("), total AS (SELECT count(*) AS total_records FROM matched), ")
                .push("page AS (SELECT * FROM matched ORDER BY ")
                .push(column)
                .push(" ")
                .push(direction)
                .push(", id ASC LIMIT ")
                .push_bind(params.limit())
                .push(" OFFSET ")
                .push_bind(params.offset())
                .push(") SELECT total.total_records AS total_records, ")
                .push(PAGE_COLUMNS)
                // an empty page still yields one row carrying the count
                .push(" FROM total LEFT JOIN page ON 1 ORDER BY page.")
                .push(column)
                .push(" ")
                .push(direction)
                .push(", page.id ASC");

            let rows: Vec<PageRow> = builder.build_query_as().fetch_all(&self.executor).await?;

            let total_records = rows
                .first()
                .map(|row| u64::try_from(row.total_records).unwrap_or_default())
                .unwrap_or_default();

            Ok(Batch {
                rows: rows.into_iter().filter_map(|r| r.movie).collect(),
                metadata: Metadata::calculate(total_records, params.page, params.page_size),
            })
        })
        .await
    }
}

#[async_trait]
impl MovieStore for MovieRepository {
    async fn get(&self, id: i64) -> Result<Movie> {
        MovieRepositoryImpl::get(self, id).await
    }

    async fn insert(&self, movie: &mut Movie) -> Result<()> {
        MovieRepositoryImpl::insert(self, movie).await
    }

    async fn update(&self, movie: &mut Movie) -> Result<()> {
        MovieRepositoryImpl::update(self, movie).await
    }

    async fn delete(&self, id: i64) -> Result<()> {
        MovieRepositoryImpl::delete(self, id).await
    }

    async fn list(&self, filter: &MovieFilter, params: &ListingParams) -> Result<Batch<Movie>> {
        MovieRepositoryImpl::list(self, filter, params).await
    }
}
