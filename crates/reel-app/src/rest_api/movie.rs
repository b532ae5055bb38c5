use crate::{
    auth::RequiredPermissionLayer, error::ApiResult, rest_api::paging::MovieQuery,
    state::AppState, validate::Garde,
};
use axum::{
    extract::{rejection::PathRejection, Path, Query, State},
    response::IntoResponse,
    routing::{get, post},
    Json,
};
use http::{header::LOCATION, StatusCode};
use reel_dal::{
    movie::{CreateMovie, Movie, UpdateMovie, VALID_ORDER_FIELDS},
    permission::{MOVIES_READ, MOVIES_WRITE},
    Metadata,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

pub const MOVIES_PATH: &str = "/api/movies";

#[derive(Debug, Serialize, Deserialize)]
pub struct MovieEnvelope {
    pub movie: Movie,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MovieList {
    pub movies: Vec<Movie>,
    pub metadata: Metadata,
}

pub async fn list(
    State(state): State<AppState>,
    Garde(Query(query)): Garde<Query<MovieQuery>>,
) -> ApiResult<impl IntoResponse> {
    let (filter, params) =
        query.into_listing(state.get_app_config().default_page_size, VALID_ORDER_FIELDS)?;
    let batch = state.movies().list(&filter, &params).await?;
    Ok(Json(MovieList {
        movies: batch.rows,
        metadata: batch.metadata,
    }))
}

pub async fn create(
    State(state): State<AppState>,
    Garde(Json(payload)): Garde<Json<CreateMovie>>,
) -> ApiResult<impl IntoResponse> {
    let mut movie = Movie::from(payload);
    state.movies().insert(&mut movie).await?;
    let location = format!("{MOVIES_PATH}/{}", movie.id);
    Ok((
        StatusCode::CREATED,
        [(LOCATION, location)],
        Json(MovieEnvelope { movie }),
    ))
}

pub async fn get_movie(
    path: Result<Path<i64>, PathRejection>,
    State(state): State<AppState>,
) -> ApiResult<impl IntoResponse> {
    let Path(id) = path?;
    let movie = state.movies().get(id).await?;
    Ok(Json(MovieEnvelope { movie }))
}

/// Full replacement guarded by the `version` the client last saw.
pub async fn update(
    path: Result<Path<i64>, PathRejection>,
    State(state): State<AppState>,
    Garde(Json(payload)): Garde<Json<UpdateMovie>>,
) -> ApiResult<impl IntoResponse> {
    let Path(id) = path?;
    let mut movie = state.movies().get(id).await?;
    movie.apply(payload);
    state.movies().update(&mut movie).await?;
    Ok(Json(MovieEnvelope { movie }))
}

pub async fn delete(
    path: Result<Path<i64>, PathRejection>,
    State(state): State<AppState>,
) -> ApiResult<impl IntoResponse> {
    let Path(id) = path?;
    state.movies().delete(id).await?;
    Ok(Json(json!({"message": "movie successfully deleted"})))
}

pub fn router() -> axum::Router<AppState> {
    let read = || RequiredPermissionLayer::new(MOVIES_READ);
    let write = || RequiredPermissionLayer::new(MOVIES_WRITE);
    axum::Router::new()
        .route("/", get(list).layer(read()))
        .route("/", post(create).layer(write()))
        .route("/{id}", get(get_movie).layer(read()))
        .route(
            "/{id}",
            axum::routing::put(update).delete(delete).layer(write()),
        )
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        sync::{Arc, Mutex},
    };

    use async_trait::async_trait;
    use axum::{
        body::{to_bytes, Body},
        Router,
    };
    use http::Request;
    use reel_dal::{
        movie::{MovieFilter, MovieStore, Runtime},
        permission::{PermissionStore, Permissions},
        Batch, ListingParams,
    };
    use serde_json::Value;
    use tower::ServiceExt as _;
    use tracing_test::traced_test;

    use crate::state::{AppConfig, DEFAULT_USER_HEADER};

    use super::*;

    #[derive(Default)]
    struct MemoryMovies {
        movies: Mutex<Vec<Movie>>,
    }

    #[async_trait]
    impl MovieStore for MemoryMovies {
        async fn get(&self, id: i64) -> reel_dal::error::Result<Movie> {
            let movies = self.movies.lock().unwrap();
            movies
                .iter()
                .find(|m| m.id == id)
                .cloned()
                .ok_or_else(|| reel_dal::Error::RecordNotFound(format!("Movie {id}")))
        }

        async fn insert(&self, movie: &mut Movie) -> reel_dal::error::Result<()> {
            let mut movies = self.movies.lock().unwrap();
            movie.id = movies.len() as i64 + 1;
            movie.version = 1;
            movies.push(movie.clone());
            Ok(())
        }

        async fn update(&self, movie: &mut Movie) -> reel_dal::error::Result<()> {
            let mut movies = self.movies.lock().unwrap();
            let stored = movies
                .iter_mut()
                .find(|m| m.id == movie.id && m.version == movie.version)
                .ok_or(reel_dal::Error::EditConflict {
                    id: movie.id,
                    version: movie.version,
                })?;
            movie.version += 1;
            *stored = movie.clone();
            Ok(())
        }

        async fn delete(&self, id: i64) -> reel_dal::error::Result<()> {
            let mut movies = self.movies.lock().unwrap();
            let before = movies.len();
            movies.retain(|m| m.id != id);
            if movies.len() == before {
                return Err(reel_dal::Error::RecordNotFound(format!("Movie {id}")));
            }
            Ok(())
        }

        async fn list(
            &self,
            _filter: &MovieFilter,
            params: &ListingParams,
        ) -> reel_dal::error::Result<Batch<Movie>> {
            let movies = self.movies.lock().unwrap();
            let rows = movies
                .iter()
                .skip(params.offset() as usize)
                .take(params.limit() as usize)
                .cloned()
                .collect();
            Ok(Batch {
                rows,
                metadata: Metadata::calculate(
                    movies.len() as u64,
                    params.page,
                    params.page_size,
                ),
            })
        }
    }

    #[derive(Default)]
    struct MemoryPermissions {
        grants: Mutex<HashMap<i64, Vec<String>>>,
    }

    #[async_trait]
    impl PermissionStore for MemoryPermissions {
        async fn get_all_for_user(&self, user_id: i64) -> reel_dal::error::Result<Permissions> {
            let grants = self.grants.lock().unwrap();
            Ok(grants
                .get(&user_id)
                .map(|codes| codes.iter().cloned().collect())
                .unwrap_or_default())
        }

        async fn add_for_user(&self, user_id: i64, codes: &[&str]) -> reel_dal::error::Result<()> {
            let mut grants = self.grants.lock().unwrap();
            grants
                .entry(user_id)
                .or_default()
                .extend(codes.iter().map(|c| c.to_string()));
            Ok(())
        }
    }

    const READER: i64 = 1;
    const WRITER: i64 = 2;
    const NOBODY: i64 = 3;

    async fn app() -> Router {
        let permissions = MemoryPermissions::default();
        permissions.add_for_user(READER, &[MOVIES_READ]).await.unwrap();
        permissions
            .add_for_user(WRITER, &[MOVIES_READ, MOVIES_WRITE])
            .await
            .unwrap();
        let state = AppState::with_stores(
            AppConfig::default(),
            Arc::new(MemoryMovies::default()),
            Arc::new(permissions),
        );
        crate::rest_api::router(state)
    }

    async fn call(
        app: &Router,
        method: &str,
        uri: &str,
        user: Option<i64>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            builder = builder.header(DEFAULT_USER_HEADER, user.to_string());
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    fn casablanca() -> Value {
        json!({
            "title": "Casablanca",
            "year": 1942,
            "runtime": "102 mins",
            "genres": ["drama", "romance"]
        })
    }

    #[tokio::test]
    #[traced_test]
    async fn test_crud_flow() {
        let app = app().await;

        let (status, body) = call(&app, "POST", "/api/movies", Some(WRITER), Some(casablanca())).await;
        assert_eq!(StatusCode::CREATED, status);
        assert_eq!(1, body["movie"]["id"]);
        assert_eq!(1, body["movie"]["version"]);
        assert_eq!("102 mins", body["movie"]["runtime"]);

        let (status, body) = call(&app, "GET", "/api/movies/1", Some(READER), None).await;
        assert_eq!(StatusCode::OK, status);
        assert_eq!("Casablanca", body["movie"]["title"]);

        let mut update = casablanca();
        update["title"] = json!("Casablanca (restored)");
        update["version"] = json!(1);
        let (status, body) = call(&app, "PUT", "/api/movies/1", Some(WRITER), Some(update.clone())).await;
        assert_eq!(StatusCode::OK, status);
        assert_eq!(2, body["movie"]["version"]);

        let (status, body) = call(&app, "PUT", "/api/movies/1", Some(WRITER), Some(update)).await;
        assert_eq!(StatusCode::CONFLICT, status);
        assert!(body["error"].is_string());

        let (status, body) = call(&app, "GET", "/api/movies", Some(READER), None).await;
        assert_eq!(StatusCode::OK, status);
        assert_eq!(1, body["movies"].as_array().unwrap().len());
        assert_eq!(1, body["metadata"]["last_page"]);
        assert_eq!(1, body["metadata"]["total_records"]);

        let (status, body) = call(&app, "DELETE", "/api/movies/1", Some(WRITER), None).await;
        assert_eq!(StatusCode::OK, status);
        assert_eq!("movie successfully deleted", body["message"]);

        let (status, _) = call(&app, "DELETE", "/api/movies/1", Some(WRITER), None).await;
        assert_eq!(StatusCode::NOT_FOUND, status);
    }

    #[tokio::test]
    async fn test_location_header() {
        let app = app().await;
        let request = Request::builder()
            .method("POST")
            .uri("/api/movies")
            .header(DEFAULT_USER_HEADER, WRITER.to_string())
            .header("content-type", "application/json")
            .body(Body::from(casablanca().to_string()))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(StatusCode::CREATED, response.status());
        assert_eq!(
            "/api/movies/1",
            response.headers()[LOCATION].to_str().unwrap()
        );
    }

    #[tokio::test]
    async fn test_permissions() {
        let app = app().await;

        let (status, _) = call(&app, "GET", "/api/movies", None, None).await;
        assert_eq!(StatusCode::UNAUTHORIZED, status);

        let (status, _) = call(&app, "GET", "/api/movies", Some(NOBODY), None).await;
        assert_eq!(StatusCode::FORBIDDEN, status);

        let (status, _) = call(&app, "POST", "/api/movies", Some(READER), Some(casablanca())).await;
        assert_eq!(StatusCode::FORBIDDEN, status);

        let (status, _) = call(&app, "GET", "/api/movies", Some(READER), None).await;
        assert_eq!(StatusCode::OK, status);
    }

    #[tokio::test]
    async fn test_invalid_movie() {
        let app = app().await;
        let body = json!({"title": "", "year": 1700, "runtime": "0 mins", "genres": []});
        let (status, body) = call(&app, "POST", "/api/movies", Some(WRITER), Some(body)).await;
        assert_eq!(StatusCode::UNPROCESSABLE_ENTITY, status);
        let errors = body["error"].as_object().unwrap();
        for field in ["title", "year", "runtime", "genres"] {
            assert!(errors.contains_key(field), "missing error for {field}");
        }

        let (status, _) = call(&app, "POST", "/api/movies", Some(WRITER), Some(json!({"runtime": 102}))).await;
        assert_eq!(StatusCode::BAD_REQUEST, status);
    }

    #[tokio::test]
    async fn test_invalid_listing() {
        let app = app().await;
        let (status, body) = call(
            &app,
            "GET",
            "/api/movies?page=0&page_size=500&sort=rating",
            Some(READER),
            None,
        )
        .await;
        assert_eq!(StatusCode::UNPROCESSABLE_ENTITY, status);
        let errors = body["error"].as_object().unwrap();
        assert_eq!(3, errors.len());
        assert_eq!("invalid sort value", errors["sort"]);

        let (status, body) = call(&app, "GET", "/api/movies?page=abc", Some(READER), None).await;
        assert_eq!(StatusCode::UNPROCESSABLE_ENTITY, status);
        assert_eq!("must be an integer value", body["error"]["page"]);

        let (status, body) =
            call(&app, "GET", "/api/movies?page=-1", Some(READER), None).await;
        assert_eq!(StatusCode::UNPROCESSABLE_ENTITY, status);
        assert_eq!("must be greater than zero", body["error"]["page"]);
    }

    #[tokio::test]
    async fn test_bad_id() {
        let app = app().await;
        let (status, _) = call(&app, "GET", "/api/movies/abc", Some(READER), None).await;
        assert_eq!(StatusCode::NOT_FOUND, status);
        let (status, _) = call(&app, "GET", "/api/movies/42", Some(READER), None).await;
        assert_eq!(StatusCode::NOT_FOUND, status);
    }

    #[tokio::test]
    async fn test_health() {
        let app = app().await;
        let (status, body) = call(&app, "GET", "/health", None, None).await;
        assert_eq!(StatusCode::OK, status);
        assert_eq!("available", body["status"]);
        assert_eq!("development", body["systemInfo"]["environment"]);
        assert_eq!(env!("CARGO_PKG_VERSION"), body["systemInfo"]["version"]);
    }

    #[test]
    fn test_runtime_in_envelope() {
        let movie = Movie {
            runtime: Runtime(97),
            ..Movie::from(CreateMovie::default())
        };
        let value = serde_json::to_value(MovieEnvelope { movie }).unwrap();
        assert_eq!("97 mins", value["movie"]["runtime"]);
    }
}
