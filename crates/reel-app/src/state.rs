use std::sync::Arc;

use http::HeaderName;
use reel_dal::{
    movie::{MovieRepository, MovieStore},
    permission::{PermissionRepository, PermissionStore},
    Pool, DEFAULT_PAGE_SIZE,
};

pub const DEFAULT_USER_HEADER: &str = "x-authenticated-user";

#[derive(Clone)]
pub struct AppState {
    state: Arc<AppStateInner>,
}

impl AppState {
    pub fn new(app_config: AppConfig, pool: Pool) -> Self {
        Self::with_stores(
            app_config,
            Arc::new(MovieRepository::new(pool.clone())),
            Arc::new(PermissionRepository::new(pool)),
        )
    }

    /// Builds the state over arbitrary store implementations.
    pub fn with_stores(
        app_config: AppConfig,
        movies: Arc<dyn MovieStore>,
        permissions: Arc<dyn PermissionStore>,
    ) -> Self {
        AppState {
            state: Arc::new(AppStateInner {
                app_config,
                movies,
                permissions,
            }),
        }
    }

    pub fn get_app_config(&self) -> &AppConfig {
        &self.state.app_config
    }

    pub fn movies(&self) -> &dyn MovieStore {
        self.state.movies.as_ref()
    }

    pub fn permissions(&self) -> &dyn PermissionStore {
        self.state.permissions.as_ref()
    }
}

struct AppStateInner {
    app_config: AppConfig,
    movies: Arc<dyn MovieStore>,
    permissions: Arc<dyn PermissionStore>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Reported by the health check.
    pub environment: String,
    pub version: String,
    pub default_page_size: u32,
    /// Header carrying the id of the user authenticated upstream.
    pub user_header: HeaderName,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            environment: "development".into(),
            version: env!("CARGO_PKG_VERSION").into(),
            default_page_size: DEFAULT_PAGE_SIZE,
            user_header: HeaderName::from_static(DEFAULT_USER_HEADER),
        }
    }
}
