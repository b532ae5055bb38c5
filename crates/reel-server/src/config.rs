use std::path::PathBuf;

use crate::error::Result;
pub use clap::Parser;
use reel_app::state::{AppConfig, DEFAULT_USER_HEADER};

#[derive(Debug, Clone, clap::Parser)]
pub struct ServerConfig {
    #[arg(
        short,
        long,
        default_value_t = 4000,
        env = "REEL_LISTEN_PORT",
        help = "Port to listen on"
    )]
    pub port: u16,
    #[arg(
        short,
        long,
        default_value = "127.0.0.1",
        env = "REEL_LISTEN_ADDRESS",
        help = "Address to listen on"
    )]
    pub listen_address: String,

    #[arg(
        long,
        env = "REEL_DATABASE_URL",
        help = "Database URL e.g. sqlite://file.db, default is sqlite://[data-dir]/reel.db, where data-dir is set by --data-dir"
    )]
    database_url: Option<String>,

    #[arg(
        long,
        env = "REEL_DATA_DIR",
        help = "Data directory for the database, default is system default like ~/.local/share/reel"
    )]
    data_dir: Option<PathBuf>,

    #[arg(
        long = "env",
        env = "REEL_ENV",
        default_value = "development",
        value_parser = ["development", "staging", "production"],
        help = "Environment name, reported by health check"
    )]
    pub environment: String,

    #[arg(
        long,
        env = "REEL_DB_MAX_CONNECTIONS",
        default_value_t = reel_dal::DEFAULT_MAX_CONNECTIONS,
        help = "Maximum number of open database connections"
    )]
    pub db_max_connections: u32,

    #[arg(
        long,
        env = "REEL_DEFAULT_PAGE_SIZE",
        default_value_t = reel_dal::DEFAULT_PAGE_SIZE,
        value_parser = clap::value_parser!(u32).range(1..=reel_dal::MAX_PAGE_SIZE as i64),
        help = "Default page size"
    )]
    pub default_page_size: u32,

    #[arg(
        long,
        env = "REEL_USER_HEADER",
        default_value = DEFAULT_USER_HEADER,
        help = "Header with id of user authenticated by upstream proxy"
    )]
    pub user_header: http::HeaderName,

    #[arg(long, env = "REEL_CORS", help = "Enable permissive CORS")]
    pub cors: bool,
}

impl ServerConfig {
    pub fn load() -> Result<Self> {
        ServerConfig::try_parse().map_err(|e| e.into())
    }

    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .map(|p| p.join("reel"))
                .unwrap_or_else(|| PathBuf::from("reel"))
        })
    }

    pub fn database_url(&self) -> String {
        self.database_url
            .clone()
            .unwrap_or_else(|| format!("sqlite://{}/reel.db", self.data_dir().display()))
    }
}

impl From<&ServerConfig> for AppConfig {
    fn from(config: &ServerConfig) -> Self {
        AppConfig {
            environment: config.environment.clone(),
            default_page_size: config.default_page_size,
            user_header: config.user_header.clone(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::try_parse_from(["reel-server", "--data-dir", "/tmp/reel"]).unwrap();
        assert_eq!(4000, config.port);
        assert_eq!("127.0.0.1", config.listen_address);
        assert_eq!("development", config.environment);
        assert_eq!(25, config.db_max_connections);
        assert_eq!("sqlite:///tmp/reel/reel.db", config.database_url());
        let app_config = AppConfig::from(&config);
        assert_eq!(20, app_config.default_page_size);
        assert_eq!(DEFAULT_USER_HEADER, app_config.user_header.as_str());
    }

    #[test]
    fn test_invalid_values() {
        assert!(ServerConfig::try_parse_from(["reel-server", "--env", "qa"]).is_err());
        assert!(ServerConfig::try_parse_from(["reel-server", "--default-page-size", "0"]).is_err());
        assert!(ServerConfig::try_parse_from(["reel-server", "--user-header", "bad header"]).is_err());
    }
}
