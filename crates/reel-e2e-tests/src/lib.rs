use std::time::Duration;

use anyhow::{Result, anyhow};
use rand::Rng as _;
use reel_dal::permission::{MOVIES_READ, MOVIES_WRITE, PermissionRepository};
use reel_server::config::{Parser, ServerConfig};
use reqwest::header::{HeaderMap, HeaderValue};
use tempfile::TempDir;
use tracing::debug;
use url::Url;

fn random_port() -> Result<u16> {
    let mut rng = rand::rng();

    let mut retries = 3;
    while retries > 0 {
        let port: u16 = rng.random_range(4030..5030);
        let addr: std::net::SocketAddr = format!("127.0.0.1:{}", port).parse()?;
        match std::net::TcpStream::connect_timeout(&addr, Duration::from_millis(100)) {
            Err(e) if e.kind() == std::io::ErrorKind::ConnectionRefused => return Ok(port),
            Err(_) => retries -= 1,
            Ok(_) => retries -= 1,
        }
    }

    Err(anyhow!("Could not find a free port"))
}

pub struct ConfigGuard {
    #[allow(dead_code)]
    data_dir: TempDir,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestUser {
    Anonymous,
    /// Known user without any permission.
    Stranger,
    Reader,
    Editor,
}

impl TestUser {
    pub fn id(&self) -> Option<i64> {
        match self {
            TestUser::Anonymous => None,
            TestUser::Stranger => Some(1),
            TestUser::Reader => Some(2),
            TestUser::Editor => Some(3),
        }
    }
}

pub async fn prepare_env(test_name: &str) -> Result<(ServerConfig, ConfigGuard)> {
    let tmp_data_dir = TempDir::with_prefix(format!("{}_", test_name))?;
    let data_dir = tmp_data_dir.path().to_string_lossy().to_string();
    let port = random_port()?.to_string();
    let args = &[
        "reel-e2e-tests",
        "--data-dir",
        &data_dir,
        "--port",
        &port,
        "--env",
        "staging",
    ];
    let config = ServerConfig::try_parse_from(args)?;
    seed_users(&config).await?;
    Ok((
        config,
        ConfigGuard {
            data_dir: tmp_data_dir,
        },
    ))
}

async fn seed_users(config: &ServerConfig) -> Result<()> {
    let pool = reel_dal::new_pool(&config.database_url()).await?;
    sqlx::query(
        "INSERT INTO users (id, name, email) VALUES \
         (1, 'Stranger', 'stranger@example.com'), \
         (2, 'Reader', 'reader@example.com'), \
         (3, 'Editor', 'editor@example.com')",
    )
    .execute(&pool)
    .await?;
    let permissions = PermissionRepository::new(pool.clone());
    permissions.add_for_user(2, &[MOVIES_READ]).await?;
    permissions
        .add_for_user(3, &[MOVIES_READ, MOVIES_WRITE])
        .await?;
    pool.close().await;
    Ok(())
}

pub fn base_url(config: &ServerConfig) -> Result<Url> {
    let url = Url::parse(&format!("http://{}:{}/", config.listen_address, config.port))?;
    Ok(url)
}

pub fn client_for(config: &ServerConfig, user: TestUser) -> Result<reqwest::Client> {
    let mut headers = HeaderMap::new();
    if let Some(id) = user.id() {
        headers.insert(config.user_header.clone(), HeaderValue::from(id));
    }
    let client = reqwest::Client::builder()
        .default_headers(headers)
        .build()?;
    Ok(client)
}

/// Starts the server in background and waits until it answers health checks.
pub async fn launch_env(args: ServerConfig, user: TestUser) -> Result<(reqwest::Client, Url)> {
    let base_url = base_url(&args)?;
    let client = client_for(&args, user)?;
    tokio::spawn(async move {
        if let Err(e) = reel_server::run(args).await {
            tracing::error!("Server failed: {e}");
        }
    });

    let health_url = base_url.join("health")?;
    for _ in 0..50 {
        match client.get(health_url.clone()).send().await {
            Ok(response) if response.status().is_success() => return Ok((client, base_url)),
            Ok(response) => debug!("Server not ready: {}", response.status()),
            Err(e) => debug!("Server not ready: {e}"),
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    Err(anyhow!("Server did not start"))
}

pub fn extend_url(url: &Url, segment: impl ToString) -> Url {
    let mut url = url.clone();
    if let Ok(mut segments) = url.path_segments_mut() {
        segments.pop_if_empty().push(&segment.to_string());
    }
    url
}
