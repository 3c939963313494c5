//! HTTP client for the TDengine REST endpoint.
//!
//! Uses async reqwest internally, but presents the sync [`Store`] interface
//! the pipeline's worker threads call into.

use std::sync::LazyLock;
use std::time::Duration;

use taospipe_core::{Row, Store, StoreError};

use crate::response::SqlResponse;

/// Connect timeout
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared tokio runtime driving every REST request.
pub static SHARED_RUNTIME: LazyLock<tokio::runtime::Runtime> = LazyLock::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .thread_name("taospipe-http")
        .enable_all()
        .build()
        .expect("failed to build tokio runtime")
});

/// Connection settings for a taosAdapter REST endpoint.
#[derive(Debug, Clone)]
pub struct RestConfig {
    /// Base URL, e.g. `http://localhost:6041`
    pub url: String,
    pub user: String,
    pub password: String,
    /// Default database appended to the path (`/rest/sql/{db}`)
    pub database: Option<String>,
    /// Whole-request timeout
    pub timeout: Duration,
    /// Idle connections kept per host; size this to the worker count
    pub pool_size: usize,
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:6041".to_string(),
            user: "root".to_string(),
            password: "taosdata".to_string(),
            database: None,
            timeout: Duration::from_secs(60),
            pool_size: 10,
        }
    }
}

impl RestConfig {
    /// Full `/rest/sql` endpoint for this config
    pub fn endpoint(&self) -> String {
        let base = self.url.trim_end_matches('/');
        match &self.database {
            Some(db) => format!("{base}/rest/sql/{db}"),
            None => format!("{base}/rest/sql"),
        }
    }
}

/// [`Store`] over `POST /rest/sql` with HTTP basic auth.
pub struct RestStore {
    client: reqwest::Client,
    endpoint: String,
    config: RestConfig,
}

impl std::fmt::Debug for RestStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestStore")
            .field("endpoint", &self.endpoint)
            .field("user", &self.config.user)
            .finish_non_exhaustive()
    }
}

impl RestStore {
    pub fn new(config: RestConfig) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(config.timeout)
            .pool_max_idle_per_host(config.pool_size)
            .build()
            .map_err(|e| from_reqwest(&e))?;
        let endpoint = config.endpoint();
        log::debug!("REST store at {endpoint}");
        Ok(Self {
            client,
            endpoint,
            config,
        })
    }

    pub fn config(&self) -> &RestConfig {
        &self.config
    }

    /// Send one statement and decode the body.
    ///
    /// taosAdapter reports SQL errors as JSON with a non-zero `code`, often
    /// alongside a 4xx/5xx status, so the body is decoded before the status
    /// is judged.
    fn post(&self, sql: &str) -> Result<SqlResponse, StoreError> {
        let request = self
            .client
            .post(&self.endpoint)
            .basic_auth(&self.config.user, Some(&self.config.password))
            .body(sql.to_string());

        let (status, body) = SHARED_RUNTIME.handle().block_on(async {
            let response = request.send().await.map_err(|e| from_reqwest(&e))?;
            let status = response.status();
            let body = response.text().await.map_err(|e| from_reqwest(&e))?;
            Ok::<_, StoreError>((status, body))
        })?;

        match SqlResponse::parse(&body) {
            Ok(resp) => resp.into_result(),
            Err(_) if !status.is_success() => Err(StoreError::Http {
                status: Some(status.as_u16()),
                message: body.chars().take(200).collect(),
            }),
            Err(e) => Err(e),
        }
    }
}

impl Store for RestStore {
    fn execute(&self, sql: &str) -> Result<u64, StoreError> {
        self.post(sql).map(|resp| resp.affected_rows())
    }

    fn query(&self, sql: &str) -> Result<Vec<Row>, StoreError> {
        self.post(sql).map(SqlResponse::into_rows)
    }
}

fn from_reqwest(e: &reqwest::Error) -> StoreError {
    StoreError::Http {
        status: e.status().map(|s| s.as_u16()),
        message: e.to_string(),
    }
}
