//! Lazily opened, shared database connection
//!
//! A [`DatabaseConnector`] is created once at startup from [`DatabaseSettings`]
//! and handed to whoever needs the database. The MySQL pool is opened on first
//! use and reused afterwards.

use serde::{Deserialize, Serialize};
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{error, info};

/// How long to wait for a connection before giving up
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors that can occur when connecting to the database
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Opening the connection failed
    #[error("Database connection to {host}/{name} failed: {source}")]
    Connect {
        host: String,
        name: String,
        #[source]
        source: sqlx::Error,
    },

    /// Settings cannot change once a connection exists
    #[error("Database settings cannot be changed after connecting")]
    AlreadyConnected,
}

/// Connection settings for the database
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// Database host name
    pub host: String,
    /// Port, if not the MySQL default
    #[serde(default)]
    pub port: Option<u16>,
    /// Database (schema) name
    pub name: String,
    /// Login user name
    pub username: String,
    /// Login password
    #[serde(default)]
    pub password: String,
}

// Keeps the password out of logs
impl fmt::Debug for DatabaseSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("name", &self.name)
            .field("username", &self.username)
            .field("password", &"********")
            .finish()
    }
}

impl DatabaseSettings {
    fn connect_options(&self) -> MySqlConnectOptions {
        let options = MySqlConnectOptions::new()
            .host(&self.host)
            .database(&self.name)
            .username(&self.username)
            .password(&self.password)
            .charset("utf8mb4");
        match self.port {
            Some(port) => options.port(port),
            None => options,
        }
    }
}

/// Owner of the shared database connection
///
/// Construct one per application and share it (e.g. in an `Arc`). The first call
/// to [`DatabaseConnector::instance`] connects; later calls return the same pool.
#[derive(Debug)]
pub struct DatabaseConnector {
    settings: DatabaseSettings,
    connect_timeout: Duration,
    pool: OnceCell<MySqlPool>,
}

impl DatabaseConnector {
    /// Creates a connector; nothing is opened until [`DatabaseConnector::instance`]
    pub fn new(settings: DatabaseSettings) -> Self {
        Self {
            settings,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            pool: OnceCell::new(),
        }
    }

    /// Sets how long the first connection attempt may take
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Settings used for the connection
    pub fn settings(&self) -> &DatabaseSettings {
        &self.settings
    }

    /// Replaces the settings; only allowed before the first connection
    pub fn set_settings(&mut self, settings: DatabaseSettings) -> Result<(), ConnectionError> {
        if self.is_connected() {
            return Err(ConnectionError::AlreadyConnected);
        }
        self.settings = settings;
        Ok(())
    }

    /// Whether the pool has been opened
    pub fn is_connected(&self) -> bool {
        self.pool.initialized()
    }

    /// Returns the connection pool, opening it on first use
    ///
    /// A failed attempt is not memoized; the next call tries again.
    pub async fn instance(&self) -> Result<&MySqlPool, ConnectionError> {
        self.pool
            .get_or_try_init(|| async {
                let pool = MySqlPoolOptions::new()
                    .acquire_timeout(self.connect_timeout)
                    .connect_with(self.settings.connect_options())
                    .await
                    .map_err(|e| {
                        error!(
                            "Database connection to {}/{} failed: {}",
                            self.settings.host, self.settings.name, e
                        );
                        ConnectionError::Connect {
                            host: self.settings.host.clone(),
                            name: self.settings.name.clone(),
                            source: e,
                        }
                    })?;
                info!(
                    "Connected to database {} on {}",
                    self.settings.name, self.settings.host
                );
                Ok::<_, ConnectionError>(pool)
            })
            .await
    }

    /// Closes the pool if it was opened
    pub async fn close(&self) {
        if let Some(pool) = self.pool.get() {
            pool.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> DatabaseSettings {
        DatabaseSettings {
            host: "localhost".to_string(),
            port: None,
            name: "jp".to_string(),
            username: "jp".to_string(),
            password: "jp".to_string(),
        }
    }

    #[test]
    fn test_new_connector_is_not_connected() {
        let connector = DatabaseConnector::new(settings());
        assert!(!connector.is_connected());
        assert_eq!(connector.settings(), &settings());
    }

    #[test]
    fn test_set_settings_before_connecting() {
        let mut connector = DatabaseConnector::new(DatabaseSettings::default());
        connector.set_settings(settings()).unwrap();
        assert_eq!(connector.settings().host, "localhost");
    }

    #[test]
    fn test_debug_hides_password() {
        let debug = format!("{:?}", settings());
        assert!(debug.contains("localhost"));
        assert!(!debug.contains("password: \"jp\""));
        assert!(debug.contains("********"));
    }

    #[test]
    fn test_settings_from_toml() {
        let settings: DatabaseSettings = toml::from_str(
            r#"
            host = "db.internal"
            name = "app"
            username = "reader"
            "#,
        )
        .unwrap();
        assert_eq!(settings.host, "db.internal");
        assert_eq!(settings.password, "");
        assert_eq!(settings.port, None);
    }

    #[tokio::test]
    async fn test_unreachable_database_returns_connection_error() {
        // Bind then drop to get a port nothing is listening on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let connector = DatabaseConnector::new(DatabaseSettings {
            host: "127.0.0.1".to_string(),
            port: Some(port),
            ..settings()
        })
        .with_connect_timeout(Duration::from_millis(500));
        let err = connector.instance().await.unwrap_err();

        assert!(matches!(err, ConnectionError::Connect { .. }));
        assert!(!connector.is_connected());
    }
}
