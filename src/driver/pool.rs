//! Connection Pool Manager
//!
//! Wraps a sqlx `PgPool` with the reset semantics the driver needs: a reset drops
//! every idle connection immediately and retires checked-out ones when they come
//! back, without closing the pool. An optional ticker resets on a fixed interval.

use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use sqlx::Connection;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::Driver;
use crate::error::{DbError, DbResult};
use crate::types::ConnPoolStat;

#[derive(Clone)]
pub struct PoolConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub database: String,
    pub password: Option<String>,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    /// Periodic reset; disabled when `None`.
    pub reset_interval: Option<Duration>,
}

impl PoolConfig {
    /// Create a new pool configuration with sensible defaults.
    pub fn new(host: &str, port: u16, user: &str, database: &str) -> Self {
        Self {
            host: host.to_string(),
            port,
            user: user.to_string(),
            database: database.to_string(),
            password: None,
            max_connections: 10,
            acquire_timeout: Duration::from_secs(30),
            reset_interval: None,
        }
    }

    /// Set password for authentication.
    pub fn password(mut self, password: &str) -> Self {
        self.password = Some(password.to_string());
        self
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Set acquire timeout (max wait time when getting a connection).
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Reset the pool every `interval`.
    pub fn reset_interval(mut self, interval: Duration) -> Self {
        self.reset_interval = Some(interval);
        self
    }

    pub(crate) fn connect_options(&self) -> PgConnectOptions {
        let options = PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .database(&self.database);
        match &self.password {
            Some(password) => options.password(password),
            None => options,
        }
    }

    fn validate(&self) -> DbResult<()> {
        if self.max_connections == 0 {
            return Err(DbError::Config("max_connections must be at least 1".into()));
        }
        if self.reset_interval.is_some_and(|d| d.is_zero()) {
            return Err(DbError::Config("reset interval must be positive".into()));
        }
        Ok(())
    }
}

/// Connect with positional arguments.
pub async fn connect(
    host: &str,
    port: u16,
    user: &str,
    password: &str,
    database: &str,
    max_connections: u32,
    acquire_timeout_secs: u64,
) -> DbResult<Driver> {
    let config = PoolConfig::new(host, port, user, database)
        .password(password)
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(acquire_timeout_secs));
    Driver::connect(config).await
}

/// Instant of the last reset. Connections opened before it are stale.
pub(crate) struct ResetMarker(RwLock<Instant>);

impl ResetMarker {
    fn new() -> Self {
        Self(RwLock::new(Instant::now()))
    }

    fn mark(&self) {
        if let Ok(mut at) = self.0.write() {
            *at = Instant::now();
        }
    }

    /// A connection of this age was opened after the last reset.
    fn is_current(&self, age: Duration) -> bool {
        match self.0.read() {
            Ok(at) => age <= at.elapsed(),
            Err(_) => true,
        }
    }
}

/// Background reset task; stopped by `close()`.
pub(crate) struct Ticker {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

fn spawn_ticker(pool: PgPool, marker: Arc<ResetMarker>, every: Duration) -> Ticker {
    let (shutdown, mut stop) = watch::channel(false);
    let handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        // First tick completes immediately.
        interval.tick().await;
        loop {
            tokio::select! {
                _ = interval.tick() => reset_idle(&pool, &marker).await,
                _ = stop.changed() => break,
            }
        }
        tracing::debug!("Pool reset ticker stopped");
    });
    Ticker { shutdown, handle }
}

/// Mark a reset and close every idle connection.
async fn reset_idle(pool: &PgPool, marker: &ResetMarker) {
    marker.mark();
    let mut closed = 0usize;
    for _ in 0..pool.num_idle() {
        let Some(conn) = pool.try_acquire() else {
            break;
        };
        if let Err(e) = conn.detach().close().await {
            tracing::warn!("Closing idle connection during reset failed: {}", e);
        }
        closed += 1;
    }
    tracing::info!("Pool reset: closed {} idle connections", closed);
}

pub(super) async fn open(config: PoolConfig) -> DbResult<Driver> {
    config.validate()?;

    let marker = Arc::new(ResetMarker::new());
    let acquire_marker = Arc::clone(&marker);
    let release_marker = Arc::clone(&marker);

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout)
        .before_acquire(move |_conn, meta| {
            let keep = acquire_marker.is_current(meta.age);
            Box::pin(async move { Ok::<_, sqlx::Error>(keep) })
        })
        .after_release(move |_conn, meta| {
            let keep = release_marker.is_current(meta.age);
            Box::pin(async move { Ok::<_, sqlx::Error>(keep) })
        })
        .connect_with(config.connect_options())
        .await
        .map_err(DbError::Connection)?;

    tracing::info!(
        "Connected to {}:{}/{} (max {} connections)",
        config.host,
        config.port,
        config.database,
        config.max_connections
    );

    let ticker = config.reset_interval.map(|every| {
        tracing::info!("Pool reset every {:?}", every);
        spawn_ticker(pool.clone(), Arc::clone(&marker), every)
    });

    Ok(Driver::from_parts(pool, config, marker, ticker))
}

impl Driver {
    /// Drop all idle connections; in-flight ones are closed when returned.
    pub async fn reset(&self) {
        reset_idle(&self.inner.pool, &self.inner.reset).await;
    }

    /// Snapshot of pool occupancy.
    pub fn stat(&self) -> ConnPoolStat {
        let pool = &self.inner.pool;
        ConnPoolStat {
            max_connections: pool.options().get_max_connections(),
            current_connections: pool.size(),
            available_connections: u32::try_from(pool.num_idle()).unwrap_or(u32::MAX),
        }
    }

    /// Stop the reset ticker and close the pool. Later operations fail with
    /// a connection error.
    pub async fn close(&self) {
        let ticker = self.inner.ticker.lock().ok().and_then(|mut t| t.take());
        if let Some(ticker) = ticker {
            let _ = ticker.shutdown.send(true);
            if let Err(e) = ticker.handle.await {
                tracing::warn!("Pool reset ticker ended abnormally: {}", e);
            }
        }
        self.inner.pool.close().await;
        tracing::info!("Pool closed");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.pool.is_closed()
    }
}
