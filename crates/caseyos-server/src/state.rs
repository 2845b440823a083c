//! Shared application state for the CaseyOS gateway.

use caseyos_core::config::Config;
use caseyos_core::connector::ConnectorRegistry;
use caseyos_core::storage::DbPool;

/// Shared application state accessible by all route handlers.
pub struct AppState {
    /// SQLite connection pool.
    pub db: DbPool,
    /// Application configuration, fixed at startup.
    pub config: Config,
    /// Connector capabilities, injected once at startup.
    pub registry: ConnectorRegistry,
}
