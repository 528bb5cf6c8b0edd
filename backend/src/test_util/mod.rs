pub mod memory_provider;
pub mod mock_supabase;

pub use memory_provider::{MemoryProvider, Operation};

use std::sync::Arc;

use crate::config::{
    AuthConfig, Config, CorsConfig, LoggingConfig, ProviderConfig, ServerConfig, StatsConfig,
};
use crate::AppState;

pub fn test_config() -> Config {
    Config {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 8080,
        },
        provider: ProviderConfig {
            url: "http://localhost:54321".to_string(),
            anon_key: "test-anon-key".to_string(),
            service_role_key: Some("test-service-key".to_string()),
            session_file: None,
        },
        auth: AuthConfig::default(),
        stats: StatsConfig::default(),
        logging: LoggingConfig {
            level: "debug".to_string(),
        },
        cors: CorsConfig {
            origins: "*".to_string(),
        },
    }
}

/// Provider config pointing at a mock server.
pub fn provider_config(url: &str) -> ProviderConfig {
    ProviderConfig {
        url: url.to_string(),
        ..test_config().provider
    }
}

/// State backed by `provider` with the session already resolved.
///
/// The session listener is not started, so session changes reach the
/// resolver only through its own operations.
pub async fn create_test_state(provider: Arc<MemoryProvider>) -> Arc<AppState> {
    let state = Arc::new(AppState::new(test_config(), provider));
    state.session.initialize().await;
    state
}
