pub mod config;
pub mod error;
pub mod logging;
pub mod provider;
pub mod routes;
pub mod session;
pub mod test_util;

pub use config::Config;
pub use error::{Error, Result};
pub use provider::{Provider, ProviderError, SupabaseClient};
pub use session::{SessionResolver, SignUpError};

use std::sync::Arc;

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub provider: Arc<dyn Provider>,
    /// Current identity and profile; drives the route guards.
    pub session: Arc<SessionResolver>,
}

impl AppState {
    pub fn new(config: Config, provider: Arc<dyn Provider>) -> Self {
        let session = Arc::new(SessionResolver::new(
            provider.clone(),
            config.auth.rollback_orphaned_accounts,
        ));

        Self {
            config,
            provider,
            session,
        }
    }

    /// Current time in the configured local offset.
    pub fn now(&self) -> DateTime<FixedOffset> {
        Utc::now().with_timezone(&self.config.stats.offset())
    }

    pub fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }
}
