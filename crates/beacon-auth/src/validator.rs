//! Token validator with a periodically refreshed key set.

use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::claims::Claims;
use crate::error::{AuthError, KeyRefreshError};
use crate::source::{HttpKeySource, KeySource};
use crate::store::KeyStore;
use crate::verify::{self, Expectations};

/// Default interval between key refreshes.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Validator configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatorConfig {
    /// Expected `iss`; the key set is fetched below it.
    pub issuer: String,
    /// Expected `aud`, if any.
    pub audience: Option<String>,
    pub refresh_interval: Duration,
}

impl ValidatorConfig {
    /// Configuration for `issuer` with default settings.
    #[must_use]
    pub fn new(issuer: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
            audience: None,
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
        }
    }
}

/// Verifies bearer tokens without contacting the issuer per request.
pub struct TokenValidator {
    config: ValidatorConfig,
    source: Arc<dyn KeySource>,
    store: KeyStore,
}

impl TokenValidator {
    /// Validator fetching keys from the issuer's well-known endpoint.
    ///
    /// Holds no keys until [`refresh`](Self::refresh) succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: ValidatorConfig) -> Result<Self, KeyRefreshError> {
        let source = Arc::new(HttpKeySource::new(&config.issuer)?);
        Ok(Self::with_source(config, source))
    }

    /// Validator fetching keys from `source`.
    #[must_use]
    pub fn with_source(config: ValidatorConfig, source: Arc<dyn KeySource>) -> Self {
        Self {
            config,
            source,
            store: KeyStore::new(),
        }
    }

    /// Fetch the key set from the issuer and start the refresh task.
    ///
    /// # Errors
    ///
    /// Fails if the first fetch fails. Later failures only log.
    pub async fn initialize(config: ValidatorConfig) -> Result<Arc<Self>, KeyRefreshError> {
        let source = Arc::new(HttpKeySource::new(&config.issuer)?);
        Self::initialize_with_source(config, source).await
    }

    /// [`initialize`](Self::initialize) with an explicit key source.
    ///
    /// # Errors
    ///
    /// Fails if the first fetch fails.
    pub async fn initialize_with_source(
        config: ValidatorConfig,
        source: Arc<dyn KeySource>,
    ) -> Result<Arc<Self>, KeyRefreshError> {
        let validator = Arc::new(Self::with_source(config, source));

        let count = validator.refresh().await.map_err(|e| {
            error!(source = %validator.source.location(), error = %e, "Initial key fetch failed");
            e
        })?;
        info!(
            source = %validator.source.location(),
            keys = count,
            refresh_secs = validator.config.refresh_interval.as_secs(),
            "Token validator initialized"
        );

        validator.spawn_refresh();
        Ok(validator)
    }

    /// Refresh the key set every `refresh_interval`.
    ///
    /// The task stops once the validator is dropped.
    pub fn spawn_refresh(self: &Arc<Self>) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        let period = self.config.refresh_interval;

        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let Some(validator) = weak.upgrade() else {
                    debug!("Validator dropped, key refresh stopped");
                    break;
                };

                match validator.refresh().await {
                    Ok(count) => info!(keys = count, "Key set refreshed"),
                    Err(e) => warn!(
                        source = %validator.source.location(),
                        error = %e,
                        "Key refresh failed, keeping previous keys"
                    ),
                }
            }
        })
    }

    /// Fetch and swap in a new key set.
    ///
    /// On failure the previous keys stay authoritative. On success every
    /// derived key is dropped and re-derived on demand.
    ///
    /// # Errors
    ///
    /// Returns the fetch or decode failure.
    pub async fn refresh(&self) -> Result<usize, KeyRefreshError> {
        let document = self.source.fetch().await?;
        self.store.replace(document)
    }

    /// Verify a bearer token and return its claims.
    ///
    /// # Errors
    ///
    /// Returns why the token was rejected.
    pub fn validate_token(&self, token: &str) -> Result<Claims, AuthError> {
        let token = verify::strip_bearer(token);
        if token.is_empty() {
            return Err(AuthError::EmptyToken);
        }

        let header = verify::decode_header(token)?;
        let algorithm = verify::require_rsa(&header)?;
        let kid = header.kid.ok_or(AuthError::MissingKeyId)?;

        let key = self.store.derive_public_key(&kid)?;

        let expect = Expectations {
            issuer: &self.config.issuer,
            audience: self.config.audience.as_deref(),
        };
        verify::verify_token(token, algorithm, &key, &expect, unix_now())
    }

    /// Configured issuer.
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.config.issuer
    }

    /// Key store backing this validator.
    #[must_use]
    pub fn store(&self) -> &KeyStore {
        &self.store
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
