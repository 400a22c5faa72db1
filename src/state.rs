//! Application state shared across handlers

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::apps::AppStore;
use crate::auth::{ApiKeyStore, AuthService, OAuthClientStore, PasswordHasher, TokenService};
use crate::config::Config;
use crate::email::{Mailer, TemplateStore};
use crate::http::cors::CorsPolicy;
use crate::jobs::{JobEngine, JobHandler, Scheduler, WebhookPruneHandler, WEBHOOK_PRUNE_JOB};
use crate::keystore::Keystore;
use crate::messaging::{HttpSmsProvider, SmsProvider, SmsService};
use crate::ratelimit::{FixedWindowLimiter, SlidingWindowLimiter};
use crate::realtime::Hub;
use crate::schema::SchemaCache;
use crate::storage::StorageService;
use crate::telemetry::LogBuffer;
use crate::webhooks::{Dispatcher, WebhookStore};

/// Everything a handler can reach. Cloning is cheap; the interesting
/// members are all `Arc`-backed.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub pool: PgPool,
    pub keystore: Arc<Keystore>,
    pub auth: AuthService,
    pub api_keys: ApiKeyStore,
    pub oauth_clients: OAuthClientStore,
    pub apps: AppStore,
    pub schema: Arc<SchemaCache>,
    pub hub: Hub,
    pub webhooks: WebhookStore,
    pub dispatcher: Dispatcher,
    pub jobs: Option<JobEngine>,
    pub scheduler: Option<Scheduler>,
    pub sms: SmsService,
    pub templates: TemplateStore,
    pub mailer: Option<Mailer>,
    pub storage: Option<StorageService>,
    pub admin_login_limiter: Arc<FixedWindowLimiter>,
    pub auth_limiter: Arc<FixedWindowLimiter>,
    pub app_limiter: Arc<SlidingWindowLimiter>,
    pub cors: CorsPolicy,
    pub logs: LogBuffer,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Wire up every component and start the background tasks.
    ///
    /// The schema cache is loaded once before returning, so the router
    /// never observes an empty cache on a healthy boot.
    pub async fn build(config: Config, pool: PgPool, logs: LogBuffer) -> crate::error::Result<Self> {
        let keystore = Arc::new(Keystore::new(
            config.auth.jwt_secret.clone(),
            config.admin.password.is_some(),
        ));
        let hasher = PasswordHasher::from_config(&config.auth);
        let tokens = TokenService::new(
            keystore.clone(),
            Duration::from_secs(config.auth.access_ttl_secs),
        );
        let auth = AuthService::new(
            pool.clone(),
            hasher.clone(),
            tokens,
            config.auth.refresh_ttl_secs,
        );
        let api_keys = ApiKeyStore::new(pool.clone(), hasher.clone());
        let oauth_clients = OAuthClientStore::new(pool.clone(), hasher.clone());
        let apps = AppStore::new(pool.clone());

        let schema = Arc::new(SchemaCache::new(pool.clone()));
        schema.load().await?;

        let hub = Hub::new();
        let webhooks = WebhookStore::new(pool.clone());
        let (dispatcher, _dispatcher_tasks) =
            Dispatcher::start(webhooks.clone(), 4, config.jobs.enabled);

        let (jobs, scheduler) = if config.jobs.enabled {
            let mut handlers: HashMap<String, Arc<dyn JobHandler>> = HashMap::new();
            handlers.insert(
                WEBHOOK_PRUNE_JOB.to_string(),
                Arc::new(WebhookPruneHandler::new(webhooks.clone())),
            );
            let engine = JobEngine::new(pool.clone(), handlers);
            engine.start(
                Duration::from_secs(config.jobs.poll_interval_secs),
                config.jobs.workers,
            );
            let scheduler = Scheduler::new(pool.clone(), engine.clone());
            scheduler.start(Duration::from_secs(config.jobs.scheduler_tick_secs));
            (Some(engine), Some(scheduler))
        } else {
            (None, None)
        };

        let provider: Option<Arc<dyn SmsProvider>> = HttpSmsProvider::from_config(&config.sms)
            .map(|p| Arc::new(p) as Arc<dyn SmsProvider>);
        let sms = SmsService::new(pool.clone(), provider, &config.sms);

        let templates = TemplateStore::new(pool.clone());
        let mailer = Mailer::from_config(&config.email);

        let storage = config.storage.enabled.then(|| {
            StorageService::new(
                config.storage.root.clone(),
                keystore.clone(),
                config.storage.max_file_size_bytes,
                config.storage.sign_ttl_secs,
            )
        });

        let admin_login_limiter = Arc::new(FixedWindowLimiter::new(
            config.admin.login_rate_limit,
            Duration::from_secs(60),
        ));
        let auth_limiter = Arc::new(FixedWindowLimiter::new(
            config.auth.rate_limit,
            Duration::from_secs(60),
        ));
        let app_limiter = Arc::new(SlidingWindowLimiter::new());

        let cors = CorsPolicy::new(&config.server.cors_allowed_origins);

        // Periodic cache refresh keeps auto-CRUD in step with external DDL.
        {
            let schema = schema.clone();
            let interval = Duration::from_secs(config.database.schema_refresh_secs.max(10));
            tokio::spawn(async move {
                let mut tick = tokio::time::interval(interval);
                tick.tick().await; // the first tick fires immediately
                loop {
                    tick.tick().await;
                    if let Err(e) = schema.load().await {
                        tracing::warn!(error = %e, "periodic schema refresh failed");
                    }
                }
            });
        }

        Ok(Self {
            config: Arc::new(config),
            pool,
            keystore,
            auth,
            api_keys,
            oauth_clients,
            apps,
            schema,
            hub,
            webhooks,
            dispatcher,
            jobs,
            scheduler,
            sms,
            templates,
            mailer,
            storage,
            admin_login_limiter,
            auth_limiter,
            app_limiter,
            cors,
            logs,
            started_at: Utc::now(),
        })
    }

    /// The job engine, or 503 when disabled
    pub fn jobs(&self) -> crate::error::Result<&JobEngine> {
        self.jobs
            .as_ref()
            .ok_or_else(|| crate::error::Error::ServiceUnavailable("job engine disabled".into()))
    }

    /// The scheduler, or 503 when the job engine is disabled
    pub fn scheduler(&self) -> crate::error::Result<&Scheduler> {
        self.scheduler
            .as_ref()
            .ok_or_else(|| crate::error::Error::ServiceUnavailable("job engine disabled".into()))
    }

    /// Ordered shutdown: drain the dispatcher, stop the limiters, stop
    /// the job engine (waiting for in-flight handlers), close the hub.
    pub async fn shutdown(&self) {
        self.dispatcher.stop();
        self.admin_login_limiter.stop();
        self.auth_limiter.stop();
        self.app_limiter.stop();
        if let Some(scheduler) = &self.scheduler {
            scheduler.stop();
        }
        if let Some(jobs) = &self.jobs {
            jobs.stop(Duration::from_secs(
                self.config.server.shutdown_timeout_secs,
            ))
            .await;
        }
        self.hub.close();
    }
}
