use std::{sync::Arc, time::Duration};

use actix_web::{dev::Server, http::KeepAlive, middleware::Logger, web, App, HttpServer};
use futures::FutureExt;
use log::*;
use shop_payment_engine::{
    events::{EventHandlers, EventHooks, EventProducers},
    leader::LockNameRegistry,
    traits::{LeaderLock, NoAdvisoryLocks, PaymentStore},
    Clock,
    OrderFlowApi,
    PostgresDatabase,
    PostgresLeaderLock,
    SqliteDatabase,
    SystemClock,
    WebhookApi,
};
use tokio_util::sync::CancellationToken;

use crate::{
    config::{ServerConfig, WebhookConfig},
    errors::ServerError,
    expiry_worker::start_expiry_worker,
    middleware::{SignatureMiddlewareFactory, SignatureScheme},
    routes::{health, NetopiaWebhookRoute, PaypalWebhookRoute, StripeWebhookRoute},
    webhook_retry_worker::start_webhook_retry_worker,
};

const EVENT_BUFFER_SIZE: usize = 64;

/// The storage backend named by a database URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Sqlite,
    Postgres,
}

impl Backend {
    pub fn from_url(url: &str) -> Result<Self, ServerError> {
        match url.split_once(':').map(|(scheme, _)| scheme.to_ascii_lowercase()) {
            Some(s) if s == "sqlite" => Ok(Self::Sqlite),
            Some(s) if s == "postgres" || s == "postgresql" => Ok(Self::Postgres),
            // The URL can hold a password, so it never goes into the message
            _ => Err(ServerError::ConfigurationError(
                "SPG_DATABASE_URL must start with sqlite:// or postgres://".to_string(),
            )),
        }
    }
}

pub async fn run_server(config: ServerConfig) -> Result<(), ServerError> {
    let url = config.database_url.reveal().clone();
    match Backend::from_url(&url)? {
        Backend::Sqlite => {
            info!("🗃️ Using SQLite storage. Leader election is off, so run a single replica only.");
            let db = SqliteDatabase::new_with_url(&url, config.db_max_connections)
                .await
                .map_err(|e| ServerError::InitializeError(e.to_string()))?;
            db.run_migrations().await.map_err(|e| ServerError::InitializeError(e.to_string()))?;
            serve(config, db, NoAdvisoryLocks).await
        },
        Backend::Postgres => {
            info!("🗃️ Using Postgres storage with advisory lock leader election");
            let db = PostgresDatabase::new_with_url(&url, config.db_max_connections)
                .await
                .map_err(|e| ServerError::InitializeError(e.to_string()))?;
            db.run_migrations().await.map_err(|e| ServerError::InitializeError(e.to_string()))?;
            let lock = PostgresLeaderLock::new_with_url(&url, config.leader.pool_size)
                .await
                .map_err(|e| ServerError::InitializeError(e.to_string()))?;
            serve(config, db, lock).await
        },
    }
}

/// Starts the event handlers and background workers, then runs the HTTP server until it is shut down.
///
/// The workers are stopped and joined before this returns, so no leader lock outlives the server.
pub async fn serve<B, L>(config: ServerConfig, db: B, lock: L) -> Result<(), ServerError>
where
    B: PaymentStore,
    L: LeaderLock + Clone,
{
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let mut registry = LockNameRegistry::new();
    let expiry_lock = registry.register(&config.leader.namespace, "order_expiry")?;
    let retry_lock = registry.register(&config.leader.namespace, "webhook_retry")?;

    let handlers = create_event_handlers();
    let producers = handlers.producers();
    handlers.start_handlers().await;

    let stop = CancellationToken::new();
    let orders =
        OrderFlowApi::new(db.clone(), config.order_flow_settings(), Arc::clone(&clock)).with_producers(producers.clone());
    let expiry_worker = start_expiry_worker(
        orders,
        lock.clone(),
        expiry_lock,
        config.expiry.clone(),
        config.leader.retry_interval,
        stop.clone(),
    );
    let retries =
        WebhookApi::new(db.clone(), config.audit.clone(), Arc::clone(&clock)).with_producers(producers.clone());
    let retry_worker = start_webhook_retry_worker(
        retries,
        lock,
        retry_lock,
        config.webhooks.retry,
        config.webhooks.retry_sweep_interval,
        config.leader.retry_interval,
        stop.clone(),
    );

    info!("🚀️ Starting server on {}:{}", config.host, config.port);
    let result = match create_server_instance(config, db, producers, clock) {
        Ok(srv) => srv.await.map_err(ServerError::from),
        Err(e) => Err(e),
    };
    stop.cancel();
    for (name, handle) in [("order expiry", expiry_worker), ("webhook retry", retry_worker)] {
        if let Err(e) = handle.await {
            error!("🕰️ The {name} worker did not shut down cleanly. {e}");
        }
    }
    result
}

pub fn create_server_instance<B: PaymentStore>(
    config: ServerConfig,
    db: B,
    producers: EventProducers,
    clock: Arc<dyn Clock>,
) -> Result<Server, ServerError> {
    let host = config.host.clone();
    let port = config.port;
    let srv = HttpServer::new(move || {
        let webhook_api =
            WebhookApi::new(db.clone(), config.audit.clone(), Arc::clone(&clock)).with_producers(producers.clone());
        let webhooks = config.webhooks.clone();
        let clock = Arc::clone(&clock);
        App::new()
            .wrap(Logger::new("%t (%D ms) %s %a %{Host}i %U").log_target("spg::access_log"))
            .app_data(web::Data::new(webhook_api))
            .service(health)
            .configure(move |cfg| configure_webhook_routes::<B>(cfg, &webhooks, clock))
    })
    .keep_alive(KeepAlive::Timeout(Duration::from_secs(600)))
    .bind((host.as_str(), port))?
    .run();
    Ok(srv)
}

/// Registers the three provider webhook routes, each behind the signature check for its provider.
///
/// The caller must register a `web::Data<WebhookApi<B>>`.
pub fn configure_webhook_routes<B: PaymentStore>(
    cfg: &mut web::ServiceConfig,
    webhooks: &WebhookConfig,
    clock: Arc<dyn Clock>,
) {
    let enabled = webhooks.signature_checks;
    let stripe = SignatureMiddlewareFactory::new(
        SignatureScheme::Stripe { tolerance: webhooks.stripe_tolerance },
        webhooks.stripe_secret.clone(),
        enabled,
        Arc::clone(&clock),
    );
    let paypal =
        SignatureMiddlewareFactory::new(SignatureScheme::PayPal, webhooks.paypal_secret.clone(), enabled, Arc::clone(&clock));
    let netopia = SignatureMiddlewareFactory::new(SignatureScheme::Netopia, webhooks.netopia_secret.clone(), enabled, clock);
    cfg.service(StripeWebhookRoute::<B>::new(stripe))
        .service(PaypalWebhookRoute::<B>::new(paypal))
        .service(NetopiaWebhookRoute::<B>::new(netopia));
}

/// Order status changes are logged here. Notification senders subscribe through the same hook.
fn create_event_handlers() -> EventHandlers {
    let mut hooks = EventHooks::default();
    hooks.on_status_changed(|ev| {
        info!(
            "📬️ Order {} moved from {} to {} ({} at {})",
            ev.order.reference_code, ev.from, ev.to, ev.actor, ev.changed_at
        );
        async {}.boxed()
    });
    EventHandlers::new(EVENT_BUFFER_SIZE, hooks)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn backend_from_url_scheme() {
        assert_eq!(Backend::from_url("sqlite://data/shop.db").unwrap(), Backend::Sqlite);
        assert_eq!(Backend::from_url("sqlite::memory:").unwrap(), Backend::Sqlite);
        assert_eq!(Backend::from_url("postgres://shop@db/shop").unwrap(), Backend::Postgres);
        assert_eq!(Backend::from_url("postgresql://shop@db/shop").unwrap(), Backend::Postgres);
        let err = Backend::from_url("mysql://root:hunter2@db/shop").unwrap_err();
        assert!(!err.to_string().contains("hunter2"));
        assert!(Backend::from_url("data/shop.db").is_err());
    }
}
