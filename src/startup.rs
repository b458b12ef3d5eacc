use std::net::TcpListener;
use std::sync::Arc;

use actix_web::dev::Server;
use actix_web::http::Method;
use actix_web::middleware::DefaultHeaders;
use actix_web::web;
use actix_web::web::Data;
use actix_web::App;
use actix_web::HttpServer;
use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing_actix_web::TracingLogger;

use crate::configuration::DatabaseSettings;
use crate::configuration::IntakeSettings;
use crate::configuration::Settings;
use crate::notifications::notification_queue;
use crate::notifications::AdminNotifier;
use crate::notifications::ChecklistMailer;
use crate::notifications::NotificationQueue;
use crate::notifications::NotificationWorker;
use crate::rate_limit::RateLimiter;
use crate::routes::collect_lead;
use crate::routes::collect_lead_preflight;
use crate::routes::health_check;
use crate::routes::method_not_allowed;
use crate::routes::send_lead_notification;
use crate::routes::webhook_lead;
use crate::store::LeadStore;

/// Wrapper for actix's `Server` with access to the bound port, plus the
/// in-process state that has to outlive any single request. Not to be
/// confused with actix's `App`!
pub struct Application {
    /// Left private; use `get_port` to access
    port: u16,
    server: Server,
    notification_worker: NotificationWorker,
    rate_limiter: Arc<RateLimiter>,
}

impl Application {
    /// Bind the listener and build every client the routes need. Nothing here
    /// connects to the store or the email providers yet.
    pub async fn build(cfg: Settings) -> Result<Self, anyhow::Error> {
        let addr = format!("{}:{}", cfg.application.host, cfg.application.port);
        let listener = TcpListener::bind(&addr).with_context(|| format!("could not bind {addr}"))?;

        // port 0 in config means the OS picks one; record the real one
        let port = listener.local_addr()?.port();

        let store = LeadStore::from_settings(&cfg)?;
        let rate_limiter = Arc::new(cfg.rate_limit.limiter());

        let admin = Arc::new(AdminNotifier::new(
            cfg.notification_email.delivery.client()?,
            cfg.notification_email
                .recipient()
                .map_err(anyhow::Error::msg)?,
            cfg.application.product_name.clone(),
            cfg.notification_email.dashboard_url.clone(),
        ));
        let checklist = ChecklistMailer::new(
            cfg.checklist_email.delivery.client()?,
            cfg.application.product_name.clone(),
            cfg.checklist_email.checklist_url.clone(),
        );
        let (queue, notification_worker) = notification_queue(store.clone(), checklist, admin.clone());

        let server = run(
            listener,
            store,
            rate_limiter.clone(),
            queue,
            admin,
            cfg.intake,
            cfg.application.cors_allowed_origin,
        )?;

        Ok(Self {
            port,
            server,
            notification_worker,
            rate_limiter,
        })
    }

    pub fn get_port(&self) -> u16 { self.port }

    /// Shared with the sweeper started in `main`
    pub fn rate_limiter(&self) -> Arc<RateLimiter> { self.rate_limiter.clone() }

    /// Runs the server and the notification worker side by side; returns when
    /// either stops. Because this consumes `self`, this should be the final
    /// function call (or passed to `tokio::spawn`)
    pub async fn run_until_stopped(self) -> Result<(), anyhow::Error> {
        let worker = tokio::spawn(self.notification_worker.run());
        tokio::select! {
            o = self.server => o.context("server failed"),
            o = worker => o.context("notification worker panicked")?,
        }
    }
}

pub fn get_connection_pool(db_cfg: &DatabaseSettings) -> PgPool {
    // connect_lazy only connects when the pool is used for the first time, so
    // db-free requests (e.g. health_check) never wait on postgres
    PgPoolOptions::new().connect_lazy_with(db_cfg.connection())
}

/// The server is not responsible for binding to an address, it only listens to
/// an already bound address.
///
/// Declares all API endpoints.
pub fn run(
    listener: TcpListener,
    store: LeadStore,
    rate_limiter: Arc<RateLimiter>,
    queue: NotificationQueue,
    admin: Arc<AdminNotifier>,
    intake: IntakeSettings,
    cors_allowed_origin: String,
) -> Result<Server, anyhow::Error> {
    // `Data` is externally an `Arc` (for sharing/cloning), internally a `HashMap`
    // (for wrapping arbitrary types)
    let store = Data::new(store);
    let rate_limiter = Data::from(rate_limiter);
    let queue = Data::new(queue);
    let admin = Data::from(admin);
    let intake = Data::new(intake);

    // the closure runs once per worker (one per core), so everything it captures
    // must be cloneable
    let server = HttpServer::new(move || {
        let cors = DefaultHeaders::new()
            .add(("Access-Control-Allow-Origin", cors_allowed_origin.clone()))
            .add(("Access-Control-Allow-Methods", "POST, OPTIONS"))
            .add(("Access-Control-Allow-Headers", "Content-Type"));

        App::new()
            .wrap(TracingLogger::default())
            .route("/health_check", web::get().to(health_check))
            .service(
                web::resource("/api/collect-lead")
                    .wrap(cors)
                    .route(web::post().to(collect_lead))
                    .route(web::method(Method::OPTIONS).to(collect_lead_preflight))
                    .default_service(web::to(method_not_allowed)),
            )
            .service(
                web::resource("/api/webhook-lead")
                    .route(web::post().to(webhook_lead))
                    .default_service(web::to(method_not_allowed)),
            )
            .service(
                web::resource("/functions/send-lead-notification")
                    .route(web::post().to(send_lead_notification))
                    .default_service(web::to(method_not_allowed)),
            )
            .app_data(store.clone())
            .app_data(rate_limiter.clone())
            .app_data(queue.clone())
            .app_data(admin.clone())
            .app_data(intake.clone())
    })
    .listen(listener)?
    .run();

    Ok(server)
}
