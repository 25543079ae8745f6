use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use dotenv::dotenv;
use std::sync::Arc;

mod config;
mod controllers;
mod db;
mod execution;
mod gateway;
mod models;
mod vendor;
mod windows;
mod workflows;

use config::Config;
use db::Database;
use execution::{AccountLaneManager, TaskEngine, TaskTracker};
use gateway::EventBroadcaster;
use vendor::{LocalApiClient, WindowVendor};
use windows::WindowManager;
use workflows::WorkflowSet;

pub struct AppState {
    pub db: Arc<Database>,
    pub config: Config,
    pub tracker: Arc<TaskTracker>,
    pub broadcaster: Arc<EventBroadcaster>,
    pub engine: Arc<TaskEngine>,
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok();
    env_logger::init();

    let config = Config::from_env();
    let port = config.port;

    log::info!("Initializing database at {}", config.database_url);
    let db = Database::new(&config.database_url).expect("Failed to initialize database");
    let db = Arc::new(db);

    log::info!("Connecting to window vendor at {}", config.vendor_api_url);
    let vendor: Arc<dyn WindowVendor> = Arc::new(LocalApiClient::new(&config.vendor_api_url));

    let broadcaster = Arc::new(EventBroadcaster::new());
    let tracker = Arc::new(TaskTracker::new());
    let lanes = AccountLaneManager::new();

    let windows = Arc::new(WindowManager::new(
        db.clone(),
        vendor.clone(),
        tracker.clone(),
        config.device_class,
    ));

    log::info!(
        "Loading workflow executors from {}",
        config.scripts_dir
    );
    let workflows = Arc::new(WorkflowSet::external(std::path::Path::new(
        &config.scripts_dir,
    )));

    let engine = Arc::new(TaskEngine::new(
        db.clone(),
        tracker.clone(),
        lanes,
        windows,
        workflows,
        vendor.clone(),
        broadcaster.clone(),
    ));

    log::info!("Starting fleet backend on port {}", port);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(AppState {
                db: Arc::clone(&db),
                config: config.clone(),
                tracker: Arc::clone(&tracker),
                broadcaster: Arc::clone(&broadcaster),
                engine: Arc::clone(&engine),
            }))
            .wrap(Logger::default())
            .wrap(cors)
            .configure(controllers::health::config)
            .configure(controllers::tasks::config)
            .configure(controllers::accounts::config)
            .configure(controllers::settings::config)
            .service(web::resource("/ws").route(web::get().to(gateway::actix_ws::ws_handler)))
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}
