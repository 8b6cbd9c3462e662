use actix_web::{App, HttpServer, middleware, web};
use backend::config::AppConfig;
use backend::routes::{configure_routes, cors_policy};
use backend::state::{AppState, StartupError};
use std::env;

fn startup_failure(e: StartupError) -> std::io::Error {
    log::error!("Startup failed: {}", e);
    std::io::Error::other(e.to_string())
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    if let Ok(current_dir) = env::current_dir() {
        log::info!("Current working directory: {}", current_dir.display());
    }

    let config = AppConfig::load()
        .map_err(StartupError::from)
        .map_err(startup_failure)?;
    log::info!(
        "Serving {} responses with the {} backend",
        config.response_variant,
        config.model_backend
    );

    let state = AppState::from_config(&config)
        .await
        .map_err(startup_failure)?;

    let bind_address = config.bind_address();
    let cors_permissive = config.cors_permissive;
    log::info!("Starting server on {}", bind_address);

    let mut server = HttpServer::new(move || {
        App::new()
            .wrap(middleware::Logger::default())
            .wrap(cors_policy(cors_permissive))
            .app_data(web::Data::new(state.clone()))
            .configure(configure_routes)
    });
    if let Some(workers) = config.workers {
        server = server.workers(workers);
    }

    server.bind(&bind_address)?.run().await
}
