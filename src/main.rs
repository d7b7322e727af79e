use std::path::Path;
use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{middleware::Compress, web, App, HttpServer};
use anyhow::Context;
use tracing::{info, Level};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::EnvFilter;
use utoipa::OpenApi; // bring trait into scope for ApiDoc::openapi()
use utoipa_swagger_ui::SwaggerUi;

use trailwatch::config::AppConfig;
use trailwatch::openapi::ApiDoc;
use trailwatch::repo::sql::SqlRepo;
use trailwatch::storage::FsImageStore;
use trailwatch::{config, AppState};

/// Filesystem path behind a `sqlite:` url, if it names a file.
fn sqlite_file(url: &str) -> Option<&Path> {
    let rest = url.strip_prefix("sqlite://").or_else(|| url.strip_prefix("sqlite:"))?;
    let path = rest.split('?').next().unwrap_or_default();
    (!path.is_empty() && path != ":memory:").then(|| Path::new(path))
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load .env automatically only in debug builds.
    if cfg!(debug_assertions) {
        let _ = dotenv::dotenv();
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    let cfg = AppConfig::from_env().context("invalid configuration")?;
    info!("Bootstrapping trailwatch server");
    info!(
        google_login = cfg.oauth.is_some(),
        bootstrap_admins = cfg.bootstrap_admins.len(),
        upload_dir = %cfg.upload_dir.display(),
        "configuration loaded"
    );

    if let Some(parent) = sqlite_file(&cfg.database_url).and_then(Path::parent) {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("cannot create database directory {}", parent.display()))?;
        }
    }
    let repo = SqlRepo::connect(&cfg.database_url, cfg.db_max_connections)
        .await
        .context("cannot open database")?;
    repo.migrate().await.context("migrations failed")?;
    info!("Database ready");

    let bind_addr = cfg.bind_addr.clone();
    let store = Arc::new(FsImageStore::new(&cfg.upload_dir));
    let state = AppState::new(cfg, Arc::new(repo), store).context("cannot build http client")?;

    let openapi = ApiDoc::openapi();
    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_header()
            .allowed_methods(["GET", "POST", "PUT", "DELETE", "OPTIONS"])
            .max_age(3600);

        App::new()
            .wrap(TracingLogger::default())
            .wrap(Compress::default())
            .wrap(cors)
            .app_data(web::Data::new(state.clone()))
            .configure(config)
            .service(SwaggerUi::new("/docs/{_:.*}").url("/docs/openapi.json", openapi.clone()))
    })
    .bind(&bind_addr)
    .with_context(|| format!("cannot bind {bind_addr}"))?;

    info!("Listening on http://{bind_addr}");
    server.run().await?;
    Ok(())
}
