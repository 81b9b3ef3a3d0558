mod handlers;
mod routes;

use pylab_common::config::PlatformConfig;
use pylab_common::exercises::ExerciseCatalog;
use pylab_harness::Harness;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tracing::info;

pub struct AppState {
    pub harness: Harness,
    /// Replaced as a whole by POST /admin/reload, never mutated in place
    pub catalog: RwLock<Arc<ExerciseCatalog>>,
    pub exercises_dir: PathBuf,
}

impl AppState {
    pub fn new(harness: Harness, catalog: ExerciseCatalog, exercises_dir: PathBuf) -> Self {
        Self {
            harness,
            catalog: RwLock::new(Arc::new(catalog)),
            exercises_dir,
        }
    }

    /// Current snapshot; cheap to clone and safe to hold across awaits
    pub async fn catalog(&self) -> Arc<ExerciseCatalog> {
        Arc::clone(&*self.catalog.read().await)
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let json = std::env::var("PYLAB_LOG_FORMAT")
        .map(|f| f.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    info!("pylab API booting...");

    let config = PlatformConfig::load_default()?;
    info!(
        python = %config.harness.python,
        data_dir = %config.harness.data_dir.display(),
        work_root = %config.harness.work_root.display(),
        max_concurrent_runs = config.harness.max_concurrent_runs,
        default_timeout_ms = config.harness.default_timeout_ms,
        "Harness configured"
    );

    let catalog = ExerciseCatalog::load(&config.exercises_dir);
    let state = Arc::new(AppState::new(
        Harness::new(&config.harness),
        catalog,
        config.exercises_dir.clone(),
    ));

    let app = routes::routes().with_state(state);

    let listener = TcpListener::bind(&config.bind_addr).await?;
    info!("HTTP server listening on {}", config.bind_addr);

    axum::serve(listener, app).await?;
    Ok(())
}
