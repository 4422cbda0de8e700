mod logging;

use std::error::Error;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use lens_adapters::memory::InMemoryQueryService;
use lens_adapters::mysql::MysqlQueryService;
use lens_core::history::HistoryStore;
use lens_core::pane_group::PaneGroup;
use lens_core::query_service::RemoteQueryService;
use lens_core::settings::{self, LensSettings};
use tracing::info;

const DEMO_PAGE_SIZE: usize = 500;

type SharedService = Arc<dyn RemoteQueryService>;

fn build_service(settings: &LensSettings) -> SharedService {
    match &settings.connection {
        Some(connection) => {
            info!(
                profile = %connection.name,
                host = %connection.host,
                page_size = connection.page_size,
                "using mysql query service"
            );
            Arc::new(MysqlQueryService::from_settings(connection))
        }
        None => {
            info!("no connection configured, using in-memory demo data");
            Arc::new(InMemoryQueryService::demo(DEMO_PAGE_SIZE))
        }
    }
}

fn build_pane_group(settings: &LensSettings) -> PaneGroup<dyn RemoteQueryService> {
    let history = HistoryStore::new(build_service(settings), settings.max_history());
    PaneGroup::with_tick_interval(history, settings.stopwatch.tick_interval())
}

async fn run_app<F, Fut>(settings: &LensSettings, run_tui: F) -> Result<(), Box<dyn Error>>
where
    F: FnOnce(PaneGroup<dyn RemoteQueryService>) -> Fut,
    Fut: Future<Output = Result<(), lens_tui::TuiError>>,
{
    run_tui(build_pane_group(settings)).await?;
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn Error>> {
    let settings = LensSettings::load_default()?;
    logging::init_logging(&settings::config_dir()?)?;

    let export_dir: PathBuf = std::env::current_dir()?;
    run_app(&settings, |group| lens_tui::run(group, export_dir)).await
}
