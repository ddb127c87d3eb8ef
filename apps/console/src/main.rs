use std::{fs, path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use navigator::{ModuleLoader, Navigator, View, ViewRegistry, GLOBAL_CONTEXT};
use serde_json::Value;
use storage::SqliteStore;
use tokio::runtime::Handle;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod modules;
mod views;

use config::{load_settings, normalize_database_url, Settings};
use modules::BaseModule;
use views::{AboutView, ApplicationView, ConfigurationView, RecordView, TableView, Terminal};

#[derive(Parser, Debug)]
#[command(about = "Browse a SQLite database through routed terminal views")]
struct Cli {
    #[arg(long, default_value = "waypoint.toml")]
    config: PathBuf,
    /// SQL script run against the database before navigation starts.
    #[arg(long)]
    seed: Option<PathBuf>,
    #[arg(long)]
    log_level: Option<String>,
}

fn view_registry(settings: &Settings, terminal: Arc<Terminal>, handle: Handle) -> Result<ViewRegistry> {
    let mut views = ViewRegistry::new();

    let title = settings.name.clone();
    let about = settings.about_file();
    let app_terminal = Arc::clone(&terminal);
    views.register("Application", move |context| -> Arc<dyn View> {
        Arc::new(ApplicationView::new(
            context,
            title.clone(),
            about.clone(),
            Arc::clone(&app_terminal),
        ))
    });

    let about_terminal = Arc::clone(&terminal);
    views.register("About", move |context| -> Arc<dyn View> {
        Arc::new(AboutView::new(context, Arc::clone(&about_terminal)))
    });

    let settings_json = serde_json::to_value(settings).context("failed to serialise settings")?;
    let config_terminal = Arc::clone(&terminal);
    views.register("Configuration", move |context| -> Arc<dyn View> {
        Arc::new(ConfigurationView::new(
            context,
            settings_json.clone(),
            Arc::clone(&config_terminal),
        ))
    });

    let table_terminal = Arc::clone(&terminal);
    let table_handle = handle.clone();
    views.register("Table", move |context| -> Arc<dyn View> {
        Arc::new(TableView::new(
            context,
            Arc::clone(&table_terminal),
            table_handle.clone(),
        ))
    });

    views.register("Record", move |context| -> Arc<dyn View> {
        Arc::new(RecordView::new(context, Arc::clone(&terminal), handle.clone()))
    });

    Ok(views)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut settings = load_settings(&cli.config)?;
    if let Some(log_level) = cli.log_level {
        settings.log_level = log_level;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let database_url = normalize_database_url(&settings.database_url);
    let store = SqliteStore::new(&database_url).await.map_err(|error| {
        error!(%database_url, %error, "failed to open database");
        error
    })?;
    if let Some(seed) = &cli.seed {
        let script = fs::read_to_string(seed)
            .with_context(|| format!("failed to read seed script '{}'", seed.display()))?;
        store.execute_script(&script).await?;
        info!(seed = %seed.display(), "database seeded");
    }

    let nav = Arc::new(Navigator::new().with_persistence(Arc::new(store.clone())));

    let mut modules = ModuleLoader::new();
    modules.add(Arc::new(
        BaseModule::discover(settings.shortname.clone(), store.clone()).await?,
    ));
    for module in &settings.modules {
        match modules.load(Some(settings.shortname.as_str()), module, &nav)? {
            Some(installed) => info!(module, ?installed, "module loaded"),
            None => warn!(module, "module belongs to another application"),
        }
    }

    let views = view_registry(&settings, Arc::new(Terminal::stdio()), Handle::current())?;
    let dirs = settings.flow_dirs();
    nav.load_routing_table(GLOBAL_CONTEXT, settings.flow_file(), &dirs, &views)
        .context("cannot start without a routing table")?;
    for module in modules.loaded() {
        nav.load_routing_table(module, Settings::module_flow_file(module), &dirs, &views)?;
    }

    let session = Arc::clone(&nav);
    let finished = tokio::task::spawn_blocking(move || session.start(Value::Null))
        .await
        .context("navigation thread failed")?;
    match finished {
        Ok(outcome) => info!(title = %outcome.title, "navigation finished"),
        Err(err) if err.is_application_closed() => info!("application closed"),
        Err(err) => {
            error!(code = ?err.code(), error = %err, "navigation failed");
            return Err(err.into());
        }
    }

    println!("Bye.");
    Ok(())
}
