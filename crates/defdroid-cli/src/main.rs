use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use defdroid_core::action_log::{LogListState, load_action_log};
use defdroid_core::apps::{AppRecord, build_app_list};
use defdroid_core::settings::{PreferenceValue, SettingKey, SettingKind};
use defdroid_core::survey::SurveyKey;
use defdroid_core::{
    Config, GlobalSettingsEngine, ListState, PackageInventory, SectionIndex, SettingsScreen,
    SqliteStore, SurveyScreen, WhitelistMutator, WhitelistScreen, WhitelistStore,
};

mod dump;

use dump::{JsonInventory, JsonlLogSource};

/// DefDroid settings - manage the device-defense whitelist and guardian tuning
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Config file (default: ./.defdroid.toml over the platform config)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Settings database path
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the sorted, sectioned app list of the whitelist screen
    Apps {
        /// Package-manager dump (JSON)
        #[arg(long)]
        inventory: PathBuf,
    },

    /// Inspect or change the whitelist
    Whitelist {
        #[command(subcommand)]
        action: WhitelistAction,
    },

    /// Inspect or change defense-engine settings
    Settings {
        #[command(subcommand)]
        action: PrefAction,
    },

    /// Inspect or answer the demographic survey
    Survey {
        #[command(subcommand)]
        action: PrefAction,
    },

    /// Print the guardian action log
    Actions {
        /// Action log, one JSON event per line
        #[arg(long)]
        log: PathBuf,

        /// Package-manager dump used to resolve app labels
        #[arg(long)]
        inventory: Option<PathBuf>,

        /// Also print each entry's detail line
        #[arg(long)]
        details: bool,
    },
}

#[derive(Subcommand, Debug)]
enum WhitelistAction {
    /// Print whitelisted packages
    List,
    /// Whitelist a package
    Add {
        package: String,
        /// Package-manager dump; the package must be listed in it
        #[arg(long)]
        inventory: Option<PathBuf>,
    },
    /// Remove a package from the whitelist
    Remove {
        package: String,
        #[arg(long)]
        inventory: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
enum PrefAction {
    /// Print every preference and its summary
    Show,
    /// Change one preference
    Set { key: String, value: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Resolve configuration: CLI flags > config file > defaults
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path),
        None => Config::load(),
    };
    if let Some(db) = cli.db {
        config.db_path = Some(db);
    }
    init_tracing(&config);

    match cli.command {
        Command::Apps { inventory } => apps(&config, &inventory).await,
        Command::Whitelist { action } => whitelist(&config, action),
        Command::Settings { action } => settings(&config, action),
        Command::Survey { action } => survey(&config, action),
        Command::Actions {
            log,
            inventory,
            details,
        } => actions(log, inventory, details).await,
    }
}

/// `RUST_LOG` wins over the config file's filter, which wins over `warn`.
fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::try_new(config.log_filter.as_deref().unwrap_or("warn"))
            .unwrap_or_else(|_| EnvFilter::new("warn"))
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn open_store(config: &Config) -> anyhow::Result<Arc<SqliteStore>> {
    let path = config
        .db_path
        .as_ref()
        .context("no settings database path; pass --db")?;
    let store = SqliteStore::open(path)
        .with_context(|| format!("failed to open settings database {}", path.display()))?;
    Ok(Arc::new(store))
}

async fn apps(config: &Config, inventory: &Path) -> anyhow::Result<()> {
    let inventory = Arc::new(JsonInventory::load(inventory)?);
    let store = open_store(config)?;
    let engine = GlobalSettingsEngine::new(Arc::clone(&store));
    let mut screen = WhitelistScreen::new(inventory, store, engine, config.app_list_options());

    if screen.load()? == ListState::Empty {
        println!("No apps to show.");
        return Ok(());
    }
    if let Some(stats) = screen.wait_for_icons().await {
        tracing::info!(
            loaded = stats.loaded,
            missing = stats.missing,
            "icons loaded"
        );
    }
    print_sectioned(screen.sections(), screen.apps());
    screen.teardown();
    Ok(())
}

fn print_sectioned(sections: &SectionIndex, apps: &[AppRecord]) {
    for (section, label) in sections.sections().iter().enumerate() {
        let start = sections.positions()[section];
        let end = sections
            .position_for_section(section + 1)
            .unwrap_or(apps.len());
        println!("{label}");
        for app in &apps[start..end] {
            let mark = if app.whitelisted { 'x' } else { ' ' };
            println!("  [{mark}] {} ({})", app.title, app.package_name);
        }
    }
}

fn whitelist(config: &Config, action: WhitelistAction) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let (package, inventory, add) = match action {
        WhitelistAction::List => {
            for package in store.read_whitelist()? {
                println!("{package}");
            }
            return Ok(());
        }
        WhitelistAction::Add { package, inventory } => (package, inventory, true),
        WhitelistAction::Remove { package, inventory } => (package, inventory, false),
    };

    let mut record = match inventory {
        Some(path) => find_record(config, &JsonInventory::load(&path)?, &store, &package)?,
        None => AppRecord {
            title: package.clone(),
            package_name: package.clone(),
            enabled: true,
            whitelisted: store.read_whitelist()?.contains(&package),
            uid: 0,
        },
    };

    let engine = GlobalSettingsEngine::new(Arc::clone(&store));
    let mutator = WhitelistMutator::new(store, engine);
    let change = mutator.set_whitelisted(&mut record, add)?;
    if !change.store_written {
        eprintln!("{package}: whitelist unchanged");
    }
    println!("{}", defdroid_core::encode_whitelist(&change.packages));
    Ok(())
}

/// Look `package` up in the list the whitelist screen would show.
fn find_record(
    config: &Config,
    inventory: &JsonInventory,
    store: &SqliteStore,
    package: &str,
) -> anyhow::Result<AppRecord> {
    let whitelist: BTreeSet<String> = store.read_whitelist()?;
    let apps = build_app_list(
        inventory.list_installed_packages()?,
        inventory.platform_certificate().as_ref(),
        &whitelist,
        config.app_list_options(),
    );
    match apps.into_iter().find(|a| a.package_name == package) {
        Some(record) => Ok(record),
        None => bail!("{package} is not listed on the whitelist screen"),
    }
}

fn settings(config: &Config, action: PrefAction) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let engine = GlobalSettingsEngine::new(Arc::clone(&store));
    let mut screen = SettingsScreen::new(engine, store);

    match action {
        PrefAction::Show => {
            for pref in screen.sync()? {
                let value = match &pref.value {
                    Some(PreferenceValue::Bool(b)) => b.to_string(),
                    Some(PreferenceValue::Text(t)) => t.clone(),
                    None => "(unset)".to_string(),
                };
                match &pref.summary {
                    Some(summary) => println!("{} = {value}  # {summary}", pref.key),
                    None => println!("{} = {value}", pref.key),
                }
            }
        }
        PrefAction::Set { key, value } => {
            let value = match key.parse::<SettingKey>().map(SettingKey::kind) {
                Ok(SettingKind::Toggle) => PreferenceValue::Bool(parse_bool(&key, &value)?),
                _ => PreferenceValue::Text(value),
            };
            if !screen.on_preference_change(&key, value)? {
                bail!("unknown setting: {key}");
            }
        }
    }
    Ok(())
}

fn survey(config: &Config, action: PrefAction) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let screen = SurveyScreen::new(store);

    match action {
        PrefAction::Show => {
            let summary = screen.update_state()?;
            println!("age = {}", summary.age);
            println!("gender = {}", summary.gender);
            for key in SurveyKey::ALL.into_iter().filter(|k| !k.is_list()) {
                println!("{key} = {}", screen.checked(key)?);
            }
        }
        PrefAction::Set { key, value } => {
            let value = match key.parse::<SurveyKey>() {
                Ok(k) if !k.is_list() => PreferenceValue::Bool(parse_bool(&key, &value)?),
                _ => PreferenceValue::Text(value),
            };
            if !screen.on_preference_change(&key, value)? {
                bail!("unknown survey question: {key}");
            }
        }
    }
    Ok(())
}

fn parse_bool(key: &str, value: &str) -> anyhow::Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "on" | "yes" | "1" => Ok(true),
        "false" | "off" | "no" | "0" => Ok(false),
        _ => bail!("{key} expects true or false, got {value:?}"),
    }
}

async fn actions(
    log: PathBuf,
    inventory: Option<PathBuf>,
    details: bool,
) -> anyhow::Result<()> {
    let inventory = match inventory {
        Some(path) => JsonInventory::load(&path)?,
        None => JsonInventory::default(),
    };
    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let view = load_action_log(
        Arc::new(JsonlLogSource::new(log)),
        Arc::new(inventory),
        cancel,
    )
    .await;

    if view.state() == LogListState::Empty {
        println!("No action logs.");
        return Ok(());
    }
    for (i, item) in view.items().iter().enumerate() {
        let marker = if view.selection() == Some(i) { '>' } else { ' ' };
        println!(
            "{marker} {:<24} {:<20} {}",
            item.app_label, item.event.action_type, item.event.extra
        );
        if details {
            println!("    {}", item.detail());
        }
    }
    Ok(())
}
