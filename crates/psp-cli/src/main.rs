//! PSP Detector CLI
//!
//! CLI tool for validating provider catalogs and running detection over
//! captured page snapshots.

use std::path::Path;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use psp_core::protocol::MessageSender;
use psp_core::{DetectionResult, Engine, ExemptMatcher, PageSnapshot, ProviderCatalog, TabId};
use psp_runtime::loader::{load_catalog, load_exempt_domains};
use psp_runtime::transport::{channel, serve};
use psp_runtime::{
    ChannelTransport, Coordinator, JsonFileStore, LocationLoader, MemoryStore, PageAgent, ResourceLoader,
    RetryingTransport, RuntimeConfig, StateStore,
};

#[derive(Parser)]
#[command(name = "psp-cli")]
#[command(about = "PSP detector catalog and detection tools")]
struct Cli {
    /// Runtime configuration file (JSON)
    #[arg(long, global = true)]
    config: Option<String>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a provider catalog (and optionally an exempt list)
    Validate {
        /// Catalog file or http(s) URL
        #[arg(short, long)]
        catalog: String,

        /// Exempt-domain list file or http(s) URL
        #[arg(short, long)]
        exempt: Option<String>,
    },

    /// Dump catalog info
    Info {
        /// Catalog file or http(s) URL
        #[arg(short, long)]
        catalog: String,
    },

    /// Run detection over a page snapshot or a raw corpus
    Detect {
        #[arg(short, long)]
        catalog: String,

        #[arg(short, long)]
        exempt: Option<String>,

        /// Page snapshot file (JSON)
        #[arg(short, long, conflicts_with_all = ["url", "corpus"])]
        page: Option<String>,

        /// Page URL, used with --corpus
        #[arg(long, requires = "corpus")]
        url: Option<String>,

        /// Raw corpus text
        #[arg(long, requires = "url")]
        corpus: Option<String>,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show a provider's descriptor and notice
    Lookup {
        #[arg(short, long)]
        catalog: String,

        /// Provider name (case-insensitive)
        #[arg(short, long)]
        name: String,
    },

    /// Drive a coordinator and a page agent through one page load
    Simulate {
        #[arg(short, long)]
        catalog: String,

        #[arg(short, long)]
        exempt: Option<String>,

        /// Page snapshot file (JSON)
        #[arg(short, long)]
        page: String,

        #[arg(short, long, default_value_t = 1)]
        tab: TabId,

        /// Coordinator state file; in-memory when omitted
        #[arg(short, long)]
        store: Option<String>,
    },

    /// Print the persisted coordinator state
    State {
        /// Coordinator state file
        #[arg(short, long)]
        store: String,
    },
}

fn main() {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let result = load_config(cli.config.as_deref()).and_then(|config| match cli.command {
        Commands::Validate { catalog, exempt } => cmd_validate(&config, &catalog, exempt.as_deref()),
        Commands::Info { catalog } => cmd_info(&config, &catalog),
        Commands::Detect {
            catalog,
            exempt,
            page,
            url,
            corpus,
            json,
        } => cmd_detect(&config, &catalog, exempt.as_deref(), page.as_deref(), url.zip(corpus), json),
        Commands::Lookup { catalog, name } => cmd_lookup(&config, &catalog, &name),
        Commands::Simulate {
            catalog,
            exempt,
            page,
            tab,
            store,
        } => cmd_simulate(&config, &catalog, exempt.as_deref(), &page, tab, store.as_deref()),
        Commands::State { store } => cmd_state(&store),
    });

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn setup_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("psp_core=debug,psp_runtime=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(false)
                .without_time()
                .with_writer(std::io::stderr),
        )
        .with(filter)
        .init();
}

fn load_config(path: Option<&str>) -> Result<RuntimeConfig, String> {
    match path {
        Some(path) => {
            RuntimeConfig::from_file(Path::new(path)).map_err(|e| format!("Failed to load config '{}': {}", path, e))
        }
        None => Ok(RuntimeConfig::default()),
    }
}

fn runtime() -> Result<tokio::runtime::Runtime, String> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("Failed to start runtime: {}", e))
}

/// Each resource is fetched from its own location, URL or path.
fn loader_for(catalog: &str, exempt: Option<&str>) -> Arc<dyn ResourceLoader> {
    let loader = LocationLoader::new(catalog);
    match exempt {
        Some(exempt) => Arc::new(loader.with_exempt(exempt)),
        None => Arc::new(loader),
    }
}

fn fetch_catalog(config: &RuntimeConfig, catalog: &str) -> Result<ProviderCatalog, String> {
    let loader = loader_for(catalog, None);
    runtime()?
        .block_on(load_catalog(loader.as_ref(), config.coordinator.fetch_timeout()))
        .map_err(|e| format!("Failed to load catalog '{}': {}", catalog, e))
}

/// Catalog plus exempt list. A missing or broken exempt list is treated as empty.
fn build_engine(config: &RuntimeConfig, catalog: &str, exempt: Option<&str>) -> Result<Engine, String> {
    let loader = loader_for(catalog, exempt);
    let timeout = config.coordinator.fetch_timeout();
    let rt = runtime()?;

    let catalog = rt
        .block_on(load_catalog(loader.as_ref(), timeout))
        .map_err(|e| format!("Failed to load catalog '{}': {}", catalog, e))?;

    let domains = match exempt {
        Some(location) => match rt.block_on(load_exempt_domains(loader.as_ref(), timeout)) {
            Ok(list) => list.exempt_domains,
            Err(e) => {
                eprintln!("Warning: exempt list '{}' unavailable, treating as empty: {}", location, e);
                Vec::new()
            }
        },
        None => Vec::new(),
    };

    Ok(Engine::new()
        .with_catalog(Arc::new(catalog))
        .with_exempt(ExemptMatcher::from_domains(&domains)))
}

fn read_page(path: &str) -> Result<PageSnapshot, String> {
    let text = std::fs::read_to_string(path).map_err(|e| format!("Failed to read '{}': {}", path, e))?;
    PageSnapshot::from_json(&text).map_err(|e| format!("Invalid page snapshot '{}': {}", path, e))
}

/// Run one detection pass over a snapshot with the configured collector.
fn detect_page(engine: &Engine, config: &RuntimeConfig, page: &PageSnapshot) -> (DetectionResult, usize) {
    let corpus = psp_core::collect_corpus(page, &config.collector);
    (engine.detect(corpus.url(), &corpus.text()), corpus.len())
}

fn print_result(result: &DetectionResult) {
    match result {
        DetectionResult::Detected {
            provider,
            match_method,
            matched_value,
        } => {
            println!("Detected:    {}", provider);
            println!("  Method:    {}", match_method.as_str());
            println!("  Matched:   {}", matched_value);
        }
        DetectionResult::Exempt { reason, url } => {
            println!("Exempt:      {}", url);
            println!("  Reason:    {}", reason);
        }
        DetectionResult::None { scanned_count } => {
            println!("No provider found ({} scanned)", scanned_count);
        }
        DetectionResult::Error { cause, context } => {
            println!("Detection error: {}", cause);
            if let Some(context) = context {
                println!("  Context:   {}", context);
            }
        }
    }
}

fn cmd_validate(config: &RuntimeConfig, catalog: &str, exempt: Option<&str>) -> Result<(), String> {
    let loaded = fetch_catalog(config, catalog)?;

    println!("Catalog '{}' is valid", catalog);
    println!("  Providers:   {}", loaded.len());
    println!("  Groups:      {}", loaded.groups().len());

    let failures = loaded.pattern_failures();
    if !failures.is_empty() {
        println!("  Warnings:    {} provider pattern(s) failed to compile", failures.len());
    }

    if let Some(exempt) = exempt {
        let loader = loader_for(catalog, Some(exempt));
        let list = runtime()?
            .block_on(load_exempt_domains(loader.as_ref(), config.coordinator.fetch_timeout()))
            .map_err(|e| format!("Invalid exempt list '{}': {}", exempt, e))?;
        println!("Exempt list '{}' is valid", exempt);
        println!("  Domains:     {}", list.domains().len());
    }

    Ok(())
}

fn cmd_info(config: &RuntimeConfig, catalog: &str) -> Result<(), String> {
    let loaded = fetch_catalog(config, catalog)?;

    println!("Catalog: {}", catalog);
    println!("  Providers:   {}", loaded.len());
    println!();

    println!("Providers:");
    for provider in loaded.providers() {
        let matcher = &provider.matcher;
        let kind = match (matcher.has_tokens(), matcher.has_pattern()) {
            (true, _) => "tokens",
            (false, true) => "pattern",
            (false, false) => "none",
        };
        println!("  {:<24} {}", provider.name(), kind);
    }

    if !loaded.groups().is_empty() {
        println!();
        println!("Groups:");
        for group in loaded.groups() {
            println!("  {:<16} {} members", group.kind.as_str(), group.members.len());
        }
    }

    let failures = loaded.pattern_failures();
    if !failures.is_empty() {
        println!();
        println!("Pattern failures:");
        for (name, error) in failures {
            println!("  {}: {}", name, error);
        }
    }

    Ok(())
}

fn cmd_detect(
    config: &RuntimeConfig,
    catalog: &str,
    exempt: Option<&str>,
    page: Option<&str>,
    raw: Option<(String, String)>,
    json: bool,
) -> Result<(), String> {
    let engine = build_engine(config, catalog, exempt)?;

    let result = match (page, raw) {
        (Some(path), _) => {
            let snapshot = read_page(path)?;
            let (result, entries) = detect_page(&engine, config, &snapshot);
            if !json {
                println!("Scanned {} corpus entries from '{}'", entries, path);
            }
            result
        }
        (None, Some((url, corpus))) => engine.detect(&url, &corpus),
        (None, None) => return Err("Either --page or --url with --corpus is required".to_string()),
    };

    if json {
        let text = serde_json::to_string_pretty(&result).map_err(|e| format!("Failed to encode result: {}", e))?;
        println!("{}", text);
    } else {
        print_result(&result);
    }
    Ok(())
}

fn cmd_lookup(config: &RuntimeConfig, catalog: &str, name: &str) -> Result<(), String> {
    let loaded = fetch_catalog(config, catalog)?;
    let descriptor = loaded
        .lookup(name)
        .ok_or_else(|| format!("No provider named '{}'", name))?;

    println!("{}", descriptor.name);
    println!("  URL:         {}", descriptor.url);
    println!("  Image:       {}", descriptor.image);
    println!("  Summary:     {}", descriptor.summary);
    if let Some(group) = loaded.group_of(name) {
        println!("  Group:       {}", group.kind.as_str());
    }
    if let Some(notice) = loaded.resolve_notice(name) {
        println!("  Notice:      {}", notice);
    }
    Ok(())
}

fn cmd_simulate(
    config: &RuntimeConfig,
    catalog: &str,
    exempt: Option<&str>,
    page: &str,
    tab: TabId,
    store: Option<&str>,
) -> Result<(), String> {
    let snapshot = read_page(page)?;
    let loader = loader_for(catalog, exempt);
    let store: Arc<dyn StateStore> = match store {
        Some(path) => Arc::new(JsonFileStore::new(path)),
        None => Arc::new(MemoryStore::new()),
    };

    runtime()?.block_on(async {
        let coordinator = Arc::new(Coordinator::new(store, loader).with_config(config.coordinator.clone()));
        let url = snapshot.url.as_str();

        coordinator
            .on_navigation_started(tab, Some(url))
            .await
            .map_err(|e| e.to_string())?;
        coordinator.on_tab_activated(tab, Some(url)).await.map_err(|e| e.to_string())?;
        coordinator
            .on_navigation_completed(tab, url)
            .await
            .map_err(|e| e.to_string())?;

        let (tx, rx) = channel(16);
        let server = serve(Arc::clone(&coordinator), rx);
        let transport = RetryingTransport::new(ChannelTransport::new(tx, MessageSender::tab(tab)), config.retry);
        let mut agent = PageAgent::new(transport, config.collector);

        let local = agent.start(&snapshot, 0).await.map_err(|e| e.to_string())?;
        drop(agent);
        let _ = server.await;

        if let Some(result) = &local {
            println!("Page agent result:");
            print_result(result);
            println!();
        }

        let state = coordinator
            .tab_state(tab)
            .await
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("Coordinator has no state for tab {}", tab))?;
        println!("Coordinator state for tab {}:", tab);
        println!("  Phase:       {:?}", state.phase);
        println!("  Generation:  {}", state.generation);
        if let Some(result) = &state.result {
            print_result(result);
        }
        Ok(())
    })
}

fn cmd_state(store: &str) -> Result<(), String> {
    let repo = psp_runtime::state::StateRepository::new(Arc::new(JsonFileStore::new(store)));
    let state = runtime()?
        .block_on(repo.load())
        .map_err(|e| format!("Failed to read '{}': {}", store, e))?;
    let text = serde_json::to_string_pretty(&state).map_err(|e| format!("Failed to encode state: {}", e))?;
    println!("{}", text);
    Ok(())
}
