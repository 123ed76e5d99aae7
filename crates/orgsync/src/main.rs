use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use orgsync_core::config::{HierarchyMode, SiteLayout, SyncConfig, load_config, load_credentials};
use orgsync_core::details::{cached_details, content_page_names, fetch_details};
use orgsync_core::hierarchy::Hierarchy;
use orgsync_core::lookup::LookupCache;
use orgsync_core::model::{DictionaryId, OrganizationRecord};
use orgsync_core::prune::prune_removed;
use orgsync_core::reconcile::{nuke_tree, recreate_tree};
use orgsync_core::registry::{RegistryApi, RegistryClient, RegistryClientConfig};
use orgsync_core::runtime::{
    PathOverrides, ResolutionContext, ResolvedPaths, init_layout, normalize_for_display,
    resolve_paths,
};
use orgsync_core::snapshot::{SnapshotKind, SnapshotStore};
use orgsync_core::units::units;
use orgsync_core::update::{UpdateOptions, update_pages};
use orgsync_core::wiki::{MediaWikiClient, MediaWikiClientConfig};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(
    name = "orgsync",
    version,
    about = "Mirror the public-sector organization registry onto a MediaWiki site"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    project_root: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    snapshot_dir: Option<PathBuf>,
    #[arg(long, global = true, help = "Print resolved runtime diagnostics")]
    diagnostics: bool,
    #[arg(long, global = true, help = "Print reports as JSON")]
    json: bool,
    #[arg(short, long, global = true, help = "Enable debug logging")]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    project_root: Option<PathBuf>,
    config: Option<PathBuf>,
    snapshot_dir: Option<PathBuf>,
    diagnostics: bool,
    json: bool,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            project_root: cli.project_root.clone(),
            config: cli.config.clone(),
            snapshot_dir: cli.snapshot_dir.clone(),
            diagnostics: cli.diagnostics,
            json: cli.json,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Create the .orgsync layout and a default config
    Init(InitArgs),
    /// Create organization categories and catalogue pages
    RecreateTree(RecreateTreeArgs),
    /// Delete every category and organization page under the top category
    NukeTree(NukeTreeArgs),
    /// Rewrite the organization template on content pages
    UpdatePages(UpdatePagesArgs),
    /// Delete pages of organizations no longer in the registry
    DeleteOld(DeleteOldArgs),
    /// Fetch and translate organization details from the registry
    FetchDetails(FetchDetailsArgs),
    /// List the units of an organization
    Units(UnitsArgs),
    /// Look up an organization by its exact label
    Search(SearchArgs),
    /// Show runtime paths, config and snapshot state
    Status,
}

#[derive(Debug, Args)]
struct InitArgs {
    #[arg(long, help = "Overwrite an existing config.toml")]
    force: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Tree,
    Flat,
}

impl From<ModeArg> for HierarchyMode {
    fn from(value: ModeArg) -> Self {
        match value {
            ModeArg::Tree => HierarchyMode::Tree,
            ModeArg::Flat => HierarchyMode::Flat,
        }
    }
}

#[derive(Debug, Args)]
struct RecreateTreeArgs {
    #[arg(long, help = "Re-fetch records from the registry instead of the snapshot")]
    refresh: bool,
    #[arg(long, value_enum, help = "Override [hierarchy] mode from config")]
    mode: Option<ModeArg>,
}

#[derive(Debug, Args)]
struct NukeTreeArgs {
    #[arg(long, help = "Actually delete; without it only the pages are listed")]
    yes: bool,
}

#[derive(Debug, Args)]
struct UpdatePagesArgs {
    #[arg(long, help = "Re-fetch details from the registry instead of the snapshot")]
    refresh: bool,
    #[arg(long, help = "Create pages that do not exist yet")]
    force_create: bool,
    #[arg(long, help = "Show the resulting diffs without editing")]
    dry_run: bool,
    #[arg(long = "name", value_name = "NAME", help = "Limit to these organizations")]
    names: Vec<String>,
}

#[derive(Debug, Args)]
struct DeleteOldArgs {
    #[arg(long, help = "Re-fetch records from the registry instead of the snapshot")]
    refresh: bool,
    #[arg(long, help = "List stale pages without deleting")]
    dry_run: bool,
}

#[derive(Debug, Args)]
struct FetchDetailsArgs {
    #[arg(long, help = "Re-fetch the record list used for name lookups")]
    refresh: bool,
    #[arg(long = "name", value_name = "NAME", help = "Organizations to fetch (default: every content page)")]
    names: Vec<String>,
}

#[derive(Debug, Args)]
struct UnitsArgs {
    name: String,
    #[arg(long = "type", value_name = "ID", help = "Keep only these unit type ids")]
    unit_types: Vec<DictionaryId>,
}

#[derive(Debug, Args)]
struct SearchArgs {
    label: String,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let runtime = RuntimeOptions::from_cli(&cli);

    match cli.command {
        Commands::Init(args) => run_init(&runtime, args),
        Commands::RecreateTree(args) => run_recreate_tree(&runtime, args),
        Commands::NukeTree(args) => run_nuke_tree(&runtime, args),
        Commands::UpdatePages(args) => run_update_pages(&runtime, args),
        Commands::DeleteOld(args) => run_delete_old(&runtime, args),
        Commands::FetchDetails(args) => run_fetch_details(&runtime, args),
        Commands::Units(args) => run_units(&runtime, args),
        Commands::Search(args) => run_search(&runtime, args),
        Commands::Status => run_status(&runtime),
    }
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose {
        "orgsync=debug,orgsync_core=debug"
    } else {
        "orgsync=info,orgsync_core=info"
    };
    let filter = if verbose {
        EnvFilter::new(default_filter)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter))
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Everything a sync command needs once paths and config are resolved.
struct Session {
    paths: ResolvedPaths,
    config: SyncConfig,
    layout: SiteLayout,
    snapshots: SnapshotStore,
}

impl Session {
    fn open(runtime: &RuntimeOptions) -> Result<Self> {
        let paths = resolve_runtime_paths(runtime)?;
        let config = load_config(&paths.config_path)?;
        let layout = config.site_layout();
        let snapshots = SnapshotStore::new(paths.snapshot_dir.clone());
        Ok(Self {
            paths,
            config,
            layout,
            snapshots,
        })
    }

    fn registry(&self) -> Result<RegistryClient> {
        RegistryClient::new(RegistryClientConfig::from_config(&self.config))
    }

    /// Credentials are required, and checked, before any write.
    fn wiki(&self, write: bool) -> Result<MediaWikiClient> {
        let credentials = if write {
            Some(load_credentials(&self.paths.credentials_path)?)
        } else {
            None
        };
        let mut client = MediaWikiClient::new(MediaWikiClientConfig::from_config(&self.config)?)?;
        if let Some(credentials) = credentials {
            client
                .login(&credentials)
                .with_context(|| format!("failed to log in as {}", credentials.username))?;
            info!(user = %credentials.username, "logged in");
        }
        Ok(client)
    }

    fn records(&self, registry: &mut RegistryClient, refresh: bool) -> Result<Vec<OrganizationRecord>> {
        self.snapshots
            .load_or_fetch(SnapshotKind::Records, refresh, || registry.organizations())
    }

    fn print_diagnostics(&self, runtime: &RuntimeOptions) {
        if runtime.diagnostics {
            println!("\n[diagnostics]\n{}", self.paths.diagnostics());
        }
    }
}

fn resolve_runtime_paths(runtime: &RuntimeOptions) -> Result<ResolvedPaths> {
    dotenvy::dotenv().ok();

    let context = ResolutionContext::from_process()?;
    let overrides = PathOverrides {
        project_root: runtime.project_root.clone(),
        snapshot_dir: runtime.snapshot_dir.clone(),
        config: runtime.config.clone(),
    };

    let initial = resolve_paths(&context, &overrides)?;
    let project_env = initial.project_root.join(".env");
    if project_env.exists() {
        let _ = dotenvy::from_path_override(&project_env);
    }

    resolve_paths(&context, &overrides)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("failed to serialize report")?
    );
    Ok(())
}

fn finish(command: &str, success: bool, errors: &[String]) -> Result<()> {
    if success {
        return Ok(());
    }
    bail!("{command} finished with {} error(s)", errors.len())
}

fn run_init(runtime: &RuntimeOptions, args: InitArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let report = init_layout(&paths, args.force)?;

    println!("Initialized orgsync runtime layout");
    println!("project_root: {}", normalize_for_display(&paths.project_root));
    println!("state_dir: {}", normalize_for_display(&paths.state_dir));
    println!("snapshot_dir: {}", normalize_for_display(&paths.snapshot_dir));
    println!("config_path: {}", normalize_for_display(&paths.config_path));
    println!("created_dirs: {}", report.created_dirs.len());
    println!("wrote_config: {}", report.wrote_config);
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", paths.diagnostics());
    }
    Ok(())
}

fn run_recreate_tree(runtime: &RuntimeOptions, args: RecreateTreeArgs) -> Result<()> {
    let session = Session::open(runtime)?;
    let mode = args
        .mode
        .map(HierarchyMode::from)
        .unwrap_or(session.config.hierarchy.mode);
    let mut wiki = session.wiki(true)?;
    let mut registry = session.registry()?;

    let hierarchy: Hierarchy =
        session
            .snapshots
            .load_or_fetch(SnapshotKind::Hierarchy(mode), args.refresh, || {
                let records = session.records(&mut registry, args.refresh)?;
                Ok(Hierarchy::build(&records, mode))
            })?;
    let report = recreate_tree(&mut wiki, &session.layout, &hierarchy);

    if runtime.json {
        print_json(&report)?;
    } else {
        println!("recreate-tree");
        println!("mode: {}", mode.as_str());
        println!("organizations: {}", report.organizations);
        println!("created: {}", report.created);
        println!("replaced: {}", report.replaced);
        println!("categorized: {}", report.categorized);
        println!("unchanged: {}", report.unchanged);
        println!("requests: {}", report.request_count);
        print_errors(&report.errors);
    }
    session.print_diagnostics(runtime);
    finish("recreate-tree", report.success, &report.errors)
}

fn run_nuke_tree(runtime: &RuntimeOptions, args: NukeTreeArgs) -> Result<()> {
    let session = Session::open(runtime)?;
    let dry_run = !args.yes;
    let mut wiki = session.wiki(!dry_run)?;
    let report = nuke_tree(
        &mut wiki,
        &session.layout,
        dry_run,
        &session.layout.delete_reason,
    )?;

    if runtime.json {
        print_json(&report)?;
    } else {
        println!("nuke-tree");
        println!("dry_run: {}", report.dry_run);
        println!("visited: {}", report.visited);
        let label = if dry_run { "would_delete" } else { "deleted" };
        println!("{label}.count: {}", report.deleted.len());
        for title in &report.deleted {
            println!("{label}.title: {title}");
        }
        if dry_run {
            println!("hint: re-run with --yes to delete");
        }
        print_errors(&report.errors);
    }
    session.print_diagnostics(runtime);
    finish("nuke-tree", report.success, &report.errors)
}

fn run_update_pages(runtime: &RuntimeOptions, args: UpdatePagesArgs) -> Result<()> {
    let session = Session::open(runtime)?;
    let mut wiki = session.wiki(!args.dry_run)?;
    let mut registry = session.registry()?;
    let mut cache = LookupCache::new();
    let snapshots = &session.snapshots;
    let refresh = args.refresh;

    let fetched = if args.names.is_empty() {
        cached_details(snapshots, refresh, || {
            let names = content_page_names(&mut wiki, &session.layout)?;
            fetch_details(&mut registry, &mut cache, &names, |api| {
                snapshots.load_or_fetch(SnapshotKind::Records, refresh, || api.organizations())
            })
        })?
    } else {
        fetch_details(&mut registry, &mut cache, &args.names, |api| {
            snapshots.load_or_fetch(SnapshotKind::Records, refresh, || api.organizations())
        })?
    };

    let options = UpdateOptions {
        force_create: args.force_create,
        dry_run: args.dry_run,
    };
    let mut report = update_pages(&mut wiki, &session.layout, &fetched.details, options);
    report.absorb_fetch(&fetched);

    if runtime.json {
        print_json(&report)?;
    } else {
        println!("update-pages");
        println!("dry_run: {}", report.dry_run);
        println!("force_create: {}", report.force_create);
        println!("organizations: {}", report.organizations);
        println!("updated: {}", report.updated);
        println!("created: {}", report.created);
        println!("unchanged: {}", report.unchanged);
        println!("skipped: {}", report.skipped);
        for name in &report.unresolved {
            println!("unresolved.name: {name}");
        }
        println!("requests: {}", report.request_count);
        for item in &report.items {
            if let Some(diff) = &item.diff {
                println!("\n{diff}");
            }
        }
        print_errors(&report.errors);
    }
    session.print_diagnostics(runtime);
    finish("update-pages", report.success, &report.errors)
}

fn run_delete_old(runtime: &RuntimeOptions, args: DeleteOldArgs) -> Result<()> {
    let session = Session::open(runtime)?;
    let mut wiki = session.wiki(!args.dry_run)?;
    let mut registry = session.registry()?;
    let records = session.records(&mut registry, args.refresh)?;
    let report = prune_removed(&mut wiki, &session.layout, &records, args.dry_run)?;

    if runtime.json {
        print_json(&report)?;
    } else {
        println!("delete-old");
        println!("dry_run: {}", report.dry_run);
        println!("upstream: {}", report.upstream);
        println!("catalogue: {}", report.catalogue);
        println!("stale.count: {}", report.stale.len());
        for item in &report.items {
            println!("{}: {}", item.action, item.name);
        }
        println!("deleted_pages: {}", report.deleted_pages);
        println!("deleted_categories: {}", report.deleted_categories);
        print_errors(&report.errors);
    }
    session.print_diagnostics(runtime);
    finish("delete-old", report.success, &report.errors)
}

fn run_fetch_details(runtime: &RuntimeOptions, args: FetchDetailsArgs) -> Result<()> {
    let session = Session::open(runtime)?;
    let mut registry = session.registry()?;
    let mut cache = LookupCache::new();
    let snapshots = &session.snapshots;
    let refresh = args.refresh;

    let full_run = args.names.is_empty();
    let names = if full_run {
        let mut wiki = session.wiki(false)?;
        content_page_names(&mut wiki, &session.layout)?
    } else {
        args.names.clone()
    };
    let report = fetch_details(&mut registry, &mut cache, &names, |api| {
        snapshots.load_or_fetch(SnapshotKind::Records, refresh, || api.organizations())
    })?;
    if full_run && report.success {
        let path = snapshots.save(SnapshotKind::Details, &report.details)?;
        info!(path = %normalize_for_display(&path), "details snapshot written");
    } else if full_run {
        warn!("details fetch incomplete; snapshot not updated");
    }

    if runtime.json {
        print_json(&report)?;
    } else {
        println!("fetch-details");
        println!("requested: {}", report.requested);
        println!("fetched: {}", report.fetched);
        println!("skipped.count: {}", report.skipped.len());
        for name in &report.skipped {
            println!("skipped.name: {name}");
        }
        println!("requests: {}", report.request_count);
        print_errors(&report.errors);
    }
    session.print_diagnostics(runtime);
    finish("fetch-details", report.success, &report.errors)
}

fn run_units(runtime: &RuntimeOptions, args: UnitsArgs) -> Result<()> {
    let session = Session::open(runtime)?;
    let mut registry = session.registry()?;
    let mut cache = LookupCache::new();
    let snapshots = &session.snapshots;

    let found = units(
        &mut registry,
        &mut cache,
        &args.name,
        &args.unit_types,
        |api| snapshots.load_or_fetch(SnapshotKind::Records, false, || api.organizations()),
    )?;

    if runtime.json {
        print_json(&found)?;
    } else {
        println!("units");
        println!("organization: {}", args.name);
        println!("units.count: {}", found.len());
        for unit in &found {
            let unit_type = unit
                .unit_type
                .map(|id| id.to_string())
                .unwrap_or_else(|| "-".to_string());
            println!("unit: {} [{}] {}", unit.code, unit_type, unit.preferred_label);
        }
    }
    session.print_diagnostics(runtime);
    Ok(())
}

fn run_search(runtime: &RuntimeOptions, args: SearchArgs) -> Result<()> {
    let session = Session::open(runtime)?;
    let mut registry = session.registry()?;
    let found = registry.search(&args.label)?;

    if runtime.json {
        print_json(&found)?;
    } else {
        println!("search");
        println!("label: {}", args.label);
        match &found {
            Some(record) => {
                println!("code: {}", record.code);
                println!("preferred_label: {}", record.title());
                println!("parent_code: {}", record.parent_code().unwrap_or("<none>"));
                println!("status: {}", record.status.as_deref().unwrap_or("<none>"));
            }
            None => println!("result: <none>"),
        }
    }
    session.print_diagnostics(runtime);
    Ok(())
}

fn run_status(runtime: &RuntimeOptions) -> Result<()> {
    let session = Session::open(runtime)?;
    let paths = &session.paths;

    println!("runtime status");
    println!("project_root: {}", normalize_for_display(&paths.project_root));
    println!("config_path: {}", normalize_for_display(&paths.config_path));
    println!("config_exists: {}", format_flag(paths.config_path.exists()));
    println!("registry_url: {}", session.config.registry_url());
    println!(
        "wiki_api_url: {}",
        session
            .config
            .wiki_api_url()
            .unwrap_or_else(|| "<unset>".to_string())
    );
    println!("hierarchy_mode: {}", session.config.hierarchy.mode.as_str());
    println!(
        "credentials: {}",
        format_flag(load_credentials(&paths.credentials_path).is_ok())
    );
    println!("snapshot_dir: {}", normalize_for_display(session.snapshots.dir()));
    for kind in SnapshotKind::ALL {
        println!(
            "snapshot.{}: {}",
            kind.as_str(),
            format_flag(session.snapshots.exists(kind))
        );
    }
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", paths.diagnostics());
    }
    Ok(())
}

fn print_errors(errors: &[String]) {
    if errors.is_empty() {
        return;
    }
    println!("errors:");
    for error in errors {
        println!("  - {error}");
    }
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
