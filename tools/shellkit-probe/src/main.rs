//! Probe harness for the shellkit offline cache controller.
//!
//! Drives a controller against a live origin with an on-disk cache, so the
//! caching policies can be observed from a terminal.
//!
//! ## Usage
//!
//! ```bash
//! # Seed the current generation and sweep older ones
//! shellkit-probe --origin http://localhost:8888/ install
//!
//! # Fetch through the controller, then again with the network cut
//! shellkit-probe fetch / /favicon.ico /.netlify/functions/chat
//! shellkit-probe fetch --offline /favicon.ico /.netlify/functions/chat
//!
//! # Look at what is stored, then drop everything but one generation
//! shellkit-probe inspect
//! shellkit-probe purge --keep we-luxembourg-v2
//! ```

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Serialize;
use shellkit_common::{init_logging, LogConfig, LogFormat, Result, ResultExt, ShellKitError};
use shellkit_net::{Fetcher, HttpFetcher, LoaderConfig, OfflineFetcher, Request, ResponseSource};
use shellkit_sw::{
    CacheStore, ControllerConfig, ControllerError, ControllerEvent, FetchDecision,
    FileCacheStore, GenerationId, OfflineController, SweepReport,
};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use url::Url;

#[derive(Parser)]
#[command(name = "shellkit-probe")]
#[command(about = "Probe harness for the shellkit offline cache controller")]
struct Cli {
    /// Controller config file (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding cache generations
    #[arg(long, global = true, default_value = ".shellkit-cache")]
    cache_dir: PathBuf,

    /// Origin to control, overriding the config file
    #[arg(long, global = true)]
    origin: Option<String>,

    /// Log format (pretty, compact, json)
    #[arg(long, global = true, default_value = "compact")]
    log_format: LogFormat,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Seed the current generation, then sweep every other one
    Install,

    /// Fetch paths through the controller
    Fetch {
        /// Paths or URLs, resolved against the origin
        #[arg(required = true)]
        paths: Vec<String>,
        /// Cut the network: every fetch fails
        #[arg(long)]
        offline: bool,
    },

    /// List stored generations and their entries
    Inspect,

    /// Delete every generation except one
    Purge {
        /// Generation to keep
        #[arg(long)]
        keep: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(LogConfig::from_verbosity(cli.verbose).with_format(cli.log_format));

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(category = e.category(), error = %e, "Probe failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_deref(), cli.origin.as_deref())?;
    let store: Arc<dyn CacheStore> = Arc::new(FileCacheStore::new(&cli.cache_dir));
    debug!(cache_dir = %cli.cache_dir.display(), origin = %config.origin, "Probe starting");

    match cli.command {
        Commands::Install => {
            let report = install(config, store, http_fetcher()?).await?;
            print_json(&report)
        }
        Commands::Fetch { paths, offline } => {
            let fetcher: Arc<dyn Fetcher> = if offline {
                Arc::new(OfflineFetcher)
            } else {
                http_fetcher()?
            };
            let reports = fetch(config, store, fetcher, offline, &paths).await?;
            print_json(&reports)?;

            let failed = reports.iter().filter(|r| r.error.is_some()).count();
            if failed > 0 {
                return Err(ShellKitError::network(format!(
                    "{failed} of {} fetches failed",
                    reports.len()
                )));
            }
            Ok(())
        }
        Commands::Inspect => {
            let report = inspect(&config.generation, store.as_ref()).await?;
            print_json(&report)
        }
        Commands::Purge { keep } => {
            let report = purge(config, store, GenerationId::new(keep)).await?;
            print_json(&report)
        }
    }
}

fn load_config(path: Option<&Path>, origin: Option<&str>) -> Result<ControllerConfig> {
    let mut config = match path {
        Some(path) => ControllerConfig::from_file(path).map_err(|e| {
            ShellKitError::config_with_source(format!("loading {}", path.display()), e)
        })?,
        None => ControllerConfig::default(),
    };

    if let Some(origin) = origin {
        config.origin = Url::parse(origin)
            .map_err(|e| ShellKitError::config_with_source(format!("origin {origin:?}"), e))?;
    }
    config
        .validate()
        .map_err(|e| ShellKitError::config_with_source("invalid controller config", e))?;
    Ok(config)
}

fn http_fetcher() -> Result<Arc<dyn Fetcher>> {
    let fetcher = HttpFetcher::new(LoaderConfig::default())
        .map_err(|e| ShellKitError::network_with_source("building HTTP client", e))?;
    Ok(Arc::new(fetcher))
}

/// Map a controller error onto the application error categories.
fn controller_error(e: ControllerError) -> ShellKitError {
    match e {
        ControllerError::Network(e) => ShellKitError::network_with_source("fetch failed", e),
        ControllerError::Cache(e) => ShellKitError::cache_with_source("cache store failed", e),
        ControllerError::Config(e) => ShellKitError::config_with_source("invalid config", e),
        other => ShellKitError::controller_with_source("controller failed", other),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("serializing report")?;
    println!("{json}");
    Ok(())
}

/// Log whatever the controller reported while a command ran.
fn log_events(events: &mut mpsc::UnboundedReceiver<ControllerEvent>) {
    while let Ok(event) = events.try_recv() {
        match event {
            ControllerEvent::BackgroundFailure { task, error } => {
                warn!(task, %error, "Background task failed")
            }
            other => debug!(event = ?other, "Controller event"),
        }
    }
}

#[derive(Debug, Serialize)]
struct InstallReport {
    generation: GenerationId,
    seeded: usize,
    sweep: SweepReport,
}

async fn install(
    config: ControllerConfig,
    store: Arc<dyn CacheStore>,
    fetcher: Arc<dyn Fetcher>,
) -> Result<InstallReport> {
    let seeded = config.seed_urls.len();
    let (controller, mut events) =
        OfflineController::new(config, store, fetcher).map_err(controller_error)?;

    let result = async {
        controller.initialize().await?;
        controller.activate().await
    }
    .await;
    log_events(&mut events);
    let sweep = result.map_err(controller_error)?;

    info!(generation = %controller.generation(), seeded, "Installed");
    Ok(InstallReport {
        generation: controller.generation().clone(),
        seeded,
        sweep,
    })
}

#[derive(Debug, Serialize)]
struct FetchReport {
    url: String,
    decision: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    source: Option<ResponseSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    content_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    bytes: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl FetchReport {
    fn new(url: String, decision: &'static str) -> Self {
        Self {
            url,
            decision,
            status: None,
            source: None,
            content_type: None,
            bytes: None,
            error: None,
        }
    }
}

/// Attach to the stored generation, seeding it first when online.
async fn attach(controller: &OfflineController, offline: bool) -> Result<()> {
    if controller.resume().await.map_err(controller_error)? {
        return Ok(());
    }
    if offline {
        return Err(ShellKitError::controller(format!(
            "no complete {} generation stored; run install first",
            controller.generation()
        )));
    }
    controller.initialize().await.map_err(controller_error)
}

async fn fetch(
    config: ControllerConfig,
    store: Arc<dyn CacheStore>,
    fetcher: Arc<dyn Fetcher>,
    offline: bool,
    paths: &[String],
) -> Result<Vec<FetchReport>> {
    let origin = config.origin.clone();
    let (controller, mut events) =
        OfflineController::new(config, store, fetcher).map_err(controller_error)?;
    attach(&controller, offline).await?;

    let mut reports = Vec::with_capacity(paths.len());
    for path in paths {
        let url = origin
            .join(path)
            .map_err(|e| ShellKitError::InvalidArgument(format!("{path:?}: {e}")))?;
        let key = url.to_string();

        let report = match controller.handle_request(Request::get(url)).await {
            Ok(FetchDecision::Passthrough) => FetchReport::new(key, "passthrough"),
            Ok(FetchDecision::Respond(response)) => FetchReport {
                status: Some(response.status.as_u16()),
                source: Some(response.source),
                content_type: response.content_type().map(|m| m.to_string()),
                bytes: Some(response.body.len()),
                ..FetchReport::new(key, "respond")
            },
            Err(e) => FetchReport {
                error: Some(e.to_string()),
                ..FetchReport::new(key, "error")
            },
        };
        reports.push(report);
    }

    controller.settle().await;
    log_events(&mut events);
    Ok(reports)
}

#[derive(Debug, Serialize)]
struct GenerationReport {
    generation: GenerationId,
    current: bool,
    entries: Vec<EntryReport>,
}

#[derive(Debug, Serialize)]
struct EntryReport {
    url: String,
    status: u16,
    bytes: usize,
    cached_at: u64,
}

async fn inspect(current: &GenerationId, store: &dyn CacheStore) -> Result<Vec<GenerationReport>> {
    let cache_error = |e: shellkit_sw::CacheError| ShellKitError::cache_with_source("reading cache store", e);

    let mut reports = Vec::new();
    for generation in store.keys().await.map_err(cache_error)? {
        let mut entries: Vec<EntryReport> = store
            .entries(&generation)
            .await
            .map_err(cache_error)?
            .into_iter()
            .map(|e| EntryReport {
                bytes: e.body.len(),
                url: e.url,
                status: e.status,
                cached_at: e.cached_at,
            })
            .collect();
        entries.sort_by(|a, b| a.url.cmp(&b.url));

        reports.push(GenerationReport {
            current: generation == *current,
            generation,
            entries,
        });
    }
    Ok(reports)
}

async fn purge(
    config: ControllerConfig,
    store: Arc<dyn CacheStore>,
    keep: GenerationId,
) -> Result<SweepReport> {
    let (controller, mut events) =
        OfflineController::new(config, store, Arc::new(OfflineFetcher)).map_err(controller_error)?;
    let report = controller.supersede(&keep).await.map_err(controller_error)?;
    log_events(&mut events);
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn origin() -> MockServer {
        let server = MockServer::start().await;
        for (route, body) in [
            ("/", "<html>shell</html>"),
            ("/index.html", "<html>index</html>"),
            ("/manifest.webmanifest", "{}"),
            ("/favicon.ico", "ICO"),
        ] {
            Mock::given(method("GET"))
                .and(path(route))
                .respond_with(ResponseTemplate::new(200).set_body_string(body))
                .mount(&server)
                .await;
        }
        server
    }

    fn config_for(server: &MockServer) -> ControllerConfig {
        load_config(None, Some(&server.uri())).unwrap()
    }

    #[test]
    fn test_cli_parses_globals_after_subcommand() {
        let cli = Cli::try_parse_from([
            "shellkit-probe",
            "fetch",
            "/",
            "/favicon.ico",
            "--offline",
            "--cache-dir",
            "/tmp/cache",
            "-vv",
            "--log-format",
            "json",
        ])
        .unwrap();

        assert_eq!(cli.cache_dir, PathBuf::from("/tmp/cache"));
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.log_format, LogFormat::Json);
        match cli.command {
            Commands::Fetch { paths, offline } => {
                assert_eq!(paths, vec!["/", "/favicon.ico"]);
                assert!(offline);
            }
            _ => panic!("expected fetch"),
        }
    }

    #[test]
    fn test_cli_requires_keep_for_purge() {
        assert!(Cli::try_parse_from(["shellkit-probe", "purge"]).is_err());
        assert!(Cli::try_parse_from(["shellkit-probe", "fetch"]).is_err());
    }

    #[test]
    fn test_bad_origin_is_a_config_error() {
        let err = load_config(None, Some("not a url")).unwrap_err();
        assert_eq!(err.category(), "config");

        let err = load_config(None, Some("ftp://files.lu/")).unwrap_err();
        assert_eq!(err.category(), "config");
    }

    #[test]
    fn test_unserializable_report_is_internal() {
        // JSON object keys must be strings.
        let report: std::collections::BTreeMap<(u8, u8), u8> = [((1, 2), 3)].into();
        let err = print_json(&report).unwrap_err();
        assert_eq!(err.category(), "internal");
        assert!(err.to_string().contains("serializing report"));
    }

    #[test]
    fn test_controller_errors_keep_their_category() {
        let err = controller_error(ControllerError::Network(shellkit_net::NetError::Offline));
        assert_eq!(err.category(), "network");
        let err = controller_error(ControllerError::StateError("failed".into()));
        assert_eq!(err.category(), "controller");
    }

    #[tokio::test]
    async fn test_install_then_fetch_offline() {
        let server = origin().await;
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn CacheStore> = Arc::new(FileCacheStore::new(dir.path()));

        let report = install(config_for(&server), store.clone(), http_fetcher().unwrap())
            .await
            .unwrap();
        assert_eq!(report.seeded, 4);
        assert!(report.sweep.purged.is_empty());

        let paths = vec![
            "/favicon.ico".to_string(),
            "/.netlify/functions/chat".to_string(),
            "https://fonts.googleapis.com/css2".to_string(),
            "/never-seen.png".to_string(),
        ];
        let reports = fetch(config_for(&server), store, Arc::new(OfflineFetcher), true, &paths)
            .await
            .unwrap();

        assert_eq!(reports[0].source, Some(ResponseSource::Cache));
        assert_eq!(reports[0].bytes, Some(3));
        assert_eq!(reports[1].source, Some(ResponseSource::Synthesized));
        assert_eq!(reports[1].content_type.as_deref(), Some("application/json"));
        assert_eq!(reports[2].decision, "passthrough");
        assert_eq!(reports[3].decision, "error");
    }

    #[tokio::test]
    async fn test_offline_fetch_without_install_fails() {
        let server = origin().await;
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn CacheStore> = Arc::new(FileCacheStore::new(dir.path()));

        let err = fetch(
            config_for(&server),
            store,
            Arc::new(OfflineFetcher),
            true,
            &["/".to_string()],
        )
        .await
        .unwrap_err();
        assert_eq!(err.category(), "controller");
    }

    #[tokio::test]
    async fn test_inspect_and_purge() {
        let server = origin().await;
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn CacheStore> = Arc::new(FileCacheStore::new(dir.path()));
        let config = config_for(&server);
        install(config.clone(), store.clone(), http_fetcher().unwrap())
            .await
            .unwrap();

        let generations = inspect(&config.generation, store.as_ref()).await.unwrap();
        assert_eq!(generations.len(), 1);
        assert!(generations[0].current);
        assert_eq!(generations[0].entries.len(), 4);
        assert_eq!(generations[0].entries[0].url, format!("{}/", server.uri()));

        let report = purge(config.clone(), store.clone(), GenerationId::new("we-luxembourg-v2"))
            .await
            .unwrap();
        assert_eq!(report.purged, vec![config.generation.clone()]);
        assert!(inspect(&config.generation, store.as_ref())
            .await
            .unwrap()
            .is_empty());
    }
}
