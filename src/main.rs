//! cachegate CLI
//!
//! Entry point for the `cachegate` command-line tool. Machine-readable
//! results go to stdout or `$GITHUB_OUTPUT`; logs go to stderr.

use cachegate::config::{
    default_host_config_path, default_repo_config_path, new_run_id, process_env_overrides, ConfigError,
    ConfigLayers, EffectiveConfig, Settings, StoreBackend,
};
use cachegate::{
    generate_build_matrix, generate_test_matrix, CacheQuery, CompletionStore, DigestEngine, DigestError,
    DigestType, MatrixError, MemoryStore, ObjectStore, OutputError, OutputWriter, QueryError, S3Store,
    TestMatrixRequest,
};
use cachegate_store::Credentials;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::process;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "cachegate")]
#[command(about = "Content-addressed build/test completion cache and CI matrix generator", version)]
struct Cli {
    /// Root of the source tree to digest
    #[arg(long, global = true, default_value = ".")]
    source_root: PathBuf,

    /// Repo config file (default: <source-root>/.cachegate.toml)
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// Completion store backend
    #[arg(long, global = true, value_enum)]
    store: Option<StoreArg>,

    /// Log at debug level
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum StoreArg {
    S3,
    Memory,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute a source-tree digest
    Digest {
        /// Digest type: build, test or single-client-test
        #[arg(long = "type", short = 't', default_value = "build")]
        digest_type: String,

        /// Also list every hashed file
        #[arg(long)]
        list: bool,
    },

    /// Print the completion keys for an entry
    Key {
        #[arg(long, short = 'e')]
        entry: String,

        #[arg(long = "type", short = 't', default_value = "build")]
        digest_type: String,
    },

    /// Check whether an entry already completed
    Query {
        #[arg(long, short = 'e')]
        entry: String,

        #[arg(long = "type", short = 't', default_value = "build")]
        digest_type: String,
    },

    /// Mark an entry complete
    Complete {
        #[arg(long, short = 'e')]
        entry: String,

        #[arg(long = "type", short = 't', default_value = "build")]
        digest_type: String,
    },

    /// Remove an entry's completion markers (best effort)
    Invalidate {
        #[arg(long, short = 'e')]
        entry: String,

        #[arg(long = "type", short = 't', default_value = "build")]
        digest_type: String,
    },

    /// Generate the test job matrix
    TestMatrix {
        /// Devices, comma-separated (e.g. "cpu,cuda")
        #[arg(long, value_delimiter = ',', required = true)]
        devices: Vec<String>,

        /// Test types, comma-separated (e.g. "module,speed-test")
        #[arg(long, value_delimiter = ',', required = true)]
        test_types: Vec<String>,

        /// Number of ranks
        #[arg(long, default_value_t = 1)]
        world_size: u32,

        /// Generate distributed jobs
        #[arg(long)]
        distributed: bool,
    },

    /// Generate the build job matrix
    BuildMatrix {
        /// Compute platforms, comma-separated (e.g. "cpu,cu118")
        #[arg(long, value_delimiter = ',', required = true)]
        platforms: Vec<String>,
    },

    /// Print the effective configuration
    Config,
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Digest(#[from] DigestError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Matrix(#[from] MatrixError),

    #[error(transparent)]
    Output(#[from] OutputError),

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// 2 for store failures, 1 for everything else.
    fn exit_code(&self) -> i32 {
        match self {
            CliError::Query(QueryError::Store(_))
            | CliError::Matrix(MatrixError::Query(QueryError::Store(_))) => 2,
            _ => 1,
        }
    }
}

/// The configured store, owned for the life of the command.
enum Backend {
    S3(S3Store),
    Memory(MemoryStore),
}

impl Backend {
    fn open(settings: &Settings) -> Result<Self, CliError> {
        match settings.store.backend {
            StoreBackend::S3 => {
                let config = settings.s3_config()?;
                let credentials =
                    Credentials::from_env().map_err(|e| ConfigError::ValidationError(e.to_string()))?;
                info!(endpoint = %config.endpoint, bucket = %config.bucket, "using s3 store");
                Ok(Backend::S3(S3Store::new(config, credentials)))
            }
            StoreBackend::Memory => {
                warn!("using in-memory store; markers are discarded on exit");
                Ok(Backend::Memory(MemoryStore::new()))
            }
        }
    }

    fn as_store(&self) -> &dyn ObjectStore {
        match self {
            Backend::S3(store) => store,
            Backend::Memory(store) => store,
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        process::exit(e.exit_code());
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(filter)
        .init();
}

fn run(cli: Cli) -> Result<(), CliError> {
    let effective = load_config(&cli)?;
    let settings = effective.settings();

    match cli.command {
        Commands::Digest { digest_type, list } => run_digest(&cli.source_root, settings, &digest_type, list),
        Commands::Key { entry, digest_type } => run_key(&cli.source_root, settings, &entry, &digest_type),
        Commands::Query { entry, digest_type } => run_query(&cli.source_root, settings, &entry, &digest_type),
        Commands::Complete { entry, digest_type } => {
            run_complete(&cli.source_root, settings, &entry, &digest_type)
        }
        Commands::Invalidate { entry, digest_type } => {
            run_invalidate(&cli.source_root, settings, &entry, &digest_type)
        }
        Commands::TestMatrix {
            devices,
            test_types,
            world_size,
            distributed,
        } => {
            let request = TestMatrixRequest {
                devices,
                test_types,
                world_size,
                distributed,
            };
            run_test_matrix(&cli.source_root, settings, &request)
        }
        Commands::BuildMatrix { platforms } => run_build_matrix(&cli.source_root, settings, &platforms),
        Commands::Config => {
            println!("{}", effective.to_json()?);
            Ok(())
        }
    }
}

fn load_config(cli: &Cli) -> Result<EffectiveConfig, CliError> {
    let host_path = default_host_config_path();
    let repo_path = cli
        .config
        .clone()
        .unwrap_or_else(|| default_repo_config_path(&cli.source_root));

    if cli.config.is_some() && !repo_path.exists() {
        return Err(ConfigError::IoError(format!("config file not found: {}", repo_path.display())).into());
    }

    let cli_overrides = cli.store.map(|store| {
        let backend = match store {
            StoreArg::S3 => "s3",
            StoreArg::Memory => "memory",
        };
        serde_json::json!({ "store": { "backend": backend } })
    });

    let effective = EffectiveConfig::build(ConfigLayers {
        host_path: host_path.as_deref(),
        repo_path: Some(repo_path.as_path()),
        env: process_env_overrides()?,
        cli: cli_overrides,
    })?
    .with_run_id(new_run_id());

    info!(run_id = effective.run_id.as_deref().unwrap_or_default(), "configuration loaded");
    Ok(effective)
}

fn engine(source_root: &Path, settings: &Settings) -> DigestEngine {
    DigestEngine::new(source_root).with_profile(settings.patterns.clone())
}

fn run_digest(source_root: &Path, settings: &Settings, digest_type: &str, list: bool) -> Result<(), CliError> {
    let digest_type: DigestType = digest_type.parse()?;
    let report = engine(source_root, settings).compute_report(digest_type.options())?;

    if list {
        for file in &report.files {
            println!("{}  {:>10}  {}", file.sha256, file.size, file.path);
        }
    }
    println!("{}", report.digest);
    Ok(())
}

fn run_key(source_root: &Path, settings: &Settings, entry: &str, digest_type: &str) -> Result<(), CliError> {
    let digest_type: DigestType = digest_type.parse()?;
    // Key derivation never touches the store
    let store = MemoryStore::new();
    let mut query = CacheQuery::new(
        engine(source_root, settings),
        settings.key_space()?,
        CompletionStore::new(&store),
    );

    for key in query.derive_keys(entry, digest_type)?.keys {
        println!("{}", key);
    }
    Ok(())
}

fn run_query(source_root: &Path, settings: &Settings, entry: &str, digest_type: &str) -> Result<(), CliError> {
    let backend = Backend::open(settings)?;
    let completion =
        CompletionStore::new(backend.as_store()).with_fallback(settings.store.forbidden_fallback.clone());
    let mut query = CacheQuery::new(engine(source_root, settings), settings.key_space()?, completion);

    let result = query.query_named(entry, digest_type)?;

    let output = OutputWriter::from_env();
    output.set("cache-hit", if result.cache_hit { "true" } else { "false" })?;
    output.set("build-digest", result.build_digest.as_str())?;
    if let Some(test_digest) = &result.test_digest {
        output.set("test-digest", test_digest.as_str())?;
    }
    output.set_json("keys", &result.keys)?;
    Ok(())
}

fn run_complete(source_root: &Path, settings: &Settings, entry: &str, digest_type: &str) -> Result<(), CliError> {
    let digest_type: DigestType = digest_type.parse()?;
    let backend = Backend::open(settings)?;
    let mut query = CacheQuery::new(
        engine(source_root, settings),
        settings.key_space()?,
        CompletionStore::new(backend.as_store()),
    );

    let keys = query.complete(entry, digest_type)?;
    OutputWriter::from_env().set_json("keys", &keys)?;
    Ok(())
}

fn run_invalidate(source_root: &Path, settings: &Settings, entry: &str, digest_type: &str) -> Result<(), CliError> {
    let digest_type: DigestType = digest_type.parse()?;
    let backend = Backend::open(settings)?;
    let mut query = CacheQuery::new(
        engine(source_root, settings),
        settings.key_space()?,
        CompletionStore::new(backend.as_store()),
    );

    let report = query.invalidate(entry, digest_type)?;
    if !report.is_clean() {
        warn!(failed = report.failed.len(), "some completion markers could not be removed");
    }
    OutputWriter::from_env().set_json("keys", &report.removed)?;
    Ok(())
}

fn run_test_matrix(
    source_root: &Path,
    settings: &Settings,
    request: &TestMatrixRequest,
) -> Result<(), CliError> {
    let backend = Backend::open(settings)?;
    let completion =
        CompletionStore::new(backend.as_store()).with_fallback(settings.store.forbidden_fallback.clone());
    let mut query = CacheQuery::new(engine(source_root, settings), settings.key_space()?, completion);

    let matrix = generate_test_matrix(&mut query, request, &settings.matrix)?;
    OutputWriter::from_env().set_json("matrix", &matrix)?;
    Ok(())
}

fn run_build_matrix(source_root: &Path, settings: &Settings, platforms: &[String]) -> Result<(), CliError> {
    let backend = Backend::open(settings)?;
    let completion =
        CompletionStore::new(backend.as_store()).with_fallback(settings.store.forbidden_fallback.clone());
    let mut query = CacheQuery::new(engine(source_root, settings), settings.key_space()?, completion);

    let matrix = generate_build_matrix(&mut query, platforms, &settings.matrix)?;
    OutputWriter::from_env().set_json("matrix", &matrix)?;
    Ok(())
}
