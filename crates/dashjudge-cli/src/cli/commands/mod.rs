use super::args::*;
use dashjudge_core::config::{load_config, ModelConfig, ProjectConfig, ProviderKind};
use dashjudge_core::errors::ConfigError;
use dashjudge_core::model::RunSummary;
use dashjudge_core::providers::llm::fake::FakeClient;
use dashjudge_core::providers::llm::openai::OpenAIClient;
use dashjudge_core::providers::llm::{ClientRegistry, LlmClient};
use dashjudge_core::storage::Store;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;

pub mod extract;
pub mod run;
pub mod validate;

pub mod exit_codes {
    pub const OK: i32 = 0;
    pub const TEST_FAILED: i32 = 1;
    pub const CONFIG_ERROR: i32 = 2;
    /// `validate` on a document that stays invalid. Shares the value of `CONFIG_ERROR`.
    pub const INVALID_DOCUMENT: i32 = 2;
}

pub async fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    match cli.cmd {
        Command::Init(args) => cmd_init(args),
        Command::Import(args) => cmd_import(args),
        Command::Run(args) => run::run(args).await,
        Command::Status(args) => cmd_status(args),
        Command::Cancel(args) => cmd_cancel(args),
        Command::Validate(args) => validate::run(args).await,
        Command::Extract(args) => extract::run(args).await,
        Command::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(exit_codes::OK)
        }
    }
}

fn cmd_init(args: InitArgs) -> anyhow::Result<i32> {
    if args.config.exists() {
        eprintln!("note: {} already exists", args.config.display());
    } else {
        ensure_parent_dir(&args.config)?;
        dashjudge_core::config::write_sample_config(&args.config)?;
        eprintln!("created {}", args.config.display());
    }

    if args.gitignore {
        let path = Path::new(".gitignore");
        if path.exists() {
            eprintln!("note: {} already exists (skipped)", path.display());
        } else {
            std::fs::write(path, crate::templates::GITIGNORE)?;
            eprintln!("created {}", path.display());
        }
    }
    Ok(exit_codes::OK)
}

fn cmd_import(args: ImportArgs) -> anyhow::Result<i32> {
    let cfg = match load_config(&args.config, args.strict) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("config error: {}", e);
            return Ok(exit_codes::CONFIG_ERROR);
        }
    };
    let store = open_store(&args.db)?;
    let summary = cfg.import_into(&store)?;
    eprintln!(
        "imported {} prompts and {} test cases ({} inactive) into {}",
        summary.prompts,
        summary.test_cases,
        summary.inactive,
        args.db.display()
    );
    Ok(exit_codes::OK)
}

fn cmd_status(args: StatusArgs) -> anyhow::Result<i32> {
    let store = open_store(&args.db)?;
    let run_id = match args.run_id {
        Some(id) => id,
        None => match store.list_runs(1)?.first() {
            Some(run) => run.id,
            None => {
                eprintln!("no runs found in {}", args.db.display());
                return Ok(exit_codes::CONFIG_ERROR);
            }
        },
    };
    match store.get_run_summary(run_id)? {
        Some(summary) => {
            print_summary(&summary, &args.format)?;
            Ok(exit_codes::OK)
        }
        None => {
            eprintln!("run #{} not found", run_id);
            Ok(exit_codes::CONFIG_ERROR)
        }
    }
}

fn cmd_cancel(args: CancelArgs) -> anyhow::Result<i32> {
    let store = open_store(&args.db)?;
    match store.request_cancel(args.run_id)? {
        Some(status) => {
            eprintln!(
                "cancellation requested for run #{} (status: {})",
                args.run_id, status
            );
            Ok(exit_codes::OK)
        }
        None => {
            eprintln!("run #{} not found", args.run_id);
            Ok(exit_codes::CONFIG_ERROR)
        }
    }
}

pub(crate) fn print_summary(summary: &RunSummary, format: &str) -> anyhow::Result<()> {
    if format == "json" {
        println!("{}", serde_json::to_string_pretty(summary)?);
    } else {
        dashjudge_core::report::console::print_summary(summary);
    }
    Ok(())
}

pub(crate) fn open_store(db: &Path) -> anyhow::Result<Store> {
    ensure_parent_dir(db)?;
    let store = Store::open(db)?;
    store.init_schema()?;
    Ok(store)
}

fn ensure_parent_dir(path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Reads a file, or stdin when the path is `-`.
pub(crate) async fn read_input(path: &Path) -> anyhow::Result<String> {
    if path == Path::new("-") {
        let mut buf = String::new();
        tokio::io::stdin().read_to_string(&mut buf).await?;
        return Ok(buf);
    }
    tokio::fs::read_to_string(path)
        .await
        .map_err(|e| anyhow::anyhow!("failed to read {}: {}", path.display(), e))
}

/// Builds clients for the given model ids only, so unused OpenAI models do not
/// require an API key.
pub(crate) fn build_registry(
    cfg: &ProjectConfig,
    model_ids: &[&str],
) -> Result<ClientRegistry, ConfigError> {
    let mut registry = ClientRegistry::new();
    for id in model_ids {
        if registry.contains(id) {
            continue;
        }
        let model = cfg
            .model(id)
            .ok_or_else(|| ConfigError(format!("model '{}' is not configured", id)))?;
        let client = build_client(cfg, model)?;
        registry.register(model.model_ref(), client);
    }
    Ok(registry)
}

fn build_client(cfg: &ProjectConfig, model: &ModelConfig) -> Result<Arc<dyn LlmClient>, ConfigError> {
    match model.provider {
        ProviderKind::Fake => {
            let client: Arc<dyn LlmClient> = if model.responses.is_empty() {
                Arc::new(FakeClient::new("{}"))
            } else {
                Arc::new(FakeClient::scripted(model.responses.iter().cloned()))
            };
            Ok(client)
        }
        ProviderKind::OpenAI => {
            let key = std::env::var(&model.api_key_env).map_err(|_| {
                ConfigError(format!(
                    "model '{}' needs an API key in ${}",
                    model.id, model.api_key_env
                ))
            })?;
            let timeout = model
                .timeout_seconds
                .unwrap_or(cfg.settings.timeout_seconds);
            let client = OpenAIClient::new(key, model.base_url.clone(), Duration::from_secs(timeout))
                .map_err(|e| ConfigError(format!("model '{}': {}", model.id, e)))?;
            Ok(Arc::new(client))
        }
    }
}
