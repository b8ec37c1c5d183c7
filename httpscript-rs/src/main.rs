use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde_json::json;

use httpscript::cli::{Cli, ConfigFile};
use httpscript::{
    Config, DirLoader, EmbeddedLoader, Harness, HttpClient, MockHttpClient, ReqwestClient,
    ScriptEvaluator, ScriptLoader, ScriptPool,
};

/// Latency of the built-in demo routes.
const DEMO_DELAY: Duration = Duration::from_millis(50);

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let cli = Cli::parse();
    if let Err(e) = cli.validate() {
        eprintln!("httpscript: {e}");
        return ExitCode::from(2);
    }

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            eprintln!("httpscript: {e:#}");
            ExitCode::from(2)
        }
    }
}

/// `RUST_LOG` wins; otherwise warnings plus script output.
fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,script=info"));
    let init = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
    if let Err(err) = init {
        eprintln!("httpscript: tracing already initialized: {err}");
    }
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::new();

    match cli.config_file() {
        ConfigFile::Explicit(path) | ConfigFile::Default(path) => {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("reading config {}", path.display()))?;
            for err in config.apply_str(&text) {
                tracing::warn!("{}: {err}", path.display());
            }
        }
        ConfigFile::Skip => {}
    }
    for err in config.apply_env(std::env::vars()) {
        tracing::warn!("{err}");
    }
    if let Some(err) = cli.apply_to(&mut config).into_iter().next() {
        bail!("{err}");
    }
    Ok(config)
}

fn build_client(cli: &Cli, config: &Config) -> Result<Arc<dyn HttpClient>> {
    if let Some(routes) = &config.mock_routes {
        let client = MockHttpClient::from_route_file(routes)
            .with_context(|| format!("loading mock routes from {}", routes.display()))?;
        return Ok(Arc::new(client));
    }
    if let Some(url) = &config.base_url {
        return Ok(Arc::new(ReqwestClient::new(url.clone(), config.eval.timeout)?));
    }
    if cli.demo {
        return Ok(Arc::new(MockHttpClient::demo(DEMO_DELAY)));
    }
    bail!("no HTTP client configured (use --base-url, --mock, or --demo)")
}

async fn run(cli: Cli) -> Result<bool> {
    if cli.list {
        for name in EmbeddedLoader.names() {
            println!("{name}");
        }
        return Ok(true);
    }

    let config = load_config(&cli)?;
    let client = build_client(&cli, &config)?;

    let loader: Arc<dyn ScriptLoader> = if cli.demo {
        Arc::new(EmbeddedLoader)
    } else {
        let dir = config.script_dir.clone().unwrap_or_else(|| PathBuf::from("."));
        let loader = DirLoader::new(dir);
        tracing::debug!(root = %loader.root().display(), "loading scripts from directory");
        Arc::new(loader)
    };

    let scripts: Vec<String> = if cli.scripts.is_empty() {
        EmbeddedLoader.names().map(str::to_owned).collect()
    } else {
        cli.scripts.clone()
    };

    let evaluator = ScriptEvaluator::new(config.eval.clone());
    let pool = ScriptPool::new(config.workers, evaluator.clone())
        .context("starting script workers")?;
    let harness = Harness::new(loader, evaluator);

    let runs = scripts.iter().map(|name| {
        let client = Arc::clone(&client);
        let harness = &harness;
        let pool = &pool;
        async move { (name, harness.run_pooled(pool, name, client).await) }
    });
    let results = futures::future::join_all(runs).await;

    let mut all_ok = true;
    for (name, result) in results {
        all_ok &= result.is_success();
        let line = json!({ "script": name, "result": result });
        let text = if cli.pretty {
            serde_json::to_string_pretty(&line)?
        } else {
            serde_json::to_string(&line)?
        };
        println!("{text}");
    }

    pool.shutdown();
    Ok(all_ok)
}
