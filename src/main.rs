// Chamado Agent - command line entry point

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;

use chamado_agent::acceptance::ACCEPTANCE_QUESTIONS;
use chamado_agent::logging::init_logging;
use chamado_agent::schema::SchemaCatalog;
use chamado_agent::{Pipeline, PipelineError, Settings};
use chamado_engine::{BigQueryClient, TabularEngine};
use chamado_llm::create_provider;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LlmMode {
    On,
    Off,
    /// Use the settings file / environment
    Auto,
}

/// Ask questions about the 1746 service requests
#[derive(Parser, Debug)]
#[command(name = "chamado-agent")]
#[command(version)]
#[command(about = "Guarded natural-language queries over the 1746 service-request dataset", long_about = None)]
struct Args {
    /// Settings file (TOML)
    #[arg(long = "config")]
    config: Option<PathBuf>,

    /// Print each answer as JSON
    #[arg(long = "json")]
    json: bool,

    /// Language-model capability
    #[arg(long = "llm", value_enum, default_value = "auto")]
    llm: LlmMode,

    /// Read column types from INFORMATION_SCHEMA before answering
    #[arg(long = "schema-discovery")]
    schema_discovery: bool,

    /// Run the six acceptance questions
    #[arg(long = "acceptance", conflicts_with = "questions")]
    acceptance: bool,

    /// Questions, answered in order
    #[arg(required_unless_present = "acceptance")]
    questions: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut settings = Settings::load(args.config.as_deref()).context("loading settings")?;
    match args.llm {
        LlmMode::On => settings.llm.enabled = true,
        LlmMode::Off => settings.llm.enabled = false,
        LlmMode::Auto => {}
    }
    if args.schema_discovery {
        settings.pipeline.schema_discovery = true;
    }

    init_logging(&settings.logging.level, settings.logging.format)?;

    let config = settings.to_pipeline_config()?;
    let engine: Arc<dyn TabularEngine> = Arc::new(
        BigQueryClient::new(settings.to_bigquery_config()?).context("building engine client")?,
    );
    let provider = create_provider(&settings.to_provider_config(), config.llm_enabled)
        .context("building language-model provider")?;

    let catalog = if settings.pipeline.schema_discovery {
        match SchemaCatalog::discover(engine.as_ref(), &config, config.planning_timeout).await {
            Ok(catalog) => catalog,
            Err(e) => {
                tracing::warn!(error = %e, "schema discovery failed, using built-in catalog");
                SchemaCatalog::builtin(&config)
            }
        }
    } else {
        SchemaCatalog::builtin(&config)
    };

    let pipeline = Pipeline::builder(config, engine)
        .provider(provider)
        .catalog(catalog)
        .summary_max_tokens(settings.llm.max_tokens)
        .build()?;

    let questions: Vec<String> = if args.acceptance {
        ACCEPTANCE_QUESTIONS.iter().map(|q| q.text.to_string()).collect()
    } else {
        args.questions
    };

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, cancelling request");
            on_signal.cancel();
        }
    });

    for question in &questions {
        let response = match pipeline.ask_cancellable(question, &cancel).await {
            Ok(response) => response,
            Err(PipelineError::Cancelled) => {
                eprintln!("cancelled");
                std::process::exit(130);
            }
            Err(e) => return Err(e.into()),
        };

        if args.json {
            println!("{}", serde_json::to_string(&response)?);
        } else {
            if questions.len() > 1 {
                println!("> {}", question);
            }
            println!("{}", response.answer_text);
            if let Some(sql) = &response.sql_used {
                println!("\n-- SQL\n{}", sql);
            }
            if questions.len() > 1 {
                println!();
            }
        }
    }

    Ok(())
}
