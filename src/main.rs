use anyhow::Context;
use clap::Parser;
use colored::Colorize;
use dotenv::dotenv;
use log::info;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use rag_agent_api::api::{self, AskRequest};
use rag_agent_api::config::{AppConfig, Args};
use rag_agent_api::context::RagContext;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenv().ok();
    init_logging();

    let args = Args::parse();
    let config = AppConfig::from_args(&args).context("invalid configuration")?;
    let question = args
        .question
        .as_deref()
        .map(|q| AskRequest::new(q).validated_question().map(str::to_string))
        .transpose()
        .context("invalid --question")?;

    info!(
        "Ingesting {} source(s) with {} embeddings",
        config.source.urls.len(),
        config.embedding.model
    );
    let context = Arc::new(
        RagContext::initialize(&config)
            .await
            .context("ingestion failed, server not started")?,
    );
    if let Some(report) = context.report() {
        info!(
            "Ready: {} chunks from {} document(s), {} characters",
            report.chunks, report.documents, report.characters
        );
    }

    if let Some(question) = question {
        return answer_once(&context, &question).await;
    }

    run_api_server(context, &config).await
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn answer_once(context: &RagContext, question: &str) -> anyhow::Result<()> {
    let outcome = context.pipeline().invoke(question).await;
    context.pipeline().flush_traces().await;
    let state = outcome.context("failed to answer question")?;

    println!("{} {}", "Question:".bright_cyan().bold(), question);
    for hit in &state.context {
        println!(
            "{} #{} {:.3} {} [{}..{}]",
            "Context".bright_black(),
            hit.rank,
            hit.score,
            hit.chunk.source,
            hit.chunk.start_index,
            hit.chunk.end_index
        );
    }
    println!(
        "{} {}",
        "Answer:".bright_green().bold(),
        state.answer.unwrap_or_default()
    );
    Ok(())
}

async fn run_api_server(context: Arc<RagContext>, config: &AppConfig) -> anyhow::Result<()> {
    let app = api::create_api(context.clone(), config.max_concurrent_requests);

    let listener = TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("failed to bind to {}", config.bind))?;

    info!("Server listening on http://{}", config.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    context.pipeline().flush_traces().await;
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::warn!("failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                log::warn!("failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received, draining in-flight requests");
}
