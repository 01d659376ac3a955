use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use common::{
    storage::{db::SurrealDbClient, types::conversation::ConversationTurn},
    utils::{config::get_config, embedding::EmbeddingProvider, llm::build_chat_client},
};
use retrieval_pipeline::{
    answer_query, history::trim_history, plan_query, retrieve, DefaultQueryServices,
    QueryServices, QuerySettings,
};
use tokio::io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Ask questions about the indexed course notes from the terminal.
#[derive(Debug, Parser)]
#[command(name = "chat")]
struct Cli {
    /// Print the retrieved chunks instead of asking the model
    #[arg(long, action = clap::ArgAction::SetTrue, default_value_t = false)]
    retrieve_only: bool,
}

fn is_exit(line: &str) -> bool {
    matches!(line.to_lowercase().as_str(), "exit" | "quit")
}

async fn print_retrieval(
    services: &dyn QueryServices,
    settings: &QuerySettings,
    query: &str,
    history: &[ConversationTurn],
) -> Result<String> {
    let plan = plan_query(query, history, settings);
    let contexts = retrieve(services, &plan, query).await?;

    let mut out = format!(
        "mode={} unit={} follow_up={} hits={}\n",
        plan.mode,
        plan.unit.as_deref().unwrap_or("-"),
        plan.follow_up,
        contexts.len()
    );
    for (rank, context) in contexts.iter().enumerate() {
        out.push_str(&format!(
            "\n#{} {:.3} [{} - {} p{} {}]\n{}\n",
            rank.saturating_add(1),
            context.score,
            context.source,
            context.unit,
            context.page,
            context.chunk_type,
            context.text
        ));
    }
    Ok(out)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let cli = Cli::parse();
    let config = get_config().context("loading configuration")?;

    let db = Arc::new(
        SurrealDbClient::from_config(&config)
            .await
            .context("opening vector store")?,
    );
    db.ensure_initialized().await?;
    let embedder = Arc::new(EmbeddingProvider::from_config(&config).await?);
    let services = DefaultQueryServices::new(
        db,
        embedder,
        Arc::new(build_chat_client(&config)),
        config.chat_model.clone(),
    );
    let settings = QuerySettings::from_app_config(&config);
    info!(model = %config.chat_model, retrieve_only = cli.retrieve_only, "chat ready");

    let mut stdout = io::stdout();
    let mut lines = BufReader::new(io::stdin()).lines();
    let mut history: Vec<ConversationTurn> = Vec::new();

    loop {
        stdout.write_all(b"\nYou: ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let query = line.trim();
        if query.is_empty() {
            continue;
        }
        if is_exit(query) {
            break;
        }

        if cli.retrieve_only {
            let report = print_retrieval(&services, &settings, query, &history).await?;
            stdout.write_all(report.as_bytes()).await?;
            continue;
        }

        match answer_query(&services, &settings, query, history.clone()).await {
            Ok(outcome) => {
                let mut reply = format!("\nAssistant ({}): {}\n", outcome.mode, outcome.answer);
                if !outcome.sources.is_empty() {
                    let cited: Vec<String> = outcome
                        .sources
                        .iter()
                        .map(|source| format!("{} ({})", source.source, source.unit))
                        .collect();
                    reply.push_str(&format!("Sources: {}\n", cited.join(", ")));
                }
                stdout.write_all(reply.as_bytes()).await?;
                history = outcome.history;
            }
            Err(err) => {
                stdout
                    .write_all(format!("\nError: {err}\n").as_bytes())
                    .await?;
                history = trim_history(history, settings.history_max_pairs);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_words_are_case_insensitive() {
        assert!(is_exit("exit"));
        assert!(is_exit("QUIT"));
        assert!(!is_exit("exit strategy"));
    }

    #[test]
    fn retrieve_only_flag_parses() {
        assert!(Cli::parse_from(["chat", "--retrieve-only"]).retrieve_only);
        assert!(!Cli::parse_from(["chat"]).retrieve_only);
    }
}
