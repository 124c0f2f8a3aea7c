//! Trivia Server
//!
//! Loads users and questions, then serves the trivia protocol until the
//! process is stopped.

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use trivia::{
    VERSION,
    core::rng::DeterministicRng,
    game::{questions::fetch_open_trivia, QuestionBank, UserStore},
    network::{QuestionSource, ServerConfig, ServerContext, TriviaServer},
};

fn main() -> Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    info!("Trivia Server v{}", VERSION);

    let config = ServerConfig::from_env();
    let mut rng = DeterministicRng::from_seed_or_clock(config.question_seed);

    let users = UserStore::load(&config.users_path)
        .with_context(|| format!("Failed to load users from {}", config.users_path.display()))?;
    info!("Loaded {} users", users.len());

    let questions = load_questions(&config.question_source, &mut rng)?;
    if questions.is_empty() {
        warn!("Question bank is empty, every GET_QUESTION will get NO_QUESTIONS");
    }

    let mut context = ServerContext::new(users, questions, rng);
    if config.persist_scores {
        info!("Scores are written back to {}", config.users_path.display());
        context = context.with_persistence(config.users_path.clone());
    }

    let mut server = TriviaServer::bind(config, context)?;
    server.run()?;

    Ok(())
}

fn load_questions(source: &QuestionSource, rng: &mut DeterministicRng) -> Result<QuestionBank> {
    match source {
        QuestionSource::File(path) => QuestionBank::load(path)
            .with_context(|| format!("Failed to load questions from {}", path.display())),
        QuestionSource::Web(url) => {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .context("Failed to start HTTP runtime")?;
            runtime
                .block_on(fetch_open_trivia(url, rng))
                .with_context(|| format!("Failed to fetch questions from {}", url))
        }
    }
}
