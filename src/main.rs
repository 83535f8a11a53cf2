use std::{
    io::Write,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::{bail, Context};
use clap::Parser;

mod app;
mod classify;
mod cli;
mod config;
mod feedback;
mod generative;
mod knowledge;
mod semantic;
mod storage;
mod web;

use app::App;
use config::Config;
use feedback::ConversationSession;
use generative::{DisabledProvider, GeminiProvider, Generator};
use inquire::error::InquireResult;
use knowledge::{KnowledgeBase, KnowledgeEntry, ResponseKind};
use semantic::EmbeddingModel;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = cli::Args::parse();

    let base_path = match args.data_dir {
        Some(dir) => PathBuf::from(dir),
        None => default_base_path()?,
    };
    let config = Config::load_with(
        base_path
            .to_str()
            .context("data directory path is not valid utf8")?,
    );
    let knowledge_path = base_path.join(&config.knowledge_file);

    match args.command {
        cli::Command::Daemon { listen } => {
            let app = build_app(&config, &base_path, &knowledge_path)?;
            let listen_addr = listen.unwrap_or_else(|| config.listen_addr.clone());
            web::start_daemon(app, &listen_addr);
            Ok(())
        }

        cli::Command::Chat {} => {
            let app = build_app(&config, &base_path, &knowledge_path)?;
            run_chat_loop(&app)
        }

        cli::Command::Ask { question, yes } => {
            let app = build_app(&config, &base_path, &knowledge_path)?;
            run_ask(&app, &question, yes)
        }

        cli::Command::Add {
            question,
            content,
            kind,
            explanation,
        } => {
            let Some(response_type) = ResponseKind::parse(&kind) else {
                bail!("unknown response kind {kind:?}, expected 'text' or 'code'");
            };

            // bootstrap an empty knowledge base so the first entry can be added
            if !knowledge_path.exists() {
                log::info!("creating new knowledge base at {}", knowledge_path.display());
                knowledge::create_empty(&knowledge_path)?;
            }

            let encoder = load_encoder(&config, &base_path)?;
            let kb = KnowledgeBase::load(&knowledge_path, encoder)?;

            kb.append(&KnowledgeEntry {
                question,
                response_content: content,
                response_type,
                explanation: explanation.unwrap_or_default(),
            })?;
            kb.reload()?;

            println!("knowledge base now has {} entries", kb.len());
            Ok(())
        }
    }
}

fn default_base_path() -> anyhow::Result<PathBuf> {
    let home = homedir::my_home()?
        .context("cannot determine home directory; pass --data-dir explicitly")?;
    Ok(home.join(".sema"))
}

fn load_encoder(config: &Config, base_path: &Path) -> anyhow::Result<Arc<EmbeddingModel>> {
    let timeout = Duration::from_secs(config.semantic.download_timeout_secs);
    let encoder = EmbeddingModel::new(&config.semantic.model, base_path.to_path_buf(), Some(timeout))
        .context("failed to load embedding model")?;
    log::info!(
        "embedding model '{}' ready ({} dimensions)",
        encoder.name(),
        encoder.dimensions()
    );
    Ok(Arc::new(encoder))
}

/// Load everything needed to serve questions. Any failure here is fatal:
/// without a knowledge base there is no service.
fn build_app(config: &Config, base_path: &Path, knowledge_path: &Path) -> anyhow::Result<App> {
    let encoder = load_encoder(config, base_path)?;

    let kb = KnowledgeBase::load(knowledge_path, encoder.clone())
        .context("failed to load knowledge base")?;
    if kb.is_empty() {
        bail!(
            "knowledge base at {} has no entries; add some with `sema add`",
            knowledge_path.display()
        );
    }
    log::info!("knowledge base ready with {} entries", kb.len());

    let timeout = Duration::from_secs(config.generative.timeout_secs);
    let generator: Box<dyn Generator> =
        match GeminiProvider::from_env(&config.generative.model, timeout) {
            Some(provider) => Box::new(provider),
            None => {
                log::warn!(
                    "{} is not set; generative fallback is disabled",
                    generative::API_KEY_ENV
                );
                Box::new(DisabledProvider)
            }
        };

    Ok(App::new(
        kb,
        encoder,
        generator,
        config.semantic.threshold,
        config.feedback.affirmative.clone(),
    ))
}

fn run_chat_loop(app: &App) -> anyhow::Result<()> {
    let mut session = ConversationSession::new();

    println!("sema is ready. Type 'exit' to quit.");
    loop {
        print!("You: ");
        std::io::stdout().flush()?;

        let mut line = String::new();
        if std::io::stdin().read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();
        if line.eq_ignore_ascii_case("exit") {
            println!("sema: Goodbye!");
            break;
        }

        let reply = app.handle_turn(&mut session, line);
        if !reply.is_empty() {
            println!("sema: {reply}");
        }
    }

    Ok(())
}

fn run_ask(app: &App, question: &str, auto_confirm: bool) -> anyhow::Result<()> {
    let mut session = ConversationSession::new();

    let reply = app.handle_turn(&mut session, question);
    println!("{reply}");

    // a fallback answer wants a verdict before the process exits
    if session.is_awaiting_feedback() {
        let confirmed = if auto_confirm {
            true
        } else {
            match inquire::prompt_confirmation("Save this answer to the knowledge base?") {
                InquireResult::Ok(answer) => answer,
                InquireResult::Err(err) => bail!("An error occurred: {}", err),
            }
        };

        let verdict = if confirmed {
            app.affirmative_token().to_string()
        } else {
            "no".to_string()
        };
        println!("{}", app.handle_turn(&mut session, &verdict));
    }

    Ok(())
}
