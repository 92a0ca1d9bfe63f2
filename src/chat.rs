//! Interactive chat loop

use anyhow::{Context, Result};
use chrono::Local;
use console::{Style, Term};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::{self, error::RecvError};

use cellio_core::runtime::shared_pipeline;
use cellio_core::session::{next_timestamp, MessageStore, SessionRepository};
use cellio_core::{
    Author, Config, GenerationEvent, GenerationOrchestrator, JsonFileStore, Message, SessionId,
};

pub async fn run(config: &Config, session: Option<SessionId>) -> Result<()> {
    let store = Arc::new(
        JsonFileStore::open(&config.storage.sessions_dir)
            .await
            .context("Failed to open session storage")?,
    );
    let model = config.model.clone();
    let pipeline = tokio::task::spawn_blocking(move || shared_pipeline(&model))
        .await
        .context("Model loading task failed")?;
    let orchestrator = GenerationOrchestrator::new(pipeline, store.clone());
    if let Some(err) = orchestrator.load_error() {
        let red = Style::new().red();
        eprintln!("{}", red.apply_to(err.user_message()));
        eprintln!("{}", Style::new().dim().apply_to(err.to_string()));
    }

    let session = match session {
        Some(id) => store
            .session(id)
            .await
            .with_context(|| format!("Session not found: {}", id))?,
        None => store.create_session(None).await?,
    };

    println!(
        "{} {}",
        Style::new().bold().apply_to(&session.title),
        Style::new().dim().apply_to(format!("({}) - /quit to leave", session.id))
    );
    for message in &session.messages {
        print_message(message);
    }

    let mut events = orchestrator.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("{} ", Style::new().blue().bold().apply_to(">"));
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        if text == "/quit" || text == "/exit" {
            break;
        }

        let floor = store.latest_message(session.id).await.map(|m| m.timestamp);
        if let Err(e) = store
            .append(session.id, Author::User, text.to_string(), next_timestamp(floor))
            .await
        {
            println!("{}", Style::new().red().apply_to(format!("Message not saved: {}", e)));
            continue;
        }
        let user = store
            .latest_message(session.id)
            .await
            .context("Message was not stored")?;

        if !orchestrator.generate(session.id, &user) {
            println!("{}", Style::new().dim().apply_to("(the assistant is unavailable)"));
            continue;
        }

        match wait_for_reply(&mut events, session.id).await {
            Some(GenerationEvent::Completed { message, .. }) => print_message(&message),
            Some(GenerationEvent::Failed { error, .. }) => {
                println!("{}", Style::new().dim().apply_to(error.user_message()));
            }
            None => break,
        }
    }

    Ok(())
}

/// Show a typing indicator until this session's generation finishes
async fn wait_for_reply(
    events: &mut broadcast::Receiver<GenerationEvent>,
    session_id: SessionId,
) -> Option<GenerationEvent> {
    let term = Term::stdout();
    let dim = Style::new().dim();
    let mut tick = tokio::time::interval(Duration::from_millis(300));
    let mut frame = 0usize;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) if event.session_id() == session_id => {
                    let _ = term.clear_line();
                    return Some(event);
                }
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => {
                    let _ = term.clear_line();
                    return None;
                }
            },
            _ = tick.tick() => {
                frame = (frame + 1) % 4;
                let _ = term.clear_line();
                let _ = term.write_str(&dim.apply_to(format!("typing{}", ".".repeat(frame))).to_string());
            }
        }
    }
}

pub fn print_message(message: &Message) {
    let time = message.timestamp.with_timezone(&Local).format("%H:%M");
    let dim = Style::new().dim();
    match message.author {
        Author::User => println!(
            "{} {} {}",
            dim.apply_to(time),
            Style::new().blue().bold().apply_to("you:"),
            message.text
        ),
        Author::Assistant => println!(
            "{} {} {}",
            dim.apply_to(time),
            Style::new().green().bold().apply_to("assistant:"),
            message.text
        ),
    }
}
