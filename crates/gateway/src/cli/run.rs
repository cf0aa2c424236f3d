//! `docent run`: one-shot turn.
//!
//! Boots the runtime without a listener, attaches to a local session
//! actor, sends one prompt, streams `text` to stdout and exits on `stop`
//! or `error`. Research runs started here keep their step log and are
//! resumed by the next `docent serve`.

use std::io::Write;
use std::sync::Arc;

use tokio::sync::mpsc;

use docent_domain::config::Config;
use docent_domain::event::{EventKind, SessionEvent};

use crate::bootstrap;

pub async fn run(config: Arc<Config>, message: String, session_id: String) -> anyhow::Result<()> {
    let state = bootstrap::build_app_state(config, true).await?;
    let session = state.open_session(&session_id);

    let (tx, mut rx) = mpsc::channel::<SessionEvent>(64);
    let connection_id = format!("cli-{}", uuid::Uuid::new_v4());
    session.attach(connection_id.clone(), tx).await?;
    session.prompt(connection_id.clone(), message).await?;

    let mut failed = None;
    while let Some(event) = rx.recv().await {
        match event.kind {
            EventKind::Text => {
                print!("{}", event.content);
                std::io::stdout().flush().ok();
            }
            EventKind::Status => eprintln!("\x1b[2m[{}]\x1b[0m", event.content),
            EventKind::Info => eprintln!("\x1b[2m{}\x1b[0m", event.content),
            EventKind::Stop => {
                println!();
                break;
            }
            EventKind::Error => {
                failed = Some(event.content);
                break;
            }
        }
    }

    let _ = session.detach(connection_id).await;
    if let Some(message) = failed {
        anyhow::bail!("turn failed: {message}");
    }
    Ok(())
}
