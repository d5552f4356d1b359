//! # Agent Voice Chat - Terminal Shell
//!
//! A line-oriented front end for the session controller. Plain lines are sent as chat
//! messages; lines starting with `/` are commands:
//!
//! ```text
//! /mic              start voice capture
//! /stop             stop voice capture
//! /mute, /unmute    speaker mute
//! /voice on|off     speak assistant replies
//! /agent <agent> <personality>
//! /status           print a snapshot of the session
//! /quit
//! ```
//!
//! ## Key Rust Concepts Used:
//! - **tokio::select!**: races stdin, controller events and shutdown signals
//! - **Channels**: the controller runs on its own task; this shell only holds a
//!   `SessionHandle` and the receiving end of the UI event channel
//! - **anyhow**: errors are given context at the edge of the program

use agent_voice_chat::session::Role;
use agent_voice_chat::{AppConfig, SessionController, SessionDeps, SessionError, SessionHandle, UiEvent};
use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load().context("loading configuration")?;
    config.validate().context("validating configuration")?;

    info!("Starting agent-voice-chat v{}", env!("CARGO_PKG_VERSION"));
    info!(
        ws_url = %config.server.ws_url,
        agent = %config.session.agent,
        personality = %config.session.personality,
        "Configuration loaded"
    );

    let deps = SessionDeps::from_config(&config).context("building session collaborators")?;
    let (mut controller, mut ui_events) = SessionController::new(config, deps);
    let handle = controller.handle();

    controller.start().await;
    let controller_task = tokio::spawn(controller.run());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            event = ui_events.recv() => match event {
                Some(event) => print_event(&event),
                // Controller is gone
                None => break,
            },
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if !dispatch(&handle, line.trim()).await {
                        break;
                    }
                }
                Ok(None) => {
                    info!("stdin closed");
                    break;
                }
                Err(e) => {
                    warn!("Failed to read stdin: {}", e);
                    break;
                }
            },
            _ = shutdown_signal() => {
                info!("Shutdown signal received, closing session...");
                break;
            }
        }
    }

    if let Err(e) = handle.close().await {
        warn!("Session was already closed: {}", e);
    }
    if let Err(e) = controller_task.await {
        warn!("Controller task ended abnormally: {}", e);
    }

    info!("Session closed");
    Ok(())
}

/// Run one input line. Returns `false` when the shell should exit.
async fn dispatch(handle: &SessionHandle, line: &str) -> bool {
    if line.is_empty() {
        return true;
    }

    let mut parts = line.split_whitespace();
    let result = match parts.next() {
        Some("/quit") | Some("/exit") => return false,
        Some("/mic") => handle.start_capture().await,
        Some("/stop") => handle.stop_capture().await,
        Some("/mute") => handle.set_muted(true).await,
        Some("/unmute") => handle.set_muted(false).await,
        Some("/voice") => match parts.next() {
            Some("on") => handle.set_speech_enabled(true).await,
            Some("off") => handle.set_speech_enabled(false).await,
            _ => {
                println!("usage: /voice on|off");
                return true;
            }
        },
        Some("/agent") => match (parts.next(), parts.next()) {
            (Some(agent), Some(personality)) => handle.update_session(agent, personality).await,
            _ => {
                println!("usage: /agent <agent> <personality>");
                return true;
            }
        },
        Some("/status") => match handle.snapshot().await {
            Ok(snapshot) => {
                match serde_json::to_string_pretty(&snapshot) {
                    Ok(json) => println!("{}", json),
                    Err(e) => warn!("Failed to render snapshot: {}", e),
                }
                Ok(())
            }
            Err(e) => Err(e),
        },
        Some(command) if command.starts_with('/') => {
            println!("unknown command: {}", command);
            return true;
        }
        _ => handle.send_text(line).await,
    };

    match result {
        Ok(()) => true,
        Err(SessionError::Closed) => false,
        Err(e) => {
            println!("! {}", e);
            true
        }
    }
}

fn print_event(event: &UiEvent) {
    match event {
        UiEvent::MessageAppended { message } => {
            let who = match message.role {
                Role::User if message.is_voice => "you (voice)",
                Role::User => "you",
                Role::Assistant => "agent",
                Role::System => "system",
            };
            // Assistant replies are printed once their reveal completes
            if message.role != Role::Assistant {
                println!("[{}] {}", who, message.content);
            }
        }
        UiEvent::MessageRevealed { displayed, complete, .. } => {
            if *complete {
                println!("[agent] {}", displayed);
            }
        }
        UiEvent::Busy { busy: true, label } => {
            println!("... {}", label.as_deref().unwrap_or("thinking"));
        }
        UiEvent::Busy { busy: false, .. } => {}
        UiEvent::ConnectionChanged { status } => println!("* connection: {:?}", status),
        UiEvent::CaptureChanged { state, transcribing } => {
            println!("* microphone: {:?} (transcribing: {})", state, transcribing)
        }
        UiEvent::InterimTranscript { text } => println!("~ {}", text),
        UiEvent::Speaking { speaking } => {
            if *speaking {
                println!("* speaking");
            }
        }
        UiEvent::VoiceError { message } => println!("! voice: {}", message),
        UiEvent::SessionUpdated { agent, personality } => {
            println!("* session: {} / {}", agent, personality)
        }
    }
}

/// Initialize tracing on stderr so it does not interleave with the chat on stdout.
///
/// `RUST_LOG` overrides the default `agent_voice_chat=debug`.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "agent_voice_chat=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    Ok(())
}

/// Resolves on Ctrl+C, or SIGTERM on unix.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(signal) => signal,
                Err(e) => {
                    warn!("Failed to install SIGTERM handler: {}", e);
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received Ctrl+C");
    }
}
