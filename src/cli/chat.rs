//! Interactive chat session. This is the composition layer: it holds the
//! three orchestrators, feeds the provider subscription to the session
//! orchestrator, and wires notifications between them (sign-out resets the
//! transcript and settings form, saved keys refresh the stats).

use std::sync::Arc;

use anyhow::Result;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tokio::sync::mpsc;

use super::auth;
use super::stats::print_stats;
use crate::api::ApiClient;
use crate::chat::{ChatMessage, ChatOrchestrator, Role};
use crate::core::AppConfig;
use crate::identity::{Identity, IdentityProvider, RestIdentityProvider};
use crate::session::{ApiHealth, SessionEvent, SessionOrchestrator};
use crate::settings::{CredentialCache, SettingsOrchestrator};

pub async fn run(config: &AppConfig) -> Result<()> {
    let api = Arc::new(ApiClient::new(&config.api_base_url));
    let provider = RestIdentityProvider::new(&config.auth_base_url, &config.auth_api_key);
    let (session, mut session_events) = SessionOrchestrator::new(Arc::clone(&api));
    let (settings, mut keys_updated) = SettingsOrchestrator::new(
        Arc::clone(&api),
        CredentialCache::new(&config.storage_path),
    );
    let settings = Arc::new(settings);
    let chat = ChatOrchestrator::new(
        Arc::clone(&api),
        Arc::clone(&session),
        Arc::clone(&settings),
    );

    // The provider subscription lives for the whole run
    let _listener = session.attach(provider.subscribe());

    let mut rl = DefaultEditor::new()?;

    'session: loop {
        let Some(identity) = auth::sign_in_screen(&mut rl, &provider).await? else {
            break;
        };
        session.on_explicit_auth_success(identity.clone()).await;
        drain(&mut session_events);

        match session.health() {
            ApiHealth::Connected => {}
            _ => println!("Note: the MAVKUS backend looks unreachable right now."),
        }
        print_stats(session.stats().as_ref());
        settings.load(&identity).await;

        println!("{}", config.greeting);
        print_help();

        loop {
            let line = match rl.readline(">>> ") {
                Ok(line) => line.trim().to_string(),
                Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break 'session,
                Err(err) => {
                    println!("Error: {:?}", err);
                    break 'session;
                }
            };

            match line.as_str() {
                "" => {}
                "/help" => print_help(),
                "/quit" => break 'session,
                "/clear" => {
                    let confirmed = auth::confirm(&mut rl, "Clear the whole conversation?")?;
                    chat.clear(|| confirmed);
                }
                "/stats" => {
                    session.refresh_stats().await;
                    print_stats(session.stats().as_ref());
                }
                "/keys" => keys_screen(&mut rl, &settings, &identity).await?,
                "/logout" => {
                    provider.sign_out();
                    session.on_identity_changed(None).await;
                }
                _ => {
                    let before = chat.transcript().len();
                    chat.set_draft(&line);
                    println!("MAVKUS is thinking...");
                    chat.submit().await;
                    for message in &chat.transcript()[before..] {
                        render(message);
                    }
                }
            }

            // Saved or cleared keys invalidate the stats read model
            while keys_updated.try_recv().is_ok() {
                session.refresh_stats().await;
            }
            let mut signed_out = false;
            while let Ok(event) = session_events.try_recv() {
                if matches!(event, SessionEvent::SignedOut) {
                    signed_out = true;
                }
            }
            if signed_out {
                chat.reset();
                settings.reset();
                println!("Signed out.");
                continue 'session;
            }
        }
    }

    Ok(())
}

fn drain(events: &mut mpsc::UnboundedReceiver<SessionEvent>) {
    while events.try_recv().is_ok() {}
}

fn print_help() {
    println!("Commands: /clear /keys /stats /logout /quit");
}

fn render(message: &ChatMessage) {
    match message.role {
        Role::User => {}
        Role::Assistant => println!("{}", message.content),
        Role::SystemError => println!("Error: {}", message.content),
    }
}

fn mask(value: Option<&str>) -> String {
    match value {
        // Truncate by characters; a byte slice could split a multibyte key
        Some(v) if v.chars().count() > 6 => {
            format!("{}…", v.chars().take(6).collect::<String>())
        }
        Some(_) => "configured".to_string(),
        None => "not configured".to_string(),
    }
}

async fn keys_screen(
    rl: &mut DefaultEditor,
    settings: &SettingsOrchestrator,
    identity: &Identity,
) -> Result<()> {
    let current = settings.load(identity).await;
    println!("Groq API key:   {}", mask(current.groq_api_key.as_deref()));
    println!("Gemini API key: {}", mask(current.gemini_api_key.as_deref()));

    loop {
        let Some(choice) = auth::read_line(rl, "keys> [e]dit, [c]lear all, [b]ack: ")? else {
            return Ok(());
        };
        match choice.as_str() {
            "e" | "edit" => {
                let Some(groq) = auth::read_line(rl, "Groq API key (blank to clear): ")? else {
                    return Ok(());
                };
                settings.set_groq_key(&groq);
                let Some(gemini) = auth::read_line(rl, "Gemini API key (blank to clear): ")?
                else {
                    return Ok(());
                };
                settings.set_gemini_key(&gemini);
                match settings.save(identity).await {
                    Ok(()) => println!("API keys saved."),
                    Err(e) => println!("Failed to save keys: {}", e),
                }
            }
            "c" | "clear" => {
                let confirmed = auth::confirm(rl, "Delete all stored API keys?")?;
                match settings.clear_all(identity, || confirmed).await {
                    Ok(true) => println!("API keys cleared."),
                    Ok(false) => {}
                    Err(e) => println!("Failed to clear keys: {}", e),
                }
            }
            "b" | "back" | "" => return Ok(()),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_masks_keys_on_character_boundaries() {
        assert_eq!(mask(Some("gsk_1234567")), "gsk_12…");
        assert_eq!(mask(Some("aaaaa€xxxx")), "aaaaa€…");
        assert_eq!(mask(Some("short")), "configured");
        assert_eq!(mask(None), "not configured");
    }
}
