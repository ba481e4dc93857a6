use anyhow::Result;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;

use crate::api::ApiClient;
use crate::core::AppConfig;
use crate::identity::{self, Identity, IdentityProvider, RestIdentityProvider};

/// Reads one trimmed line. `None` means the user backed out with Ctrl-C or
/// Ctrl-D.
pub(crate) fn read_line(rl: &mut DefaultEditor, prompt: &str) -> Result<Option<String>> {
    match rl.readline(prompt) {
        Ok(line) => Ok(Some(line.trim().to_string())),
        Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

pub(crate) fn confirm(rl: &mut DefaultEditor, question: &str) -> Result<bool> {
    let answer = read_line(rl, &format!("{} [y/N] ", question))?;
    Ok(matches!(answer.as_deref(), Some("y") | Some("Y") | Some("yes")))
}

enum Attempt {
    Success(Identity),
    Failed,
    Abort,
}

async fn login_once(rl: &mut DefaultEditor, provider: &dyn IdentityProvider) -> Result<Attempt> {
    let Some(email) = read_line(rl, "Email: ")? else {
        return Ok(Attempt::Abort);
    };
    let Some(password) = read_line(rl, "Password: ")? else {
        return Ok(Attempt::Abort);
    };
    // Validation failures never reach the network
    if let Err(e) = identity::validate_login(&email, &password) {
        println!("{}", e);
        return Ok(Attempt::Failed);
    }
    match provider.sign_in(&email, &password).await {
        Ok(identity) => {
            println!("Signed in as {}.", identity.display_label());
            Ok(Attempt::Success(identity))
        }
        Err(e) => {
            println!("{}", e);
            Ok(Attempt::Failed)
        }
    }
}

async fn register_once(rl: &mut DefaultEditor, provider: &dyn IdentityProvider) -> Result<Attempt> {
    let Some(display_name) = read_line(rl, "Display name: ")? else {
        return Ok(Attempt::Abort);
    };
    let Some(email) = read_line(rl, "Email: ")? else {
        return Ok(Attempt::Abort);
    };
    let Some(password) = read_line(rl, "Password: ")? else {
        return Ok(Attempt::Abort);
    };
    let Some(confirm_password) = read_line(rl, "Confirm password: ")? else {
        return Ok(Attempt::Abort);
    };
    if let Err(e) =
        identity::validate_registration(&email, &password, &confirm_password, &display_name)
    {
        println!("{}", e);
        return Ok(Attempt::Failed);
    }
    match provider.register(&email, &password, &display_name).await {
        Ok(identity) => {
            println!(
                "Registration complete. Welcome, {}!",
                identity.display_label()
            );
            Ok(Attempt::Success(identity))
        }
        Err(e) => {
            println!("{}", e);
            Ok(Attempt::Failed)
        }
    }
}

/// Interactive sign-in screen. Loops until a sign-in or registration
/// succeeds; `None` means the user quit.
pub async fn sign_in_screen(
    rl: &mut DefaultEditor,
    provider: &dyn IdentityProvider,
) -> Result<Option<Identity>> {
    loop {
        let Some(choice) = read_line(rl, "[l]ogin, [r]egister, or [q]uit: ")? else {
            return Ok(None);
        };
        let attempt = match choice.as_str() {
            "l" | "login" => login_once(rl, provider).await?,
            "r" | "register" => register_once(rl, provider).await?,
            "q" | "quit" => return Ok(None),
            _ => continue,
        };
        match attempt {
            Attempt::Success(identity) => return Ok(Some(identity)),
            Attempt::Failed => continue,
            Attempt::Abort => return Ok(None),
        }
    }
}

/// Sign in once and sync the backend profile.
pub async fn run_login(config: &AppConfig) -> Result<()> {
    let provider = RestIdentityProvider::new(&config.auth_base_url, &config.auth_api_key);
    let mut rl = DefaultEditor::new()?;
    let Some(identity) = sign_in_screen(&mut rl, &provider).await? else {
        return Ok(());
    };
    sync_profile(config, &identity).await;
    println!("{} <{}>", identity.display_label(), identity.email);
    Ok(())
}

/// Register a new account and sync the backend profile.
pub async fn run_register(config: &AppConfig) -> Result<()> {
    let provider = RestIdentityProvider::new(&config.auth_base_url, &config.auth_api_key);
    let mut rl = DefaultEditor::new()?;
    loop {
        match register_once(&mut rl, &provider).await? {
            Attempt::Success(identity) => {
                sync_profile(config, &identity).await;
                return Ok(());
            }
            Attempt::Failed => continue,
            Attempt::Abort => return Ok(()),
        }
    }
}

async fn sync_profile(config: &AppConfig, identity: &Identity) {
    let api = ApiClient::new(&config.api_base_url);
    if let Err(e) = api.ensure_profile(identity).await {
        tracing::warn!("Failed to sync profile: {}", e);
    }
}
