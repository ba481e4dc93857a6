use anyhow::Result;
use rustyline::DefaultEditor;

use super::auth;
use crate::api::ApiClient;
use crate::core::AppConfig;
use crate::identity::RestIdentityProvider;
use crate::session::UserStats;

pub fn print_stats(stats: Option<&UserStats>) {
    match stats {
        Some(stats) => {
            println!("Conversations: {}", stats.total_conversations);
            println!("Tokens used:   {}", stats.total_tokens_used);
            println!(
                "API keys:      {}",
                if stats.api_keys_configured {
                    "configured"
                } else {
                    "not configured"
                }
            );
        }
        None => println!("No usage stats available."),
    }
}

pub async fn run(config: &AppConfig) -> Result<()> {
    let provider = RestIdentityProvider::new(&config.auth_base_url, &config.auth_api_key);
    let mut rl = DefaultEditor::new()?;
    let Some(identity) = auth::sign_in_screen(&mut rl, &provider).await? else {
        return Ok(());
    };

    let api = ApiClient::new(&config.api_base_url);
    let stats = api.stats(&identity.id).await?;
    print_stats(Some(&stats));
    Ok(())
}
