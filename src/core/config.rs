use std::env;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub api_base_url: String,
    pub auth_base_url: String,
    pub auth_api_key: String,
    pub storage_path: String,
    pub greeting: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        let api_base_url =
            env::var("MAVKUS_API_URL").unwrap_or_else(|_| "http://localhost:8000".to_string());
        let auth_base_url = env::var("MAVKUS_AUTH_URL")
            .unwrap_or_else(|_| "https://identitytoolkit.googleapis.com".to_string());
        let auth_api_key = env::var("MAVKUS_AUTH_API_KEY").unwrap_or_else(|_| "".to_string());
        let storage_path = env::var("MAVKUS_STORAGE_PATH").unwrap_or("./".to_string());
        let greeting = env::var("MAVKUS_SYSTEM_GREETING")
            .unwrap_or_else(|_| "Welcome to MAVKUS AI! Type a message to get started.".to_string());

        Self {
            api_base_url,
            auth_base_url,
            auth_api_key,
            storage_path,
            greeting,
        }
    }
}
