use once_cell::sync::OnceCell;
use serde::Deserialize;
use std::env;

/// Process-wide configuration, loaded once from the environment.
#[derive(Debug, Deserialize)]
pub struct Config {
    pub project_name: String,
    pub log_level: String,
    pub log_file: String,
    pub database_url: String,
}

static CONFIG: OnceCell<Config> = OnceCell::new();

impl Config {
    pub fn init(env_path: &str) -> &'static Self {
        dotenvy::from_filename(env_path).ok();

        CONFIG.get_or_init(|| {
            let project_name =
                env::var("PROJECT_NAME").unwrap_or_else(|_| "campus-attendance".into());
            let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into());
            let log_file = env::var("LOG_FILE").unwrap_or_else(|_| "logs/attendance.log".into());
            let database_url = env::var("DATABASE_URL").expect("DATABASE_URL must be set");

            Config {
                project_name,
                log_level,
                log_file,
                database_url,
            }
        })
    }

    pub fn get() -> &'static Self {
        CONFIG.get().expect("Config not initialized")
    }
}
