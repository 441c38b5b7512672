use anyhow::{Result, anyhow};
use serde::Deserialize;
use std::env;
use tracing::{info, warn};

use crate::{log_system_event, log_validation};

pub const DEFAULT_QUESTION_COUNT: usize = 5;

/// Complete application configuration loaded from environment variables
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub auth: AuthConfig,
    pub media: MediaConfig,
    pub quiz: QuizConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file_enabled: bool,
    pub console_enabled: bool,
    pub log_directory: String,
}

/// Secret used to verify HS256 access tokens
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    pub access_secret: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MediaConfig {
    pub bucket: String,
}

/// Quiz engine policy
#[derive(Debug, Clone, Deserialize)]
pub struct QuizConfig {
    pub question_count: usize,
    /// When false a graded session rejects further submissions.
    pub allow_regrade: bool,
    /// Fixed seed for reproducible question selection.
    pub rng_seed: Option<u64>,
}

impl Default for QuizConfig {
    fn default() -> Self {
        Self {
            question_count: DEFAULT_QUESTION_COUNT,
            allow_regrade: false,
            rng_seed: None,
        }
    }
}

impl Config {
    /// Load configuration from environment variables with sensible defaults
    pub fn from_env() -> Result<Self> {
        log_system_event!(config, "Loading application configuration from environment variables");

        let config = Config {
            database: DatabaseConfig::from_env()?,
            server: ServerConfig::from_env()?,
            logging: LoggingConfig::from_env()?,
            auth: AuthConfig::from_env()?,
            media: MediaConfig::from_env()?,
            quiz: QuizConfig::from_env()?,
        };

        log_system_event!(config, "Configuration loaded successfully");
        config.log_configuration_summary();

        Ok(config)
    }

    /// Log a summary of loaded configuration (without sensitive data)
    fn log_configuration_summary(&self) {
        info!(
            database_url_masked = %mask_sensitive_data(&self.database.url),
            server_address = %format!("{}:{}", self.server.host, self.server.port),
            log_level = %self.logging.level,
            access_secret_masked = %mask_sensitive_data(&self.auth.access_secret),
            media_bucket = %self.media.bucket,
            question_count = self.quiz.question_count,
            allow_regrade = self.quiz.allow_regrade,
            rng_seeded = self.quiz.rng_seed.is_some(),
            "Configuration summary"
        );
    }

    pub fn validate(&self) -> Result<()> {
        if !self.database.url.starts_with("sqlite:") {
            return Err(anyhow!("DATABASE_URL must start with 'sqlite:'"));
        }

        if self.server.port == 0 {
            return Err(anyhow!("Server port must be greater than 0"));
        }

        if self.quiz.question_count == 0 {
            return Err(anyhow!("QUIZ_QUESTION_COUNT must be at least 1"));
        }

        if self.auth.access_secret.is_empty() || self.auth.access_secret == "change-me" {
            warn!("ACCESS_SECRET is empty or a placeholder - tokens signed with it are not safe");
        }

        if !["trace", "debug", "info", "warn", "error"]
            .iter()
            .any(|level| self.logging.level.to_lowercase().contains(level))
        {
            warn!("Invalid log level '{}', using 'info' as fallback", self.logging.level);
        }

        log_validation!(success, "configuration", "Configuration validation completed successfully");
        Ok(())
    }
}

impl DatabaseConfig {
    fn from_env() -> Result<Self> {
        let url = env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:lesson_quiz.db?mode=rwc".to_string());
        Ok(DatabaseConfig { url })
    }
}

impl ServerConfig {
    fn from_env() -> Result<Self> {
        let port_str = env::var("PORT").unwrap_or_else(|_| "3000".to_string());

        let port = port_str
            .parse::<u16>()
            .map_err(|_| anyhow!("Invalid PORT value: '{}'. Must be a number between 1-65535", port_str))?;

        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());

        Ok(ServerConfig { port, host })
    }
}

impl LoggingConfig {
    /// Read on its own so logging is up before the rest of the config loads.
    pub fn from_env() -> Result<Self> {
        let level = env::var("RUST_LOG").unwrap_or_else(|_| "info,lesson_quiz=debug".to_string());

        let file_enabled = env::var("LOG_FILE_ENABLED")
            .unwrap_or_else(|_| "true".to_string())
            .parse::<bool>()
            .unwrap_or(true);

        let console_enabled = env::var("LOG_CONSOLE_ENABLED")
            .unwrap_or_else(|_| "true".to_string())
            .parse::<bool>()
            .unwrap_or(true);

        let log_directory = env::var("LOG_DIRECTORY").unwrap_or_else(|_| "logs".to_string());

        Ok(LoggingConfig {
            level,
            file_enabled,
            console_enabled,
            log_directory,
        })
    }
}

impl AuthConfig {
    fn from_env() -> Result<Self> {
        let access_secret = env::var("ACCESS_SECRET").unwrap_or_else(|_| "change-me".to_string());
        Ok(AuthConfig { access_secret })
    }
}

impl MediaConfig {
    fn from_env() -> Result<Self> {
        let bucket = env::var("MEDIA_BUCKET").unwrap_or_else(|_| "sonsustorage.firebasestorage.app".to_string());
        Ok(MediaConfig { bucket })
    }
}

impl QuizConfig {
    fn from_env() -> Result<Self> {
        let question_count = match env::var("QUIZ_QUESTION_COUNT") {
            Ok(value) => value
                .parse::<usize>()
                .map_err(|_| anyhow!("Invalid QUIZ_QUESTION_COUNT value: '{}'", value))?,
            Err(_) => DEFAULT_QUESTION_COUNT,
        };

        let allow_regrade = env::var("QUIZ_ALLOW_REGRADE")
            .unwrap_or_else(|_| "false".to_string())
            .parse::<bool>()
            .unwrap_or(false);

        let rng_seed = match env::var("QUIZ_RNG_SEED") {
            Ok(value) => Some(
                value
                    .parse::<u64>()
                    .map_err(|_| anyhow!("Invalid QUIZ_RNG_SEED value: '{}'", value))?,
            ),
            Err(_) => None,
        };

        Ok(QuizConfig {
            question_count,
            allow_regrade,
            rng_seed,
        })
    }
}

/// Mask sensitive data in configuration for safe logging
fn mask_sensitive_data(data: &str) -> String {
    let chars: Vec<char> = data.chars().collect();
    if chars.len() <= 8 {
        "*".repeat(chars.len())
    } else {
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}***{}", head, tail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        Config {
            database: DatabaseConfig {
                url: "sqlite:test.db".to_string(),
            },
            server: ServerConfig {
                port: 3000,
                host: "0.0.0.0".to_string(),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                file_enabled: true,
                console_enabled: true,
                log_directory: "logs".to_string(),
            },
            auth: AuthConfig {
                access_secret: "a-long-enough-secret".to_string(),
            },
            media: MediaConfig {
                bucket: "bucket".to_string(),
            },
            quiz: QuizConfig::default(),
        }
    }

    #[test]
    fn test_mask_sensitive_data() {
        assert_eq!(mask_sensitive_data("short"), "*****");
        assert_eq!(mask_sensitive_data("sqlite:lesson_quiz.db"), "sqli***z.db");
    }

    #[test]
    fn test_mask_sensitive_data_multibyte() {
        assert_eq!(mask_sensitive_data("sqlite:데이터베이스.db"), "sqli***스.db");
        assert_eq!(mask_sensitive_data("비밀번호"), "****");
        assert_eq!(mask_sensitive_data("ключ-доступа"), "ключ***тупа");
    }

    #[test]
    fn test_quiz_defaults() {
        let quiz = QuizConfig::default();
        assert_eq!(quiz.question_count, 5);
        assert!(!quiz.allow_regrade);
        assert!(quiz.rng_seed.is_none());
    }

    #[test]
    fn test_config_validation() {
        let config = valid_config();
        assert!(config.validate().is_ok());

        let mut invalid_port = config.clone();
        invalid_port.server.port = 0;
        assert!(invalid_port.validate().is_err());

        let mut no_questions = config.clone();
        no_questions.quiz.question_count = 0;
        assert!(no_questions.validate().is_err());

        let mut postgres = config;
        postgres.database.url = "postgres://localhost/quiz".to_string();
        assert!(postgres.validate().is_err());
    }
}
