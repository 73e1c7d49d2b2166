use std::env;

/// How password-reset mail leaves the system. `Noop` logs the reset link
/// instead of sending anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailProvider {
    Noop,
    Smtp,
    Sendgrid,
}

impl EmailProvider {
    fn parse(s: &str) -> Self {
        match s {
            "smtp" => EmailProvider::Smtp,
            "sendgrid" => EmailProvider::Sendgrid,
            _ => EmailProvider::Noop,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub provider: EmailProvider,
    pub from_address: String,
    pub from_name: String,
    pub base_url: String,
    pub smtp_host: Option<String>,
    pub smtp_port: Option<u16>,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    pub sendgrid_api_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub server_addr: String,
    pub jwt_secret: String,
    pub allowed_origins: Vec<String>,
    pub email: EmailConfig,
    /// Hours between generator ticks.
    pub generator_interval_hours: u64,
    /// Audit entries older than this many days are eligible for cleanup.
    pub audit_retention_days: i64,
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let allowed_origins = env::var("ALLOWED_ORIGINS")
            .map(|s| {
                s.split(',')
                    .map(|o| o.trim().to_string())
                    .filter(|o| !o.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let email = EmailConfig {
            provider: EmailProvider::parse(
                &env::var("EMAIL_PROVIDER").unwrap_or_else(|_| "noop".to_string()),
            ),
            from_address: env::var("EMAIL_FROM_ADDRESS")
                .unwrap_or_else(|_| "no-reply@localhost".to_string()),
            from_name: env::var("EMAIL_FROM_NAME").unwrap_or_else(|_| "Gastos".to_string()),
            base_url: env::var("EMAIL_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:8000".to_string()),
            smtp_host: env::var("SMTP_HOST").ok(),
            smtp_port: env::var("SMTP_PORT").ok().and_then(|p| p.parse().ok()),
            smtp_username: env::var("SMTP_USERNAME").ok(),
            smtp_password: env::var("SMTP_PASSWORD").ok(),
            sendgrid_api_key: env::var("SENDGRID_API_KEY").ok(),
        };

        Self {
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:./data/gastos.db".to_string()),
            server_addr: env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:8000".to_string()),
            jwt_secret: env::var("JWT_SECRET")
                .unwrap_or_else(|_| "dev-secret-change-in-production".to_string()),
            allowed_origins,
            email,
            generator_interval_hours: env::var("GENERATOR_INTERVAL_HOURS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|&h| h > 0)
                .unwrap_or(12),
            audit_retention_days: env::var("AUDIT_RETENTION_DAYS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|&d| d > 0)
                .unwrap_or(90),
        }
    }
}
