use std::env;

/// Application configuration parsed from environment variables (§6).
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub upstream_base_url: String,
    pub ingest_consumer_workers: usize,
    pub queue_max_read_count: i32,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let database_url =
            env::var("DATABASE_URL").map_err(|_| "DATABASE_URL must be set".to_string())?;

        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());

        let port: u16 = env::var("API_PORT")
            .or_else(|_| env::var("PORT"))
            .unwrap_or_else(|_| "4000".to_string())
            .parse()
            .map_err(|_| "API_PORT must be a valid u16".to_string())?;

        let upstream_base_url = env::var("UPSTREAM_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:4001".to_string());

        let ingest_consumer_workers = env::var("INGEST_CONSUMER_WORKERS")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(1);

        let queue_max_read_count = env::var("QUEUE_MAX_READ_COUNT")
            .ok()
            .and_then(|v| v.parse::<i32>().ok())
            .unwrap_or(10);

        Ok(Config {
            database_url,
            host,
            port,
            upstream_base_url,
            ingest_consumer_workers,
            queue_max_read_count,
        })
    }
}
