pub mod config;
pub mod errors;
pub mod redis_client;
pub mod telemetry;

pub use config::Config;
pub use errors::AppError;
pub use redis_client::RedisClient;
