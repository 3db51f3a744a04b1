pub mod settings;

pub use settings::{ServiceConfig, REDIS_URL_ENV};
