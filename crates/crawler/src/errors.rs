//! Crawler error types

use citecrawl_common::errors::AppError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CrawlError {
    #[error("Seed file error for {path}: {message}")]
    SeedFile { path: String, message: String },

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Metrics exporter error: {0}")]
    Metrics(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Common(#[from] AppError),
}

pub type Result<T> = std::result::Result<T, CrawlError>;
