//! CLI arguments and server configuration defaults.

use clap::Parser;
use std::time::Duration;

pub const DEFAULT_MAX_UPLOAD_SIZE: usize = 500 * 1024 * 1024;
pub const DEFAULT_TEMP_MAX_AGE_HOURS: u64 = 2;
pub const DEFAULT_LOG_MAX_FILES: usize = 5;
pub const MAX_TOTAL_CHUNKS: u64 = 65_536;
pub const MAX_UPLOAD_ID_LEN: usize = 128;

/// CLI arguments and environment configuration for the server.
#[derive(Parser, Debug)]
#[command(name = "axo-share", version, about = "Chunked file sharing server")]
pub struct Args {
    #[arg(
        short = 's',
        long,
        env = "AXO_SHARE_SHARED_DIR",
        default_value = "shared",
        help = "Directory holding shared files"
    )]
    pub shared_dir: String,
    #[arg(
        short = 't',
        long,
        env = "AXO_SHARE_TEMP_DIR",
        default_value = "temp_uploads",
        help = "Staging directory for upload chunks"
    )]
    pub temp_dir: String,
    #[arg(
        long,
        env = "AXO_SHARE_MESSAGES_FILE",
        default_value = "messages.json",
        help = "Message board document"
    )]
    pub messages_file: String,
    #[arg(
        short = 'b',
        long = "bind",
        env = "AXO_SHARE_BIND",
        default_value = "0.0.0.0",
        help = "Bind address"
    )]
    pub host: String,
    #[arg(
        short = 'p',
        long,
        env = "AXO_SHARE_PORT",
        default_value_t = 5000,
        help = "HTTP port"
    )]
    pub port: u16,
    #[arg(
        long,
        env = "AXO_SHARE_MAX_UPLOAD_SIZE",
        default_value_t = DEFAULT_MAX_UPLOAD_SIZE,
        help = "Max request body size for a single chunk upload in bytes"
    )]
    pub max_upload_size: usize,
    #[arg(
        long,
        env = "AXO_SHARE_TEMP_MAX_AGE_HOURS",
        default_value_t = DEFAULT_TEMP_MAX_AGE_HOURS,
        help = "Staging sessions inactive longer than this are removed"
    )]
    pub temp_max_age_hours: u64,
    #[arg(
        long,
        env = "AXO_SHARE_CLEANUP_INTERVAL_SECS",
        default_value_t = 0,
        help = "Periodic staging sweep interval in seconds (0 to disable)"
    )]
    pub cleanup_interval_secs: u64,
    #[arg(
        long,
        env = "AXO_SHARE_LOG_DIR",
        default_value = "logs",
        help = "Directory for rolling log files"
    )]
    pub log_dir: String,
    #[arg(
        long,
        env = "AXO_SHARE_LOG_MAX_FILES",
        default_value_t = DEFAULT_LOG_MAX_FILES,
        help = "Rotated log files to keep"
    )]
    pub log_max_files: usize,
    #[arg(long, env = "AXO_SHARE_CORS_ORIGINS", help = "Comma separated CORS origins")]
    pub cors_origins: Option<String>,
}

/// Limits and timings for the upload pipeline.
#[derive(Debug, Clone)]
pub struct UploadConfig {
    pub max_upload_size: usize,
    pub temp_max_age: Duration,
    pub cleanup_interval: Duration,
}

impl UploadConfig {
    pub fn from_args(args: &Args) -> Self {
        Self {
            max_upload_size: args.max_upload_size,
            temp_max_age: Duration::from_secs(args.temp_max_age_hours.saturating_mul(3600)),
            cleanup_interval: Duration::from_secs(args.cleanup_interval_secs),
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_upload_size: DEFAULT_MAX_UPLOAD_SIZE,
            temp_max_age: Duration::from_secs(DEFAULT_TEMP_MAX_AGE_HOURS * 3600),
            cleanup_interval: Duration::ZERO,
        }
    }
}
