use clap::{Parser, Subcommand};

use crate::dashboard::TimeRange;

/// ratewatch: rate-limiting observability for the platform API
#[derive(Parser)]
#[command(name = "ratewatch", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the query API server
    Serve {
        /// Port to bind (defaults to PORT or 8080)
        #[arg(short, long)]
        port: Option<u16>,
        /// Keep everything in process memory instead of Postgres
        #[arg(long)]
        in_memory: bool,
        /// JSON file of events loaded into the in-memory store at startup
        #[arg(long, requires = "in_memory")]
        seed: Option<std::path::PathBuf>,
    },

    /// Fetch the dashboard once and print it
    Dashboard {
        /// Time range: 24h, 7d or 30d
        #[arg(short, long, default_value = "24h")]
        range: TimeRange,
        /// API base URL (defaults to RATEWATCH_API_URL)
        #[arg(long)]
        base_url: Option<String>,
        /// Bearer token (defaults to RATEWATCH_ACCESS_TOKEN)
        #[arg(long)]
        token: Option<String>,
        /// Only show violations for these features
        #[arg(long, value_delimiter = ',')]
        feature: Vec<String>,
        /// Free-text filter over violations and users
        #[arg(long)]
        search: Option<String>,
    },

    /// Recompute hourly buckets for one hour
    Rollup {
        /// Any instant inside the hour (RFC 3339). Defaults to the previous hour.
        #[arg(long)]
        hour: Option<String>,
    },

    /// Delete data past the retention window now
    Purge {
        /// Retention in days (defaults to RATEWATCH_RETENTION_DAYS or 90)
        #[arg(long, value_parser = clap::value_parser!(i64).range(1..))]
        days: Option<i64>,
    },

    /// Mint an access token signed with RATEWATCH_JWT_SECRET
    Token {
        #[arg(long)]
        sub: String,
        #[arg(long, default_value = "admin")]
        role: String,
        #[arg(long, default_value = "12")]
        ttl_hours: i64,
    },
}
