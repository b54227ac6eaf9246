pub mod agent;
pub mod client;
pub mod config;
pub mod llm;
pub mod logging;
pub mod metrics;
pub mod rpc;
pub mod runner;
pub mod semantic;
pub mod server;
pub mod tools;

use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

pub fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

/// Wall-clock nanoseconds, used for monotonically assigned backup ids.
pub fn unix_nanos() -> i128 {
    OffsetDateTime::now_utc().unix_timestamp_nanos()
}
