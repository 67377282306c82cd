//! Data store modules for Supabase integration

pub mod profiles;
pub mod stats;
pub mod supabase;

pub use profiles::ProfileStore;
pub use stats::{ResultReporter, StatsStore};
pub use supabase::SupabaseClient;

/// A stats store pointed at a dead endpoint; every call fails fast and the
/// callers' best-effort handling swallows it
#[cfg(test)]
pub fn test_stats_store() -> StatsStore {
    let config = crate::config::Config {
        server_addr: "127.0.0.1:0".parse().expect("static addr"),
        log_level: "debug".to_string(),
        supabase_url: "http://127.0.0.1:9".to_string(),
        supabase_service_role_key: "test-key".to_string(),
        supabase_jwt_secret: "test-secret".to_string(),
        client_origin: "http://localhost:5173".to_string(),
    };
    StatsStore::new(SupabaseClient::new(&config))
}
