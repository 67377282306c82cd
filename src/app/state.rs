use std::sync::Arc;

use crate::config::Config;
use crate::matchmaking::RoomRegistry;
use crate::store::{ProfileStore, StatsStore, SupabaseClient};

/// Shared handles threaded through every request handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub profiles: ProfileStore,
    pub registry: Arc<RoomRegistry>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let client = SupabaseClient::new(&config);
        let profiles = ProfileStore::new(client.clone());
        let registry = Arc::new(RoomRegistry::new(StatsStore::new(client)));
        Self {
            config: Arc::new(config),
            profiles,
            registry,
        }
    }
}
