use crate::audio::AudioCache;
use crate::config::Config;
use crate::session::SessionStore;

use std::time::Duration;

pub struct AppState {
    pub config: Config,
    pub http_client: reqwest::Client,
    pub sessions: SessionStore,
    pub audio: AudioCache,
}

impl AppState {
    pub fn new(config: Config, http_client: reqwest::Client) -> Self {
        let sessions = SessionStore::new(Duration::from_secs(config.session_ttl_secs));
        let audio = AudioCache::new(
            Duration::from_secs(config.audio_ttl_secs),
            config.audio_capacity,
        );
        Self {
            config,
            http_client,
            sessions,
            audio,
        }
    }
}
