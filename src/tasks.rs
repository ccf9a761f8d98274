use crate::consts::SWEEP_INTERVAL_SECS;
use crate::types::AppState;

use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Periodic sweep of expired call sessions and cached audio clips.
pub async fn sweep_expired(app_state: Arc<AppState>) {
    let mut interval = tokio::time::interval(Duration::from_secs(SWEEP_INTERVAL_SECS));
    loop {
        interval.tick().await;
        let sessions = app_state.sessions.sweep();
        let clips = app_state.audio.sweep();
        if sessions > 0 || clips > 0 {
            debug!(
                sessions,
                clips,
                sessions_live = app_state.sessions.len(),
                clips_live = app_state.audio.len(),
                "swept expired state"
            );
        }
    }
}
