use axum::{
    routing::{get, post},
    Router,
};
use spinpost_campaign::CampaignService;
use spinpost_core::config::SpinpostConfig;
use spinpost_core::config::MAX_RPC_BYTES;
use spinpost_scheduler::ScheduleStore;
use spinpost_store::StateStore;
use spinpost_transfer::{DownloadStreamer, MediaArchive, UploadAssembler};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

/// Central shared state — passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub config: SpinpostConfig,
    /// False when the database could not be opened and storage is memory-only.
    pub durable: bool,
    pub state: Arc<StateStore>,
    pub campaigns: CampaignService,
    pub schedules: Arc<ScheduleStore>,
    pub archive: MediaArchive,
    pub uploads: UploadAssembler,
    pub streamer: DownloadStreamer,
    /// Open media WebSocket sessions.
    pub media_sessions: AtomicUsize,
}

impl AppState {
    pub fn new(
        config: SpinpostConfig,
        durable: bool,
        state: Arc<StateStore>,
        campaigns: CampaignService,
        schedules: Arc<ScheduleStore>,
        archive: MediaArchive,
    ) -> Self {
        let chunk_size = config.transfer.chunk_size_bytes;
        let max_chunks = config.transfer.max_chunks;
        Self {
            config,
            durable,
            state,
            campaigns,
            schedules,
            uploads: UploadAssembler::new(archive.clone(), max_chunks),
            streamer: DownloadStreamer::new(archive.clone(), chunk_size),
            archive,
            media_sessions: AtomicUsize::new(0),
        }
    }

    pub fn media_session_count(&self) -> usize {
        self.media_sessions.load(Ordering::Relaxed)
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route("/rpc", post(crate::http::rpc::rpc_handler))
        .route("/ws/media", get(crate::ws::media::media_handler))
        .layer(axum::extract::DefaultBodyLimit::max(MAX_RPC_BYTES))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
