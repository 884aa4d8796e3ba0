use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use teloxide::Bot;
use tower_http::trace::TraceLayer;

use slabot_classifier::ClassifierService;
use slabot_core::config::SlabotConfig;
use slabot_engine::{AlertService, TimerManager};
use slabot_queue::QueueHandle;
use slabot_store::Store;
use slabot_telegram::BotContext;

/// Central shared state — passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub config: SlabotConfig,
    pub store: Store,
    pub queue: QueueHandle,
    pub timers: TimerManager,
    pub alerts: AlertService,
    pub classifier: Arc<ClassifierService>,
    pub bot: Bot,
    pub bot_ctx: Arc<BotContext>,
}

/// Assemble the full Axum router: operational endpoints, the webhook
/// ingress, and the RPC surface.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route("/metrics", get(crate::http::metrics::metrics_handler))
        .route(
            "/webhook/telegram",
            post(crate::http::webhook::telegram_webhook),
        )
        .merge(crate::rpc::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
