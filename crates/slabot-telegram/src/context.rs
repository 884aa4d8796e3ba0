use std::sync::Arc;

use slabot_classifier::ClassifierService;
use slabot_engine::{AlertService, TimerManager};
use slabot_store::Store;

use crate::ratelimit::RateLimiter;

/// Everything the transport handlers need, assembled by the composition
/// root and injected into the Dispatcher as one `Arc`.
pub struct BotContext {
    pub store: Store,
    pub classifier: Arc<ClassifierService>,
    pub timers: TimerManager,
    pub alerts: AlertService,
    pub rate_limiter: RateLimiter,
}

impl BotContext {
    pub fn new(
        store: Store,
        classifier: Arc<ClassifierService>,
        timers: TimerManager,
        alerts: AlertService,
    ) -> Self {
        Self {
            store,
            classifier,
            timers,
            alerts,
            rate_limiter: RateLimiter::default(),
        }
    }
}
