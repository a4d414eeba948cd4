use std::sync::Arc;

use mcm_provider_hcloud::Driver;

use crate::config::AppConfig;

#[derive(Clone)]
pub struct AppState {
    pub driver: Arc<dyn Driver>,
    pub config: AppConfig,
}
