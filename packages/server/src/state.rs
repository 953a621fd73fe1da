use std::sync::Arc;

use crate::config::AppConfig;
use crate::service::FileService;

#[derive(Clone)]
pub struct AppState {
    pub files: Arc<FileService>,
    pub config: AppConfig,
}
