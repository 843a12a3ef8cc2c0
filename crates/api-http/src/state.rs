// Shared handler state

use keystone_core::application::TaskBridge;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub bridge: Arc<TaskBridge>,
}

impl AppState {
    pub fn new(bridge: Arc<TaskBridge>) -> Self {
        Self { bridge }
    }
}
