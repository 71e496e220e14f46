use std::sync::Arc;

use generic_agent::ag_ui::AgUiAdapter;
use generic_agent::session::SessionService;

#[derive(Clone)]
pub struct AppState {
    adapter: AgUiAdapter,
}

impl AppState {
    pub fn new(adapter: AgUiAdapter) -> Arc<AppState> {
        Arc::new(Self { adapter })
    }

    pub fn adapter(&self) -> &AgUiAdapter {
        &self.adapter
    }

    pub fn sessions(&self) -> &Arc<dyn SessionService> {
        self.adapter.sessions()
    }

    /// Names of the apps this server hosts; there is exactly one.
    pub fn app_names(&self) -> Vec<String> {
        vec![self.adapter.app_name().to_string()]
    }

    pub fn hosts_app(&self, app_name: &str) -> bool {
        self.adapter.app_name() == app_name
    }
}
