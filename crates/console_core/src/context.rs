use std::{collections::HashMap, fmt, sync::Arc};

use shared::error::ApiException;

pub type ForbiddenHandler = Arc<dyn Fn(&ApiException) + Send + Sync>;

/// Application-wide collaborators handed to every orchestrator at
/// construction. Read-only once built; clones share the same data.
#[derive(Clone, Default)]
pub struct ConsoleContext {
    api_addresses: Arc<HashMap<String, String>>,
    forbidden_handler: Option<ForbiddenHandler>,
}

impl ConsoleContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_api_address(mut self, service: impl Into<String>, address: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.api_addresses).insert(service.into(), address.into());
        self
    }

    pub fn with_forbidden_handler<H>(mut self, handler: H) -> Self
    where
        H: Fn(&ApiException) + Send + Sync + 'static,
    {
        self.forbidden_handler = Some(Arc::new(handler));
        self
    }

    pub fn api_address(&self, service: &str) -> Option<&str> {
        self.api_addresses.get(service).map(String::as_str)
    }

    /// Forwards `Forbidden` failures to the registered handler; other errors are ignored.
    pub fn report_error(&self, error: &ApiException) {
        if !error.is_forbidden() {
            return;
        }
        if let Some(handler) = &self.forbidden_handler {
            handler(error);
        }
    }
}

impl fmt::Debug for ConsoleContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsoleContext")
            .field("api_addresses", &self.api_addresses)
            .field("forbidden_handler", &self.forbidden_handler.is_some())
            .finish()
    }
}
