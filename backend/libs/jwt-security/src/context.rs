use uuid::Uuid;

/// Per-call request metadata, passed explicitly to verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub request_id: String,
    /// Identifies the caller for throttling (client IP, API key id, ...)
    pub client_key: Option<String>,
}

impl RequestContext {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            client_key: None,
        }
    }

    /// Context with a fresh random request id.
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4().to_string())
    }

    pub fn with_client_key(mut self, client_key: impl Into<String>) -> Self {
        self.client_key = Some(client_key.into());
        self
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::generate()
    }
}
