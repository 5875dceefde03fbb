// Error types for the heartbeat client

/// Errors reported by the coordinator's mount endpoints
#[derive(Debug, thiserror::Error)]
pub enum HeartbeatError {
    #[error("mount not found")]
    NotFound,

    #[error("Status was not 200: was {status}: {body:?}")]
    RequestFailed { status: u16, body: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl HeartbeatError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, HeartbeatError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_failed_display() {
        let err = HeartbeatError::RequestFailed {
            status: 500,
            body: "lock held".to_string(),
        };
        assert_eq!(err.to_string(), "Status was not 200: was 500: \"lock held\"");
        assert!(!err.is_not_found());
        assert!(HeartbeatError::NotFound.is_not_found());
    }
}
