//! Cluster gateway errors

use thiserror::Error;

/// Errors that can occur when talking to the cluster store
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The store reports the object does not exist
    #[error("{kind} {name} not found")]
    NotFound { kind: String, name: String },

    /// The write lost a race with another writer
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Local validation or server-side validation rejected the request
    #[error("Invalid request: {0}")]
    Invalid(String),

    /// The caller is not authorized for the operation
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Kubernetes API error that does not map to a more specific kind
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Store unreachable or client could not be constructed
    #[error("Transport error: {0}")]
    Transport(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Pod exec stream failed after the command was started
    #[error("Exec error: {0}")]
    Exec(String),
}

impl GatewayError {
    /// Classify a kube client error for the object `kind`/`name`
    pub fn from_kube(err: kube::Error, kind: &str, name: &str) -> Self {
        let api_failure = match &err {
            kube::Error::Api(response) => Some((response.code, response.message.clone())),
            kube::Error::UpgradeConnection(upgrade) if upgrade.to_string().contains("403") => {
                Some((403, upgrade.to_string()))
            }
            _ => None,
        };
        match api_failure {
            Some((404, _)) => GatewayError::NotFound {
                kind: kind.to_string(),
                name: name.to_string(),
            },
            Some((409, message)) => GatewayError::Conflict(message),
            Some((403, message)) => GatewayError::Forbidden(message),
            Some((400 | 422, message)) => GatewayError::Invalid(message),
            _ => GatewayError::Kube(err),
        }
    }

    /// Whether the store reported absence
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, GatewayError::NotFound { .. })
    }

    /// Whether authorization was denied
    #[must_use]
    pub fn is_forbidden(&self) -> bool {
        matches!(self, GatewayError::Forbidden(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_display() {
        let err = GatewayError::NotFound {
            kind: "Pool".to_string(),
            name: "p1".to_string(),
        };
        assert_eq!(err.to_string(), "Pool p1 not found");
        assert!(err.is_not_found());
        assert!(!err.is_forbidden());
    }
}
