use thiserror::Error;

/// Failures raised while reconciling a Kappnav instance.
///
/// Cluster API failures keep the HTTP code and the status reason reported by
/// the API server so the status manager can classify them.
#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("{message}")]
    Api {
        code: u16,
        reason: String,
        message: String,
    },

    #[error("cluster request failed: {0}")]
    Transport(String),

    #[error("defaults unavailable: {0}")]
    DefaultsUnavailable(String),

    #[error("failed to render template {name}: {message}")]
    Template { name: String, message: String },

    #[error("{kind} {name} is already controlled by {owner}")]
    AlreadyOwned {
        kind: String,
        name: String,
        owner: String,
    },

    #[error("failed to serialize {0}")]
    Serialization(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn not_found(kind: &str, name: &str) -> Self {
        Error::Api {
            code: 404,
            reason: "NotFound".to_string(),
            message: format!("{} \"{}\" not found", kind, name),
        }
    }

    pub fn already_exists(kind: &str, name: &str) -> Self {
        Error::Api {
            code: 409,
            reason: "AlreadyExists".to_string(),
            message: format!("{} \"{}\" already exists", kind, name),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Api { code: 404, .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Error::Api { reason, .. } if reason == "AlreadyExists")
    }

    /// The request carried data the API server will never accept.
    pub fn is_invalid(&self) -> bool {
        matches!(self, Error::Api { code, reason, .. } if *code == 422 || reason == "Invalid")
    }

    /// Short machine-readable classification stored as the condition reason.
    pub fn reason(&self) -> String {
        match self {
            Error::Api { reason, .. } => reason.clone(),
            Error::Transport(_) => "Unavailable".to_string(),
            Error::DefaultsUnavailable(_) => "DefaultsUnavailable".to_string(),
            Error::Template { .. } => "TemplateError".to_string(),
            Error::AlreadyOwned { .. } => "AlreadyOwned".to_string(),
            Error::Serialization(_) => "SerializationError".to_string(),
        }
    }
}

impl From<kube::Error> for Error {
    fn from(error: kube::Error) -> Self {
        match error {
            kube::Error::Api(response) => Error::Api {
                code: response.code,
                reason: response.reason.clone(),
                message: response.message.clone(),
            },
            other => Error::Transport(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Error::Serialization(error.to_string())
    }
}
