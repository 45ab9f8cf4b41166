use thiserror::Error;

/// Error taxonomy shared by every layer above the storage backends.
///
/// Each variant maps onto a stable `kind:scope` code that route handlers
/// translate into an HTTP status. Backend-specific errors never cross the
/// query facade untranslated; they are folded into `Database` with an
/// operation-specific message.
#[derive(Debug, Error)]
pub enum ParleyError {
    #[error("database operation failed: {0}")]
    Database(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("database call timed out: {0}")]
    Timeout(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("bad request: {0}")]
    Api(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("runtime error: {0}")]
    Runtime(String),
}

impl ParleyError {
    pub fn kind(&self) -> &'static str {
        match self {
            ParleyError::Database(_) => "bad_request:database",
            ParleyError::NotFound(_) => "not_found:database",
            ParleyError::Timeout(_) => "timeout:database",
            ParleyError::Unauthorized(_) => "unauthorized:chat",
            ParleyError::Forbidden(_) => "forbidden:chat",
            ParleyError::RateLimited(_) => "rate_limit:chat",
            ParleyError::Api(_) => "bad_request:api",
            ParleyError::Config(_) => "bad_request:api",
            ParleyError::Serialization(_) => "bad_request:api",
            ParleyError::Runtime(_) => "bad_request:database",
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            ParleyError::NotFound(_) => 404,
            ParleyError::Timeout(_) => 504,
            ParleyError::Unauthorized(_) => 401,
            ParleyError::Forbidden(_) => 403,
            ParleyError::RateLimited(_) => 429,
            _ => 400,
        }
    }
}

impl From<diesel::result::Error> for ParleyError {
    fn from(err: diesel::result::Error) -> Self {
        ParleyError::Database(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ParleyError>;
