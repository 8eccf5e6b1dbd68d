use thiserror::Error;

/// Local failures detected before a route request reaches the provider.
///
/// These never escape as `Err`: they are reported through the CreateRoute
/// callback with `RouteCreateResult::UnknownError` and this message.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteValidationError {
    #[error("Context is not valid")]
    InvalidContext,
    #[error("Source is empty or invalid")]
    InvalidSource,
    #[error("Sink is empty or invalid")]
    InvalidSink,
    #[error("Sink is not compatible with source")]
    IncompatibleSink,
}

#[derive(Error, Debug)]
pub enum MediaRouterError {
    #[error("Cannot spawn media router thread: {0}")]
    ThreadSpawn(#[from] std::io::Error),
    #[error("Media router context has been shut down")]
    ContextGone,
    #[error("Configuration Error: {0}")]
    Config(String),
}

impl MediaRouterError {
    pub fn config_error(message: &str) -> Self {
        MediaRouterError::Config(message.to_string())
    }
}
