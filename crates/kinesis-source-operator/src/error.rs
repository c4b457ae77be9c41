use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Sink not found: {0}")]
    SinkNotFound(String),

    #[error("Sink has no address: {0}")]
    SinkNotAddressable(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Missing field: {0}")]
    MissingField(String),

    #[error("Finalizer error: {0}")]
    FinalizerError(#[source] Box<kube::runtime::finalizer::Error<Error>>),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn is_retryable(&self) -> bool {
        use kube::runtime::finalizer;

        match self {
            Error::KubeError(_) => true,
            Error::SinkNotFound(_) => true,
            Error::SinkNotAddressable(_) => true,
            Error::FinalizerError(e) => match e.as_ref() {
                finalizer::Error::ApplyFailed(inner) | finalizer::Error::CleanupFailed(inner) => {
                    inner.is_retryable()
                }
                finalizer::Error::AddFinalizer(_) | finalizer::Error::RemoveFinalizer(_) => true,
                _ => false,
            },
            _ => false,
        }
    }
}
