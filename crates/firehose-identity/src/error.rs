use snafu::Snafu;

#[derive(Debug, Snafu)]
pub enum IdentityError {
    #[snafu(display("http request failed: {source}"))]
    Http { source: reqwest::Error },
    #[snafu(display("upstream returned status {status}"))]
    Status { status: reqwest::StatusCode },
    #[snafu(display("document id {got} does not match requested subject {expected}"))]
    IdMismatch { expected: String, got: String },
    #[snafu(display("malformed did document: {reason}"))]
    Malformed { reason: String },
    #[snafu(display("unsupported subject method: {subject}"))]
    UnsupportedMethod { subject: String },
    #[snafu(display("circuit breaker open"))]
    CircuitOpen,
    #[snafu(display("dns resolution failed: {source}"))]
    Dns { source: hickory_resolver::error::ResolveError },
}

pub type IdentityResult<T> = std::result::Result<T, IdentityError>;
