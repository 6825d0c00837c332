use snafu::Snafu;

#[derive(Debug, Snafu)]
pub enum FetchError {
    #[snafu(display("http request failed: {source}"))]
    Http { source: reqwest::Error },
    #[snafu(display("upstream returned status {status}"))]
    Status { status: reqwest::StatusCode },
    #[snafu(display("no pds endpoint could be resolved for {subject}"))]
    NoEndpoint { subject: String },
    #[snafu(display("response missing required fields"))]
    MalformedResponse,
}

pub type FetchResult<T> = std::result::Result<T, FetchError>;
