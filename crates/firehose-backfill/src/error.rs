use snafu::Snafu;

#[derive(Debug, Snafu)]
pub enum BackfillError {
    #[snafu(display("failed to load the backfill cursor: {source}"))]
    LoadCursor { source: firehose_store::StoreError },
    #[snafu(display("failed to persist the backfill cursor: {source}"))]
    SaveCursor { source: firehose_store::StoreError },
}

pub type BackfillResult<T> = std::result::Result<T, BackfillError>;
