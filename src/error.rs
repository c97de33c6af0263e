use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("The snapshot directory {0:?} does not exist")]
    MissingSnapshotDir(PathBuf),

    #[error("Snapshot {path:?} is not a valid JSON document: {source}")]
    InvalidJsonSnapshot {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Snapshot {path:?} is not a valid GTFS-RT FeedMessage: {source}")]
    InvalidProtobufSnapshot {
        path: PathBuf,
        source: prost::DecodeError,
    },

    #[error("Schedule table {table:?} could not be read: {source}")]
    Schedule { table: String, source: csv::Error },

    #[error("Invalid service date {0:?}, expected YYYYMMDD")]
    InvalidDate(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
