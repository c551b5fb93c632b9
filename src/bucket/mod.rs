//! Bucket lifecycle: staged ingestion ([`writer`]) and committed reads
//! ([`reader`]), plus the disconnect cancellation primitive ([`canary`])
//! that links a writer to the peer connection that allocated it.

pub mod canary;
pub mod reader;
pub mod writer;

pub use canary::DisconnectCanary;
pub use reader::{BucketReader, CorruptionAdvisory, ReaderError};
pub use writer::{BucketWriter, CommitInfo, WriterError, WriterState};
