//! Streaming archive pipeline for stash.
//!
//! Paths are serialized into a tar container and compressed by concurrent
//! stages connected with bounded pipes, so the consumer reads compressed
//! bytes while later paths are still being walked.

pub mod archiver;
pub mod bandwidth;
pub mod codec;
pub mod compression;
pub mod paths;
pub mod pipeline;

pub use bandwidth::{BandwidthTracker, TransferSnapshot};
pub use codec::ArchiveCodec;
pub use paths::expand_paths;
pub use pipeline::{Pipeline, PipelineHandle, PipeReader, PipeWriter, Stage};
