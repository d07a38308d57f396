//! Archive creation and extraction.

use crate::archiver::{TarStage, UntarStage};
use crate::compression::{CompressStage, DecompressStage};
use crate::pipeline::{Pipeline, PipelineHandle};
use futures::StreamExt;
use stash_core::{BodyStream, Compression, Result};
use std::path::{Path, PathBuf};

/// Converts concrete paths to a compressed tar stream and back.
#[derive(Debug, Clone)]
pub struct ArchiveCodec {
    base_dir: PathBuf,
    compression: Compression,
}

impl ArchiveCodec {
    pub fn new(base_dir: impl Into<PathBuf>, compression: Compression) -> Self {
        Self {
            base_dir: base_dir.into(),
            compression,
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn compression(&self) -> Compression {
        self.compression
    }

    /// Start archiving `paths`.
    ///
    /// Bytes are available on the returned stream while later paths are
    /// still being walked. Join the handle after the stream is drained to
    /// learn whether archiving succeeded.
    pub fn create(&self, paths: Vec<PathBuf>) -> (BodyStream, PipelineHandle) {
        let mut pipeline = Pipeline::new().stage(TarStage::new(paths, self.base_dir.clone()));
        if self.compression != Compression::None {
            pipeline = pipeline.stage(CompressStage(self.compression));
        }
        pipeline.spawn(None)
    }

    /// Unpack an archive stream into the base directory.
    ///
    /// A stream that fails to decode is reported as a corrupt archive.
    /// Entries already written are left in place.
    pub async fn extract(&self, input: BodyStream) -> Result<()> {
        let mut pipeline = Pipeline::new();
        if self.compression != Compression::None {
            pipeline = pipeline.stage(DecompressStage(self.compression));
        }
        let (mut output, handle) = pipeline
            .stage(UntarStage::new(self.base_dir.clone()))
            .spawn(Some(input));

        // Untar writes nothing; drain until the stages finish.
        while let Some(chunk) = output.next().await {
            if chunk.is_err() {
                break;
            }
        }
        handle.join().await
    }
}
