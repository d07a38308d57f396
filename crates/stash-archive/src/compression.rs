//! Compression stages.

use crate::pipeline::{is_upstream_failure, PipeReader, PipeWriter, Stage};
use stash_core::{Compression, Error, Result};
use std::io::{self, Read, Write};

const ZSTD_LEVEL: i32 = 3;
const READ_BUFFER: usize = 64 * 1024;

/// Compresses its input with the configured algorithm.
pub struct CompressStage(pub Compression);

impl Stage for CompressStage {
    fn name(&self) -> &'static str {
        "compress"
    }

    fn run(self: Box<Self>, input: &mut PipeReader, output: &mut PipeWriter) -> Result<()> {
        match self.0 {
            Compression::None => {
                io::copy(input, output)?;
            }
            Compression::Gzip => {
                let mut encoder =
                    flate2::write::GzEncoder::new(output, flate2::Compression::default());
                io::copy(input, &mut encoder)?;
                encoder.finish()?;
            }
            Compression::Zstd => {
                let mut encoder = zstd::stream::write::Encoder::new(output, ZSTD_LEVEL)?;
                io::copy(input, &mut encoder)?;
                encoder.finish()?;
            }
            Compression::Lz4 => {
                let mut encoder = lz4_flex::frame::FrameEncoder::new(output);
                io::copy(input, &mut encoder)?;
                encoder
                    .finish()
                    .map_err(|e| Error::Internal(format!("LZ4 finish failed: {}", e)))?;
            }
        }
        Ok(())
    }
}

/// Decompresses its input, reporting undecodable bytes as a corrupt archive.
pub struct DecompressStage(pub Compression);

impl Stage for DecompressStage {
    fn name(&self) -> &'static str {
        "decompress"
    }

    fn run(self: Box<Self>, input: &mut PipeReader, output: &mut PipeWriter) -> Result<()> {
        match self.0 {
            Compression::None => copy_decoded(input, output),
            Compression::Gzip => copy_decoded(flate2::read::GzDecoder::new(input), output),
            Compression::Zstd => {
                let decoder =
                    zstd::stream::read::Decoder::new(input).map_err(classify_decode_error)?;
                copy_decoded(decoder, output)
            }
            Compression::Lz4 => copy_decoded(lz4_flex::frame::FrameDecoder::new(input), output),
        }
    }
}

fn copy_decoded(mut decoder: impl Read, output: &mut PipeWriter) -> Result<()> {
    let mut buf = vec![0u8; READ_BUFFER];
    loop {
        let n = match decoder.read(&mut buf) {
            Ok(0) => return Ok(()),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(classify_decode_error(e)),
        };
        output.write_all(&buf[..n])?;
    }
}

fn classify_decode_error(err: io::Error) -> Error {
    if is_upstream_failure(&err) {
        Error::Io(err)
    } else {
        Error::CorruptArchive(format!("Failed to decompress: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Pipeline;
    use bytes::Bytes;
    use futures::TryStreamExt;
    use stash_core::BodyStream;

    fn body(data: Vec<u8>) -> BodyStream {
        let chunks: Vec<io::Result<Bytes>> = data
            .chunks(10_000)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        Box::pin(futures::stream::iter(chunks))
    }

    async fn run(pipeline: Pipeline, data: Vec<u8>) -> (io::Result<Vec<u8>>, Result<()>) {
        let (output, handle) = pipeline.spawn(Some(body(data)));
        let collected = output
            .try_fold(Vec::new(), |mut acc, chunk| async move {
                acc.extend_from_slice(&chunk);
                Ok(acc)
            })
            .await;
        (collected, handle.join().await)
    }

    fn sample() -> Vec<u8> {
        b"Hello, World! This is a test of compression.\n".repeat(20_000)
    }

    #[tokio::test]
    async fn test_zstd_shrinks_and_restores() {
        let data = sample();
        let (compressed, joined) =
            run(Pipeline::new().stage(CompressStage(Compression::Zstd)), data.clone()).await;
        joined.unwrap();
        let compressed = compressed.unwrap();
        assert!(compressed.len() < data.len() / 10);

        let (restored, joined) =
            run(Pipeline::new().stage(DecompressStage(Compression::Zstd)), compressed).await;
        joined.unwrap();
        assert_eq!(restored.unwrap(), data);
    }

    #[tokio::test]
    async fn test_chained_gzip_stages() {
        let data = sample();
        let pipeline = Pipeline::new()
            .stage(CompressStage(Compression::Gzip))
            .stage(DecompressStage(Compression::Gzip));
        let (restored, joined) = run(pipeline, data.clone()).await;
        joined.unwrap();
        assert_eq!(restored.unwrap(), data);
    }

    #[tokio::test]
    async fn test_lz4_output_is_a_frame() {
        let (compressed, joined) = run(
            Pipeline::new().stage(CompressStage(Compression::Lz4)),
            sample(),
        )
        .await;
        joined.unwrap();
        // LZ4 frame magic number, little endian.
        assert_eq!(&compressed.unwrap()[..4], &[0x04, 0x22, 0x4d, 0x18]);
    }

    #[tokio::test]
    async fn test_garbage_is_corrupt_archive() {
        for compression in [Compression::Gzip, Compression::Zstd, Compression::Lz4] {
            let (output, joined) = run(
                Pipeline::new().stage(DecompressStage(compression)),
                b"definitely not compressed data".to_vec(),
            )
            .await;
            assert!(output.is_err());
            let err = joined.unwrap_err();
            assert!(err.is_corrupt_archive(), "{compression}: {err}");
        }
    }

    #[tokio::test]
    async fn test_truncated_gzip_is_corrupt_archive() {
        let (compressed, _) = run(
            Pipeline::new().stage(CompressStage(Compression::Gzip)),
            sample(),
        )
        .await;
        let mut compressed = compressed.unwrap();
        compressed.truncate(compressed.len() / 2);

        let (_, joined) =
            run(Pipeline::new().stage(DecompressStage(Compression::Gzip)), compressed).await;
        assert!(joined.unwrap_err().is_corrupt_archive());
    }
}
