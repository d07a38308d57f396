//! Test data helpers.

use bytes::Bytes;
use futures::{TryStreamExt, stream};
use stash_core::BodyStream;
use std::path::Path;

/// Deterministic bytes that do not compress well.
pub fn noise(len: usize, seed: u64) -> Vec<u8> {
    let mut state = seed | 1;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state >> 24) as u8
        })
        .collect()
}

/// Body stream over `data`, split into `chunk`-sized pieces.
pub fn body(data: Vec<u8>, chunk: usize) -> BodyStream {
    let data = Bytes::from(data);
    let pieces: Vec<std::io::Result<Bytes>> = (0..data.len())
        .step_by(chunk.max(1))
        .map(|start| Ok(data.slice(start..(start + chunk).min(data.len()))))
        .collect();
    Box::pin(stream::iter(pieces))
}

/// Read a body to the end.
pub async fn collect(body: BodyStream) -> std::io::Result<Vec<u8>> {
    body.map_ok(|chunk| chunk.to_vec())
        .try_concat()
        .await
}

/// Write files under `root`, creating parent directories.
pub fn write_tree(root: &Path, files: &[(&str, &[u8])]) -> std::io::Result<()> {
    for (name, contents) in files {
        let path = root.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, contents)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[test]
    fn test_noise_is_deterministic() {
        assert_eq!(noise(64, 7), noise(64, 7));
        assert_ne!(noise(64, 7), noise(64, 8));
    }

    #[tokio::test]
    async fn test_body_chunks_reassemble() {
        let data = noise(10_000, 1);
        let chunks = body(data.clone(), 3_000).count().await;
        assert_eq!(chunks, 4);
        assert_eq!(collect(body(data.clone(), 3_000)).await.unwrap(), data);
    }
}
