//! Tar container stages.

use crate::pipeline::{is_upstream_failure, PipeReader, PipeWriter, Stage};
use stash_core::{Error, Result};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

/// Archive directory holding entries that live outside the working directory.
///
/// `__stash_root__/home/runner/.cargo` restores to `/home/runner/.cargo`.
pub const ROOT_ANCHOR: &str = "__stash_root__";

/// Name under which `path` is recorded in the archive.
pub fn archive_name(path: &Path, base_dir: &Path) -> PathBuf {
    match path.strip_prefix(base_dir) {
        Ok(rel) if rel.as_os_str().is_empty() => PathBuf::from("."),
        Ok(rel) => rel.to_path_buf(),
        Err(_) => {
            let mut name = PathBuf::from(ROOT_ANCHOR);
            name.extend(path.components().filter_map(|c| match c {
                Component::Normal(part) => Some(part),
                _ => None,
            }));
            name
        }
    }
}

/// Where an archive entry is written: under `base_dir`, or at an absolute
/// location for root-anchored entries. `None` when an anchored name tries to escape.
fn anchored_target(name: &Path) -> Option<Option<PathBuf>> {
    let rest = match name.strip_prefix(ROOT_ANCHOR) {
        Ok(rest) => rest,
        Err(_) => return Some(None),
    };
    if rest.as_os_str().is_empty() || !rest.components().all(|c| matches!(c, Component::Normal(_))) {
        return None;
    }
    Some(Some(Path::new(std::path::MAIN_SEPARATOR_STR).join(rest)))
}

/// Serializes concrete paths into a tar stream.
///
/// Symlinks are stored as links, never followed. Directories are walked
/// recursively.
pub struct TarStage {
    paths: Vec<PathBuf>,
    base_dir: PathBuf,
}

impl TarStage {
    pub fn new(paths: Vec<PathBuf>, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            paths,
            base_dir: base_dir.into(),
        }
    }
}

impl Stage for TarStage {
    fn name(&self) -> &'static str {
        "tar"
    }

    fn run(self: Box<Self>, _input: &mut PipeReader, output: &mut PipeWriter) -> Result<()> {
        let mut builder = tar::Builder::new(output);
        builder.follow_symlinks(false);
        builder.mode(tar::HeaderMode::Complete);

        for path in &self.paths {
            let abs_path = if path.is_absolute() {
                path.clone()
            } else {
                self.base_dir.join(path)
            };
            let metadata = match std::fs::symlink_metadata(&abs_path) {
                Ok(metadata) => metadata,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    warn!("Path disappeared before archiving: {}", abs_path.display());
                    continue;
                }
                Err(e) => return Err(pack_error(&abs_path, e)),
            };

            let name = archive_name(&abs_path, &self.base_dir);
            debug!(path = %abs_path.display(), name = %name.display(), "Archiving");
            let appended = if metadata.is_dir() {
                builder.append_dir_all(&name, &abs_path)
            } else {
                builder.append_path_with_name(&abs_path, &name)
            };
            appended.map_err(|e| pack_error(&abs_path, e))?;
        }

        builder.finish()?;
        Ok(())
    }
}

fn pack_error(path: &Path, err: io::Error) -> Error {
    if err.kind() == io::ErrorKind::BrokenPipe {
        return Error::Io(err);
    }
    Error::Io(io::Error::new(
        err.kind(),
        format!("Failed to archive {}: {}", path.display(), err),
    ))
}

/// Unpacks a tar stream into the working directory.
///
/// Existing files are overwritten, unrelated files are left alone.
/// Reader that notes when its input runs dry.
///
/// `tar` stops at the zero block that ends an archive and treats a clean EOF
/// at a header boundary the same way, so a cut-off stream would otherwise unpack
/// as a shorter archive.
struct EofTracker<'a> {
    inner: &'a mut PipeReader,
    reached_eof: bool,
}

impl Read for EofTracker<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n == 0 && !buf.is_empty() {
            self.reached_eof = true;
        }
        Ok(n)
    }
}

pub struct UntarStage {
    base_dir: PathBuf,
}

impl UntarStage {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn unpack(&self, input: &mut PipeReader) -> io::Result<usize> {
        let mut tracked = EofTracker {
            inner: input,
            reached_eof: false,
        };
        let mut archive = tar::Archive::new(&mut tracked);
        archive.set_preserve_permissions(true);
        archive.set_preserve_mtime(true);
        archive.set_overwrite(true);

        let mut unpacked = 0;
        // Directories are finished last so read-only modes do not block their children.
        let mut directories = Vec::new();
        for entry in archive.entries()? {
            let mut entry = entry?;
            let name = entry.path()?.into_owned();
            let target = match anchored_target(&name) {
                Some(target) => target,
                None => {
                    warn!("Skipping archive entry with unsafe path: {}", name.display());
                    continue;
                }
            };

            match target {
                Some(abs) => {
                    if let Some(parent) = abs.parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    if entry.header().entry_type().is_dir() {
                        std::fs::create_dir_all(&abs)?;
                    }
                    entry.unpack(&abs)?;
                    unpacked += 1;
                }
                None if entry.header().entry_type().is_dir() => directories.push(entry),
                None => {
                    if entry.unpack_in(&self.base_dir)? {
                        unpacked += 1;
                    } else {
                        warn!("Skipping archive entry outside the working directory: {}", name.display());
                    }
                }
            }
        }
        for mut dir in directories {
            if dir.unpack_in(&self.base_dir)? {
                unpacked += 1;
            }
        }
        drop(archive);

        if tracked.reached_eof {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "archive ended before its end-of-archive marker",
            ));
        }
        Ok(unpacked)
    }
}

impl Stage for UntarStage {
    fn name(&self) -> &'static str {
        "untar"
    }

    fn run(self: Box<Self>, input: &mut PipeReader, _output: &mut PipeWriter) -> Result<()> {
        let unpacked = self.unpack(input).map_err(unpack_error)?;
        // Consume trailing padding so a failure after the end marker still surfaces.
        io::copy(input, &mut io::sink()).map_err(unpack_error)?;
        debug!(entries = unpacked, dir = %self.base_dir.display(), "Unpacked archive");
        Ok(())
    }
}

fn unpack_error(err: io::Error) -> Error {
    if is_upstream_failure(&err) {
        return Error::Io(err);
    }
    match err.kind() {
        io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof | io::ErrorKind::Other => {
            Error::CorruptArchive(format!("Failed to unpack: {}", err))
        }
        _ => Error::Io(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_archive_name_relative_to_base() {
        let base = Path::new("/work/repo");
        assert_eq!(
            archive_name(Path::new("/work/repo/target/debug"), base),
            PathBuf::from("target/debug")
        );
        assert_eq!(archive_name(base, base), PathBuf::from("."));
    }

    #[test]
    fn test_archive_name_outside_base_is_anchored() {
        let name = archive_name(Path::new("/home/runner/.cargo/registry"), Path::new("/work"));
        assert_eq!(name, Path::new(ROOT_ANCHOR).join("home/runner/.cargo/registry"));
        assert_eq!(
            anchored_target(&name),
            Some(Some(PathBuf::from("/home/runner/.cargo/registry")))
        );
    }

    #[test]
    fn test_anchored_target_rejects_escape() {
        let name = Path::new(ROOT_ANCHOR).join("../etc/passwd");
        assert_eq!(anchored_target(&name), None);
        assert_eq!(anchored_target(Path::new(ROOT_ANCHOR)), None);
        assert_eq!(anchored_target(Path::new("src/lib.rs")), Some(None));
    }

    #[test]
    fn test_unpack_error_classification() {
        let corrupt = unpack_error(io::Error::other("archive header checksum mismatch"));
        assert!(corrupt.is_corrupt_archive());

        let denied = unpack_error(io::Error::new(io::ErrorKind::PermissionDenied, "denied"));
        assert_eq!(denied.io_kind(), Some(io::ErrorKind::PermissionDenied));
    }
}
