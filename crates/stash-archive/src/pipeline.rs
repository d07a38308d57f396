//! Stage pipeline runner.
//!
//! A [`Pipeline`] wires blocking [`Stage`]s together with bounded pipes. Each
//! stage runs on the blocking pool, so a slow consumer suspends its producer
//! once the pipe between them is full. A failed stage hands its error to the
//! next stage instead of a clean end-of-stream, so a truncated body never
//! looks complete to whoever reads the pipeline output.

use bytes::{Buf, Bytes};
use futures::StreamExt;
use stash_core::{BodyStream, Error, Result};
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Bytes accumulated by a writer before they are handed downstream.
const CHUNK_SIZE: usize = 64 * 1024;
/// Chunks in flight between two stages.
const PIPE_CAPACITY: usize = 8;

enum Frame {
    Chunk(Bytes),
    Failed(io::Error),
    End,
}

/// Error surfaced by a pipe reader when the stage feeding it failed.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct UpstreamFailure(String);

fn upstream(err: io::Error) -> io::Error {
    io::Error::new(err.kind(), UpstreamFailure(err.to_string()))
}

/// Whether an I/O error originated in an earlier stage rather than the current one.
pub fn is_upstream_failure(err: &io::Error) -> bool {
    let mut current: Option<&(dyn std::error::Error + 'static)> = match err.get_ref() {
        Some(inner) => Some(inner),
        None => return false,
    };
    while let Some(e) = current {
        if e.is::<UpstreamFailure>() {
            return true;
        }
        if let Some(inner) = e.downcast_ref::<io::Error>().and_then(|io| io.get_ref()) {
            if inner.is::<UpstreamFailure>() {
                return true;
            }
        }
        current = e.source();
    }
    false
}

/// Reading end of a pipe.
pub struct PipeReader {
    rx: mpsc::Receiver<Frame>,
    current: Bytes,
    finished: bool,
}

impl PipeReader {
    fn new(rx: mpsc::Receiver<Frame>) -> Self {
        Self {
            rx,
            current: Bytes::new(),
            finished: false,
        }
    }
}

impl Read for PipeReader {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        loop {
            if !self.current.is_empty() {
                let n = out.len().min(self.current.len());
                out[..n].copy_from_slice(&self.current[..n]);
                self.current.advance(n);
                return Ok(n);
            }
            if self.finished {
                return Ok(0);
            }
            match self.rx.blocking_recv() {
                Some(Frame::Chunk(chunk)) => self.current = chunk,
                Some(Frame::End) => self.finished = true,
                Some(Frame::Failed(err)) => return Err(upstream(err)),
                None => {
                    return Err(upstream(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "upstream stage stopped without finishing",
                    )));
                }
            }
        }
    }
}

/// Writing end of a pipe.
pub struct PipeWriter {
    tx: mpsc::Sender<Frame>,
    buf: Vec<u8>,
}

impl PipeWriter {
    fn new(tx: mpsc::Sender<Frame>) -> Self {
        Self {
            tx,
            buf: Vec::with_capacity(CHUNK_SIZE),
        }
    }

    fn send(&mut self, frame: Frame) -> io::Result<()> {
        self.tx
            .blocking_send(frame)
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "downstream stage closed"))
    }

    fn send_buffered(&mut self) -> io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let chunk = std::mem::replace(&mut self.buf, Vec::with_capacity(CHUNK_SIZE));
        self.send(Frame::Chunk(Bytes::from(chunk)))
    }

    fn finish(&mut self) -> io::Result<()> {
        self.send_buffered()?;
        self.send(Frame::End)
    }

    fn abort(&mut self, err: io::Error) {
        self.buf.clear();
        let _ = self.tx.blocking_send(Frame::Failed(err));
    }
}

impl Write for PipeWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        if self.buf.len() >= CHUNK_SIZE {
            self.send_buffered()?;
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.send_buffered()
    }
}

/// One step of a pipeline: consumes bytes, produces bytes.
///
/// Source stages ignore their input and sink stages write nothing.
pub trait Stage: Send + 'static {
    /// Stage name for logging.
    fn name(&self) -> &'static str;

    /// Run to completion on a blocking thread.
    fn run(self: Box<Self>, input: &mut PipeReader, output: &mut PipeWriter) -> Result<()>;
}

#[derive(Clone, Default)]
struct Failures(Arc<Mutex<Vec<(&'static str, Error)>>>);

impl Failures {
    fn lock(&self) -> MutexGuard<'_, Vec<(&'static str, Error)>> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(&self, stage: &'static str, err: Error) {
        self.lock().push((stage, err));
    }

    /// The earliest failure that was not caused by the consumer going away.
    fn first_cause(&self) -> Option<(&'static str, Error)> {
        let mut failures = std::mem::take(&mut *self.lock());
        let index = failures
            .iter()
            .position(|(_, err)| err.io_kind() != Some(io::ErrorKind::BrokenPipe))?;
        Some(failures.swap_remove(index))
    }
}

/// An ordered chain of stages.
#[derive(Default)]
pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stage.
    pub fn stage(mut self, stage: impl Stage) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    /// Start every stage and return the output stream with a handle to await completion.
    ///
    /// `input` feeds the first stage; with `None` the first stage sees an
    /// empty input. Must be called within a Tokio runtime.
    pub fn spawn(self, input: Option<BodyStream>) -> (BodyStream, PipelineHandle) {
        let failures = Failures::default();
        let (source_tx, mut rx) = mpsc::channel(PIPE_CAPACITY);

        let pump = match input {
            Some(input) => Some(tokio::spawn(pump(input, source_tx))),
            None => {
                let _ = source_tx.try_send(Frame::End);
                None
            }
        };

        let mut stages = Vec::with_capacity(self.stages.len());
        for stage in self.stages {
            let (tx, next_rx) = mpsc::channel(PIPE_CAPACITY);
            let reader = PipeReader::new(rx);
            let writer = PipeWriter::new(tx);
            let failures = failures.clone();
            stages.push(tokio::task::spawn_blocking(move || {
                run_stage(stage, reader, writer, &failures)
            }));
            rx = next_rx;
        }

        let handle = PipelineHandle {
            pump,
            stages,
            failures,
        };
        (frame_stream(rx), handle)
    }
}

fn run_stage(
    stage: Box<dyn Stage>,
    mut reader: PipeReader,
    mut writer: PipeWriter,
    failures: &Failures,
) {
    let name = stage.name();
    debug!(stage = name, "Stage started");

    let result = stage
        .run(&mut reader, &mut writer)
        .and_then(|()| writer.finish().map_err(Error::Io));

    match result {
        Ok(()) => debug!(stage = name, "Stage finished"),
        Err(err) => {
            debug!(stage = name, error = %err, "Stage failed");
            let message = err.to_string();
            failures.record(name, err);
            drop(reader);
            writer.abort(io::Error::other(message));
        }
    }
}

async fn pump(mut input: BodyStream, tx: mpsc::Sender<Frame>) {
    while let Some(item) = input.next().await {
        let frame = match item {
            Ok(chunk) => Frame::Chunk(chunk),
            Err(err) => {
                let _ = tx.send(Frame::Failed(err)).await;
                return;
            }
        };
        if tx.send(frame).await.is_err() {
            debug!("Pipeline stopped reading its input early");
            return;
        }
    }
    let _ = tx.send(Frame::End).await;
}

fn frame_stream(rx: mpsc::Receiver<Frame>) -> BodyStream {
    Box::pin(futures::stream::unfold(Some(rx), |rx| async move {
        let mut rx = rx?;
        match rx.recv().await {
            Some(Frame::Chunk(chunk)) => Some((Ok(chunk), Some(rx))),
            Some(Frame::End) => None,
            Some(Frame::Failed(err)) => Some((Err(upstream(err)), None)),
            None => Some((
                Err(upstream(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "pipeline stopped without finishing",
                ))),
                None,
            )),
        }
    }))
}

/// Handle to a running pipeline.
pub struct PipelineHandle {
    pump: Option<JoinHandle<()>>,
    stages: Vec<JoinHandle<()>>,
    failures: Failures,
}

impl PipelineHandle {
    /// Wait for every stage to stop and return the first failure, if any.
    ///
    /// A stage that stopped only because the output stream was dropped is
    /// not a failure; whoever dropped it knows why.
    pub async fn join(self) -> Result<()> {
        let mut panicked = None;
        for handle in self.stages {
            if let Err(err) = handle.await {
                panicked.get_or_insert_with(|| err.to_string());
            }
        }
        if let Some(pump) = self.pump {
            let _ = pump.await;
        }

        if let Some((stage, err)) = self.failures.first_cause() {
            debug!(stage, error = %err, "Pipeline failed");
            return Err(err);
        }
        match panicked {
            Some(message) => Err(Error::Internal(format!(
                "Pipeline stage panicked: {}",
                message
            ))),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    struct Copy;

    impl Stage for Copy {
        fn name(&self) -> &'static str {
            "copy"
        }

        fn run(self: Box<Self>, input: &mut PipeReader, output: &mut PipeWriter) -> Result<()> {
            io::copy(input, output)?;
            Ok(())
        }
    }

    struct Produce(usize);

    impl Stage for Produce {
        fn name(&self) -> &'static str {
            "produce"
        }

        fn run(self: Box<Self>, _input: &mut PipeReader, output: &mut PipeWriter) -> Result<()> {
            let block = [7u8; 4096];
            for _ in 0..self.0 {
                output.write_all(&block)?;
            }
            Ok(())
        }
    }

    struct Fail;

    impl Stage for Fail {
        fn name(&self) -> &'static str {
            "fail"
        }

        fn run(self: Box<Self>, input: &mut PipeReader, _output: &mut PipeWriter) -> Result<()> {
            let mut first = [0u8; 1];
            input.read_exact(&mut first)?;
            Err(Error::CorruptArchive("bad magic".to_string()))
        }
    }

    fn chunks(parts: &[&'static [u8]]) -> BodyStream {
        let items: Vec<io::Result<Bytes>> = parts.iter().map(|p| Ok(Bytes::from_static(p))).collect();
        Box::pin(futures::stream::iter(items))
    }

    async fn collect(stream: BodyStream) -> io::Result<Vec<u8>> {
        stream
            .try_fold(Vec::new(), |mut acc, chunk| async move {
                acc.extend_from_slice(&chunk);
                Ok(acc)
            })
            .await
    }

    #[tokio::test]
    async fn test_bytes_pass_through_in_order() {
        let (output, handle) = Pipeline::new()
            .stage(Copy)
            .stage(Copy)
            .spawn(Some(chunks(&[b"hello ", b"", b"pipeline ", b"world"])));

        assert_eq!(collect(output).await.unwrap(), b"hello pipeline world");
        handle.join().await.unwrap();
    }

    #[tokio::test]
    async fn test_source_stage_without_input() {
        let (output, handle) = Pipeline::new().stage(Produce(64)).spawn(None);
        assert_eq!(collect(output).await.unwrap().len(), 64 * 4096);
        handle.join().await.unwrap();
    }

    #[tokio::test]
    async fn test_failure_reaches_consumer_and_join() {
        let (output, handle) = Pipeline::new()
            .stage(Fail)
            .stage(Copy)
            .spawn(Some(chunks(&[b"garbage"])));

        let err = collect(output).await.unwrap_err();
        assert!(is_upstream_failure(&err));
        assert!(err.to_string().contains("bad magic"));

        let err = handle.join().await.unwrap_err();
        assert!(err.is_corrupt_archive());
    }

    #[tokio::test]
    async fn test_input_error_is_upstream_failure() {
        let items: Vec<io::Result<Bytes>> = vec![
            Ok(Bytes::from_static(b"partial")),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "connection reset")),
        ];
        let (output, handle) = Pipeline::new()
            .stage(Copy)
            .spawn(Some(Box::pin(futures::stream::iter(items))));

        assert!(collect(output).await.is_err());
        let err = handle.join().await.unwrap_err();
        match err {
            Error::Io(io) => {
                assert!(is_upstream_failure(&io));
                assert!(io.to_string().contains("connection reset"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_dropped_output_is_not_a_failure() {
        let (mut output, handle) = Pipeline::new().stage(Produce(10_000)).spawn(None);
        let first = output.next().await.unwrap().unwrap();
        assert!(!first.is_empty());
        drop(output);

        handle.join().await.unwrap();
    }
}
