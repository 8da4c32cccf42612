//! Concurrent content digesting. A bounded pool of workers pulls file references from a
//! producer, drives one multi-digester per file, and streams results back in completion
//! order. Backpressure comes from the bounded channels on both sides of the pool, and a
//! cancellation token is polled before work is dispatched, between file reads, and before
//! every send.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Receiver, Sender};
use log::debug;

use crate::ocfl::digest::{DigestAlgorithm, HexDigest, MultiDigestWriter};
use crate::ocfl::error::{OcflError, Result};
use crate::ocfl::vfs::{join, Vfs};

const READ_BUF_SIZE: usize = 64 * 1024;

/// Cooperative cancellation flag shared between a caller and the workers it started
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Returns `Cancelled` if the token has been triggered
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(OcflError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// A file to digest: `path` relative to `base`, both within the same `Vfs`
#[derive(Debug, Clone)]
pub struct FileRef {
    pub base: String,
    pub path: String,
}

impl FileRef {
    pub fn new(base: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            path: path.into(),
        }
    }
}

/// One pipeline result. `digest` is the primary algorithm's digest and `fixity` holds any
/// additional algorithms. When `error` is set the digests are absent; per-file errors do
/// not stop the pipeline.
#[derive(Debug)]
pub struct DigestedFile {
    pub path: String,
    pub digest: Option<HexDigest>,
    pub fixity: HashMap<DigestAlgorithm, HexDigest>,
    pub error: Option<OcflError>,
}

impl DigestedFile {
    fn failed(path: String, error: OcflError) -> Self {
        Self {
            path,
            digest: None,
            fixity: HashMap::new(),
            error: Some(error),
        }
    }
}

/// Configures and launches digest runs
pub struct DigestPipeline {
    primary: DigestAlgorithm,
    fixity: Vec<DigestAlgorithm>,
    workers: usize,
}

impl DigestPipeline {
    pub fn new(primary: DigestAlgorithm) -> Self {
        Self {
            primary,
            fixity: Vec::new(),
            workers: num_cpus::get(),
        }
    }

    pub fn with_fixity(mut self, fixity: Vec<DigestAlgorithm>) -> Self {
        self.fixity = fixity;
        self
    }

    /// Overrides the worker count, which defaults to the CPU count. Zero is coerced to one.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Starts the workers and returns a lazy stream of results. The output order is not
    /// related to the producer order. Dropping the stream cancels outstanding work and
    /// joins every worker.
    pub fn run<I>(&self, fs: Arc<dyn Vfs>, producer: I, cancel: CancelToken) -> DigestStream
    where
        I: Iterator<Item = Result<FileRef>> + Send + 'static,
    {
        let (work_tx, work_rx) = bounded::<FileRef>(self.workers);
        let (result_tx, result_rx) = bounded::<DigestedFile>(self.workers);

        let mut handles = Vec::with_capacity(self.workers + 1);

        handles.push(spawn_producer(producer, work_tx, result_tx.clone(), cancel.clone()));

        let mut algorithms = Vec::with_capacity(1 + self.fixity.len());
        algorithms.push(self.primary);
        algorithms.extend(self.fixity.iter().copied());

        for _ in 0..self.workers {
            handles.push(spawn_worker(
                fs.clone(),
                self.primary,
                algorithms.clone(),
                work_rx.clone(),
                result_tx.clone(),
                cancel.clone(),
            ));
        }

        // The stream owns the only other result sender; the channel closes once every
        // worker exits.
        drop(result_tx);

        DigestStream {
            results: Some(result_rx),
            cancel,
            handles,
        }
    }
}

fn spawn_producer<I>(
    producer: I,
    work_tx: Sender<FileRef>,
    result_tx: Sender<DigestedFile>,
    cancel: CancelToken,
) -> JoinHandle<()>
where
    I: Iterator<Item = Result<FileRef>> + Send + 'static,
{
    std::thread::spawn(move || {
        for item in producer {
            if cancel.is_cancelled() {
                break;
            }

            match item {
                Ok(file_ref) => {
                    if work_tx.send(file_ref).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    // Enumeration stops here, but items already queued still drain
                    let _ = result_tx.send(DigestedFile::failed(String::new(), e));
                    break;
                }
            }
        }
    })
}

fn spawn_worker(
    fs: Arc<dyn Vfs>,
    primary: DigestAlgorithm,
    algorithms: Vec<DigestAlgorithm>,
    work_rx: Receiver<FileRef>,
    result_tx: Sender<DigestedFile>,
    cancel: CancelToken,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        while let Ok(file_ref) = work_rx.recv() {
            let item = if cancel.is_cancelled() {
                DigestedFile::failed(file_ref.path, OcflError::Cancelled)
            } else {
                digest_one(fs.as_ref(), primary, &algorithms, file_ref, &cancel)
            };

            if result_tx.send(item).is_err() {
                debug!("Digest consumer disconnected; worker exiting");
                break;
            }
        }
    })
}

fn digest_one(
    fs: &dyn Vfs,
    primary: DigestAlgorithm,
    algorithms: &[DigestAlgorithm],
    file_ref: FileRef,
    cancel: &CancelToken,
) -> DigestedFile {
    let full_path = join(&file_ref.base, &file_ref.path);

    let mut file = match fs.open(&full_path) {
        Ok(file) => file,
        Err(e) => return DigestedFile::failed(file_ref.path, e),
    };

    let mut writer = MultiDigestWriter::new(algorithms, std::io::sink());

    if let Err(e) = copy_cancellable(&mut file, &mut writer, cancel, &full_path) {
        return DigestedFile::failed(file_ref.path, e);
    }

    let digest = writer.sum(primary);
    let fixity = writer.sums();

    DigestedFile {
        path: file_ref.path,
        digest,
        fixity,
        error: None,
    }
}

/// `io::copy` with a cancellation poll between reads
fn copy_cancellable(
    reader: &mut dyn Read,
    writer: &mut dyn Write,
    cancel: &CancelToken,
    path: &str,
) -> Result<()> {
    let mut buf = [0u8; READ_BUF_SIZE];

    loop {
        cancel.check()?;

        let n = reader
            .read(&mut buf)
            .map_err(|e| OcflError::io("read", path, e))?;
        if n == 0 {
            return Ok(());
        }

        writer
            .write_all(&buf[..n])
            .map_err(|e| OcflError::io("write", path, e))?;
    }
}

/// Iterator over pipeline results. Dropping it mid-stream cancels and drains the pool.
pub struct DigestStream {
    results: Option<Receiver<DigestedFile>>,
    cancel: CancelToken,
    handles: Vec<JoinHandle<()>>,
}

impl Iterator for DigestStream {
    type Item = DigestedFile;

    fn next(&mut self) -> Option<Self::Item> {
        self.results.as_ref()?.recv().ok()
    }
}

impl Drop for DigestStream {
    fn drop(&mut self) {
        self.cancel.cancel();
        // Closing the result channel unblocks any worker waiting to send
        self.results = None;

        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}
