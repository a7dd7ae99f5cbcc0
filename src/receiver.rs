use crate::buffer::SharedBuffer;
use crate::channel::ControlChannel;
use crate::config::DEFAULT_RECV_SUFFIX;
use crate::error::{Error, Result};
use crate::record::{Record, RecordKind};
use crate::utils::{TransferStats, mono_time_ns};
use log::{debug, info};
use std::ffi::OsString;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

/// States of the receiving side.
///
/// ```text
/// Init ──name──▶ NameReceived ──▶ WaitChunk ──chunk(n>0)──▶ Storing
///                                    ▲                         │
///                                    └───────────ack───────────┘
///                       WaitChunk ──chunk(0)──▶ Done
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverState {
    Init,
    NameReceived,
    WaitChunk,
    Storing { size: usize },
    Done,
}

/// Result of a completed receive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Received {
    /// File name as transmitted by the sender.
    pub name: String,
    /// Where the payload was written.
    pub path: PathBuf,
    pub stats: TransferStats,
}

/// Builds the destination path for a received file name.
///
/// Only the final component of `name` is kept, so the file always lands in
/// `output_dir` whatever path the sender transmitted.
pub fn destination_path(output_dir: &Path, name: &str, suffix: &str) -> Result<PathBuf> {
    let base = Path::new(name)
        .file_name()
        .ok_or_else(|| Error::InvalidFileName(name.to_owned()))?;
    let mut file_name = OsString::from(base);
    file_name.push(suffix);
    Ok(output_dir.join(file_name))
}

/// Receiving end of a transfer.
///
/// Waits for announcements, copies each announced chunk out of the
/// [`SharedBuffer`] into the destination file and acknowledges it. The
/// buffer is read only between a non-zero announcement and the matching
/// ack, which is the window in which the sender leaves it alone.
#[derive(Debug)]
pub struct FileReceiver<'a, B: ?Sized, C: ?Sized> {
    buffer: &'a B,
    channel: &'a C,
    output_dir: PathBuf,
    suffix: String,
    state: ReceiverState,
}

impl<'a, B, C> FileReceiver<'a, B, C>
where
    B: SharedBuffer + ?Sized,
    C: ControlChannel + ?Sized,
{
    /// Creates a receiver writing into the current working directory.
    pub fn new(buffer: &'a B, channel: &'a C) -> Self {
        Self {
            buffer,
            channel,
            output_dir: PathBuf::from("."),
            suffix: DEFAULT_RECV_SUFFIX.to_owned(),
            state: ReceiverState::Init,
        }
    }

    pub fn with_output_dir(mut self, output_dir: impl AsRef<Path>) -> Self {
        self.output_dir = output_dir.as_ref().to_path_buf();
        self
    }

    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = suffix.into();
        self
    }

    pub fn state(&self) -> ReceiverState {
        self.state
    }

    /// Runs one transfer to completion.
    ///
    /// An existing destination file is truncated and overwritten.
    pub fn receive(&mut self) -> Result<Received> {
        let mut chunk = vec![0u8; self.buffer.capacity()];
        let mut stats = TransferStats::default();
        let mut name = String::new();
        let mut path = PathBuf::new();
        let mut file: Option<File> = None;
        let mut started = 0;

        loop {
            self.state = match self.state {
                ReceiverState::Init => {
                    name = match self.channel.recv(RecordKind::FileName)? {
                        Record::FileName(name) => name,
                        other => return Err(unexpected(RecordKind::FileName, &other)),
                    };
                    started = mono_time_ns();
                    path = destination_path(&self.output_dir, &name, &self.suffix)?;
                    file = Some(File::create(&path).map_err(|source| Error::FileOpen {
                        path: path.clone(),
                        source,
                    })?);
                    info!("receiving {:?} into {}", name, path.display());
                    ReceiverState::NameReceived
                }
                ReceiverState::NameReceived | ReceiverState::WaitChunk => {
                    let size = match self.channel.recv(RecordKind::Chunk)? {
                        Record::Chunk { size } => size,
                        other => return Err(unexpected(RecordKind::Chunk, &other)),
                    };
                    if size == 0 {
                        if let Some(mut file) = file.take() {
                            file.flush().map_err(|source| Error::FileWrite {
                                path: path.clone(),
                                source,
                            })?;
                        }
                        stats.elapsed_ns = mono_time_ns().saturating_sub(started);
                        ReceiverState::Done
                    } else if size > chunk.len() {
                        return Err(Error::OversizedChunk {
                            size,
                            capacity: chunk.len(),
                        });
                    } else {
                        ReceiverState::Storing { size }
                    }
                }
                ReceiverState::Storing { size } => {
                    // The sender is blocked on our ack, so the buffer is ours.
                    unsafe { self.buffer.read(&mut chunk[..size]) };
                    if let Some(file) = file.as_mut() {
                        file.write_all(&chunk[..size])
                            .map_err(|source| Error::FileWrite {
                                path: path.clone(),
                                source,
                            })?;
                    }
                    stats.record_chunk(size);
                    debug!("stored chunk #{} ({} bytes)", stats.chunks, size);
                    self.channel.send(&Record::Ack)?;
                    ReceiverState::WaitChunk
                }
                ReceiverState::Done => break,
            };
        }

        info!(
            "received {} bytes in {} chunks ({:.2} MiB/s)",
            stats.bytes,
            stats.chunks,
            stats.throughput_mib_s()
        );
        Ok(Received { name, path, stats })
    }
}

fn unexpected(wanted: RecordKind, got: &Record) -> Error {
    Error::MalformedRecord(format!("expected {wanted:?} record, got {got:?}"))
}
