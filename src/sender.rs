use crate::buffer::SharedBuffer;
use crate::channel::ControlChannel;
use crate::error::{Error, Result};
use crate::record::{Record, RecordKind};
use crate::utils::{TransferStats, mono_time_ns, read_chunk};
use log::{debug, info};
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// States of the sending side.
///
/// ```text
/// Init ──name──▶ NameSent ──▶ Sending ──chunk(n>0)──▶ AwaitAck
///                               ▲                        │
///                               └──────────ack───────────┘
///                    Sending ──chunk(0)──▶ Done
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderState {
    Init,
    NameSent,
    Sending,
    AwaitAck,
    Done,
}

/// Sending end of a transfer.
///
/// Drives the announce/ack lockstep over a [`SharedBuffer`] and a
/// [`ControlChannel`]: a chunk is written into the buffer only while the
/// sender owns it, i.e. before the first announcement or right after an
/// ack. After the terminator (`Chunk { size: 0 }`) the buffer is never
/// written again.
///
/// A `FileSender` performs one transfer; once it reaches
/// [`SenderState::Done`] further calls return the recorded stats without
/// touching the channel.
#[derive(Debug)]
pub struct FileSender<'a, B: ?Sized, C: ?Sized> {
    buffer: &'a B,
    channel: &'a C,
    state: SenderState,
    stats: TransferStats,
}

impl<'a, B, C> FileSender<'a, B, C>
where
    B: SharedBuffer + ?Sized,
    C: ControlChannel + ?Sized,
{
    pub fn new(buffer: &'a B, channel: &'a C) -> Self {
        Self {
            buffer,
            channel,
            state: SenderState::Init,
            stats: TransferStats::default(),
        }
    }

    pub fn state(&self) -> SenderState {
        self.state
    }

    /// Sends the file at `path`.
    ///
    /// The path is transmitted as given; the receiver decides how to use it.
    /// The file is opened before anything goes onto the channel, so an
    /// unreadable source leaves the peer untouched.
    pub fn send_file(&mut self, path: &Path) -> Result<TransferStats> {
        let name = path
            .to_str()
            .ok_or_else(|| Error::InvalidFileName(path.to_string_lossy().into_owned()))?;
        let record = Record::file_name(name)?;
        let file = File::open(path).map_err(|source| Error::FileOpen {
            path: path.to_path_buf(),
            source,
        })?;
        self.run(record, file, path)
    }

    /// Sends everything `reader` yields under the file name `name`.
    pub fn send_stream<R: Read>(&mut self, name: &str, reader: R) -> Result<TransferStats> {
        let record = Record::file_name(name)?;
        self.run(record, reader, Path::new(name))
    }

    fn run<R: Read>(&mut self, name: Record, mut reader: R, origin: &Path) -> Result<TransferStats> {
        let mut chunk = vec![0u8; self.buffer.capacity()];
        let started = mono_time_ns();

        loop {
            self.state = match self.state {
                SenderState::Init => {
                    self.channel.send(&name)?;
                    debug!("sent file name {:?}", name);
                    SenderState::NameSent
                }
                SenderState::NameSent | SenderState::Sending => {
                    let n = read_chunk(&mut reader, &mut chunk).map_err(|source| Error::FileRead {
                        path: origin.to_path_buf(),
                        source,
                    })?;
                    if n > 0 {
                        // We own the buffer here: either nothing was announced
                        // yet or the previous chunk has been acked.
                        unsafe { self.buffer.write(&chunk[..n]) };
                    }
                    self.channel.send(&Record::Chunk { size: n })?;
                    if n == 0 {
                        self.stats.elapsed_ns = mono_time_ns().saturating_sub(started);
                        debug!("sent terminator after {} chunks", self.stats.chunks);
                        SenderState::Done
                    } else {
                        self.stats.record_chunk(n);
                        debug!("announced chunk #{} ({} bytes)", self.stats.chunks, n);
                        SenderState::AwaitAck
                    }
                }
                SenderState::AwaitAck => {
                    self.channel.recv(RecordKind::Ack)?;
                    SenderState::Sending
                }
                SenderState::Done => break,
            };
        }

        info!(
            "sent {} bytes in {} chunks ({:.2} MiB/s)",
            self.stats.bytes,
            self.stats.chunks,
            self.stats.throughput_mib_s()
        );
        Ok(self.stats)
    }
}
