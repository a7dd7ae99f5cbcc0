use std::io::{self, Read};

/// Returns timestamp in ns
#[cfg(unix)]
#[inline(never)]
pub fn mono_time_ns() -> u64 {
    use libc::{CLOCK_MONOTONIC, clock_gettime, timespec};
    unsafe {
        let mut ts = timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        clock_gettime(CLOCK_MONOTONIC, &mut ts);
        (ts.tv_sec as u64) * 1_000_000_000 + (ts.tv_nsec as u64)
    }
}

/// Reads until `buf` is full or the reader reports end of file.
///
/// Unlike a single `read`, a short count here means EOF was reached, so the
/// only short chunk of a transfer is the last one. Returns `0` only at EOF.
pub fn read_chunk<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Counters reported by both ends once a transfer is done.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferStats {
    /// Payload bytes moved through the shared buffer.
    pub bytes: u64,
    /// Non-terminal chunk announcements, i.e. announce/ack round trips.
    pub chunks: u64,
    /// Wall time between the first and the last control record, in ns.
    pub elapsed_ns: u64,
}

impl TransferStats {
    pub(crate) fn record_chunk(&mut self, size: usize) {
        self.bytes += size as u64;
        self.chunks += 1;
    }

    /// Payload throughput in MiB/s, or `0.0` when nothing was timed.
    pub fn throughput_mib_s(&self) -> f64 {
        if self.elapsed_ns == 0 {
            return 0.0;
        }
        (self.bytes as f64 / (1024.0 * 1024.0)) / (self.elapsed_ns as f64 / 1e9)
    }
}
