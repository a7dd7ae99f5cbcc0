use crate::error::{Error, Result};
use crate::record::{Record, RecordKind};
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, PoisonError};

/// A typed, filterable control channel.
///
/// Records of the same kind are delivered in the order they were sent.
/// Records of different kinds are independent: [`ControlChannel::recv`]
/// for one kind never blocks on, and is never satisfied by, a record of
/// another kind.
pub trait ControlChannel {
    /// Enqueues a record.
    fn send(&self, record: &Record) -> Result<()>;

    /// Blocks until a record of `kind` is available and dequeues it.
    ///
    /// There is no timeout: if the peer never sends, this never returns.
    fn recv(&self, kind: RecordKind) -> Result<Record>;
}

#[derive(Debug, Default)]
struct LocalQueue {
    records: VecDeque<Record>,
    closed: bool,
}

/// An in-process control channel.
///
/// The counterpart of the System V message queue for transfers between
/// threads of one process. Closing the channel wakes every blocked receiver
/// with an error, the same way removing a System V queue fails pending
/// `msgrcv(2)` calls with `EIDRM`.
#[derive(Debug, Default)]
pub struct LocalChannel {
    queue: Mutex<LocalQueue>,
    ready: Condvar,
}

impl LocalChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records waiting to be received, across all kinds.
    pub fn pending(&self) -> usize {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .records
            .len()
    }

    /// Closes the channel; pending and future operations fail.
    pub fn close(&self) {
        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        queue.closed = true;
        self.ready.notify_all();
    }

    fn removed(op: &'static str) -> Error {
        Error::Channel {
            op,
            source: std::io::Error::from_raw_os_error(libc::EIDRM),
        }
    }
}

impl ControlChannel for LocalChannel {
    fn send(&self, record: &Record) -> Result<()> {
        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        if queue.closed {
            return Err(Self::removed("send"));
        }
        queue.records.push_back(record.clone());
        self.ready.notify_all();
        Ok(())
    }

    fn recv(&self, kind: RecordKind) -> Result<Record> {
        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if queue.closed {
                return Err(Self::removed("recv"));
            }
            if let Some(pos) = queue.records.iter().position(|r| r.kind() == kind) {
                if let Some(record) = queue.records.remove(pos) {
                    return Ok(record);
                }
            }
            queue = self
                .ready
                .wait(queue)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn recv_filters_by_kind() {
        let ch = LocalChannel::new();
        ch.send(&Record::Ack).unwrap();
        ch.send(&Record::Chunk { size: 7 }).unwrap();
        ch.send(&Record::FileName("f".into())).unwrap();

        assert_eq!(
            ch.recv(RecordKind::FileName).unwrap(),
            Record::FileName("f".into())
        );
        assert_eq!(ch.recv(RecordKind::Chunk).unwrap(), Record::Chunk { size: 7 });
        assert_eq!(ch.recv(RecordKind::Ack).unwrap(), Record::Ack);
        assert_eq!(ch.pending(), 0);
    }

    #[test]
    fn order_is_kept_within_a_kind() {
        let ch = LocalChannel::new();
        for size in [3, 1, 2] {
            ch.send(&Record::Chunk { size }).unwrap();
            ch.send(&Record::Ack).unwrap();
        }
        for size in [3, 1, 2] {
            assert_eq!(ch.recv(RecordKind::Chunk).unwrap(), Record::Chunk { size });
        }
        assert_eq!(ch.pending(), 3);
    }

    #[test]
    fn recv_blocks_until_matching_kind_arrives() {
        let ch = Arc::new(LocalChannel::new());
        let rx = {
            let ch = ch.clone();
            thread::spawn(move || ch.recv(RecordKind::Ack))
        };

        // Records of other kinds must not wake the receiver up with a result.
        ch.send(&Record::Chunk { size: 1 }).unwrap();
        thread::sleep(Duration::from_millis(20));
        assert!(!rx.is_finished());

        ch.send(&Record::Ack).unwrap();
        assert_eq!(rx.join().unwrap().unwrap(), Record::Ack);
        assert_eq!(ch.pending(), 1);
    }

    #[test]
    fn close_fails_blocked_receivers() {
        let ch = Arc::new(LocalChannel::new());
        let rx = {
            let ch = ch.clone();
            thread::spawn(move || ch.recv(RecordKind::Chunk))
        };
        thread::sleep(Duration::from_millis(10));
        ch.close();

        let err = rx.join().unwrap().unwrap_err();
        assert!(matches!(err, Error::Channel { op: "recv", .. }));
        assert!(ch.send(&Record::Ack).is_err());
    }
}
