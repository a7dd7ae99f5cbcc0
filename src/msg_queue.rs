use crate::channel::ControlChannel;
use crate::error::{Error, Result};
use crate::record::{Record, RecordKind, WireRecord};
use crate::shm::IPC_MODE;
use log::trace;
use std::ptr;

/// Creates (or looks up) the message queue for `key` and returns its id.
pub(crate) fn create_queue(key: libc::key_t) -> std::io::Result<libc::c_int> {
    let msqid = unsafe { libc::msgget(key, libc::IPC_CREAT | IPC_MODE) };
    if msqid == -1 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(msqid)
}

/// Removes the queue. Blocked senders and receivers fail with `EIDRM`.
///
/// Only issues `msgctl(2)`; safe to call from a signal handler.
pub(crate) fn remove_queue(msqid: libc::c_int) -> std::io::Result<()> {
    if unsafe { libc::msgctl(msqid, libc::IPC_RMID, ptr::null_mut()) } == -1 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

/// A control channel backed by a System V message queue.
///
/// Each record travels as a single message whose `mtype` is the record
/// kind, so `msgrcv(2)` filtering by type gives per-kind delivery for free.
/// Like [`crate::shm::ShmBuffer`], the queue is not removed on drop.
#[derive(Debug)]
pub struct MessageQueue {
    msqid: libc::c_int,
}

impl MessageQueue {
    pub fn open(key: libc::key_t) -> std::io::Result<Self> {
        Ok(Self {
            msqid: create_queue(key)?,
        })
    }

    pub fn id(&self) -> libc::c_int {
        self.msqid
    }

    fn channel_error(op: &'static str, source: std::io::Error) -> Error {
        Error::Channel { op, source }
    }
}

impl ControlChannel for MessageQueue {
    fn send(&self, record: &Record) -> Result<()> {
        let wire = record.encode()?;
        let len = record.kind().body_len();
        loop {
            let rc = unsafe {
                libc::msgsnd(
                    self.msqid,
                    (&wire as *const WireRecord).cast::<libc::c_void>(),
                    len,
                    0,
                )
            };
            if rc == 0 {
                trace!("msgsnd {:?} on queue {}", record, self.msqid);
                return Ok(());
            }
            let err = std::io::Error::last_os_error();
            if err.kind() != std::io::ErrorKind::Interrupted {
                return Err(Self::channel_error("msgsnd", err));
            }
        }
    }

    fn recv(&self, kind: RecordKind) -> Result<Record> {
        let mut wire = WireRecord::empty();
        let len = kind.body_len();
        loop {
            let rc = unsafe {
                libc::msgrcv(
                    self.msqid,
                    (&mut wire as *mut WireRecord).cast::<libc::c_void>(),
                    len,
                    kind.mtype(),
                    0,
                )
            };
            if rc >= 0 {
                let record = Record::decode(&wire)?;
                trace!("msgrcv {:?} on queue {}", record, self.msqid);
                return Ok(record);
            }
            let err = std::io::Error::last_os_error();
            if err.kind() != std::io::ErrorKind::Interrupted {
                return Err(Self::channel_error("msgrcv", err));
            }
        }
    }
}
