use crate::config::TransferConfig;
use crate::error::{Error, Result};
use crate::interrupt;
use crate::msg_queue::{MessageQueue, remove_queue};
use crate::shm::{ShmBuffer, detach_segment, key_from_file, remove_segment};
use log::{info, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

/// Which end of the transfer a process plays.
///
/// The receiver is the long-lived side of the rendezvous, so it is the one
/// that destroys the shared objects; the sender only detaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Sender,
    Receiver,
}

const LIVE: u8 = 0;
const DETACHED: u8 = 1;
const REMOVED: u8 = 2;

/// One-shot teardown of a session's System V objects.
///
/// Holds only raw ids so that it can run from a signal handler: every step
/// is a single syscall and nothing allocates. Progress only moves forward
/// (`live → detached → removed`), so the detach and the removal each happen
/// at most once per process, whichever of the normal exit path and the
/// interrupt path gets there first.
#[derive(Debug)]
pub struct Teardown {
    shmid: libc::c_int,
    msqid: libc::c_int,
    addr: *mut u8,
    state: AtomicU8,
}

unsafe impl Send for Teardown {}
unsafe impl Sync for Teardown {}

impl Teardown {
    /// Detaches the segment and, if `destroy` is set, removes the segment
    /// and the queue.
    ///
    /// Runs with the interrupt signals blocked on the calling thread, so the
    /// interrupt handler never observes a half-finished teardown. Returns
    /// `Ok(false)` if there was nothing left to do.
    pub fn run(&self, destroy: bool) -> Result<bool> {
        let _masked = interrupt::block_signals()
            .map_err(|source| Error::ResourceTeardown { op: "pthread_sigmask", source })?;
        self.run_unmasked(destroy)
    }

    /// Same as [`Teardown::run`] without touching the signal mask.
    ///
    /// Only for callers that already cannot be interrupted by the teardown
    /// signals, i.e. the interrupt handler itself.
    pub(crate) fn run_unmasked(&self, destroy: bool) -> Result<bool> {
        let mut ran = false;
        if self.advance(LIVE, DETACHED) {
            unsafe { detach_segment(self.addr) }
                .map_err(|source| Error::ResourceTeardown { op: "shmdt", source })?;
            ran = true;
        }
        if destroy && self.advance(DETACHED, REMOVED) {
            remove_segment(self.shmid)
                .map_err(|source| Error::ResourceTeardown { op: "shmctl", source })?;
            remove_queue(self.msqid)
                .map_err(|source| Error::ResourceTeardown { op: "msgctl", source })?;
            ran = true;
        }
        Ok(ran)
    }

    fn advance(&self, from: u8, to: u8) -> bool {
        self.state
            .compare_exchange(from, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// `true` once the segment has been detached.
    pub fn is_detached(&self) -> bool {
        self.state.load(Ordering::Acquire) != LIVE
    }

    /// `true` once the segment and the queue have been removed.
    pub fn is_removed(&self) -> bool {
        self.state.load(Ordering::Acquire) == REMOVED
    }
}

/// The shared buffer and control channel of one transfer.
///
/// Owned by the process entry point and lent to the state machines. Attach
/// order is fixed on both sides: key, then segment, then queue.
#[derive(Debug)]
pub struct Session {
    key: libc::key_t,
    buffer: ShmBuffer,
    channel: MessageQueue,
    teardown: Arc<Teardown>,
}

impl Session {
    /// Resolves the shared key and creates or attaches both objects.
    pub fn attach(config: &TransferConfig) -> Result<Self> {
        config.validate()?;

        let key = key_from_file(&config.key_file, config.project_id)
            .map_err(|source| Error::ResourceUnavailable { op: "ftok", source })?;
        let buffer = ShmBuffer::attach(key, config.chunk_capacity)
            .map_err(|source| Error::ResourceUnavailable { op: "shmget/shmat", source })?;
        let channel = match MessageQueue::open(key) {
            Ok(channel) => channel,
            Err(source) => {
                // Don't leave the segment mapped behind a failed attach.
                if let Err(e) = unsafe { detach_segment(buffer.base_ptr()) } {
                    warn!("shmdt after failed msgget: {e}");
                }
                return Err(Error::ResourceUnavailable { op: "msgget", source });
            }
        };

        info!(
            "attached key {:#x}: segment {} ({} bytes), queue {}",
            key,
            buffer.id(),
            config.chunk_capacity,
            channel.id()
        );

        let teardown = Arc::new(Teardown {
            shmid: buffer.id(),
            msqid: channel.id(),
            addr: buffer.base_ptr(),
            state: AtomicU8::new(LIVE),
        });

        Ok(Self {
            key,
            buffer,
            channel,
            teardown,
        })
    }

    pub fn key(&self) -> libc::key_t {
        self.key
    }

    pub fn buffer(&self) -> &ShmBuffer {
        &self.buffer
    }

    pub fn channel(&self) -> &MessageQueue {
        &self.channel
    }

    pub(crate) fn teardown(&self) -> &Arc<Teardown> {
        &self.teardown
    }

    /// Ends the session for `role`.
    ///
    /// Returns `Ok(false)` if the teardown already ran, e.g. from the
    /// interrupt handler.
    pub fn release(self, role: Role) -> Result<bool> {
        let ran = self.teardown.run(role == Role::Receiver)?;
        if ran {
            info!("released session {:#x} as {:?}", self.key, role);
        }
        Ok(ran)
    }

    /// Releases the session after a transfer that produced `outcome`.
    ///
    /// The transfer error wins over a teardown error; the latter is logged
    /// instead of being lost.
    pub fn conclude<T>(self, role: Role, outcome: Result<T>) -> Result<T> {
        let key = self.key;
        match (outcome, self.release(role)) {
            (Ok(value), Ok(_)) => Ok(value),
            (Ok(_), Err(e)) | (Err(e), Ok(_)) => Err(e),
            (Err(e), Err(teardown)) => {
                warn!("releasing session {key:#x} after a failed transfer: {teardown}");
                Err(e)
            }
        }
    }
}

impl Drop for Session {
    /// Detaches the segment if the session was never released.
    fn drop(&mut self) {
        if let Err(e) = self.teardown.run(false) {
            warn!("detaching segment of session {:#x}: {e}", self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::SharedBuffer;
    use crate::channel::ControlChannel;
    use crate::receiver::FileReceiver;
    use crate::record::{Record, RecordKind};
    use crate::sender::FileSender;
    use std::path::Path;
    use std::thread;

    fn config_in(dir: &Path, cap: usize) -> TransferConfig {
        let key_file = dir.join("keyfile.txt");
        std::fs::write(&key_file, b"").unwrap();
        TransferConfig::default()
            .with_key_file(key_file)
            .with_chunk_capacity(cap)
            .with_output_dir(dir)
    }

    #[test]
    fn missing_key_file_is_resource_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let config = TransferConfig::default().with_key_file(dir.path().join("absent"));
        let err = Session::attach(&config).unwrap_err();
        assert!(matches!(err, Error::ResourceUnavailable { op: "ftok", .. }));
    }

    #[test]
    fn both_sides_meet_on_the_same_objects() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path(), 32);

        let a = Session::attach(&config).unwrap();
        let b = Session::attach(&config).unwrap();
        assert_eq!(a.key(), b.key());
        assert_eq!(a.buffer().id(), b.buffer().id());
        assert_eq!(a.channel().id(), b.channel().id());

        a.channel().send(&Record::Chunk { size: 9 }).unwrap();
        assert_eq!(
            b.channel().recv(RecordKind::Chunk).unwrap(),
            Record::Chunk { size: 9 }
        );

        unsafe { a.buffer().write(b"hello") };
        let mut out = [0u8; 5];
        unsafe { b.buffer().read(&mut out) };
        assert_eq!(&out, b"hello");

        assert!(b.release(Role::Sender).unwrap());
        assert!(a.release(Role::Receiver).unwrap());
    }

    #[test]
    fn teardown_runs_once() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path(), 16);
        let session = Session::attach(&config).unwrap();
        let teardown = session.teardown().clone();

        // Interrupt path wins the race.
        assert!(teardown.run(true).unwrap());
        assert!(teardown.is_removed());
        // Normal path is now a no-op instead of failing on removed objects.
        assert!(!session.release(Role::Receiver).unwrap());
    }

    #[test]
    fn detach_then_destroy_still_removes_objects() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path(), 16);
        let session = Session::attach(&config).unwrap();
        let (shmid, msqid) = (session.buffer().id(), session.channel().id());
        let teardown = session.teardown().clone();

        assert!(teardown.run(false).unwrap());
        assert!(teardown.is_detached() && !teardown.is_removed());
        assert!(!teardown.run(false).unwrap());

        assert!(session.release(Role::Receiver).unwrap());
        assert!(teardown.is_removed());
        assert!(remove_segment(shmid).is_err());
        assert!(remove_queue(msqid).is_err());
    }

    #[test]
    fn vanished_queue_is_a_teardown_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path(), 16);
        let session = Session::attach(&config).unwrap();
        remove_queue(session.channel().id()).unwrap();

        let err = session.release(Role::Receiver).unwrap_err();
        assert!(matches!(err, Error::ResourceTeardown { op: "msgctl", .. }));
    }

    #[test]
    fn conclude_prefers_the_transfer_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path(), 16);

        let session = Session::attach(&config).unwrap();
        remove_queue(session.channel().id()).unwrap();
        let outcome: Result<()> = Err(Error::MalformedRecord("bad".into()));
        let err = session.conclude(Role::Receiver, outcome).unwrap_err();
        assert!(matches!(err, Error::MalformedRecord(_)));

        let session = Session::attach(&config).unwrap();
        remove_queue(session.channel().id()).unwrap();
        let err = session.conclude(Role::Receiver, Ok(7)).unwrap_err();
        assert!(matches!(err, Error::ResourceTeardown { op: "msgctl", .. }));

        let session = Session::attach(&config).unwrap();
        assert_eq!(session.conclude(Role::Receiver, Ok(7)).unwrap(), 7);
    }

    #[test]
    fn key_is_reusable_after_receiver_teardown() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path(), 16);

        let first = Session::attach(&config).unwrap();
        let (old_shm, old_msq) = (first.buffer().id(), first.channel().id());
        first.channel().send(&Record::Ack).unwrap();
        assert!(first.release(Role::Receiver).unwrap());

        let second = Session::attach(&config).unwrap();
        assert_ne!(second.buffer().id(), old_shm);
        assert_ne!(second.channel().id(), old_msq);
        // The stale ack went away with the old queue.
        second.channel().send(&Record::END).unwrap();
        assert_eq!(second.channel().recv(RecordKind::Chunk).unwrap(), Record::END);
        assert!(second.release(Role::Receiver).unwrap());
    }

    #[test]
    fn removing_the_queue_unblocks_a_waiting_peer() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path(), 16);
        let receiver = Session::attach(&config).unwrap();
        let sender = Session::attach(&config).unwrap();

        let waiter = thread::spawn(move || {
            let result = sender.channel().recv(RecordKind::Ack);
            let _ = sender.release(Role::Sender);
            result
        });

        thread::sleep(std::time::Duration::from_millis(50));
        assert!(receiver.release(Role::Receiver).unwrap());

        let err = waiter.join().unwrap().unwrap_err();
        assert!(matches!(err, Error::Channel { op: "msgrcv", .. }));
    }

    #[test]
    fn end_to_end_transfer_over_system_v() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path(), 1000);
        let source = dir.path().join("input.bin");
        let data: Vec<u8> = (0..10_500u32).map(|i| (i % 253) as u8).collect();
        std::fs::write(&source, &data).unwrap();

        let receiver_session = Session::attach(&config).unwrap();

        let sender = {
            let config = config.clone();
            let source = source.clone();
            thread::spawn(move || {
                let session = Session::attach(&config).unwrap();
                let stats = FileSender::new(session.buffer(), session.channel())
                    .send_file(&source)
                    .unwrap();
                session.release(Role::Sender).unwrap();
                stats
            })
        };

        let received = FileReceiver::new(receiver_session.buffer(), receiver_session.channel())
            .with_output_dir(&config.output_dir)
            .receive()
            .unwrap();
        let sent = sender.join().unwrap();
        receiver_session.release(Role::Receiver).unwrap();

        assert_eq!(received.path, dir.path().join("input.bin__recv"));
        assert_eq!(std::fs::read(&received.path).unwrap(), data);
        assert_eq!(sent.chunks, 11);
        assert_eq!(received.stats.chunks, 11);
        assert_eq!(received.stats.bytes, data.len() as u64);
    }
}
