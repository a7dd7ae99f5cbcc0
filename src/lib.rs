//! # Shared-Memory File Transfer
//!
//! Moves a single file from one process (the *sender*) to another (the
//! *receiver*) on the same host, through a fixed-size System V shared
//! memory segment for the payload and a System V message queue for control
//! signaling.
//!
//! ## Protocol
//!
//! The shared buffer holds at most one chunk and has no occupancy flag of
//! its own. Who may touch it is decided by a strict announce/ack lockstep
//! on the control channel:
//!
//! 1. The sender transmits the file name once.
//! 2. The sender writes up to `capacity` bytes into the buffer and announces
//!    the chunk size. It then blocks until it receives an ack.
//! 3. The receiver, woken by the announcement, copies that many bytes out of
//!    the buffer into the destination file and sends the ack.
//! 4. Steps 2–3 repeat. A zero-size announcement terminates the stream; the
//!    sender never writes the buffer after it.
//!
//! Records on the control channel are typed (file name, chunk, ack), and
//! each side only ever receives the kind it is waiting for, so a stray
//! record of another kind can neither block nor satisfy a wait.
//!
//! ## Blocking Behavior
//!
//! Both state machines suspend only in the control channel's blocking
//! receive, and **there is no timeout**:
//!
//! - A peer that crashes or is killed without tearing down leaves the other
//!   side blocked indefinitely.
//! - When the receiver tears down (normally or on `SIGINT`/`SIGTERM`), the
//!   queue is removed and a sender blocked in `msgrcv(2)` fails with
//!   `EIDRM` instead of hanging.
//!
//! ## Modules
//!
//! - [`sender`] / [`receiver`]: the two state machines, generic over the
//!   transport.
//! - [`buffer`] / [`channel`]: the [`SharedBuffer`] and [`ControlChannel`]
//!   seams, with in-process implementations.
//! - [`shm`] / [`msg_queue`]: the System V implementations.
//! - [`session`] / [`interrupt`]: attach, one-shot teardown, and emergency
//!   teardown on interrupt.
//! - [`record`]: control records and their wire layout.
//!
//! ## License
//!
//! Copyright © 2005–2025
//! IKH Software, Inc.
//!
//! Licensed under the terms of the **GNU Lesser General Public License**,
//! version 3.0, or (at your option) any later version.
//!
//! See <https://www.gnu.org/licenses/lgpl-3.0.html> for details.

#[cfg(not(unix))]
compile_error!("This crate only supports Unix-like operating systems.");

pub mod buffer;
pub mod channel;
pub mod config;
pub mod error;
pub mod interrupt;
pub mod msg_queue;
pub mod receiver;
pub mod record;
pub mod sender;
pub mod session;
pub mod shm;
mod utils;

pub use buffer::{HeapBuffer, SharedBuffer};
pub use channel::{ControlChannel, LocalChannel};
pub use config::TransferConfig;
pub use error::{Error, Result};
pub use msg_queue::MessageQueue;
pub use receiver::{FileReceiver, Received, ReceiverState};
pub use record::{MAX_NAME_LEN, NAME_CAPACITY, Record, RecordKind};
pub use sender::{FileSender, SenderState};
pub use session::{Role, Session};
pub use shm::ShmBuffer;
pub use utils::{TransferStats, mono_time_ns};
