use crate::error::{Error, Result};
use std::mem::size_of;

/// Capacity of the file name field in a filename record, including the
/// terminating NUL.
pub const NAME_CAPACITY: usize = 100;

/// Longest file name that fits into a filename record.
pub const MAX_NAME_LEN: usize = NAME_CAPACITY - 1;

/// Largest body carried by any record kind.
pub(crate) const MAX_BODY_LEN: usize = NAME_CAPACITY;

/// Message-type tags used on the control channel.
///
/// The numeric values are the System V `mtype` of each record kind and must
/// stay stable: both processes filter `msgrcv(2)` by them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i64)]
pub enum RecordKind {
    /// Chunk announcement, sender to receiver.
    Chunk = 1,
    /// Chunk acknowledgement, receiver to sender.
    Ack = 2,
    /// File name, sender to receiver, sent once before any chunk.
    FileName = 3,
}

impl RecordKind {
    #[inline(always)]
    pub fn mtype(self) -> libc::c_long {
        self as i64 as libc::c_long
    }

    pub fn from_mtype(mtype: libc::c_long) -> Option<Self> {
        match mtype {
            1 => Some(RecordKind::Chunk),
            2 => Some(RecordKind::Ack),
            3 => Some(RecordKind::FileName),
            _ => None,
        }
    }

    /// Number of body bytes that follow the `mtype` word for this kind.
    pub fn body_len(self) -> usize {
        match self {
            RecordKind::Chunk => size_of::<i32>(),
            RecordKind::Ack => 0,
            RecordKind::FileName => NAME_CAPACITY,
        }
    }
}

/// A control-channel record.
///
/// `Chunk { size: 0 }` is the terminator: the sender has no more data and
/// will not touch the shared buffer again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    FileName(String),
    Chunk { size: usize },
    Ack,
}

impl Record {
    /// The terminator announcement.
    pub const END: Record = Record::Chunk { size: 0 };

    /// Builds a filename record, rejecting names that do not fit.
    ///
    /// The name must leave room for the terminating NUL and must not contain
    /// a NUL itself, otherwise the receiver would see a truncated name.
    pub fn file_name(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.len() > MAX_NAME_LEN {
            return Err(Error::NameTooLong {
                len: name.len(),
                max: MAX_NAME_LEN,
            });
        }
        if name.as_bytes().contains(&0) {
            return Err(Error::MalformedRecord(format!(
                "file name {name:?} contains a NUL byte"
            )));
        }
        Ok(Record::FileName(name))
    }

    pub fn kind(&self) -> RecordKind {
        match self {
            Record::FileName(_) => RecordKind::FileName,
            Record::Chunk { .. } => RecordKind::Chunk,
            Record::Ack => RecordKind::Ack,
        }
    }

    pub fn is_terminator(&self) -> bool {
        matches!(self, Record::Chunk { size: 0 })
    }

    /// Encodes this record into its fixed-size wire form.
    pub fn encode(&self) -> Result<WireRecord> {
        let mut wire = WireRecord::new(self.kind());
        match self {
            Record::FileName(name) => {
                let bytes = name.as_bytes();
                if bytes.len() > MAX_NAME_LEN {
                    return Err(Error::NameTooLong {
                        len: bytes.len(),
                        max: MAX_NAME_LEN,
                    });
                }
                wire.body[..bytes.len()].copy_from_slice(bytes);
            }
            Record::Chunk { size } => {
                let size = i32::try_from(*size).map_err(|_| {
                    Error::MalformedRecord(format!("chunk size {size} does not fit the wire field"))
                })?;
                wire.body[..size_of::<i32>()].copy_from_slice(&size.to_ne_bytes());
            }
            Record::Ack => {}
        }
        Ok(wire)
    }

    /// Decodes a wire record by matching on its type tag.
    pub fn decode(wire: &WireRecord) -> Result<Self> {
        let kind = RecordKind::from_mtype(wire.mtype)
            .ok_or_else(|| Error::MalformedRecord(format!("unknown record type {}", wire.mtype)))?;

        match kind {
            RecordKind::FileName => {
                let body = &wire.body[..NAME_CAPACITY];
                let len = body.iter().position(|&b| b == 0).ok_or_else(|| {
                    Error::MalformedRecord("file name is not NUL-terminated".into())
                })?;
                let name = std::str::from_utf8(&body[..len])
                    .map_err(|e| Error::MalformedRecord(format!("file name is not UTF-8: {e}")))?;
                Ok(Record::FileName(name.to_owned()))
            }
            RecordKind::Chunk => {
                let mut raw = [0u8; size_of::<i32>()];
                raw.copy_from_slice(&wire.body[..size_of::<i32>()]);
                let size = i32::from_ne_bytes(raw);
                let size = usize::try_from(size)
                    .map_err(|_| Error::MalformedRecord(format!("negative chunk size {size}")))?;
                Ok(Record::Chunk { size })
            }
            RecordKind::Ack => Ok(Record::Ack),
        }
    }
}

/// Fixed-size message as handed to `msgsnd(2)` / `msgrcv(2)`.
///
/// The layout is the one System V expects: a `long` type word followed by
/// the body. Only the first [`RecordKind::body_len`] bytes of the body are
/// transferred for a given kind.
#[derive(Debug, Clone)]
#[repr(C)]
pub struct WireRecord {
    pub(crate) mtype: libc::c_long,
    pub(crate) body: [u8; MAX_BODY_LEN],
}

impl WireRecord {
    pub(crate) fn new(kind: RecordKind) -> Self {
        Self {
            mtype: kind.mtype(),
            body: [0u8; MAX_BODY_LEN],
        }
    }

    pub(crate) fn empty() -> Self {
        Self {
            mtype: 0,
            body: [0u8; MAX_BODY_LEN],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mtype_values_are_stable() {
        assert_eq!(RecordKind::Chunk.mtype(), 1);
        assert_eq!(RecordKind::Ack.mtype(), 2);
        assert_eq!(RecordKind::FileName.mtype(), 3);
        assert_eq!(RecordKind::from_mtype(0), None);
        assert_eq!(RecordKind::from_mtype(4), None);
    }

    #[test]
    fn name_at_capacity_boundary_is_accepted() {
        let name = "n".repeat(MAX_NAME_LEN);
        let record = Record::file_name(name.clone()).unwrap();
        let decoded = Record::decode(&record.encode().unwrap()).unwrap();
        assert_eq!(decoded, Record::FileName(name));
    }

    #[test]
    fn name_one_byte_over_is_rejected() {
        let err = Record::file_name("n".repeat(MAX_NAME_LEN + 1)).unwrap_err();
        assert!(matches!(
            err,
            Error::NameTooLong {
                len: 100,
                max: MAX_NAME_LEN
            }
        ));
    }

    #[test]
    fn name_with_nul_is_rejected() {
        assert!(matches!(
            Record::file_name("a\0b"),
            Err(Error::MalformedRecord(_))
        ));
    }

    #[test]
    fn chunk_size_survives_wire_form() {
        let wire = Record::Chunk { size: 1000 }.encode().unwrap();
        assert_eq!(wire.mtype, 1);
        assert_eq!(Record::decode(&wire).unwrap(), Record::Chunk { size: 1000 });
    }

    #[test]
    fn terminator_is_zero_sized_chunk() {
        assert!(Record::END.is_terminator());
        assert!(!Record::Chunk { size: 1 }.is_terminator());
        assert!(!Record::Ack.is_terminator());
        assert_eq!(Record::decode(&Record::END.encode().unwrap()).unwrap(), Record::END);
    }

    #[test]
    fn decode_rejects_unknown_tag() {
        let mut wire = WireRecord::empty();
        wire.mtype = 9;
        assert!(matches!(Record::decode(&wire), Err(Error::MalformedRecord(_))));
    }

    #[test]
    fn decode_rejects_negative_size() {
        let mut wire = WireRecord::new(RecordKind::Chunk);
        wire.body[..4].copy_from_slice(&(-5i32).to_ne_bytes());
        assert!(matches!(Record::decode(&wire), Err(Error::MalformedRecord(_))));
    }

    #[test]
    fn decode_rejects_unterminated_name() {
        let mut wire = WireRecord::new(RecordKind::FileName);
        wire.body = [b'x'; MAX_BODY_LEN];
        assert!(matches!(Record::decode(&wire), Err(Error::MalformedRecord(_))));
    }
}
