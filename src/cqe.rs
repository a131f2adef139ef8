use rustix::io::Errno;

use crate::tag::{Tag, TagKind};
use crate::{
    io_uring_cqe, IORING_CQE_F_BUFFER, IORING_CQE_F_MORE, IORING_CQE_F_NOTIFICATION,
    IORING_CQE_F_SOCK_NONEMPTY,
};

/// Upper 16 bits of `flags` carry the selected buffer id when
/// `IORING_CQE_F_BUFFER` is set.
const IORING_CQE_BUFFER_SHIFT: u32 = 16;

#[repr(u32)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CqeFlags {
    Buffer = IORING_CQE_F_BUFFER,
    More = IORING_CQE_F_MORE,
    SockNonempty = IORING_CQE_F_SOCK_NONEMPTY,
    Notification = IORING_CQE_F_NOTIFICATION,
}

impl CqeFlags {
    const ALL: [Self; 4] = [
        Self::Buffer,
        Self::More,
        Self::SockNonempty,
        Self::Notification,
    ];

    #[must_use]
    pub fn bits(self) -> u32 {
        self as u32
    }

    #[must_use]
    pub fn from_bits(bits: u32) -> Option<Self> {
        match bits {
            IORING_CQE_F_BUFFER => Some(Self::Buffer),
            IORING_CQE_F_MORE => Some(Self::More),
            IORING_CQE_F_SOCK_NONEMPTY => Some(Self::SockNonempty),
            IORING_CQE_F_NOTIFICATION => Some(Self::Notification),
            _ => None,
        }
    }

    /// Every known flag set in `flags`; the buffer id bits are ignored.
    pub fn decode(flags: u32) -> impl Iterator<Item = Self> {
        Self::ALL
            .into_iter()
            .filter(move |f| flags & f.bits() != 0)
    }
}

/// Splits a signed completion result into success value or errno.
///
/// ## Errors
/// Returns the `Errno` for any negative result.
pub fn res_to_result(res: i32) -> Result<i32, Errno> {
    if res >= 0 {
        Ok(res)
    } else {
        Err(Errno::from_raw_os_error(-res))
    }
}

impl io_uring_cqe {
    /// ## Errors
    /// Returns the `Errno` the operation failed with.
    pub fn result(&self) -> Result<i32, Errno> {
        res_to_result(self.res)
    }

    /// Decodes `user_data` back into the tag encoding the ring was using.
    #[must_use]
    pub fn tag(&self, kind: TagKind) -> Tag {
        Tag::from_user_data(kind, self.user_data)
    }

    #[must_use]
    pub fn has_flag(&self, flag: CqeFlags) -> bool {
        self.flags & flag.bits() != 0
    }

    /// The request stays armed and will post further completions
    /// (multishot accept).
    #[must_use]
    pub fn has_more(&self) -> bool {
        self.has_flag(CqeFlags::More)
    }

    #[must_use]
    pub fn buffer_id(&self) -> Option<u16> {
        self.has_flag(CqeFlags::Buffer)
            .then(|| (self.flags >> IORING_CQE_BUFFER_SHIFT) as u16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_res_to_result() {
        assert_eq!(res_to_result(12), Ok(12));
        assert_eq!(res_to_result(0), Ok(0));
        assert_eq!(
            res_to_result(-Errno::CANCELED.raw_os_error()),
            Err(Errno::CANCELED)
        );
    }

    #[test]
    fn test_flag_decoding() {
        let cqe = io_uring_cqe {
            user_data: 1,
            res: 4,
            flags: IORING_CQE_F_MORE | IORING_CQE_F_SOCK_NONEMPTY,
        };
        assert!(cqe.has_more());
        assert_eq!(
            CqeFlags::decode(cqe.flags).collect::<Vec<_>>(),
            vec![CqeFlags::More, CqeFlags::SockNonempty]
        );
        assert_eq!(cqe.buffer_id(), None);
        assert_eq!(CqeFlags::from_bits(IORING_CQE_F_NOTIFICATION), Some(CqeFlags::Notification));
        assert_eq!(CqeFlags::from_bits(1 << 9), None);
    }

    #[test]
    fn test_buffer_id() {
        let cqe = io_uring_cqe {
            user_data: 0,
            res: 0,
            flags: (7 << 16) | IORING_CQE_F_BUFFER,
        };
        assert_eq!(cqe.buffer_id(), Some(7));
    }

    #[test]
    fn test_tag_round_trip() {
        let cqe = io_uring_cqe {
            user_data: 42,
            res: 0,
            flags: 0,
        };
        assert_eq!(cqe.tag(TagKind::Data64), Tag::Data64(42));
        assert_eq!(cqe.tag(TagKind::Addr), Tag::Addr(42));
    }
}
