//! Correlation tags stamped into `sqe->user_data` and echoed back in
//! `cqe->user_data`.

/// A caller-chosen value linking a completion to its submission.
///
/// Both variants occupy the same 64-bit `user_data` field, so a completion
/// alone cannot tell them apart. A ring therefore accepts only one kind for
/// its whole lifetime.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Tag {
    /// Opaque 64-bit integer.
    Data64(u64),
    /// Opaque address-sized value, e.g. a pointer to caller-side state.
    Addr(usize),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum TagKind {
    Data64,
    Addr,
}

impl Tag {
    #[must_use]
    pub fn kind(self) -> TagKind {
        match self {
            Self::Data64(_) => TagKind::Data64,
            Self::Addr(_) => TagKind::Addr,
        }
    }

    #[must_use]
    pub fn user_data(self) -> u64 {
        match self {
            Self::Data64(v) => v,
            Self::Addr(a) => a as u64,
        }
    }

    /// Rebuilds a tag of `kind` from a completion's `user_data`.
    #[must_use]
    pub fn from_user_data(kind: TagKind, user_data: u64) -> Self {
        match kind {
            TagKind::Data64 => Self::Data64(user_data),
            TagKind::Addr => Self::Addr(user_data as usize),
        }
    }
}

impl From<u64> for Tag {
    fn from(v: u64) -> Self {
        Self::Data64(v)
    }
}

impl<T> From<*const T> for Tag {
    fn from(p: *const T) -> Self {
        Self::Addr(p as usize)
    }
}

impl<T> From<*mut T> for Tag {
    fn from(p: *mut T) -> Self {
        Self::Addr(p as usize)
    }
}
