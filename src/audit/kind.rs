use strum_macros::{Display, EnumIter, EnumString};

/// How a lock is being used at a call site
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum LockKind {
    /// a plain mutex
    Exclusive,
    /// shared side of a read-write lock
    Read,
    /// exclusive side of a read-write lock
    Write,
}

/// The discipline a lock id gets bound to on first use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum LockFamily {
    #[strum(serialize = "exclusive")]
    Exclusive,
    #[strum(serialize = "read-write")]
    ReadWrite,
}

impl LockKind {
    pub fn family(self) -> LockFamily {
        match self {
            LockKind::Exclusive => LockFamily::Exclusive,
            LockKind::Read | LockKind::Write => LockFamily::ReadWrite,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Action {
    #[strum(serialize = "lock")]
    Acquire,
    #[strum(serialize = "unlock")]
    Release,
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn read_and_write_share_a_family() {
        let families: Vec<_> = LockKind::iter().map(LockKind::family).collect();
        assert_eq!(
            families,
            [LockFamily::Exclusive, LockFamily::ReadWrite, LockFamily::ReadWrite]
        );
    }

    #[test]
    fn names() {
        assert_eq!(LockKind::from_str("write").unwrap(), LockKind::Write);
        assert_eq!(LockFamily::ReadWrite.to_string(), "read-write");
        assert_eq!(Action::Release.to_string(), "unlock");
    }
}
