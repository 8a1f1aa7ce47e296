//! Status codes for query operations
//!
//! Query entry points report their outcome through a bitmask: exactly one of
//! the high bits (success, failure, in progress) plus any number of detail
//! bits that qualify it. Partial results are successes.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Bitmask status returned by query operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Status(pub u32);

impl Status {
    /// Operation failed
    pub const FAILURE: Status = Status(1 << 31);
    /// Operation succeeded
    pub const SUCCESS: Status = Status(1 << 30);
    /// Operation still in progress
    pub const IN_PROGRESS: Status = Status(1 << 29);

    /// Mask covering all detail bits
    pub const DETAIL_MASK: u32 = 0x0ff_ffff;
    /// Input data is not recognized
    pub const WRONG_MAGIC: Status = Status(1 << 0);
    /// Input data is in wrong version
    pub const WRONG_VERSION: Status = Status(1 << 1);
    /// Operation ran out of memory
    pub const OUT_OF_MEMORY: Status = Status(1 << 2);
    /// An input parameter was invalid
    pub const INVALID_PARAM: Status = Status(1 << 3);
    /// Result buffer was too small to store all results
    pub const BUFFER_TOO_SMALL: Status = Status(1 << 4);
    /// Query ran out of nodes during search
    pub const OUT_OF_NODES: Status = Status(1 << 5);
    /// Query did not reach the end location, returning best guess
    pub const PARTIAL_RESULT: Status = Status(1 << 6);
    /// A tile has already been assigned to the given (x, y, layer) slot
    pub const ALREADY_OCCUPIED: Status = Status(1 << 7);

    /// Returns true if the status is a success
    #[inline]
    pub fn is_success(&self) -> bool {
        (self.0 & Self::SUCCESS.0) != 0
    }

    /// Returns true if the status is a failure
    #[inline]
    pub fn is_failure(&self) -> bool {
        (self.0 & Self::FAILURE.0) != 0
    }

    /// Returns true if the status is in progress
    #[inline]
    pub fn is_in_progress(&self) -> bool {
        (self.0 & Self::IN_PROGRESS.0) != 0
    }

    /// Returns true if the given detail bit is set
    #[inline]
    pub fn has(&self, detail: Status) -> bool {
        (self.0 & detail.0) != 0
    }

    /// Gets the detail bits
    #[inline]
    pub fn detail(&self) -> u32 {
        self.0 & Self::DETAIL_MASK
    }
}

impl BitOr for Status {
    type Output = Status;

    fn bitor(self, rhs: Status) -> Status {
        Status(self.0 | rhs.0)
    }
}

impl BitOrAssign for Status {
    fn bitor_assign(&mut self, rhs: Status) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_success() {
            write!(f, "Success")?;
        } else if self.is_failure() {
            write!(f, "Failure")?;
        } else if self.is_in_progress() {
            write!(f, "In Progress")?;
        }

        let mut details = Vec::new();
        if self.has(Self::WRONG_MAGIC) {
            details.push("Wrong Magic");
        }
        if self.has(Self::WRONG_VERSION) {
            details.push("Wrong Version");
        }
        if self.has(Self::OUT_OF_MEMORY) {
            details.push("Out of Memory");
        }
        if self.has(Self::INVALID_PARAM) {
            details.push("Invalid Param");
        }
        if self.has(Self::BUFFER_TOO_SMALL) {
            details.push("Buffer Too Small");
        }
        if self.has(Self::OUT_OF_NODES) {
            details.push("Out of Nodes");
        }
        if self.has(Self::PARTIAL_RESULT) {
            details.push("Partial Result");
        }
        if self.has(Self::ALREADY_OCCUPIED) {
            details.push("Already Occupied");
        }

        if !details.is_empty() {
            write!(f, " ({})", details.join(", "))?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_high_bits() {
        let success = Status::SUCCESS;
        assert!(success.is_success());
        assert!(!success.is_failure());

        let failure = Status::FAILURE;
        assert!(!failure.is_success());
        assert!(failure.is_failure());

        let in_progress = Status::IN_PROGRESS;
        assert!(in_progress.is_in_progress());
        assert!(!in_progress.is_success());
    }

    #[test]
    fn test_detail_bits() {
        let status = Status::SUCCESS | Status::PARTIAL_RESULT | Status::OUT_OF_NODES;
        assert!(status.is_success());
        assert!(status.has(Status::PARTIAL_RESULT));
        assert!(status.has(Status::OUT_OF_NODES));
        assert!(!status.has(Status::BUFFER_TOO_SMALL));
        assert_eq!(
            status.detail(),
            Status::PARTIAL_RESULT.0 | Status::OUT_OF_NODES.0
        );
    }
}
