use core::{cmp, fmt};

/// An AMQP `sequence-no`: a 32-bit serial number compared with RFC 1982
/// arithmetic.
///
/// Transfer ids, delivery ids and delivery counts all wrap at `u32::MAX`.
/// A sequence number is "less than" another if it is within half the
/// sequence space behind it.
#[repr(transparent)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct SeqNum(u32);

impl SeqNum {
    pub const fn new(value: u32) -> Self {
        SeqNum(value)
    }

    pub const fn get(&self) -> u32 {
        self.0
    }

    pub fn next(&self) -> Self {
        Self(self.0.wrapping_add(1))
    }

    /// Increments this sequence number and returns the previous value.
    pub fn post_increment(&mut self) -> Self {
        let current = *self;
        *self = self.next();
        current
    }

    pub fn add(&self, n: u32) -> Self {
        Self(self.0.wrapping_add(n))
    }

    /// Signed distance from `other` to `self`.
    pub fn diff(&self, other: SeqNum) -> i64 {
        i64::from(self.0.wrapping_sub(other.0) as i32)
    }

    #[cfg(test)]
    pub(crate) fn rand() -> Self {
        use rand::Rng;
        Self::new(rand::rng().random())
    }
}

impl PartialOrd for SeqNum {
    fn partial_cmp(&self, other: &Self) -> Option<cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SeqNum {
    fn cmp(&self, other: &Self) -> cmp::Ordering {
        if self == other {
            return cmp::Ordering::Equal;
        }
        let gap = other.0.wrapping_sub(self.0);
        if gap & (1 << 31) == 0 {
            cmp::Ordering::Less
        } else {
            cmp::Ordering::Greater
        }
    }
}

impl From<u32> for SeqNum {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl fmt::Display for SeqNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_wraps() {
        let mut sn = SeqNum::new(u32::MAX);
        assert_eq!(sn.post_increment(), SeqNum::new(u32::MAX));
        assert_eq!(sn.get(), 0);
        assert_eq!(SeqNum::new(u32::MAX - 1).add(3).get(), 1);
    }

    #[test]
    fn ordering_across_wrap() {
        let before = SeqNum::new(u32::MAX - 2);
        let after = SeqNum::new(5);
        assert!(before < after);
        assert!(after > before);
        assert_eq!(after.diff(before), 8);
        assert_eq!(before.diff(after), -8);
    }

    #[test]
    fn ordering_is_antisymmetric() {
        for _ in 0..1000 {
            let a = SeqNum::rand();
            let b = SeqNum::rand();
            if a != b && a.get().wrapping_sub(b.get()) != 1 << 31 {
                assert_ne!(a < b, b < a, "{a} vs {b}");
            }
        }
    }
}
