//! Stream-server ID arithmetic (C1).
//!
//! IDs are the `"<ms>-<seq>"` byte form the server assigns on append: a
//! 64-bit millisecond timestamp and a 64-bit sequence counter, totally
//! ordered lexicographically by `(ms, seq)`. The only two operations the
//! core ever performs on an ID are increment and decrement (§4.1); new IDs
//! are otherwise always assigned by the server.

use core::cmp::Ordering;
use core::fmt;
use core::str::FromStr;

use crate::TelstarError;

/// A parsed `ms-seq` stream ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamId {
    ms: u64,
    seq: u64,
}

impl StreamId {
    /// The smallest possible ID; the `"-"` sentinel of an `XPENDING` range.
    pub const MIN: StreamId = StreamId { ms: 0, seq: 0 };

    /// The largest possible ID; the `"+"` sentinel of an `XPENDING` range.
    pub const MAX: StreamId = StreamId {
        ms: u64::MAX,
        seq: u64::MAX,
    };

    pub fn new(ms: u64, seq: u64) -> Self {
        Self { ms, seq }
    }

    pub fn ms(&self) -> u64 {
        self.ms
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Add 1 to `seq`.
    pub fn increment(self) -> Self {
        Self {
            ms: self.ms,
            seq: self.seq + 1,
        }
    }

    /// Subtract 1 from `seq`; if `seq` is already 0, subtract 1 from `ms`
    /// and leave `seq` at 0.
    pub fn decrement(self) -> Self {
        if self.seq == 0 {
            Self {
                ms: self.ms.saturating_sub(1),
                seq: 0,
            }
        } else {
            Self {
                ms: self.ms,
                seq: self.seq - 1,
            }
        }
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.ms, self.seq)
    }
}

impl PartialOrd for StreamId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for StreamId {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.ms, self.seq).cmp(&(other.ms, other.seq))
    }
}

impl FromStr for StreamId {
    type Err = TelstarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (ms_str, seq_str) = s
            .split_once('-')
            .ok_or_else(|| TelstarError::MalformedStreamId(s.to_string()))?;

        let ms = ms_str
            .parse::<u64>()
            .map_err(|_| TelstarError::MalformedStreamId(s.to_string()))?;
        let seq = seq_str
            .parse::<u64>()
            .map_err(|_| TelstarError::MalformedStreamId(s.to_string()))?;

        Ok(Self { ms, seq })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_ids_missing_a_dash() {
        assert!(StreamId::from_str("1509473251518").is_err());
        assert!(StreamId::from_str("not-numeric").is_err());
    }

    #[test]
    fn increment_bumps_sequence() {
        let id: StreamId = "1509473251518-0".parse().unwrap();
        assert_eq!(id.increment(), StreamId::new(1509473251518, 1));
    }

    #[test]
    fn decrement_rolls_back_the_millisecond_at_seq_zero() {
        let id = StreamId::new(1509473251518, 0);
        assert_eq!(id.decrement(), StreamId::new(1509473251517, 0));

        let id = StreamId::new(1509473251518, 3);
        assert_eq!(id.decrement(), StreamId::new(1509473251518, 2));
    }

    #[test]
    fn decrement_of_increment_is_identity() {
        for (ms, seq) in [(0u64, 0u64), (1, 0), (1509473251518, 42), (u64::MAX, 0)] {
            let id = StreamId::new(ms, seq);
            assert_eq!(id.increment().decrement(), id);
        }
    }

    #[test]
    fn total_order_is_lexicographic_by_ms_then_seq() {
        let a = StreamId::new(1, 9);
        let b = StreamId::new(2, 0);
        assert!(a < b);

        let c = StreamId::new(5, 1);
        let d = StreamId::new(5, 2);
        assert!(c < d);
    }

    #[test]
    fn display_round_trips_through_parse() {
        let id = StreamId::new(1509473251518, 7);
        let rendered = id.to_string();
        assert_eq!(rendered, "1509473251518-7");
        assert_eq!(rendered.parse::<StreamId>().unwrap(), id);
    }

    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: decrementing an incremented ID always returns it
        /// unchanged, for any `(ms, seq)` pair (§4.1).
        #[test]
        fn increment_then_decrement_is_identity(ms in any::<u64>(), seq in 0u64..(u64::MAX - 1)) {
            let id = StreamId::new(ms, seq);
            prop_assert_eq!(id.increment().decrement(), id);
        }

        /// Property: `Display` then `FromStr` always recovers the same ID.
        #[test]
        fn display_then_parse_round_trips(ms in any::<u64>(), seq in any::<u64>()) {
            let id = StreamId::new(ms, seq);
            prop_assert_eq!(id.to_string().parse::<StreamId>().unwrap(), id);
        }
    }
}
