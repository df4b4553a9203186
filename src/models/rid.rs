use serde::{Deserialize, Serialize};

/// Watermark for the blob diff protocol.
///
/// Totally ordered by `timestamp` first, then `seq_no` on ties. The server
/// returns everything strictly after the watermark the client presents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rid {
    pub timestamp: i64,
    pub seq_no: i64,
}

impl Rid {
    pub fn new(timestamp: i64, seq_no: i64) -> Self {
        Self { timestamp, seq_no }
    }
}

impl std::fmt::Display for Rid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.timestamp, self.seq_no)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cmp::Ordering;

    #[test]
    fn orders_by_timestamp_first() {
        assert!(Rid::new(5, 9) < Rid::new(7, 0));
        assert!(Rid::new(7, 0) < Rid::new(7, 2));
        assert_eq!(Rid::new(3, 3), Rid::new(3, 3));
    }

    #[test]
    fn compare_is_antisymmetric() {
        let pairs = [
            (Rid::new(1, 1), Rid::new(1, 2)),
            (Rid::new(2, 0), Rid::new(1, 9)),
            (Rid::new(4, 4), Rid::new(4, 4)),
        ];
        for (a, b) in pairs {
            match a.cmp(&b) {
                Ordering::Less => assert_eq!(b.cmp(&a), Ordering::Greater),
                Ordering::Greater => assert_eq!(b.cmp(&a), Ordering::Less),
                Ordering::Equal => assert_eq!(b.cmp(&a), Ordering::Equal),
            }
        }
    }

    #[test]
    fn max_picks_latest_watermark() {
        let rids = [Rid::new(5, 0), Rid::new(7, 2), Rid::new(3, 9)];
        assert_eq!(rids.iter().copied().max(), Some(Rid::new(7, 2)));
    }
}
