//! Honest and adversarial server behaviour.
//!
//! A server's behaviour is chosen once, at construction, and consulted at
//! exactly two points of a round: when it computes its partial sum and
//! when it reports its roster to a peer.  Corrupt variants exist so that
//! the detection and correction paths can be exercised end to end.

use crate::field::Field;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// How a dishonest server falsifies its partial sum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SumCorruption {
    /// Report `p` itself, which is just outside the field.
    Modulus,
    /// Report the honest sum shifted by a fixed offset.
    Offset(i64),
    /// Report a uniformly random field element.
    Random,
    /// Report a negative value.
    Negative,
}

/// How a dishonest server falsifies the roster it reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RosterCorruption {
    /// Echo the peer's own list back.
    Echo,
    /// Report nobody.
    Empty,
    /// Drop this many identities from the end of the honest roster.
    Truncate(usize),
    /// Append this many fabricated identities.
    Pad(usize),
}

/// Behaviour strategy of a tally server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Behaviour {
    /// Follow the protocol.
    #[default]
    Honest,
    /// Report a corrupted partial sum.
    CorruptSum(SumCorruption),
    /// Report a corrupted roster.
    CorruptRoster(RosterCorruption),
}

impl Behaviour {
    /// Returns the partial sum this server reports, given the honest one.
    pub fn partial_sum<R: Rng + ?Sized>(&self, field: &Field, honest: u64, rng: &mut R) -> i64 {
        let p = field.modulus() as i64;
        match self {
            Behaviour::CorruptSum(SumCorruption::Modulus) => p,
            Behaviour::CorruptSum(SumCorruption::Offset(delta)) => {
                (honest as i64).saturating_add(*delta)
            }
            Behaviour::CorruptSum(SumCorruption::Random) => rng.gen_range(0..p),
            Behaviour::CorruptSum(SumCorruption::Negative) => -rng.gen_range(1..=p),
            _ => honest as i64,
        }
    }

    /// Returns the roster this server reports.
    ///
    /// `peer_list` is the list most recently received from a peer, used only
    /// by [`RosterCorruption::Echo`].
    pub fn roster(&self, honest: &BTreeSet<String>, peer_list: Option<&[String]>) -> Vec<String> {
        match self {
            Behaviour::CorruptRoster(RosterCorruption::Echo) => peer_list
                .map(<[String]>::to_vec)
                .unwrap_or_else(|| honest.iter().cloned().collect()),
            Behaviour::CorruptRoster(RosterCorruption::Empty) => Vec::new(),
            Behaviour::CorruptRoster(RosterCorruption::Truncate(count)) => {
                let keep = honest.len().saturating_sub(*count);
                honest.iter().take(keep).cloned().collect()
            }
            Behaviour::CorruptRoster(RosterCorruption::Pad(count)) => honest
                .iter()
                .cloned()
                .chain((0..*count).map(|i| format!("Bogus{i}")))
                .collect(),
            _ => honest.iter().cloned().collect(),
        }
    }

    /// Returns true for the honest strategy.
    pub fn is_honest(&self) -> bool {
        matches!(self, Behaviour::Honest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn honest_behaviour_passes_values_through() {
        let field = Field::new(1997).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        let roster: BTreeSet<String> = ["a", "b"].iter().map(|s| s.to_string()).collect();
        assert_eq!(Behaviour::Honest.partial_sum(&field, 42, &mut rng), 42);
        assert_eq!(Behaviour::Honest.roster(&roster, None), vec!["a", "b"]);
    }

    #[test]
    fn corrupt_sums_take_documented_shapes() {
        let field = Field::new(1997).unwrap();
        let mut rng = StdRng::seed_from_u64(2);
        let modulus = Behaviour::CorruptSum(SumCorruption::Modulus);
        assert_eq!(modulus.partial_sum(&field, 5, &mut rng), 1997);
        let offset = Behaviour::CorruptSum(SumCorruption::Offset(-9));
        assert_eq!(offset.partial_sum(&field, 5, &mut rng), -4);
        let huge = Behaviour::CorruptSum(SumCorruption::Offset(i64::MAX));
        assert_eq!(huge.partial_sum(&field, 5, &mut rng), i64::MAX);
        let tiny = Behaviour::CorruptSum(SumCorruption::Offset(i64::MIN));
        assert_eq!(tiny.partial_sum(&field, 5, &mut rng), i64::MIN + 5);
        for _ in 0..50 {
            let r = Behaviour::CorruptSum(SumCorruption::Random).partial_sum(&field, 5, &mut rng);
            assert!((0..1997).contains(&r));
            let n = Behaviour::CorruptSum(SumCorruption::Negative).partial_sum(&field, 5, &mut rng);
            assert!(n < 0);
        }
    }

    #[test]
    fn corrupt_rosters_take_documented_shapes() {
        let roster: BTreeSet<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
        let peer = vec!["x".to_string()];
        let echo = Behaviour::CorruptRoster(RosterCorruption::Echo);
        assert_eq!(echo.roster(&roster, Some(&peer)), peer);
        let empty = Behaviour::CorruptRoster(RosterCorruption::Empty);
        assert!(empty.roster(&roster, None).is_empty());
        let truncate = Behaviour::CorruptRoster(RosterCorruption::Truncate(1));
        assert_eq!(truncate.roster(&roster, None), vec!["a", "b"]);
        let pad = Behaviour::CorruptRoster(RosterCorruption::Pad(2));
        assert_eq!(pad.roster(&roster, None), vec!["a", "b", "c", "Bogus0", "Bogus1"]);
    }
}
