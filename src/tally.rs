//! Final results of a vote round.

use crate::decoder::{DecodeError, Decoded};
use serde::{Deserialize, Serialize};

/// Outcome published to every voter once per round.
///
/// When `error` is false, `yes + no` equals the size of the agreed voter
/// intersection.  An error result carries no count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Results {
    /// Number of yes votes.
    pub yes: u64,
    /// Number of no votes.
    pub no: u64,
    /// True when the round could not produce a trustworthy count.
    pub error: bool,
}

impl Results {
    /// The error tally.
    pub const fn error() -> Self {
        Results {
            yes: 0,
            no: 0,
            error: true,
        }
    }

    /// Builds the results from a decoded round and the size of the agreed
    /// roster.
    ///
    /// A decoded yes-count larger than the roster cannot come from honest
    /// shares of binary votes, so it is reported as an error.
    pub fn from_decoded(decoded: Result<Decoded, DecodeError>, voters: usize) -> Self {
        match decoded {
            Ok(decoded) => {
                let yes = decoded.secret();
                let total = voters as u64;
                if yes > total {
                    tracing::warn!(yes, total, "decoded count exceeds the roster");
                    Results::error()
                } else {
                    Results {
                        yes,
                        no: total - yes,
                        error: false,
                    }
                }
            }
            Err(err) => {
                tracing::warn!(%err, "round could not be tallied");
                Results::error()
            }
        }
    }
}
