#![deny(missing_docs)]

//! # shamir_tally
//!
//! **shamir_tally** counts a yes/no vote across four tally servers without
//! any single server learning an individual ballot.  Every voter splits its
//! vote into Shamir shares of a degree-1 polynomial over a prime field and
//! sends one share to each server.  Each server adds the shares of the
//! agreed voter roster, and the four partial sums are points on a line whose
//! value at zero is the number of yes votes.  Four points for a line leave
//! two points of redundancy, enough to detect a lying server and correct
//! one.
//!
//! ## Features
//!
//! * **Finite field arithmetic** via the [`Field`] type.
//! * **Secret sharing**: [`secrify`] splits a vote, [`interpolate`]
//!   recovers a polynomial's value anywhere.
//! * **Robust decoding**: [`RobustDecoder`] checks the four partial sums for
//!   consistency and corrects a single faulty one with Berlekamp–Welch.
//! * **Roster agreement**: the [`roster`](roster/index.html) module tracks
//!   voters per server and compares rosters across servers.
//! * **Adversary simulation**: [`Behaviour`] lets a server misreport its sum
//!   or roster so the detection paths can be exercised.
//! * **Networking** (feature `net`, on by default): the
//!   [`net`](net/index.html) module runs tally servers and voter clients over
//!   TCP with newline-delimited JSON frames.
//!
//! ## Usage
//!
//! ```rust
//! use rand::{rngs::StdRng, SeedableRng};
//! use shamir_tally::{secrify, Field, Point, RobustDecoder};
//!
//! let field = Field::new(1997).unwrap();
//! let mut rng = StdRng::seed_from_u64(7);
//!
//! // Three voters: yes, no, yes.
//! let ballots: Vec<Vec<u64>> = [1, 0, 1]
//!     .iter()
//!     .map(|&v| secrify(&field, v, 1, 4, &mut rng).unwrap())
//!     .collect();
//!
//! // Each server sums the shares it holds.
//! let points: Vec<Point> = (0..4)
//!     .map(|i| Point::new(i as u64 + 1, field.sum(ballots.iter().map(|b| b[i]))))
//!     .collect();
//!
//! let decoded = RobustDecoder::new(field).decode(&points, 1).unwrap();
//! assert_eq!(decoded.secret(), 2);
//! ```

pub mod behaviour;
pub mod decoder;
mod field;
mod gauss;
#[cfg(feature = "net")]
pub mod net;
pub mod roster;
mod sharing;
pub mod tally;

pub use behaviour::{Behaviour, RosterCorruption, SumCorruption};
pub use decoder::{DecodeError, Decoded, RobustDecoder, POLY_DEGREE, SERVER_COUNT};
pub use field::{is_prime, ArithmeticError, Field, FieldError, MAX_MODULUS};
pub use gauss::{solve, SolveError};
pub use roster::{compare, ConnId, RegistryError, RosterComparison, Voter, VoterRegistry};
pub use sharing::{evaluate, interpolate, random_polynomial, secrify, Point, SharingError};
pub use tally::Results;
