//! A control plane for white-box fuzz testing.
//!
//! Several passes in this compiler face choices that are semantically
//! irrelevant but observably different in the output: which of two
//! equal-priority register-allocation candidates to spill, which decision
//! tree node the match compiler happens to visit first, whether to take a
//! backtracking step early or late. A fuzzer that only perturbs the input IR
//! will never exercise most of those paths. [`ControlPlane`] lets a fuzz
//! target also perturb *those* decisions directly, by threading an
//! [`arbitrary::Unstructured`] byte stream through every such decision point
//! instead of relying on a fixed heuristic.
//!
//! Outside of fuzzing (the common case), `chaos` is off and every method
//! below is a zero-cost no-op that returns the default, heuristic-chosen
//! answer; the struct itself compiles down to a unit type.

#![deny(missing_docs)]
#![cfg_attr(not(feature = "fuzz"), allow(unused))]

#[cfg(feature = "fuzz")]
use arbitrary::{Arbitrary, Unstructured};

/// A source of controlled nondeterminism for fuzz-testing pass heuristics.
///
/// Construct one from an [`Unstructured`] byte stream (when the `fuzz`
/// feature is enabled) or via [`ControlPlane::default()`] to get the
/// always-heuristic, zero-sized stand-in used by ordinary builds.
#[derive(Debug, Default, Clone)]
pub struct ControlPlane {
    #[cfg(feature = "chaos")]
    data: ChaosData,
}

#[cfg(feature = "chaos")]
#[derive(Debug, Default, Clone)]
struct ChaosData {
    bytes: Vec<u8>,
    pos: usize,
}

impl ControlPlane {
    /// Build a control plane from fuzzer-supplied bytes. Falls back to the
    /// default (always-heuristic) plane when the `chaos` feature is off.
    #[cfg(feature = "fuzz")]
    pub fn new(u: &mut Unstructured) -> arbitrary::Result<Self> {
        #[cfg(feature = "chaos")]
        {
            let bytes = Vec::<u8>::arbitrary(u)?;
            Ok(Self {
                data: ChaosData { bytes, pos: 0 },
            })
        }
        #[cfg(not(feature = "chaos"))]
        {
            let _ = u;
            Ok(Self::default())
        }
    }

    /// Binary decision point: a pass calls this instead of hard-coding a
    /// choice, e.g. "spill the range whose next use is furthest" vs. "spill
    /// the range that was allocated first". Returns `default` unless chaos
    /// mode has bytes left to drive a different answer.
    pub fn get_decision(&mut self, default: bool) -> bool {
        #[cfg(feature = "chaos")]
        {
            if let Some(byte) = self.next_byte() {
                return byte & 1 == 1;
            }
        }
        default
    }

    /// Pick one candidate out of `choices` by index, in lieu of a tie-break
    /// heuristic (e.g. the decision-tree test-selection heuristic choosing
    /// among several equally good tests). Returns 0 (the heuristic's own
    /// preferred choice, by convention the first) when chaos mode is off or
    /// exhausted.
    pub fn pick_index(&mut self, len: usize) -> usize {
        if len <= 1 {
            return 0;
        }
        #[cfg(feature = "chaos")]
        {
            if let Some(byte) = self.next_byte() {
                return byte as usize % len;
            }
        }
        0
    }

    /// Shuffle `slice` in place using chaos bytes as the source of
    /// randomness; a Fisher-Yates pass over a heuristic-exhausted or
    /// non-chaos plane is the identity.
    pub fn shuffle<T>(&mut self, slice: &mut [T]) {
        #[cfg(feature = "chaos")]
        {
            for i in (1..slice.len()).rev() {
                let j = self.pick_index(i + 1);
                slice.swap(i, j);
            }
        }
        #[cfg(not(feature = "chaos"))]
        {
            let _ = slice;
        }
    }

    #[cfg(feature = "chaos")]
    fn next_byte(&mut self) -> Option<u8> {
        let b = self.data.bytes.get(self.data.pos).copied();
        if b.is_some() {
            self.data.pos += 1;
        }
        b
    }
}
