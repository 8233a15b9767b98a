//! Per-target sequence validation.

use crate::error::AccessError;
use crate::message::{AccessProtocol, Request};

/// Tracks the next sequence number expected for one target.
///
/// Where [`SequencedQueue`](crate::queue::SequencedQueue) only requires sequences to
/// increase, this queue requires them to be gapless: every appended request must carry
/// exactly the expected sequence. Sequences never wrap; once `u64::MAX` has been
/// appended the target is exhausted.
#[derive(Debug, Clone)]
pub struct TargetRequestQueue<T> {
    target: T,
    expected_sequence: u64,
    exhausted: bool,
}

impl<T: PartialEq + std::fmt::Display> TargetRequestQueue<T> {
    pub fn new(target: T) -> Self {
        Self::starting_at(target, 0)
    }

    pub fn starting_at(target: T, expected_sequence: u64) -> Self {
        Self {
            target,
            expected_sequence,
            exhausted: false,
        }
    }

    pub fn target(&self) -> &T {
        &self.target
    }

    pub fn expected_sequence(&self) -> u64 {
        self.expected_sequence
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Accepts `request` if it carries the expected sequence, then expects the next one.
    pub fn append<P>(&mut self, request: &Request<P>) -> Result<(), AccessError>
    where
        P: AccessProtocol<Target = T>,
    {
        if request.target() != &self.target {
            return Err(AccessError::TargetMismatch {
                expected: self.target.to_string(),
                actual: request.target().to_string(),
            });
        }
        if self.exhausted {
            return Err(AccessError::SequenceExhausted {
                target: self.target.to_string(),
            });
        }
        if request.sequence() != self.expected_sequence {
            return Err(AccessError::SequenceViolation {
                expected: self.expected_sequence,
                actual: request.sequence(),
            });
        }
        match request.sequence().checked_add(1) {
            Some(next) => self.expected_sequence = next,
            None => self.exhausted = true,
        }
        Ok(())
    }
}
