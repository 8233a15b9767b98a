//! # Sequenced Request Queue
//!
//! A [`SequencedQueue`] tracks the outstanding requests for one target, in ascending
//! sequence order. Each request lives in a [`SequencedQueueEntry`] together with the
//! callback to run once it is answered.
//!
//! ## In-order completion
//!
//! Only the head of the queue can make progress. A response that does not match the
//! head is logged and otherwise ignored, whether it is a late duplicate, an answer that
//! overtook the head, or something the queue never sent. The same rule applies to
//! timeouts: [`SequencedQueue::process_timeouts`] only ever looks at the head.
//!
//! ## Lifecycle of an entry
//!
//! ```text
//! add ──► transmit ──► retransmit* ──► complete (callback with the response)
//!                                  └─► poison   (callback with a synthesized failure)
//! ```

use crate::behavior::Transition;
use crate::error::{AccessError, RequestError};
use crate::message::{AccessProtocol, Request, Response};
use crate::resolver::BackendInfo;
use std::collections::VecDeque;
use std::fmt::Debug;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Runs once per entry, with the behavior that owns the queue and the final response.
pub type RequestCallback<A, P> = Box<dyn FnOnce(&mut A, Response<P>) -> Transition + Send>;

/// What the queue should do about timeouts next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutCheck {
    /// The head timed out and was handed to the timeout callback; check again now.
    Immediately,
    /// The head has not timed out; check again after this long.
    After(Duration),
    /// Nothing is outstanding.
    Idle,
}

/// How a response relates to the outstanding requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseMatch {
    Head,
    /// Behind the head: already completed.
    Duplicate,
    /// Between head and tail: answered out of order.
    OutOfSequence,
    /// Past the tail, or for another target.
    Unknown,
    /// Nothing is outstanding.
    Empty,
}

/// The most recent retransmission of an entry.
pub struct LastTry<P: AccessProtocol> {
    pub request: Request<P>,
    pub at: Instant,
}

/// One outstanding request.
pub struct SequencedQueueEntry<A, P: AccessProtocol> {
    request: Request<P>,
    callback: RequestCallback<A, P>,
    enqueued_at: Instant,
    last_try: Option<LastTry<P>>,
    timed_out_at: Option<Instant>,
    timeouts: u32,
    sent: bool,
}

impl<A, P: AccessProtocol> SequencedQueueEntry<A, P> {
    pub fn new(request: Request<P>, callback: RequestCallback<A, P>, now: Instant) -> Self {
        Self {
            request,
            callback,
            enqueued_at: now,
            last_try: None,
            timed_out_at: None,
            timeouts: 0,
            sent: false,
        }
    }

    /// The request as it was originally enqueued.
    pub fn request(&self) -> &Request<P> {
        &self.request
    }

    /// The request as it was last put on the wire.
    pub fn current_request(&self) -> &Request<P> {
        self.last_try
            .as_ref()
            .map(|last| &last.request)
            .unwrap_or(&self.request)
    }

    pub fn last_try(&self) -> Option<&LastTry<P>> {
        self.last_try.as_ref()
    }

    pub fn enqueued_at(&self) -> Instant {
        self.enqueued_at
    }

    pub fn retries(&self) -> u32 {
        self.current_request().retry()
    }

    pub fn is_sent(&self) -> bool {
        self.sent
    }

    /// How many times this entry has been marked as timed out.
    pub fn timeouts(&self) -> u32 {
        self.timeouts
    }

    /// Records a timeout handled at `now`; the next deadline counts from here.
    pub fn mark_timed_out(&mut self, now: Instant) {
        self.timeouts = self.timeouts.saturating_add(1);
        self.timed_out_at = Some(now);
    }

    /// Whether `response` answers this entry's original request.
    pub fn accepts_response(&self, response: &Response<P>) -> bool {
        response.sequence() == self.request.sequence() && response.target() == self.request.target()
    }

    /// Whether `timeout` has elapsed since the last transmission attempt.
    ///
    /// That is the last retransmission (or handled timeout) if there was one, otherwise
    /// the enqueue time.
    pub fn is_timed_out(&self, now: Instant, timeout: Duration) -> bool {
        now >= self.deadline(timeout)
    }

    /// The instant at which this entry times out.
    pub fn deadline(&self, timeout: Duration) -> Instant {
        let resent = self.last_try.as_ref().map(|last| last.at);
        let since = match (resent, self.timed_out_at) {
            (Some(a), Some(b)) => a.max(b),
            (Some(a), None) | (None, Some(a)) => a,
            (None, None) => self.enqueued_at,
        };
        since + timeout
    }

    /// Sends the request to `backend` for the first time.
    pub fn transmit(&mut self, backend: &BackendInfo<P>) -> Result<(), RequestError> {
        self.sent = true;
        backend
            .actor()
            .send(self.current_request().to_version(backend.version()))
    }

    /// Sends the next try of the request to `backend`, encoded for its version.
    pub fn retransmit(&mut self, backend: &BackendInfo<P>, now: Instant) -> Result<(), RequestError> {
        let next = self
            .current_request()
            .next_retry()
            .to_version(backend.version());
        debug!(
            target_id = %next.target(),
            sequence = next.sequence(),
            retry = next.retry(),
            version = %next.version(),
            "Retransmitting"
        );
        let sent = backend.actor().send(next.clone());
        self.last_try = Some(LastTry {
            request: next,
            at: now,
        });
        self.sent = true;
        sent
    }

    /// Completes the entry with a failure synthesized from the original request.
    pub fn poison(self, behavior: &mut A, cause: RequestError) -> Transition {
        let failure = self.request.to_failure(cause);
        (self.callback)(behavior, failure)
    }

    fn complete(self, behavior: &mut A, response: Response<P>) -> Transition {
        (self.callback)(behavior, response)
    }
}

impl<A, P: AccessProtocol> Debug for SequencedQueueEntry<A, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequencedQueueEntry")
            .field("request", &self.request)
            .field("retries", &self.retries())
            .field("sent", &self.sent)
            .finish()
    }
}

/// Outstanding requests for one target, in ascending sequence order.
pub struct SequencedQueue<A, P: AccessProtocol> {
    target: P::Target,
    entries: VecDeque<SequencedQueueEntry<A, P>>,
    backend: Option<BackendInfo<P>>,
    last_progress: Instant,
    closed: bool,
}

impl<A, P: AccessProtocol> SequencedQueue<A, P> {
    pub fn new(target: P::Target, now: Instant) -> Self {
        Self {
            target,
            entries: VecDeque::new(),
            backend: None,
            last_progress: now,
            closed: false,
        }
    }

    pub fn target(&self) -> &P::Target {
        &self.target
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn head(&self) -> Option<&SequencedQueueEntry<A, P>> {
        self.entries.front()
    }

    pub fn backend(&self) -> Option<&BackendInfo<P>> {
        self.backend.as_ref()
    }

    pub fn last_progress(&self) -> Instant {
        self.last_progress
    }

    /// Closed and drained: nothing will ever complete through this queue again.
    pub fn has_completed(&self) -> bool {
        self.closed && self.entries.is_empty()
    }

    /// Appends a request behind the current tail.
    ///
    /// If the backend is already known the request goes out immediately; otherwise it
    /// waits for [`set_backend`](Self::set_backend).
    pub fn add(
        &mut self,
        request: Request<P>,
        callback: RequestCallback<A, P>,
        now: Instant,
    ) -> Result<(), AccessError> {
        if self.closed {
            return Err(AccessError::illegal_state(format!(
                "queue for {} is closed",
                self.target
            )));
        }
        if request.target() != &self.target {
            return Err(AccessError::TargetMismatch {
                expected: self.target.to_string(),
                actual: request.target().to_string(),
            });
        }
        if let Some(tail) = self.entries.back() {
            let tail = tail.request.sequence();
            if request.sequence() <= tail {
                return Err(AccessError::NotAfterTail {
                    tail,
                    actual: request.sequence(),
                });
            }
        }

        let mut entry = SequencedQueueEntry::new(request, callback, now);
        if let Some(backend) = &self.backend {
            if let Err(e) = entry.transmit(backend) {
                warn!(target_id = %self.target, error = %e, "Initial send failed");
            }
        }
        debug!(
            target_id = %self.target,
            sequence = entry.request.sequence(),
            size = self.entries.len() + 1,
            "Enqueued"
        );
        self.entries.push_back(entry);
        Ok(())
    }

    /// Classifies `response` against the outstanding requests.
    pub fn classify(&self, response: &Response<P>) -> ResponseMatch {
        let (Some(head), Some(tail)) = (self.entries.front(), self.entries.back()) else {
            return ResponseMatch::Empty;
        };
        if head.accepts_response(response) {
            return ResponseMatch::Head;
        }
        if response.target() != &self.target {
            return ResponseMatch::Unknown;
        }
        let sequence = response.sequence();
        if sequence < head.request.sequence() {
            ResponseMatch::Duplicate
        } else if sequence > tail.request.sequence() {
            ResponseMatch::Unknown
        } else {
            ResponseMatch::OutOfSequence
        }
    }

    /// Completes the head if `response` answers it.
    ///
    /// Returns what the head's callback asked for, or [`Transition::Stay`] when the
    /// response does not match the head.
    pub fn complete(&mut self, current: &mut A, response: Response<P>, now: Instant) -> Transition {
        match self.classify(&response) {
            ResponseMatch::Head => {}
            ResponseMatch::Empty => {
                debug!(target_id = %self.target, sequence = response.sequence(), "No outstanding requests, ignoring response");
                return Transition::Stay;
            }
            ResponseMatch::Duplicate => {
                debug!(target_id = %self.target, sequence = response.sequence(), "Ignoring duplicate response");
                return Transition::Stay;
            }
            ResponseMatch::OutOfSequence => {
                warn!(target_id = %self.target, sequence = response.sequence(), "Ignoring out-of-sequence response");
                return Transition::Stay;
            }
            ResponseMatch::Unknown => {
                warn!(target_id = %self.target, response_target = %response.target(), sequence = response.sequence(), "Ignoring unknown response");
                return Transition::Stay;
            }
        }

        let Some(entry) = self.entries.pop_front() else {
            return Transition::Stay;
        };
        self.last_progress = now;
        debug!(target_id = %self.target, sequence = response.sequence(), size = self.entries.len(), "Completed");
        entry.complete(current, response)
    }

    /// Stops accepting new requests.
    pub fn close(&mut self) {
        if !self.closed {
            debug!(target_id = %self.target, outstanding = self.entries.len(), "Closing queue");
            self.closed = true;
        }
    }

    /// Closes the queue and fails every outstanding request with `cause`, oldest first.
    pub fn poison(&mut self, behavior: &mut A, cause: RequestError) -> Transition {
        self.close();
        if !self.entries.is_empty() {
            info!(target_id = %self.target, outstanding = self.entries.len(), cause = %cause, "Poisoning queue");
        }
        let mut transition = Transition::Stay;
        while let Some(entry) = self.entries.pop_front() {
            if entry.poison(behavior, cause.clone()) == Transition::ShutDown {
                transition = Transition::ShutDown;
            }
        }
        transition
    }

    /// Fails only the head with `cause`. Returns `None` if nothing is outstanding.
    pub fn fail_head(&mut self, behavior: &mut A, cause: RequestError, now: Instant) -> Option<Transition> {
        let entry = self.entries.pop_front()?;
        self.last_progress = now;
        warn!(target_id = %self.target, sequence = entry.request.sequence(), cause = %cause, "Failing request");
        Some(entry.poison(behavior, cause))
    }

    /// Checks the head for a timeout.
    ///
    /// Only the head is inspected: requests complete in order, so a request behind a
    /// stuck head is not reported until everything ahead of it has completed.
    pub fn process_timeouts<F>(&mut self, now: Instant, max_elapsed: Duration, on_timeout: F) -> TimeoutCheck
    where
        F: FnOnce(&mut SequencedQueueEntry<A, P>),
    {
        let Some(head) = self.entries.front_mut() else {
            return TimeoutCheck::Idle;
        };
        if head.is_timed_out(now, max_elapsed) {
            debug!(target_id = %self.target, sequence = head.request.sequence(), retries = head.retries(), "Request timed out");
            on_timeout(head);
            TimeoutCheck::Immediately
        } else {
            TimeoutCheck::After(max_elapsed)
        }
    }

    /// When the head times out, if anything is outstanding.
    pub fn head_deadline(&self, timeout: Duration) -> Option<Instant> {
        self.entries.front().map(|head| head.deadline(timeout))
    }

    /// Points the queue at `backend` and (re)sends everything outstanding to it.
    ///
    /// Entries that were never sent are transmitted; entries that already went to a
    /// previous backend are retransmitted. Setting the backend the queue already uses
    /// is a no-op. Returns how many entries were sent.
    pub fn set_backend(&mut self, backend: BackendInfo<P>, now: Instant) -> usize {
        if self.backend.as_ref() == Some(&backend) {
            return 0;
        }
        info!(target_id = %self.target, cookie = backend.cookie(), version = %backend.version(), outstanding = self.entries.len(), "Backend resolved");
        for entry in self.entries.iter_mut() {
            let sent = if entry.sent {
                entry.retransmit(&backend, now)
            } else {
                entry.transmit(&backend)
            };
            if let Err(e) = sent {
                warn!(target_id = %self.target, sequence = entry.request.sequence(), error = %e, "Send failed");
            }
        }
        let count = self.entries.len();
        self.backend = Some(backend);
        count
    }

    /// Forgets the current backend, returning it.
    pub fn clear_backend(&mut self) -> Option<BackendInfo<P>> {
        self.backend.take()
    }
}
