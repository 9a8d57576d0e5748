//! Reliable unicast toward the parent
//!
//! One instance per node. Application payloads are framed with a wrapping
//! per-hop sequence number, queued FIFO, and sent one at a time to whatever
//! parent the tree controller has installed. Each transmission waits for an
//! acknowledgement; timeouts retry with randomized quadratic backoff until
//! the retry budget is spent. Receivers acknowledge unconditionally,
//! deduplicate against a bounded per-source history, and — unless they are
//! the sink — re-enqueue the payload toward their own parent.
//!
//! Frame on the data port: `[seqno: u8][payload]`. The ACK port carries the
//! single byte `b'A'`.

pub mod history;

use crate::config::{Tunables, ACKNOWLEDGEMENT_PORT, MESSAGING_PORT};
use crate::radio::{NodeId, Radio};
use crate::tree::record::PARENT_NONE;
use crate::Millis;
use history::History;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use tracing::{debug, warn};

/// Acknowledgement frame body.
pub const ACK_BYTE: u8 = b'A';

/// Called when a frame times out; receives the current parent and the tries
/// spent so far, including the final give-up.
pub type FailureHook = Box<dyn FnMut(NodeId, u8) + Send>;

/// Called at the sink with each first-seen payload.
pub type DeliveryHook = Box<dyn FnMut(&[u8]) + Send>;

/// One queued frame. The sequence number is already prepended.
struct Pending {
    frame: Vec<u8>,
    tries: u8,
}

pub struct Unicast {
    id: NodeId,
    is_sink: bool,
    tunables: Tunables,
    parent: NodeId,
    next_seq: u8,
    queue: VecDeque<Pending>,
    history: History,
    sleep_allowed: bool,
    online: bool,
    /// The head frame has been transmitted and its timeout is running.
    in_flight: bool,
    send_at: Option<Millis>,
    timeout_at: Option<Millis>,
    rng: StdRng,
    on_failure: Option<FailureHook>,
    on_deliver: Option<DeliveryHook>,
}

impl Unicast {
    pub fn new(id: NodeId, is_sink: bool, tunables: Tunables) -> Self {
        let history = History::new(tunables.max_history);
        Self {
            id,
            is_sink,
            tunables,
            parent: PARENT_NONE,
            next_seq: 0,
            queue: VecDeque::new(),
            history,
            sleep_allowed: false,
            online: false,
            in_flight: false,
            send_at: None,
            timeout_at: None,
            rng: StdRng::seed_from_u64(u64::from(id)),
            on_failure: None,
            on_deliver: None,
        }
    }

    /// Open both ports. Called once at node startup.
    pub fn start(&mut self, radio: &mut dyn Radio) {
        self.go_online(radio);
    }

    pub fn set_failure_hook(&mut self, hook: FailureHook) {
        self.on_failure = Some(hook);
    }

    /// Register the sink's delivery hook.
    pub fn set_delivery_hook(&mut self, hook: DeliveryHook) {
        self.on_deliver = Some(hook);
    }

    pub fn parent(&self) -> NodeId {
        self.parent
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    /// Earliest instant this layer wants `poll` called.
    pub fn next_wakeup(&self) -> Option<Millis> {
        match (self.send_at, self.timeout_at) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        }
    }

    /// Install the parent elected by the tree controller. An in-flight frame
    /// is left to its timeout; later retries go to the new parent. Gaining a
    /// parent re-arms the held queue.
    pub fn set_parent(&mut self, parent: NodeId, now: Millis) {
        self.parent = parent;
        if parent != PARENT_NONE
            && !self.queue.is_empty()
            && !self.in_flight
            && self.send_at.is_none()
        {
            self.arm_send(now);
        }
    }

    /// Queue one payload for delivery toward the root.
    pub fn send(&mut self, radio: &mut dyn Radio, payload: &[u8], now: Millis) {
        if self.queue.len() >= self.tunables.max_queue_depth {
            warn!(
                node = self.id,
                depth = self.queue.len(),
                "send queue full, dropping payload"
            );
            return;
        }
        let mut frame = Vec::with_capacity(1 + payload.len());
        frame.push(self.next_seq);
        frame.extend_from_slice(payload);
        self.next_seq = self.next_seq.wrapping_add(1);

        if !self.online {
            self.go_online(radio);
        }
        let was_empty = self.queue.is_empty();
        self.queue.push_back(Pending { frame, tries: 0 });
        if was_empty {
            self.arm_send(now);
        }
    }

    /// Fire whichever timers are due.
    pub fn poll(&mut self, radio: &mut dyn Radio, now: Millis) {
        if self.timeout_at.is_some_and(|t| now >= t) {
            self.on_timeout(radio, now);
        }
        if self.send_at.is_some_and(|t| now >= t) {
            self.transmit_head(radio, now);
        }
    }

    fn transmit_head(&mut self, radio: &mut dyn Radio, now: Millis) {
        self.send_at = None;
        if self.parent == PARENT_NONE {
            // Hold everything until the controller installs a parent;
            // set_parent re-arms us.
            debug!(node = self.id, queued = self.queue.len(), "no parent, holding queue");
            return;
        }
        let Some(head) = self.queue.front_mut() else {
            return;
        };
        head.tries += 1;
        let tries = head.tries;
        if let Err(err) = radio.unicast(MESSAGING_PORT, self.parent, &head.frame) {
            debug!(node = self.id, %err, "unicast transmit failed");
        }
        debug!(node = self.id, parent = self.parent, tries, "frame transmitted");
        self.in_flight = true;
        self.timeout_at = Some(now + self.tunables.ack_timeout_ms);
    }

    fn on_timeout(&mut self, radio: &mut dyn Radio, now: Millis) {
        self.timeout_at = None;
        self.in_flight = false;
        let tries = self.queue.front().map(|p| p.tries).unwrap_or(0);
        let parent = self.parent;
        debug!(node = self.id, parent, tries, "acknowledgement timeout");
        if let Some(hook) = self.on_failure.as_mut() {
            hook(parent, tries);
        }
        if tries > self.tunables.max_tries {
            warn!(node = self.id, parent, tries, "retries exhausted, dropping frame");
            self.queue.pop_front();
        }
        if self.queue.is_empty() {
            if self.sleep_allowed {
                self.go_offline(radio);
            }
            return;
        }
        let head_tries = self.queue.front().map(|p| p.tries).unwrap_or(0);
        let jitter: f64 = self.rng.gen_range(0.0..1.0);
        let backoff =
            (self.tunables.fail_delay_ms as f64 * jitter * f64::from(head_tries).powi(2)) as u64;
        self.send_at = Some(now + backoff.max(1));
    }

    /// Reception on the data port.
    pub fn handle_data(&mut self, radio: &mut dyn Radio, src: NodeId, frame: &[u8], now: Millis) {
        let Some((&seq, payload)) = frame.split_first() else {
            warn!(node = self.id, src, "empty data frame");
            return;
        };
        // Acknowledge before anything else, duplicates included: the retry
        // may exist only because our previous ACK was lost.
        if let Err(err) = radio.unicast(ACKNOWLEDGEMENT_PORT, src, &[ACK_BYTE]) {
            debug!(node = self.id, src, %err, "ack transmit failed");
        }
        if self.history.contains(src, seq) {
            debug!(node = self.id, src, seq, "duplicate frame dropped");
            return;
        }
        self.history.record(src, seq);
        if self.is_sink {
            debug!(node = self.id, src, seq, len = payload.len(), "payload delivered at sink");
            if let Some(hook) = self.on_deliver.as_mut() {
                hook(payload);
            }
        } else {
            debug!(node = self.id, src, seq, "forwarding payload toward root");
            self.send(radio, payload, now);
        }
    }

    /// Reception on the ACK port.
    pub fn handle_ack(&mut self, radio: &mut dyn Radio, src: NodeId, now: Millis) {
        if !self.in_flight || self.queue.is_empty() {
            warn!(node = self.id, src, "unexpected ack");
            return;
        }
        self.in_flight = false;
        self.timeout_at = None;
        self.queue.pop_front();
        if self.queue.is_empty() {
            if self.sleep_allowed {
                self.go_offline(radio);
            }
        } else {
            self.arm_send(now);
        }
    }

    /// The tree controller grants sleep; with nothing queued both ports
    /// close immediately.
    pub fn allow_sleep(&mut self, radio: &mut dyn Radio) {
        self.sleep_allowed = true;
        if self.queue.is_empty() {
            self.go_offline(radio);
        }
    }

    /// The tree controller revokes sleep; a closed radio reopens immediately.
    pub fn disallow_sleep(&mut self, radio: &mut dyn Radio) {
        self.sleep_allowed = false;
        if !self.online {
            self.go_online(radio);
        }
    }

    fn arm_send(&mut self, now: Millis) {
        let jitter: f64 = self.rng.gen_range(0.5..1.0);
        let delay = (self.tunables.next_msg_delay_ms as f64 * jitter) as u64;
        self.send_at = Some(now + delay.max(1));
    }

    fn go_online(&mut self, radio: &mut dyn Radio) {
        if !self.online {
            radio.open(MESSAGING_PORT);
            radio.open(ACKNOWLEDGEMENT_PORT);
            self.online = true;
        }
    }

    fn go_offline(&mut self, radio: &mut dyn Radio) {
        if self.online {
            radio.close(MESSAGING_PORT);
            radio.close(ACKNOWLEDGEMENT_PORT);
            self.online = false;
            debug!(node = self.id, "unicast ports closed");
        }
    }
}
