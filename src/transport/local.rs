//! In-process transport: one rank per thread
//!
//! Every rank owns an unbounded crossbeam mailbox. Sends enqueue directly
//! into the destination's mailbox, so a send has been delivered by the time
//! it returns. The mailboxes live in a shared group that is only freed when
//! the last endpoint drops, which lets a rank that is still running send to
//! a rank that already returned.

use super::{Envelope, Transport};
use crate::error::{TransportError, TransportResult};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;
use tracing::trace;

/// Mailbox pair for one rank
struct Mailbox {
    /// Point-to-point messages
    sender: Sender<Envelope>,
    receiver: Receiver<Envelope>,

    /// Gather contributions when this rank is the root
    gather_sender: Sender<(usize, Vec<u8>)>,
    gather_receiver: Receiver<(usize, Vec<u8>)>,
}

impl Mailbox {
    fn new() -> Self {
        let (sender, receiver) = unbounded();
        let (gather_sender, gather_receiver) = unbounded();
        Self {
            sender,
            receiver,
            gather_sender,
            gather_receiver,
        }
    }
}

/// Completed non-blocking send
#[derive(Debug)]
#[must_use = "a pending send must be waited on"]
pub struct LocalRequest {
    dest: usize,
}

/// Endpoint of an in-process rank group
pub struct LocalTransport {
    /// This endpoint's rank
    rank: usize,

    /// Mailboxes of every rank
    group: Arc<Vec<Mailbox>>,

    /// Messages skipped by `recv_from`, in arrival order
    held: VecDeque<Envelope>,

    /// Messages sent from this endpoint
    sent: u64,
}

impl LocalTransport {
    /// Create a group of `size` connected endpoints, indexed by rank
    pub fn group(size: usize) -> Vec<LocalTransport> {
        let group: Arc<Vec<Mailbox>> = Arc::new((0..size).map(|_| Mailbox::new()).collect());

        (0..size)
            .map(|rank| LocalTransport {
                rank,
                group: Arc::clone(&group),
                held: VecDeque::new(),
                sent: 0,
            })
            .collect()
    }

    /// Messages sent from this endpoint so far
    pub fn messages_sent(&self) -> u64 {
        self.sent
    }

    fn mailbox(&self, dest: usize) -> TransportResult<&Mailbox> {
        self.group.get(dest).ok_or(TransportError::InvalidRank {
            dest,
            size: self.group.len(),
        })
    }

    fn deliver(&mut self, dest: usize, tag: u8, body: Vec<u8>) -> TransportResult<()> {
        let envelope = Envelope {
            source: self.rank,
            tag,
            body,
        };
        self.mailbox(dest)?
            .sender
            .send(envelope)
            .map_err(|e| TransportError::SendFailed {
                from: self.rank,
                to: dest,
                reason: e.to_string(),
            })?;
        self.sent += 1;
        trace!(rank = self.rank, dest = dest, tag = tag, "Message sent");
        Ok(())
    }

    fn own_receiver(&self) -> &Receiver<Envelope> {
        &self.group[self.rank].receiver
    }
}

impl Transport for LocalTransport {
    type Request = LocalRequest;

    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.group.len()
    }

    fn send(&mut self, dest: usize, tag: u8, body: Vec<u8>) -> TransportResult<()> {
        self.deliver(dest, tag, body)
    }

    fn isend(&mut self, dest: usize, tag: u8, body: Vec<u8>) -> TransportResult<LocalRequest> {
        self.deliver(dest, tag, body)?;
        Ok(LocalRequest { dest })
    }

    fn wait(&mut self, request: LocalRequest) -> TransportResult<()> {
        trace!(rank = self.rank, dest = request.dest, "Send completed");
        Ok(())
    }

    fn probe(&mut self) -> TransportResult<bool> {
        let ready = !self.held.is_empty() || !self.own_receiver().is_empty();
        if !ready {
            // Idle ranks poll in a loop; let busy ranks on the same core run
            thread::yield_now();
        }
        Ok(ready)
    }

    fn recv(&mut self) -> TransportResult<Envelope> {
        if let Some(envelope) = self.held.pop_front() {
            return Ok(envelope);
        }
        self.own_receiver()
            .recv()
            .map_err(|_| TransportError::Disconnected { peer: self.rank })
    }

    fn recv_from(&mut self, source: usize, tag: u8) -> TransportResult<Envelope> {
        let held_pos = self
            .held
            .iter()
            .position(|e| e.source == source && e.tag == tag);
        if let Some(envelope) = held_pos.and_then(|pos| self.held.remove(pos)) {
            return Ok(envelope);
        }

        loop {
            let envelope = self
                .own_receiver()
                .recv()
                .map_err(|_| TransportError::Disconnected { peer: source })?;
            if envelope.source == source && envelope.tag == tag {
                return Ok(envelope);
            }
            self.held.push_back(envelope);
        }
    }

    fn gather(&mut self, root: usize, body: Vec<u8>) -> TransportResult<Option<Vec<Vec<u8>>>> {
        let size = self.group.len();
        let root_box = self.mailbox(root)?;

        if self.rank != root {
            root_box
                .gather_sender
                .send((self.rank, body))
                .map_err(|e| TransportError::GatherFailed {
                    root,
                    reason: e.to_string(),
                })?;
            return Ok(None);
        }

        let mut slots: Vec<Option<Vec<u8>>> = vec![None; size];
        slots[root] = Some(body);
        for _ in 1..size {
            let (rank, part) =
                root_box
                    .gather_receiver
                    .recv()
                    .map_err(|e| TransportError::GatherFailed {
                        root,
                        reason: e.to_string(),
                    })?;
            if slots[rank].replace(part).is_some() {
                return Err(TransportError::GatherFailed {
                    root,
                    reason: format!("rank {} contributed twice", rank),
                });
            }
        }

        slots
            .into_iter()
            .enumerate()
            .map(|(rank, slot)| {
                slot.ok_or_else(|| TransportError::GatherFailed {
                    root,
                    reason: format!("rank {} missing", rank),
                })
            })
            .collect::<TransportResult<Vec<_>>>()
            .map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_send_probe_recv() {
        let mut group = LocalTransport::group(2);
        let mut b = group.pop().unwrap();
        let mut a = group.pop().unwrap();

        assert!(!b.probe().unwrap());
        a.send(1, 2, vec![7]).unwrap();
        assert!(b.probe().unwrap());

        let envelope = b.recv().unwrap();
        assert_eq!(envelope.source, 0);
        assert_eq!(envelope.tag, 2);
        assert_eq!(envelope.body, vec![7]);
        assert!(!b.probe().unwrap());
        assert_eq!(a.messages_sent(), 1);
    }

    #[test]
    fn test_pairwise_order_preserved() {
        let mut group = LocalTransport::group(2);
        let mut b = group.pop().unwrap();
        let mut a = group.pop().unwrap();

        for i in 0..10u8 {
            let request = a.isend(1, 0, vec![i]).unwrap();
            a.wait(request).unwrap();
        }
        for i in 0..10u8 {
            assert_eq!(b.recv().unwrap().body, vec![i]);
        }
    }

    #[test]
    fn test_recv_from_holds_back_other_messages() {
        let mut group = LocalTransport::group(3);
        let mut c = group.pop().unwrap();
        let mut b = group.pop().unwrap();
        let mut a = group.pop().unwrap();

        a.send(2, 0, vec![1]).unwrap();
        b.send(2, 4, vec![2]).unwrap();
        a.send(2, 3, vec![3]).unwrap();

        let matched = c.recv_from(1, 4).unwrap();
        assert_eq!(matched.body, vec![2]);

        assert!(c.probe().unwrap());
        assert_eq!(c.recv().unwrap().body, vec![1]);
        assert_eq!(c.recv().unwrap().body, vec![3]);
        assert!(!c.probe().unwrap());
    }

    #[test]
    fn test_invalid_destination() {
        let mut group = LocalTransport::group(2);
        let err = group[0].send(5, 0, Vec::new()).unwrap_err();
        assert_eq!(err, TransportError::InvalidRank { dest: 5, size: 2 });
    }

    #[test]
    fn test_send_to_dropped_rank_succeeds() {
        let mut group = LocalTransport::group(2);
        let b = group.pop().unwrap();
        drop(b);
        assert!(group[0].send(1, 0, Vec::new()).is_ok());
    }

    #[test]
    fn test_gather_orders_by_rank() {
        let handles: Vec<_> = LocalTransport::group(4)
            .into_iter()
            .map(|mut transport| {
                thread::spawn(move || {
                    let body = vec![transport.rank() as u8 * 10];
                    transport.gather(0, body).unwrap()
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(results[0], Some(vec![vec![0], vec![10], vec![20], vec![30]]));
        assert!(results[1..].iter().all(Option::is_none));
    }
}
