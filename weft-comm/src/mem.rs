use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex};

use crate::transport::{LocaleId, Recv, Tag, Transport, TransportError};

/// Shared state behind the in-process transport: tag-keyed mailboxes and a
/// generation-counted barrier. One hub backs one group of locales running
/// as threads in a single process; this is both the test harness transport
/// and the single-machine transport.
pub struct MemHub {
    num_locales: usize,
    mailboxes: Mutex<HashMap<(LocaleId, Tag), VecDeque<(LocaleId, Vec<u8>)>>>,
    delivered: Condvar,
    barrier: Mutex<BarrierState>,
    barrier_cv: Condvar,
}

#[derive(Default)]
struct BarrierState {
    waiting: usize,
    generation: u64,
}

impl MemHub {
    pub fn new(num_locales: usize) -> Arc<MemHub> {
        assert!(num_locales > 0);
        Arc::new(MemHub {
            num_locales,
            mailboxes: Mutex::new(HashMap::new()),
            delivered: Condvar::new(),
            barrier: Mutex::new(BarrierState::default()),
            barrier_cv: Condvar::new(),
        })
    }

    /// One locale's endpoint onto the hub.
    pub fn endpoint(self: &Arc<MemHub>, id: LocaleId) -> MemTransport {
        assert!(id < self.num_locales);
        MemTransport {
            hub: self.clone(),
            id,
        }
    }

    fn push(&self, dest: LocaleId, tag: Tag, source: LocaleId, bytes: Vec<u8>) {
        let mut boxes = self.mailboxes.lock().expect("mailbox lock poisoned");
        boxes
            .entry((dest, tag))
            .or_default()
            .push_back((source, bytes));
        self.delivered.notify_all();
    }
}

pub struct MemTransport {
    hub: Arc<MemHub>,
    id: LocaleId,
}

impl Transport for MemTransport {
    fn locale(&self) -> LocaleId {
        self.id
    }

    fn num_locales(&self) -> usize {
        self.hub.num_locales
    }

    fn send(&self, dest: LocaleId, tag: Tag, bytes: &[u8]) -> Result<(), TransportError> {
        if dest >= self.hub.num_locales {
            return Err(TransportError::new("send", format!("no such locale {dest}")));
        }
        self.hub.push(dest, tag, self.id, bytes.to_vec());
        Ok(())
    }

    fn recv(
        &self,
        src: Option<LocaleId>,
        tag: Tag,
        buf: &mut [u8],
    ) -> Result<Recv, TransportError> {
        let mut boxes = self
            .hub
            .mailboxes
            .lock()
            .map_err(|_| TransportError::new("recv", "mailbox lock poisoned"))?;
        loop {
            if let Some(queue) = boxes.get_mut(&(self.id, tag)) {
                let pos = match src {
                    None => (!queue.is_empty()).then_some(0),
                    Some(want) => queue.iter().position(|(from, _)| *from == want),
                };
                if let Some(pos) = pos {
                    let (source, bytes) = queue.remove(pos).expect("position just found");
                    let len = bytes.len().min(buf.len());
                    buf[..len].copy_from_slice(&bytes[..len]);
                    return Ok(Recv { source, len });
                }
            }
            boxes = self
                .hub
                .delivered
                .wait(boxes)
                .map_err(|_| TransportError::new("recv", "mailbox lock poisoned"))?;
        }
    }

    fn broadcast(&self, tag: Tag, bytes: &[u8]) -> Result<(), TransportError> {
        for dest in 0..self.hub.num_locales {
            if dest != self.id {
                self.hub.push(dest, tag, self.id, bytes.to_vec());
            }
        }
        Ok(())
    }

    fn barrier(&self, participants: usize) -> Result<(), TransportError> {
        if participants == 0 || participants > self.hub.num_locales {
            return Err(TransportError::new(
                "barrier",
                format!("invalid participant count {participants}"),
            ));
        }
        let mut state = self
            .hub
            .barrier
            .lock()
            .map_err(|_| TransportError::new("barrier", "barrier lock poisoned"))?;
        state.waiting += 1;
        if state.waiting >= participants {
            state.waiting = 0;
            state.generation += 1;
            self.hub.barrier_cv.notify_all();
            return Ok(());
        }
        let generation = state.generation;
        while state.generation == generation {
            state = self
                .hub
                .barrier_cv
                .wait(state)
                .map_err(|_| TransportError::new("barrier", "barrier lock poisoned"))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn messages_route_by_tag_not_arrival_order() {
        let hub = MemHub::new(2);
        let a = hub.endpoint(0);
        let b = hub.endpoint(1);

        a.send(1, 7, b"seven").unwrap();
        a.send(1, 9, b"nine").unwrap();

        let mut buf = [0u8; 16];
        let r = b.recv(None, 9, &mut buf).unwrap();
        assert_eq!(&buf[..r.len], b"nine");
        assert_eq!(r.source, 0);
        let r = b.recv(Some(0), 7, &mut buf).unwrap();
        assert_eq!(&buf[..r.len], b"seven");
    }

    #[test]
    fn per_tag_delivery_is_fifo() {
        let hub = MemHub::new(2);
        let a = hub.endpoint(0);
        let b = hub.endpoint(1);
        for i in 0..5u8 {
            a.send(1, 3, &[i]).unwrap();
        }
        let mut buf = [0u8; 1];
        for i in 0..5u8 {
            b.recv(None, 3, &mut buf).unwrap();
            assert_eq!(buf[0], i);
        }
    }

    #[test]
    fn broadcast_reaches_everyone_but_the_sender() {
        let hub = MemHub::new(3);
        let a = hub.endpoint(0);
        a.broadcast(5, b"x").unwrap();
        let mut buf = [0u8; 1];
        for id in 1..3 {
            let ep = hub.endpoint(id);
            let r = ep.recv(None, 5, &mut buf).unwrap();
            assert_eq!(r.source, 0);
        }
        // Nothing lands in the sender's own mailbox.
        assert!(hub
            .mailboxes
            .lock()
            .unwrap()
            .get(&(0, 5))
            .is_none_or(|q| q.is_empty()));
    }

    #[test]
    fn barrier_releases_exactly_at_participant_count() {
        let hub = MemHub::new(3);
        let mut handles = Vec::new();
        for id in 0..3 {
            let ep = hub.endpoint(id);
            handles.push(thread::spawn(move || ep.barrier(3).unwrap()));
        }
        for h in handles {
            h.join().unwrap();
        }
    }

    #[test]
    fn reduced_barrier_excludes_the_coordinator() {
        let hub = MemHub::new(3);
        // Locales 1 and 2 barrier with participant count 2; locale 0 is
        // never involved and must not be needed for release.
        let mut handles = Vec::new();
        for id in 1..3 {
            let ep = hub.endpoint(id);
            handles.push(thread::spawn(move || ep.barrier(2).unwrap()));
        }
        for h in handles {
            h.join().unwrap();
        }
    }
}
