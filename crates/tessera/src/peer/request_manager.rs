use std::{cmp::Reverse, collections::BinaryHeap};

use hashbrown::HashMap;
use tokio::time::Instant;

use crate::tcp_wire::BlockInfo;

/// The requests sent to a peer that were not answered yet, with the
/// deadline of each one.
#[derive(Debug, Default)]
pub(crate) struct RequestManager {
    timeouts: BinaryHeap<(Reverse<Instant>, BlockInfo)>,
    requests: HashMap<BlockInfo, Instant>,
}

impl RequestManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn contains(&self, block: &BlockInfo) -> bool {
        self.requests.contains_key(block)
    }

    pub fn add_request(&mut self, block: BlockInfo, deadline: Instant) {
        self.requests.insert(block.clone(), deadline);
        self.timeouts.push((Reverse(deadline), block));
    }

    /// Return true if the request exists, and false otherwise.
    pub fn remove_request(&mut self, block: &BlockInfo) -> bool {
        self.requests.remove(block).is_some()
    }

    /// Remove and return the requests whose deadline is `now` or earlier.
    pub fn take_timed_out(&mut self, now: Instant) -> Vec<BlockInfo> {
        let mut timed_out = Vec::new();

        while let Some((Reverse(deadline), _)) = self.timeouts.peek() {
            if *deadline > now {
                break;
            }
            let Some((Reverse(deadline), block)) = self.timeouts.pop() else {
                break;
            };
            // entries of removed or re-added requests are stale
            if self.requests.get(&block) == Some(&deadline) {
                self.requests.remove(&block);
                timed_out.push(block);
            }
        }

        timed_out
    }

    /// Remove every request.
    pub fn drain(&mut self) -> Vec<BlockInfo> {
        self.timeouts.clear();
        self.requests.drain().map(|(block, _)| block).collect()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn add_and_remove() {
        let mut manager = RequestManager::new();
        let block = BlockInfo::new(0, 0, 16384);

        manager.add_request(block.clone(), Instant::now());
        assert_eq!(manager.len(), 1);
        assert!(manager.contains(&block));

        assert!(manager.remove_request(&block));
        assert!(!manager.remove_request(&block));
        assert!(manager.is_empty());
    }

    #[test]
    fn timed_out_requests() {
        let mut manager = RequestManager::new();
        let now = Instant::now();

        for i in 0..10 {
            let block = BlockInfo::new(i / 2, (i % 2) * 16384, 16384);
            let deadline = if i % 5 == 0 {
                now - Duration::from_secs(10)
            } else {
                now + Duration::from_secs(10)
            };
            manager.add_request(block, deadline);
        }

        // answered before the deadline
        manager.remove_request(&BlockInfo::new(0, 0, 16384));

        let timed_out = manager.take_timed_out(now);
        assert_eq!(timed_out, vec![BlockInfo::new(2, 16384, 16384)]);
        assert_eq!(manager.len(), 8);
        assert!(manager.take_timed_out(now).is_empty());

        let mut rest = manager.drain();
        rest.sort();
        assert_eq!(rest.len(), 8);
        assert!(manager.is_empty());
    }
}
