use rand::seq::SliceRandom;
use std::collections::VecDeque;
use tracing::{debug, info};

use super::{track::TrackDescriptor, MusicError, MusicResult};

/// Default capacity of a guild queue.
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 500;

/// Upcoming tracks for one guild, played in FIFO order.
///
/// The track that is currently playing is *not* stored here; the session keeps
/// it separately, so shuffling or clearing the queue can never touch it.
#[derive(Debug)]
pub struct GuildQueue {
    items: VecDeque<TrackDescriptor>,
    max_size: usize,
}

impl GuildQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            items: VecDeque::new(),
            max_size,
        }
    }

    /// Appends a track and returns its 1-based position in the queue.
    pub fn enqueue(&mut self, track: TrackDescriptor) -> MusicResult<usize> {
        if self.items.len() >= self.max_size {
            return Err(MusicError::QueueFull { max: self.max_size });
        }

        info!("➕ Added to queue: {}", track.title());
        self.items.push_back(track);

        Ok(self.items.len())
    }

    /// Pops the head of the queue. An empty queue is not an error.
    pub fn dequeue_front(&mut self) -> Option<TrackDescriptor> {
        let next = self.items.pop_front();
        match &next {
            Some(track) => debug!("➡️ Next in queue: {}", track.title()),
            None => debug!("📭 Queue is empty"),
        }
        next
    }

    /// Puts a finished track back at the head. Only used for loop re-insertion
    /// of a track that was already admitted, so the capacity check is skipped.
    pub(crate) fn requeue_front(&mut self, track: TrackDescriptor) {
        self.items.push_front(track);
    }

    /// Puts a finished track back at the tail, bypassing the capacity check.
    pub(crate) fn requeue_back(&mut self, track: TrackDescriptor) {
        self.items.push_back(track);
    }

    pub fn clear(&mut self) {
        if !self.items.is_empty() {
            self.items.clear();
            info!("🗑️ Queue cleared");
        }
    }

    /// Uniformly permutes the queued tracks.
    pub fn shuffle(&mut self) {
        let mut rng = rand::thread_rng();
        self.items.make_contiguous().shuffle(&mut rng);
        info!("🔀 Queue shuffled ({} tracks)", self.items.len());
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Read-only copy of the queue in playback order, for display.
    pub fn peek_all(&self) -> Vec<TrackDescriptor> {
        self.items.iter().cloned().collect()
    }
}

impl Default for GuildQueue {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_QUEUE_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn track(n: u32) -> TrackDescriptor {
        TrackDescriptor::new(format!("Track {n}"), format!("https://example.com/{n}"))
    }

    fn titles(queue: &GuildQueue) -> Vec<String> {
        queue.peek_all().iter().map(|t| t.title().to_string()).collect()
    }

    #[test]
    fn test_enqueue_preserves_insertion_order() {
        let mut queue = GuildQueue::new(10);
        assert_eq!(queue.enqueue(track(1)).unwrap(), 1);
        assert_eq!(queue.enqueue(track(2)).unwrap(), 2);
        assert_eq!(queue.enqueue(track(3)).unwrap(), 3);

        assert_eq!(titles(&queue), vec!["Track 1", "Track 2", "Track 3"]);
        assert_eq!(queue.dequeue_front().unwrap().title(), "Track 1");
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_enqueue_rejects_when_full() {
        let mut queue = GuildQueue::new(2);
        queue.enqueue(track(1)).unwrap();
        queue.enqueue(track(2)).unwrap();

        let err = queue.enqueue(track(3)).unwrap_err();
        assert!(matches!(err, MusicError::QueueFull { max: 2 }));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_dequeue_on_empty_returns_none() {
        let mut queue = GuildQueue::default();
        assert!(queue.dequeue_front().is_none());
        assert_eq!(queue.max_size(), DEFAULT_MAX_QUEUE_SIZE);
    }

    #[test]
    fn test_requeue_ignores_capacity() {
        let mut queue = GuildQueue::new(1);
        queue.enqueue(track(2)).unwrap();
        queue.requeue_front(track(1));
        queue.requeue_back(track(3));

        assert_eq!(titles(&queue), vec!["Track 1", "Track 2", "Track 3"]);
    }

    #[test]
    fn test_clear_is_noop_when_empty() {
        let mut queue = GuildQueue::new(5);
        queue.clear();
        assert!(queue.is_empty());

        queue.enqueue(track(1)).unwrap();
        queue.clear();
        assert!(queue.is_empty());
    }

    #[test]
    fn test_shuffle_keeps_the_same_tracks() {
        let mut queue = GuildQueue::new(100);
        for n in 0..20 {
            queue.enqueue(track(n)).unwrap();
        }
        let before = titles(&queue);

        queue.shuffle();

        let mut after = titles(&queue);
        assert_eq!(after.len(), before.len());
        // 20! orderings; an identical result is practically impossible
        assert_ne!(after, before);
        after.sort();
        let mut sorted_before = before.clone();
        sorted_before.sort();
        assert_eq!(after, sorted_before);
    }
}
