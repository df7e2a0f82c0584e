use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::{Condvar, Mutex};

use crate::wait::{CancelToken, Interrupt, Wait, WaitOutcome};

/// Result of attempting to enqueue.
///
/// Producers on the hardware callback path never block; a full queue is
/// reported back so the caller can drop the entry and count it.
///
/// # Example
/// ```rust
/// use charon_core::prelude::*;
///
/// let queue = EventQueue::bounded("demo", 1);
/// assert_eq!(queue.offer(1u32), PushOutcome::Accepted);
/// assert_eq!(queue.offer(2u32), PushOutcome::Full);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Entry was appended and waiters were woken.
    Accepted,
    /// Queue is at capacity; the entry was not appended.
    Full,
}

struct QueueInner<T> {
    name: &'static str,
    capacity: Option<usize>,
    items: Mutex<VecDeque<T>>,
    ready: Condvar,
}

impl<T: Send + 'static> Interrupt for QueueInner<T> {
    fn interrupt(&self) {
        // Taking the lock serializes with a waiter between its predicate
        // check and the park, so the wakeup cannot be lost.
        let _items = self.items.lock();
        self.ready.notify_all();
    }
}

/// FIFO queue with its own lock and wait condition.
///
/// Entries are appended at the tail and consumed from the head. Pushing
/// never blocks; popping can wait with a deadline or a cancellation token.
/// Handles are cheap clones sharing the same queue.
///
/// # Example
/// ```rust
/// use charon_core::prelude::*;
///
/// let queue = EventQueue::unbounded("demo");
/// queue.offer(7u32);
/// assert!(matches!(queue.pop_wait(Wait::Immediate), WaitOutcome::Ready(7)));
/// assert!(matches!(queue.pop_wait(Wait::Immediate), WaitOutcome::Empty));
/// ```
pub struct EventQueue<T> {
    inner: Arc<QueueInner<T>>,
}

impl<T> Clone for EventQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Send + 'static> EventQueue<T> {
    /// Create a queue without a capacity bound.
    pub fn unbounded(name: &'static str) -> Self {
        Self::with_capacity(name, None)
    }

    /// Create a queue that rejects entries beyond `capacity`.
    pub fn bounded(name: &'static str, capacity: usize) -> Self {
        Self::with_capacity(name, Some(capacity))
    }

    fn with_capacity(name: &'static str, capacity: Option<usize>) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                name,
                capacity,
                items: Mutex::new(VecDeque::new()),
                ready: Condvar::new(),
            }),
        }
    }

    /// Name given at construction, for diagnostics.
    pub fn name(&self) -> &'static str {
        self.inner.name
    }

    /// Append an entry at the tail and wake every parked consumer.
    pub fn offer(&self, item: T) -> PushOutcome {
        let mut items = self.inner.items.lock();
        if let Some(capacity) = self.inner.capacity {
            if items.len() >= capacity {
                return PushOutcome::Full;
            }
        }
        items.push_back(item);
        self.inner.ready.notify_all();
        PushOutcome::Accepted
    }

    /// Detach the head entry if one is present.
    pub fn try_pop(&self) -> Option<T> {
        self.inner.items.lock().pop_front()
    }

    /// Whether an entry is ready for a consumer. This is the poll
    /// predicate; it does not dequeue.
    pub fn pending(&self) -> bool {
        !self.inner.items.lock().is_empty()
    }

    /// Number of queued entries.
    pub fn len(&self) -> usize {
        self.inner.items.lock().len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Detach the head entry, parking the caller according to `wait`.
    ///
    /// A lapsed or cancelled wait leaves the queue untouched; no entry is
    /// partially dequeued.
    pub fn pop_wait(&self, wait: Wait) -> WaitOutcome<T> {
        match wait {
            Wait::Immediate => match self.try_pop() {
                Some(item) => WaitOutcome::Ready(item),
                None => WaitOutcome::Empty,
            },
            Wait::Timeout(timeout) => {
                let deadline = Instant::now() + timeout;
                let mut items = self.inner.items.lock();
                loop {
                    if let Some(item) = items.pop_front() {
                        return WaitOutcome::Ready(item);
                    }
                    if self.inner.ready.wait_until(&mut items, deadline).timed_out() {
                        return match items.pop_front() {
                            Some(item) => WaitOutcome::Ready(item),
                            None => WaitOutcome::TimedOut,
                        };
                    }
                }
            }
            Wait::Cancellable(token) => {
                if token.is_cancelled() {
                    return WaitOutcome::Cancelled;
                }
                let watcher: Weak<dyn Interrupt> =
                    Arc::downgrade(&(self.inner.clone() as Arc<dyn Interrupt>));
                token.watch(watcher);
                let mut items = self.inner.items.lock();
                loop {
                    if let Some(item) = items.pop_front() {
                        return WaitOutcome::Ready(item);
                    }
                    if token.is_cancelled() {
                        return WaitOutcome::Cancelled;
                    }
                    self.inner.ready.wait(&mut items);
                }
            }
        }
    }

    /// Remove and return every queued entry. Used on session teardown.
    pub fn drain(&self) -> Vec<T> {
        self.inner.items.lock().drain(..).collect()
    }
}

enum SlotState<T> {
    Waiting,
    Done(T),
}

struct SlotInner<T> {
    slot: Mutex<SlotState<T>>,
    ready: Condvar,
}

impl<T: Send + 'static> Interrupt for SlotInner<T> {
    fn interrupt(&self) {
        let _slot = self.slot.lock();
        self.ready.notify_all();
    }
}

/// Producing half of a one-shot completion slot.
pub struct Completer<T> {
    inner: Arc<SlotInner<T>>,
}

impl<T: Send + 'static> Completer<T> {
    /// Deliver the value and wake the waiter. Consumes the completer, so a
    /// slot is completed at most once.
    pub fn complete(self, value: T) {
        let mut slot = self.inner.slot.lock();
        *slot = SlotState::Done(value);
        self.inner.ready.notify_all();
    }
}

/// Consuming half of a one-shot completion slot.
pub struct CompletionWaiter<T> {
    inner: Arc<SlotInner<T>>,
}

impl<T: Send + 'static> CompletionWaiter<T> {
    /// Wait for the completion according to `wait`.
    ///
    /// If the completer is dropped without delivering, a bounded wait
    /// lapses and a cancellable wait returns once its token fires; callers
    /// on this path always hold one of the two.
    pub fn wait(self, wait: Wait) -> WaitOutcome<T> {
        match wait {
            Wait::Immediate => match self.take() {
                Some(value) => WaitOutcome::Ready(value),
                None => WaitOutcome::Empty,
            },
            Wait::Timeout(timeout) => {
                let deadline = Instant::now() + timeout;
                let mut slot = self.inner.slot.lock();
                loop {
                    if let SlotState::Done(_) = *slot {
                        return take_done(&mut slot);
                    }
                    if self.inner.ready.wait_until(&mut slot, deadline).timed_out() {
                        return match *slot {
                            SlotState::Done(_) => take_done(&mut slot),
                            SlotState::Waiting => WaitOutcome::TimedOut,
                        };
                    }
                }
            }
            Wait::Cancellable(token) => {
                if token.is_cancelled() {
                    return WaitOutcome::Cancelled;
                }
                let watcher: Weak<dyn Interrupt> =
                    Arc::downgrade(&(self.inner.clone() as Arc<dyn Interrupt>));
                token.watch(watcher);
                let mut slot = self.inner.slot.lock();
                loop {
                    if let SlotState::Done(_) = *slot {
                        return take_done(&mut slot);
                    }
                    if token.is_cancelled() {
                        return WaitOutcome::Cancelled;
                    }
                    self.inner.ready.wait(&mut slot);
                }
            }
        }
    }

    fn take(&self) -> Option<T> {
        let mut slot = self.inner.slot.lock();
        match std::mem::replace(&mut *slot, SlotState::Waiting) {
            SlotState::Done(value) => Some(value),
            SlotState::Waiting => None,
        }
    }
}

fn take_done<T>(slot: &mut SlotState<T>) -> WaitOutcome<T> {
    match std::mem::replace(slot, SlotState::Waiting) {
        SlotState::Done(value) => WaitOutcome::Ready(value),
        SlotState::Waiting => WaitOutcome::TimedOut,
    }
}

/// Create a one-shot completion slot.
///
/// # Example
/// ```rust
/// use charon_core::prelude::*;
///
/// let (tx, rx) = completion::<u8>();
/// tx.complete(5);
/// assert!(matches!(rx.wait(Wait::Immediate), WaitOutcome::Ready(5)));
/// ```
pub fn completion<T: Send + 'static>() -> (Completer<T>, CompletionWaiter<T>) {
    let inner = Arc::new(SlotInner {
        slot: Mutex::new(SlotState::Waiting),
        ready: Condvar::new(),
    });
    (
        Completer {
            inner: inner.clone(),
        },
        CompletionWaiter { inner },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn pops_in_push_order() {
        let queue = EventQueue::unbounded("fifo");
        for i in 0..16u32 {
            assert_eq!(queue.offer(i), PushOutcome::Accepted);
        }
        for i in 0..16u32 {
            assert_eq!(queue.try_pop(), Some(i));
        }
        assert!(queue.is_empty());
    }

    #[test]
    fn bounded_rejects_overflow() {
        let queue = EventQueue::bounded("tiny", 2);
        assert_eq!(queue.offer(1), PushOutcome::Accepted);
        assert_eq!(queue.offer(2), PushOutcome::Accepted);
        assert_eq!(queue.offer(3), PushOutcome::Full);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn timed_wait_lapses_and_leaves_queue_unchanged() {
        let queue: EventQueue<u32> = EventQueue::unbounded("idle");
        let started = Instant::now();
        assert!(matches!(
            queue.pop_wait(Wait::Timeout(Duration::from_millis(30))),
            WaitOutcome::TimedOut
        ));
        assert!(started.elapsed() >= Duration::from_millis(30));
        assert!(queue.is_empty());
    }

    #[test]
    fn timed_wait_wakes_on_push() {
        let queue = EventQueue::unbounded("wake");
        let consumer = {
            let queue = queue.clone();
            thread::spawn(move || queue.pop_wait(Wait::Timeout(Duration::from_secs(5))))
        };
        thread::sleep(Duration::from_millis(20));
        queue.offer(42u32);
        assert!(matches!(
            consumer.join().expect("join"),
            WaitOutcome::Ready(42)
        ));
    }

    #[test]
    fn cancel_wakes_unbounded_waiter() {
        let queue: EventQueue<u32> = EventQueue::unbounded("park");
        let token = CancelToken::new();
        let consumer = {
            let queue = queue.clone();
            let token = token.clone();
            thread::spawn(move || queue.pop_wait(Wait::Cancellable(token)))
        };
        thread::sleep(Duration::from_millis(20));
        token.cancel();
        assert!(matches!(
            consumer.join().expect("join"),
            WaitOutcome::Cancelled
        ));
        assert!(queue.is_empty());
    }

    #[test]
    fn cancelled_token_never_parks() {
        let queue: EventQueue<u32> = EventQueue::unbounded("dead");
        let token = CancelToken::new();
        token.cancel();
        assert!(matches!(
            queue.pop_wait(Wait::Cancellable(token)),
            WaitOutcome::Cancelled
        ));
    }

    #[test]
    fn completion_delivers_across_threads() {
        let (tx, rx) = completion::<&'static str>();
        let waiter = thread::spawn(move || rx.wait(Wait::Timeout(Duration::from_secs(5))));
        thread::sleep(Duration::from_millis(10));
        tx.complete("done");
        assert!(matches!(
            waiter.join().expect("join"),
            WaitOutcome::Ready("done")
        ));
    }

    #[test]
    fn completion_times_out_without_completer() {
        let (tx, rx) = completion::<u8>();
        let outcome = rx.wait(Wait::Timeout(Duration::from_millis(20)));
        assert!(matches!(outcome, WaitOutcome::TimedOut));
        drop(tx);
    }

    #[test]
    fn many_producers_preserve_per_producer_order() {
        let queue = EventQueue::unbounded("mpmc");
        let mut handles = Vec::new();
        for producer in 0..4u32 {
            let queue = queue.clone();
            handles.push(thread::spawn(move || {
                for seq in 0..64u32 {
                    queue.offer((producer, seq));
                }
            }));
        }
        for handle in handles {
            handle.join().expect("join");
        }
        let mut next = [0u32; 4];
        while let Some((producer, seq)) = queue.try_pop() {
            assert_eq!(next[producer as usize], seq);
            next[producer as usize] += 1;
        }
        assert_eq!(next, [64; 4]);
    }
}
