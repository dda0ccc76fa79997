// Copyright 2022 Matthew Ingwersen.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you
// may not use this file except in compliance with the License. You may
// obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied. See the License for the specific language governing
// permissions and limitations under the License.

//! Implementation of the [`BoundedQueue`] type.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// A fixed-capacity, blocking, multi-producer multi-consumer FIFO
/// queue.
///
/// [`BoundedQueue::push`] blocks while the queue is full, which is the
/// only backpressure between the listener, the workers and the
/// responder. Consumers wait with [`BoundedQueue::pop_timeout`] so that
/// they can periodically check whether they have been told to stop.
///
/// Once [`BoundedQueue::close`] is called, pushes fail immediately and
/// pops drain whatever is left before reporting [`Pop::Closed`].
pub struct BoundedQueue<T> {
    state: Mutex<State<T>>,
    capacity: usize,

    /// Signaled when an item is pushed or the queue is closed.
    not_empty: Condvar,

    /// Signaled when an item is popped or the queue is closed.
    not_full: Condvar,
}

struct State<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// The result of [`BoundedQueue::pop_timeout`].
#[derive(Debug, Eq, PartialEq)]
pub enum Pop<T> {
    Item(T),
    Timeout,
    Closed,
}

/// The error returned when pushing onto a closed queue. It gives the
/// item back.
#[derive(Debug, Eq, PartialEq)]
pub struct Closed<T>(pub T);

impl<T> fmt::Display for Closed<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("queue is closed")
    }
}

impl<T: fmt::Debug> std::error::Error for Closed<T> {}

impl<T> BoundedQueue<T> {
    /// Creates a queue holding at most `capacity` items. A capacity of
    /// zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(State {
                items: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            capacity,
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    /// Appends `item`, blocking while the queue is full.
    pub fn push(&self, item: T) -> Result<(), Closed<T>> {
        let state = self.state.lock().unwrap();
        let mut state = self
            .not_full
            .wait_while(state, |s| !s.closed && s.items.len() >= self.capacity)
            .unwrap();
        if state.closed {
            return Err(Closed(item));
        }
        state.items.push_back(item);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Removes the oldest item, waiting up to `timeout` for one to
    /// arrive.
    pub fn pop_timeout(&self, timeout: Duration) -> Pop<T> {
        let state = self.state.lock().unwrap();
        let (mut state, _) = self
            .not_empty
            .wait_timeout_while(state, timeout, |s| !s.closed && s.items.is_empty())
            .unwrap();
        match state.items.pop_front() {
            Some(item) => {
                self.not_full.notify_one();
                Pop::Item(item)
            }
            None if state.closed => Pop::Closed,
            None => Pop::Timeout,
        }
    }

    /// Returns the number of queued items.
    pub fn len(&self) -> usize {
        self.state.lock().unwrap().items.len()
    }

    /// Returns whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Closes the queue, waking every blocked producer and consumer.
    pub fn close(&self) {
        self.state.lock().unwrap().closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }
}

impl<T> fmt::Debug for BoundedQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let state = self.state.lock().unwrap();
        f.debug_struct("BoundedQueue")
            .field("len", &state.items.len())
            .field("capacity", &self.capacity)
            .field("closed", &state.closed)
            .finish()
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    const SHORT: Duration = Duration::from_millis(50);

    #[test]
    fn items_come_out_in_order() {
        let queue = BoundedQueue::new(3);
        for i in 0..3 {
            queue.push(i).unwrap();
        }
        assert_eq!(queue.len(), 3);
        for i in 0..3 {
            assert_eq!(queue.pop_timeout(SHORT), Pop::Item(i));
        }
        assert_eq!(queue.pop_timeout(SHORT), Pop::Timeout);
    }

    #[test]
    fn push_blocks_until_there_is_room() {
        let queue = Arc::new(BoundedQueue::new(1));
        queue.push(1).unwrap();
        let producer = {
            let queue = queue.clone();
            thread::spawn(move || queue.push(2))
        };
        thread::sleep(SHORT);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pop_timeout(SHORT), Pop::Item(1));
        producer.join().unwrap().unwrap();
        assert_eq!(queue.pop_timeout(SHORT), Pop::Item(2));
    }

    #[test]
    fn close_drains_then_reports_closed() {
        let queue = BoundedQueue::new(2);
        queue.push("left over").unwrap();
        queue.close();
        assert_eq!(queue.push("rejected"), Err(Closed("rejected")));
        assert_eq!(queue.pop_timeout(SHORT), Pop::Item("left over"));
        assert_eq!(queue.pop_timeout(SHORT), Pop::Closed);
    }

    #[test]
    fn close_wakes_blocked_producers() {
        let queue = Arc::new(BoundedQueue::new(1));
        queue.push(1).unwrap();
        let producer = {
            let queue = queue.clone();
            thread::spawn(move || queue.push(2))
        };
        thread::sleep(SHORT);
        queue.close();
        assert_eq!(producer.join().unwrap(), Err(Closed(2)));
    }
}
