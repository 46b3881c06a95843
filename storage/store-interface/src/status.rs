// Copyright (c) Beacon
// SPDX-License-Identifier: Apache-2.0

use beacon_infallible::Mutex;
use futures::channel::mpsc;

/// Fan-out of status values to any number of independent subscribers. Each
/// subscriber owns a [`StatusSubscription`] handle; dropping the handle is
/// all that is needed to unsubscribe, and the broadcaster sheds closed
/// channels on the next send.
pub struct StatusBroadcaster<T: Clone> {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<T>>>,
}

impl<T: Clone> StatusBroadcaster<T> {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn subscribe(&self) -> StatusSubscription<T> {
        let (tx, rx) = mpsc::unbounded();
        self.subscribers.lock().push(tx);
        StatusSubscription { receiver: rx }
    }

    pub fn broadcast(&self, value: T) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.unbounded_send(value.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

impl<T: Clone> Default for StatusBroadcaster<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// The receiving end of a status broadcast.
pub struct StatusSubscription<T> {
    receiver: mpsc::UnboundedReceiver<T>,
}

impl<T> StatusSubscription<T> {
    pub fn receiver(&mut self) -> &mut mpsc::UnboundedReceiver<T> {
        &mut self.receiver
    }

    pub fn into_receiver(self) -> mpsc::UnboundedReceiver<T> {
        self.receiver
    }
}
