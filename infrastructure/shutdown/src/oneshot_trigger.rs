//  Copyright 2021, The Lattice Developers
//
//  Redistribution and use in source and binary forms, with or without modification, are permitted provided that the
//  following conditions are met:
//
//  1. Redistributions of source code must retain the above copyright notice, this list of conditions and the following
//  disclaimer.
//
//  2. Redistributions in binary form must reproduce the above copyright notice, this list of conditions and the
//  following disclaimer in the documentation and/or other materials provided with the distribution.
//
//  3. Neither the name of the copyright holder nor the names of its contributors may be used to endorse or promote
//  products derived from this software without specific prior written permission.
//
//  THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS "AS IS" AND ANY EXPRESS OR IMPLIED WARRANTIES,
//  INCLUDING, BUT NOT LIMITED TO, THE IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR A PARTICULAR PURPOSE ARE
//  DISCLAIMED. IN NO EVENT SHALL THE COPYRIGHT HOLDER OR CONTRIBUTORS BE LIABLE FOR ANY DIRECT, INDIRECT, INCIDENTAL,
//  SPECIAL, EXEMPLARY, OR CONSEQUENTIAL DAMAGES (INCLUDING, BUT NOT LIMITED TO, PROCUREMENT OF SUBSTITUTE GOODS OR
//  SERVICES; LOSS OF USE, DATA, OR PROFITS; OR BUSINESS INTERRUPTION) HOWEVER CAUSED AND ON ANY THEORY OF LIABILITY,
//  WHETHER IN CONTRACT, STRICT LIABILITY, OR TORT (INCLUDING NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE
//  USE OF THIS SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.

use futures::{
    channel::oneshot,
    future::{FusedFuture, Shared},
    FutureExt,
};
use std::{
    future::Future,
    pin::Pin,
    sync::{Arc, Mutex},
    task::{Context, Poll},
};

/// A one-shot event with any number of waiters.
///
/// The trigger side fires at most once. Every `OneshotSignal` obtained from `to_signal` resolves once the trigger has
/// fired, including signals obtained after the fact. Dropping the trigger without firing also resolves all signals,
/// with `None`, so a waiter can never be left hanging.
pub struct OneshotTrigger<T> {
    sender: Arc<Mutex<Option<oneshot::Sender<T>>>>,
    signal: OneshotSignal<T>,
}

impl<T: Clone> OneshotTrigger<T> {
    pub fn new() -> Self {
        let (tx, rx) = oneshot::channel();
        Self {
            sender: Arc::new(Mutex::new(Some(tx))),
            signal: OneshotSignal { inner: rx.shared() },
        }
    }

    /// A signal that resolves when this trigger is fired or dropped.
    pub fn to_signal(&self) -> OneshotSignal<T> {
        self.signal.clone()
    }

    /// Fire the trigger. Subsequent calls have no effect.
    pub fn fire(&mut self, item: T) {
        if let Some(tx) = self.sender.lock().unwrap().take() {
            let _ = tx.send(item);
        }
    }

    pub fn is_fired(&self) -> bool {
        self.sender.lock().unwrap().is_none()
    }
}

impl<T: Clone> Default for OneshotTrigger<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// The waiter side of a `OneshotTrigger`.
///
/// Resolves to `Some(T)` when the trigger fires, or `None` when the trigger is dropped unfired. Polling after
/// completion is safe and returns `None`, which allows this signal to be used inside `futures::select!`.
#[derive(Debug, Clone)]
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct OneshotSignal<T> {
    inner: Shared<oneshot::Receiver<T>>,
}

impl<T: Clone> Future for OneshotSignal<T> {
    type Output = Option<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.inner.is_terminated() {
            return Poll::Ready(None);
        }

        match Pin::new(&mut self.inner).poll(cx) {
            Poll::Ready(Ok(v)) => Poll::Ready(Some(v)),
            // Trigger dropped without firing
            Poll::Ready(Err(_)) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T: Clone> FusedFuture for OneshotSignal<T> {
    fn is_terminated(&self) -> bool {
        self.inner.is_terminated()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio_macros::test_basic]
    async fn fires_all_signals() {
        let mut trigger = OneshotTrigger::new();
        let a = trigger.to_signal();
        let b = trigger.to_signal();
        assert!(!trigger.is_fired());
        trigger.fire(123u32);
        assert!(trigger.is_fired());
        assert_eq!(a.await, Some(123));
        assert_eq!(b.await, Some(123));
        // Late subscriber still resolves
        assert_eq!(trigger.to_signal().await, Some(123));
    }

    #[tokio_macros::test_basic]
    async fn resolves_none_on_drop() {
        let trigger = OneshotTrigger::<()>::new();
        let signal = trigger.to_signal();
        drop(trigger);
        assert_eq!(signal.await, None);
    }

    #[tokio_macros::test_basic]
    async fn fire_is_idempotent() {
        let mut trigger = OneshotTrigger::new();
        trigger.fire(1u32);
        trigger.fire(2u32);
        assert_eq!(trigger.to_signal().await, Some(1));
    }
}
