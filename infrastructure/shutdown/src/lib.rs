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

//! Cooperative shutdown primitives.
//!
//! A `Shutdown` is held by the owner of one or more tasks; each task holds a `ShutdownSignal` and selects on it at its
//! suspension points. Triggering the `Shutdown`, or dropping it, resolves every signal.

mod oneshot_trigger;

pub use oneshot_trigger::{OneshotSignal, OneshotTrigger};

use futures::future::FusedFuture;
use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

/// Owner side of a shutdown signal.
#[derive(Default)]
pub struct Shutdown {
    trigger: OneshotTrigger<()>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self {
            trigger: OneshotTrigger::new(),
        }
    }

    /// Trigger the shutdown. Safe to call more than once.
    pub fn trigger(&mut self) {
        self.trigger.fire(());
    }

    pub fn is_triggered(&self) -> bool {
        self.trigger.is_fired()
    }

    pub fn to_signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            inner: self.trigger.to_signal(),
        }
    }
}

/// Receiver side of a shutdown signal. Resolves when the owning `Shutdown` is triggered or dropped.
#[derive(Debug, Clone)]
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct ShutdownSignal {
    inner: OneshotSignal<()>,
}

impl ShutdownSignal {
    pub fn is_triggered(&self) -> bool {
        self.inner.is_terminated()
    }
}

impl Future for ShutdownSignal {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.inner).poll(cx) {
            Poll::Ready(_) => Poll::Ready(()),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl FusedFuture for ShutdownSignal {
    fn is_terminated(&self) -> bool {
        self.inner.is_terminated()
    }
}
