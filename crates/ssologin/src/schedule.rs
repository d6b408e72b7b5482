// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Delayed, cancellable transitions.
//!
//! Every UX delay (URL correction, auto-continue, popup close) runs through
//! [`ScheduledTransition`]. The transition is tied to a parent teardown token:
//! cancelling the parent, calling [`ScheduledTransition::cancel`], or dropping
//! the handle all prevent the action from running.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Handle to an action scheduled to run after a delay.
pub struct ScheduledTransition {
    cancel: CancellationToken,
    handle: Option<JoinHandle<bool>>,
}

impl ScheduledTransition {
    /// Run `action` after `delay` unless `parent` (or this handle) is cancelled first.
    pub fn spawn<F>(parent: &CancellationToken, delay: Duration, action: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let cancel = parent.child_token();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => false,
                _ = tokio::time::sleep(delay) => {
                    action.await;
                    true
                }
            }
        });
        Self { cancel, handle: Some(handle) }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Wait for the transition to settle. Returns `true` if the action ran.
    pub async fn wait(mut self) -> bool {
        match self.handle.take() {
            Some(handle) => handle.await.unwrap_or(false),
            None => false,
        }
    }

    /// Let the transition run without holding the handle.
    ///
    /// It can still be cancelled through the parent token.
    pub fn detach(mut self) {
        self.handle.take();
    }
}

impl Drop for ScheduledTransition {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.cancel.cancel();
        }
    }
}

#[cfg(test)]
#[path = "schedule_tests.rs"]
mod tests;
