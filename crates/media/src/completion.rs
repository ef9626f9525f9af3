use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use futures::{FutureExt, channel::oneshot};

/// Creates a linked completer/completion pair.
///
/// The completer is consumed by `complete`, so a bridged callback can only
/// ever report its outcome once.
pub fn completion<T>() -> (Completer<T>, Completion<T>) {
    let (tx, rx) = oneshot::channel();
    (Completer(tx), Completion(rx))
}

pub struct Completer<T>(oneshot::Sender<T>);

impl<T> Completer<T> {
    pub fn complete(self, value: T) {
        let _ = self.0.send(value);
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Completer dropped before completing")]
pub struct Abandoned;

pub struct Completion<T>(oneshot::Receiver<T>);

impl<T> Completion<T> {
    pub fn ready(value: T) -> Self {
        let (completer, completion) = completion();
        completer.complete(value);
        completion
    }
}

impl<T> Future for Completion<T> {
    type Output = Result<T, Abandoned>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.0.poll_unpin(cx).map(|res| res.map_err(|_| Abandoned))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn completes_once_from_another_thread() {
        let (completer, completion) = completion::<u32>();

        std::thread::spawn(move || completer.complete(7));

        assert_eq!(completion.await.unwrap(), 7);
    }

    #[tokio::test]
    async fn dropped_completer_is_reported() {
        let (completer, completion) = completion::<()>();
        drop(completer);

        assert!(completion.await.is_err());
    }

    #[tokio::test]
    async fn ready_resolves_immediately() {
        assert_eq!(Completion::ready("done").await.unwrap(), "done");
    }
}
