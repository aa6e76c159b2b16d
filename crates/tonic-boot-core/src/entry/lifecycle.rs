use crate::{Error, Result};
use core::task::{Context, Poll};
use core::time::Duration;
use futures::future::BoxFuture;
use std::net::SocketAddr;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tower::{Layer, Service};

/// A running listener task owned by a bootstrapped entry.
#[derive(Debug)]
pub(crate) struct ServeHandle {
    pub(crate) local_addr: SocketAddr,
    /// Stops accepting connections and lets in-flight calls finish.
    pub(crate) shutdown: CancellationToken,
    /// Cancels calls still running once the drain deadline has passed.
    pub(crate) force: CancellationToken,
    pub(crate) task: JoinHandle<core::result::Result<(), String>>,
}

impl ServeHandle {
    /// Signals the server to stop accepting connections and waits up to
    /// `deadline` for in-flight calls to finish. When the deadline passes,
    /// every remaining call is cancelled and the task is aborted.
    pub(crate) async fn drain(self, name: &str, deadline: Duration) -> Result<()> {
        let Self {
            shutdown,
            force,
            mut task,
            ..
        } = self;
        shutdown.cancel();

        match timeout(deadline, &mut task).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(reason))) => Err(Error::Interrupt {
                name: name.to_string(),
                reason,
            }),
            Ok(Err(join)) => Err(Error::Interrupt {
                name: name.to_string(),
                reason: join.to_string(),
            }),
            Err(_) => {
                tracing::warn!(entry = name, ?deadline, "Drain deadline exceeded, aborting");
                // Connections run on their own tasks, so aborting the
                // listener alone leaves their calls running.
                force.cancel();
                task.abort();
                Err(Error::Interrupt {
                    name: name.to_string(),
                    reason: format!("drain deadline of {deadline:?} exceeded"),
                })
            }
        }
    }
}

/// Races every call against a force-close token. Once the token fires, the
/// inner future is dropped and `fallback` answers the call instead.
pub(crate) struct ForceCloseLayer<R> {
    token: CancellationToken,
    fallback: fn() -> R,
}

// Manual impls: responses such as axum's are not `Clone`.
impl<R> Clone for ForceCloseLayer<R> {
    fn clone(&self) -> Self {
        Self {
            token: self.token.clone(),
            fallback: self.fallback,
        }
    }
}

impl<R> ForceCloseLayer<R> {
    pub(crate) fn new(token: CancellationToken, fallback: fn() -> R) -> Self {
        Self { token, fallback }
    }
}

impl<S, R> Layer<S> for ForceCloseLayer<R> {
    type Service = ForceClose<S, R>;

    fn layer(&self, inner: S) -> Self::Service {
        ForceClose {
            inner,
            token: self.token.clone(),
            fallback: self.fallback,
        }
    }
}

pub(crate) struct ForceClose<S, R> {
    inner: S,
    token: CancellationToken,
    fallback: fn() -> R,
}

impl<S: Clone, R> Clone for ForceClose<S, R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            token: self.token.clone(),
            fallback: self.fallback,
        }
    }
}

impl<S, Req, R> Service<Req> for ForceClose<S, R>
where
    S: Service<Req, Response = R>,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    R: Send + 'static,
{
    type Response = R;
    type Error = S::Error;
    type Future = BoxFuture<'static, core::result::Result<R, S::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<core::result::Result<(), S::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let token = self.token.clone();
        let fallback = self.fallback;
        let call = self.inner.call(req);

        Box::pin(async move {
            tokio::select! {
                biased;
                () = token.cancelled() => Ok(fallback()),
                res = call => res,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::convert::Infallible;
    use tower::ServiceExt;

    fn handle(
        task: JoinHandle<core::result::Result<(), String>>,
        shutdown: CancellationToken,
        force: CancellationToken,
    ) -> ServeHandle {
        ServeHandle {
            local_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            shutdown,
            force,
            task,
        }
    }

    #[tokio::test]
    async fn drains_cooperative_task() {
        let shutdown = CancellationToken::new();
        let force = CancellationToken::new();
        let token = shutdown.clone();
        let task = tokio::spawn(async move {
            token.cancelled().await;
            Ok(())
        });

        let res = handle(task, shutdown, force.clone())
            .drain("svc", Duration::from_secs(1))
            .await;
        assert!(res.is_ok());
        assert!(!force.is_cancelled());
    }

    #[tokio::test]
    async fn aborts_after_deadline() {
        let task = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        });
        let force = CancellationToken::new();

        let err = handle(task, CancellationToken::new(), force.clone())
            .drain("svc", Duration::from_millis(20))
            .await
            .expect_err("deadline exceeded");
        assert!(matches!(err, Error::Interrupt { name, .. } if name == "svc"));
        assert!(force.is_cancelled());
    }

    #[tokio::test]
    async fn surfaces_server_error() {
        let task = tokio::spawn(async { Err("listener closed".to_string()) });

        let err = handle(task, CancellationToken::new(), CancellationToken::new())
            .drain("svc", Duration::from_secs(1))
            .await
            .expect_err("server error");
        assert!(matches!(err, Error::Interrupt { reason, .. } if reason == "listener closed"));
    }

    #[tokio::test]
    async fn force_close_answers_pending_call_with_fallback() {
        let token = CancellationToken::new();
        let slow = tower::service_fn(|()| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<_, Infallible>("late")
        });
        let service = ForceCloseLayer::new(token.clone(), || "closed").layer(slow);

        let call = tokio::spawn(service.oneshot(()));
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();

        let res = tokio::time::timeout(Duration::from_secs(1), call)
            .await
            .expect("call returns promptly")
            .expect("call task");
        assert_eq!(res, Ok("closed"));
    }

    #[tokio::test]
    async fn force_close_passes_through_until_cancelled() {
        let token = CancellationToken::new();
        let service = ForceCloseLayer::new(token, || "closed")
            .layer(tower::service_fn(|()| async { Ok::<_, Infallible>("done") }));

        assert_eq!(service.oneshot(()).await, Ok("done"));
    }
}
