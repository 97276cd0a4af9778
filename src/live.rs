//! Per-connection pump from the session registry onto a WebSocket.
//!
//! A connection registers a session, records itself as an active session of
//! its user in the store, and then only writes: inbound frames are read and
//! dropped. When the peer goes away, the server shuts down, a write fails or
//! the session is evicted, the connection drains: it leaves the registry,
//! drops its session record and, if it was the user's last live session in
//! the space, takes the user out of the active-subscriber set.

use std::{fmt::Display, pin::pin, sync::Arc};

use axum::extract::ws::{Message, WebSocket};
use futures_util::{Sink, SinkExt, StreamExt};
use tokio::{sync::mpsc, time::timeout};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    Error, Result,
    config::LiveConfig,
    db::{Store, WriteOp, keys},
    models::{UserId, now},
    registry::{CloseCallback, SessionHandle, SessionRegistry},
    updates::{SpaceUpdate, SpaceUpdateKind},
};

#[derive(Clone)]
pub struct LiveUpdates {
    store: Store,
    registry: SessionRegistry,
    config: LiveConfig,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl LiveUpdates {
    pub fn new(store: Store, registry: SessionRegistry, config: LiveConfig, shutdown: CancellationToken) -> Self {
        LiveUpdates {
            store,
            registry,
            config,
            shutdown,
            tracker: TaskTracker::new(),
        }
    }

    /// Every connection served so far; wait on it after shutdown to let drains finish.
    pub fn tracker(&self) -> &TaskTracker {
        &self.tracker
    }

    /// Serves an upgraded socket until it closes.
    pub async fn serve(self, socket: WebSocket, space_id: Uuid, user_id: UserId) {
        let cancel = self.shutdown.child_token();
        let (sink, mut stream) = socket.split();

        let reader = tokio::spawn({
            let cancel = cancel.clone();
            async move {
                while let Some(Ok(_)) = stream.next().await {}
                cancel.cancel();
            }
        });

        let tracker = self.tracker.clone();
        let result = tracker
            .track_future(self.run_session(space_id, user_id.clone(), sink, cancel))
            .await;
        reader.abort();

        if let Err(err) = result {
            warn!(%space_id, %user_id, error = %err, "live session ended with error");
        }
    }

    /// Runs one session over `sink` until `cancel` fires or the session fails.
    ///
    /// Cleanup always runs; its error is returned only when the session itself
    /// ended cleanly.
    pub async fn run_session<S>(
        &self,
        space_id: Uuid,
        user_id: UserId,
        sink: S,
        cancel: CancellationToken,
    ) -> Result<()>
    where
        S: Sink<Message>,
        S::Error: Display,
    {
        let evicted = CancellationToken::new();
        let close: CloseCallback = {
            let evicted = evicted.clone();
            Arc::new(move || evicted.cancel())
        };

        let mut handle = self
            .registry
            .add_session(space_id, user_id, self.config.queue_capacity, close);
        info!(%space_id, session_id = %handle.session_id, user_id = %handle.user_id, "live session opened");

        let mut sink = pin!(sink);
        let result = match self.activate(&handle).await {
            Ok(()) => {
                self.drain(&mut handle.updates, sink.as_mut(), &cancel, &evicted)
                    .await
            }
            Err(err) => Err(err),
        };
        if result.is_ok() {
            // best effort, the peer may already be gone
            let _ = timeout(self.config.write_timeout, sink.close()).await;
        }

        let released = self.release(&handle).await;
        if let Err(err) = &released {
            warn!(%space_id, session_id = %handle.session_id, error = %err, "active subscriber cleanup failed");
        }
        info!(%space_id, session_id = %handle.session_id, user_id = %handle.user_id, "live session closed");

        result.and(released)
    }

    async fn activate(&self, handle: &SessionHandle) -> Result<()> {
        let SessionHandle {
            session_id,
            space_id,
            ref user_id,
            ..
        } = *handle;
        let score = now().unix_timestamp() as f64;

        self.store
            .add_ranked(&keys::active_sessions(space_id, user_id), &session_id.to_string(), score)
            .await?;

        let active_key = keys::space_active_subscribers(space_id);
        let added = self
            .store
            .compare_and_act::<Error, _, _>(
                &[active_key.clone()],
                self.config.max_cleanup_attempts,
                || {
                    let store = &self.store;
                    let active_key = &active_key;
                    async move {
                        if store.ranked_score(active_key, user_id).await?.is_some() {
                            return Ok(None);
                        }
                        Ok(Some(vec![WriteOp::AddRanked {
                            key: active_key.clone(),
                            member: user_id.clone(),
                            score,
                        }]))
                    }
                },
            )
            .await?;

        if added {
            debug!(%space_id, %user_id, "user became active");
            self.registry.publish_to_space(
                space_id,
                SpaceUpdate::new(
                    user_id.clone(),
                    SpaceUpdateKind::NewActiveSubscriber {
                        user_id: user_id.clone(),
                    },
                ),
            );
        }

        Ok(())
    }

    async fn drain<S>(
        &self,
        updates: &mut mpsc::Receiver<Arc<SpaceUpdate>>,
        mut sink: std::pin::Pin<&mut S>,
        cancel: &CancellationToken,
        evicted: &CancellationToken,
    ) -> Result<()>
    where
        S: Sink<Message>,
        S::Error: Display,
    {
        loop {
            let update = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                _ = evicted.cancelled() => return Err(Error::SlowConsumer),
                update = updates.recv() => match update {
                    Some(update) => update,
                    None => return Ok(()),
                },
            };

            let frame = Message::Text(serde_json::to_string(&*update)?.into());
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                _ = evicted.cancelled() => return Err(Error::SlowConsumer),
                sent = timeout(self.config.write_timeout, sink.send(frame)) => match sent {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => return Err(Error::Connection(err.to_string())),
                    Err(_) => return Err(Error::WriteTimeout),
                },
            }
        }
    }

    /// Leaves the registry and, when no other session of the user remains in
    /// the space, removes the user from the active subscribers.
    async fn release(&self, handle: &SessionHandle) -> Result<()> {
        let SessionHandle {
            session_id,
            space_id,
            ref user_id,
            ..
        } = *handle;

        self.registry.delete_session(space_id, session_id);

        let sessions_key = keys::active_sessions(space_id, user_id);
        self.store
            .remove_ranked(&sessions_key, &session_id.to_string())
            .await?;

        let active_key = keys::space_active_subscribers(space_id);
        let removed = self
            .store
            .compare_and_act::<Error, _, _>(
                &[sessions_key.clone()],
                self.config.max_cleanup_attempts,
                || {
                    let store = &self.store;
                    let sessions_key = &sessions_key;
                    let active_key = &active_key;
                    async move {
                        if store.ranked_len(sessions_key).await? > 0 {
                            return Ok(None);
                        }
                        if store.ranked_score(active_key, user_id).await?.is_none() {
                            return Ok(None);
                        }
                        Ok(Some(vec![WriteOp::RemoveRanked {
                            key: active_key.clone(),
                            member: user_id.clone(),
                        }]))
                    }
                },
            )
            .await?;

        if removed {
            debug!(%space_id, %user_id, "user no longer active");
            self.registry.publish_to_space(
                space_id,
                SpaceUpdate::new(
                    user_id.clone(),
                    SpaceUpdateKind::RemoveActiveSubscriber {
                        user_id: user_id.clone(),
                    },
                ),
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::{convert::Infallible, future::Future, time::Duration};

    use futures_util::sink;
    use tokio::task::JoinHandle;

    use super::*;

    struct Harness {
        store: Store,
        registry: SessionRegistry,
        live: LiveUpdates,
        space_id: Uuid,
    }

    impl Harness {
        async fn new(config: LiveConfig) -> Harness {
            let store = Store::in_memory().await.unwrap();
            let registry = SessionRegistry::new();
            let live = LiveUpdates::new(store.clone(), registry.clone(), config, CancellationToken::new());
            Harness {
                store,
                registry,
                live,
                space_id: Uuid::now_v7(),
            }
        }

        fn spawn<S>(&self, user_id: &str, sink: S) -> (CancellationToken, JoinHandle<Result<()>>)
        where
            S: Sink<Message> + Send + 'static,
            S::Error: Display + Send,
        {
            let cancel = CancellationToken::new();
            let task = tokio::spawn({
                let live = self.live.clone();
                let space_id = self.space_id;
                let user_id = user_id.to_owned();
                let cancel = cancel.clone();
                async move { live.run_session(space_id, user_id, sink, cancel).await }
            });
            (cancel, task)
        }

        async fn sessions_of(&self, user_id: &str) -> i64 {
            self.store
                .ranked_len(&keys::active_sessions(self.space_id, user_id))
                .await
                .unwrap()
        }

        async fn is_active(&self, user_id: &str) -> bool {
            self.store
                .ranked_score(&keys::space_active_subscribers(self.space_id), user_id)
                .await
                .unwrap()
                .is_some()
        }
    }

    fn channel_sink() -> (
        impl Sink<Message, Error = Infallible> + Send + 'static,
        mpsc::UnboundedReceiver<Message>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = sink::unfold(tx, |tx, frame: Message| async move {
            let _ = tx.send(frame);
            Ok::<_, Infallible>(tx)
        });
        (sink, rx)
    }

    fn stuck_sink() -> impl Sink<Message, Error = Infallible> + Send + 'static {
        sink::unfold((), |(), _frame: Message| std::future::pending::<std::result::Result<(), Infallible>>())
    }

    async fn eventually<F, Fut>(mut check: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        timeout(Duration::from_secs(2), async {
            while !check().await {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition never held");
    }

    async fn next_update(rx: &mut mpsc::UnboundedReceiver<Message>) -> SpaceUpdate {
        let frame = timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("no frame in time")
            .expect("sink dropped");
        match frame {
            Message::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[tokio::test]
    async fn user_stays_active_until_last_session_closes() {
        let h = Harness::new(LiveConfig::default()).await;

        let (observer_sink, mut observed) = channel_sink();
        let (observer_cancel, observer) = h.spawn("watcher", observer_sink);
        eventually(|| h.is_active("watcher")).await;

        let (sink_a, _rx_a) = channel_sink();
        let (cancel_a, task_a) = h.spawn("ann", sink_a);
        eventually(|| async { h.sessions_of("ann").await == 1 }).await;

        let (sink_b, _rx_b) = channel_sink();
        let (cancel_b, task_b) = h.spawn("ann", sink_b);
        eventually(|| async { h.sessions_of("ann").await == 2 }).await;
        assert!(h.is_active("ann").await);

        cancel_a.cancel();
        task_a.await.unwrap().unwrap();
        assert_eq!(h.sessions_of("ann").await, 1);
        assert!(h.is_active("ann").await);

        cancel_b.cancel();
        task_b.await.unwrap().unwrap();
        assert_eq!(h.sessions_of("ann").await, 0);
        assert!(!h.is_active("ann").await);

        let kinds: Vec<_> = [
            next_update(&mut observed).await,
            next_update(&mut observed).await,
            next_update(&mut observed).await,
        ]
        .into_iter()
        .map(|update| update.kind)
        .collect();
        assert_eq!(
            kinds,
            [
                SpaceUpdateKind::NewActiveSubscriber { user_id: "watcher".into() },
                SpaceUpdateKind::NewActiveSubscriber { user_id: "ann".into() },
                SpaceUpdateKind::RemoveActiveSubscriber { user_id: "ann".into() },
            ]
        );

        observer_cancel.cancel();
        observer.await.unwrap().unwrap();
        assert_eq!(h.registry.session_count(h.space_id), 0);
    }

    #[tokio::test]
    async fn forwards_published_updates_in_order() {
        let h = Harness::new(LiveConfig::default()).await;
        let (sink, mut rx) = channel_sink();
        let (cancel, task) = h.spawn("ann", sink);

        // own activation comes first
        assert!(matches!(
            next_update(&mut rx).await.kind,
            SpaceUpdateKind::NewActiveSubscriber { .. }
        ));

        for user in ["bob", "cyd"] {
            h.registry.publish_to_space(
                h.space_id,
                SpaceUpdate::new(user, SpaceUpdateKind::NewSubscriber { user_id: user.into() }),
            );
        }
        assert_eq!(next_update(&mut rx).await.user_id, "bob");
        assert_eq!(next_update(&mut rx).await.user_id, "cyd");

        cancel.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn stalled_write_times_out_and_cleans_up() {
        let h = Harness::new(LiveConfig {
            write_timeout: Duration::from_millis(50),
            ..LiveConfig::default()
        })
        .await;

        let (_cancel, task) = h.spawn("ann", stuck_sink());
        let result = timeout(Duration::from_secs(2), task).await.unwrap().unwrap();

        assert!(matches!(result, Err(Error::WriteTimeout)));
        assert_eq!(h.sessions_of("ann").await, 0);
        assert!(!h.is_active("ann").await);
        assert_eq!(h.registry.session_count(h.space_id), 0);
    }

    #[tokio::test]
    async fn slow_consumer_is_evicted() {
        let h = Harness::new(LiveConfig {
            queue_capacity: 1,
            write_timeout: Duration::from_secs(30),
            ..LiveConfig::default()
        })
        .await;

        let (_cancel, task) = h.spawn("ann", stuck_sink());
        eventually(|| h.is_active("ann")).await;

        for _ in 0..3 {
            h.registry.publish_to_space(
                h.space_id,
                SpaceUpdate::new("bob", SpaceUpdateKind::NewSubscriber { user_id: "bob".into() }),
            );
        }

        let result = timeout(Duration::from_secs(2), task).await.unwrap().unwrap();
        assert!(matches!(result, Err(Error::SlowConsumer)));
        assert!(!h.is_active("ann").await);
    }

    #[tokio::test]
    async fn shutdown_cancels_sessions() {
        let store = Store::in_memory().await.unwrap();
        let registry = SessionRegistry::new();
        let shutdown = CancellationToken::new();
        let live = LiveUpdates::new(store.clone(), registry.clone(), LiveConfig::default(), shutdown.clone());
        let space_id = Uuid::now_v7();

        let (sink, _rx) = channel_sink();
        let cancel = shutdown.child_token();
        let tracked = live
            .tracker()
            .spawn({
                let live = live.clone();
                async move { live.run_session(space_id, "ann".into(), sink, cancel).await }
            });
        eventually(|| async { registry.session_count(space_id) == 1 }).await;

        shutdown.cancel();
        live.tracker().close();
        timeout(Duration::from_secs(2), live.tracker().wait()).await.unwrap();
        tracked.await.unwrap().unwrap();
        assert_eq!(registry.session_count(space_id), 0);
    }
}
