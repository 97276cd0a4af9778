use std::{convert::Infallible, time::Duration};

use axum::extract::ws::Message;
use futures_util::sink;
use spaces::{
    config::LiveConfig,
    db::Store,
    live::LiveUpdates,
    models::{Location, NewMessageInput, NewSpace},
    registry::SessionRegistry,
    spaces::{add_space_subscriber, create_top_level_thread, get_space_subscribers, like_message},
    updates::{SpaceUpdate, SpaceUpdateKind},
};
use tokio::{sync::mpsc, time::timeout};
use tokio_util::sync::CancellationToken;

async fn next_update(rx: &mut mpsc::UnboundedReceiver<Message>) -> SpaceUpdate {
    let frame = timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("no frame in time")
        .expect("sink dropped");
    match frame {
        Message::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
        other => panic!("expected a text frame, got {other:?}"),
    }
}

#[tokio::test]
async fn connected_subscriber_sees_the_feed_move() {
    let store = Store::in_memory().await.unwrap();
    let registry = SessionRegistry::new();
    let live = LiveUpdates::new(store.clone(), registry.clone(), LiveConfig::default(), CancellationToken::new());

    let space = store
        .set_space(
            "ann",
            &NewSpace {
                name: "Courtyard".to_owned(),
                theme_color_hexa_code: "#A1BA6D".to_owned(),
                radius: 68.0,
                location: Location::new(13.420215, 52.555241),
            },
        )
        .await
        .unwrap();
    add_space_subscriber(&store, &registry, space.id, "bob").await.unwrap();

    let (tx, mut frames) = mpsc::unbounded_channel();
    let socket = sink::unfold(tx, |tx, frame: Message| async move {
        let _ = tx.send(frame);
        Ok::<_, Infallible>(tx)
    });
    let cancel = CancellationToken::new();
    let session = tokio::spawn({
        let live = live.clone();
        let cancel = cancel.clone();
        async move { live.run_session(space.id, "bob".into(), socket, cancel).await }
    });

    let hello = next_update(&mut frames).await;
    assert_eq!(hello.kind, SpaceUpdateKind::NewActiveSubscriber { user_id: "bob".into() });
    let active = get_space_subscribers(&store, space.id, true, 0, 10).await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, "bob");

    let thread = create_top_level_thread(&store, &registry, space.id, "ann", NewMessageInput::text("hi all"))
        .await
        .unwrap();
    let posted = next_update(&mut frames).await;
    assert_eq!(posted.user_id, "ann");
    assert_eq!(posted.kind, SpaceUpdateKind::NewTopLevelThread { thread: thread.clone() });

    like_message(&store, &registry, space.id, thread.thread.id, thread.first_message.id, "bob")
        .await
        .unwrap();
    assert!(matches!(
        next_update(&mut frames).await.kind,
        SpaceUpdateKind::MessagePopularityIncrease { .. }
    ));
    assert_eq!(
        next_update(&mut frames).await.kind,
        SpaceUpdateKind::TopLevelThreadPopularityIncrease { thread_id: thread.thread.id }
    );

    cancel.cancel();
    session.await.unwrap().unwrap();
    assert!(get_space_subscribers(&store, space.id, true, 0, 10).await.unwrap().is_empty());
    assert_eq!(registry.session_count(space.id), 0);
}
