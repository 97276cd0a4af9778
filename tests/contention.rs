use std::time::Duration;

use futures_util::sink;
use spaces::{
    config::LiveConfig,
    db::Store,
    live::LiveUpdates,
    models::{Location, NewMessageInput, NewSpace},
    registry::SessionRegistry,
    spaces::{
        add_space_subscriber, create_message, create_thread, create_top_level_thread,
        get_space_subscribers, like_message,
    },
};
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// A store on its own database file, with a real connection pool.
async fn file_store() -> Store {
    let path = std::env::temp_dir().join(format!("spaces-{}.db", Uuid::now_v7()));
    Store::connect(&format!("sqlite://{}", path.display()))
        .await
        .unwrap()
}

async fn courtyard(store: &Store) -> Uuid {
    store
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
        .unwrap()
        .id
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn every_concurrent_like_reaches_every_tier() {
    const LIKES: i64 = 24;

    let store = file_store().await;
    let registry = SessionRegistry::new();
    let space_id = courtyard(&store).await;

    let top = create_top_level_thread(&store, &registry, space_id, "ann", NewMessageInput::text("who owns the red bike?"))
        .await
        .unwrap();
    let replies = create_thread(&store, &registry, space_id, top.thread.id, top.first_message.id, "bob")
        .await
        .unwrap();
    let answer = create_message(&store, &registry, space_id, replies.id, "bob", NewMessageInput::text("mine"))
        .await
        .unwrap();

    let likes: Vec<_> = (0..LIKES)
        .map(|i| {
            let store = store.clone();
            let registry = registry.clone();
            let user_id = format!("neighbour-{i}");
            tokio::spawn(async move {
                like_message(&store, &registry, space_id, replies.id, answer.id, &user_id).await
            })
        })
        .collect();
    for like in likes {
        like.await.unwrap().unwrap();
    }

    assert_eq!(store.get_message(answer.id).await.unwrap().likes, LIKES);
    assert_eq!(store.get_thread(replies.id).await.unwrap().likes, LIKES);
    assert_eq!(store.get_top_level_thread(top.thread.id).await.unwrap().thread.likes, LIKES);
    assert_eq!(store.get_message(top.first_message.id).await.unwrap().likes, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_replies_are_all_counted() {
    const REPLIES: i64 = 16;

    let store = file_store().await;
    let registry = SessionRegistry::new();
    let space_id = courtyard(&store).await;

    let top = create_top_level_thread(&store, &registry, space_id, "ann", NewMessageInput::text("bins go out on tuesday"))
        .await
        .unwrap();

    let posts: Vec<_> = (0..REPLIES)
        .map(|i| {
            let store = store.clone();
            let registry = registry.clone();
            let thread_id = top.thread.id;
            tokio::spawn(async move {
                create_message(&store, &registry, space_id, thread_id, "bob", NewMessageInput::text(format!("noted {i}"))).await
            })
        })
        .collect();
    for post in posts {
        post.await.unwrap().unwrap();
    }

    let thread = store.get_top_level_thread(top.thread.id).await.unwrap().thread;
    assert_eq!(thread.messages_count, REPLIES + 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn sessions_of_one_user_leave_them_inactive() {
    const SESSIONS: usize = 8;

    let store = file_store().await;
    let registry = SessionRegistry::new();
    let live = LiveUpdates::new(store.clone(), registry.clone(), LiveConfig::default(), CancellationToken::new());
    let space_id = courtyard(&store).await;
    add_space_subscriber(&store, &registry, space_id, "bob").await.unwrap();

    let cancel = CancellationToken::new();
    let sessions: Vec<_> = (0..SESSIONS)
        .map(|_| {
            let live = live.clone();
            let cancel = cancel.child_token();
            tokio::spawn(async move { live.run_session(space_id, "bob".into(), sink::drain(), cancel).await })
        })
        .collect();

    let active = timeout(Duration::from_secs(5), async {
        loop {
            let active = get_space_subscribers(&store, space_id, true, 0, 10).await.unwrap();
            if registry.session_count(space_id) == SESSIONS && !active.is_empty() {
                break active;
            }
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("sessions never came up");
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, "bob");

    cancel.cancel();
    for session in sessions {
        session.await.unwrap().unwrap();
    }

    assert!(get_space_subscribers(&store, space_id, true, 0, 10).await.unwrap().is_empty());
    assert_eq!(registry.session_count(space_id), 0);
}
