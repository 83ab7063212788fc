mod common;

use common::{GatedRepo, hub_session, offline_session, record_events};
use quire_editor_crdt::{
    ConnectionState, DocHandle, DocumentId, DocumentSession, LoroHandle, LoroRepo, MemoryStore,
    Repo, SessionError, SessionEvent, Settings, SyncHub,
};

#[tokio::test]
async fn test_create_then_open_leaves_only_second_document() {
    let hub = SyncHub::new();
    let other = hub_session("other", &hub).await;
    let other_id = other.create_document().await.unwrap();
    other.apply_local_edit(0, 0, "theirs").unwrap();

    let session = hub_session("me", &hub).await;
    let first = session.create_document().await.unwrap();
    session.apply_local_edit(0, 0, "mine").unwrap();
    let (seen, _sub) = record_events(&session);

    session.open_document(&other_id).await.unwrap();
    assert_eq!(session.current_document(), Some(other_id.clone()));
    assert_eq!(session.content(), "theirs");
    assert_eq!(
        *seen.borrow(),
        vec!["closed".to_string(), format!("ready({other_id},new=false)")]
    );

    // Edits to the first document no longer reach this session.
    let first_handle = session.repo().find(&first).await.unwrap();
    first_handle
        .change(|d| d.splice("content", 0, 0, "late "))
        .unwrap();
    assert_eq!(seen.borrow().len(), 2);
}

#[tokio::test]
async fn test_newer_open_supersedes_older() {
    let source = LoroRepo::local("source");
    let gated = GatedRepo::new(source.clone());
    let session = DocumentSession::new(gated.clone(), Settings::default());
    session.connect().await;

    let slow = new_doc(&source, "slow").await;
    let fast = new_doc(&source, "fast").await;
    let gate = gated.gate(&slow);
    let (seen, _sub) = record_events(&session);

    let (slow_result, fast_result) = tokio::join!(session.open_document(&slow), async {
        let result = session.open_document(&fast).await;
        gate.notify_one();
        result
    });

    assert!(matches!(slow_result, Err(SessionError::Superseded)));
    fast_result.unwrap();
    assert_eq!(session.current_document(), Some(fast.clone()));
    assert_eq!(session.content(), "fast");

    // Only the newer request announced a document; nothing from the older one.
    let ready: Vec<_> = seen
        .borrow()
        .iter()
        .filter(|e| e.starts_with("ready"))
        .cloned()
        .collect();
    assert_eq!(ready, vec![format!("ready({fast},new=false)")]);
    assert!(!seen.borrow().iter().any(|e| e.starts_with("error")));

    // The superseded document's changes are not forwarded.
    let count = seen.borrow().len();
    source
        .find(&slow)
        .await
        .unwrap()
        .change(|d| d.splice("content", 0, 0, "x"))
        .unwrap();
    assert_eq!(seen.borrow().len(), count);
}

#[tokio::test]
async fn test_open_times_out_when_never_ready() {
    let source = LoroRepo::local("source");
    let gated = GatedRepo::new(source.clone());
    let settings = Settings::default();
    settings.set_open_timeout_ms(50);
    let session = DocumentSession::new(gated.clone(), settings);
    session.connect().await;

    let id = new_doc(&source, "never").await;
    gated.never_ready(&id);
    let (seen, _sub) = record_events(&session);

    let err = session.open_document(&id).await.unwrap_err();
    assert!(
        matches!(&err, SessionError::Timeout { id: got, timeout_ms: 50 } if *got == id),
        "unexpected error: {err:?}"
    );
    assert!(err.is_retryable());
    assert_eq!(*seen.borrow(), vec!["error(open_document)"]);
    assert_eq!(session.current_document(), None);
}

#[tokio::test]
async fn test_open_malformed_document() {
    let store = MemoryStore::new();
    let id = {
        let repo = LoroRepo::new("writer", None, store.clone());
        let handle: LoroHandle = repo.create().await.unwrap();
        // Content without the metadata record.
        handle
            .change(|d| d.splice("content", 0, 0, "no schema"))
            .unwrap();
        handle.id().clone()
    };

    let session = DocumentSession::new(LoroRepo::new("reader", None, store), Settings::default());
    session.connect().await;
    let (seen, _sub) = record_events(&session);

    let err = session.open_document(&id).await.unwrap_err();
    assert!(matches!(err, SessionError::MalformedDocument { .. }));
    assert_eq!(*seen.borrow(), vec!["error(open_document)"]);
    assert_eq!(session.current_document(), None);
}

#[tokio::test]
async fn test_open_unknown_document() {
    let hub = SyncHub::new();
    let session = hub_session("me", &hub).await;
    let err = session
        .open_document(&DocumentId::from("nope"))
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::DocumentNotFound(_)));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_open_requires_connect() {
    let session = DocumentSession::new(LoroRepo::local("me"), Settings::default());
    let (seen, _sub) = record_events(&session);
    assert!(matches!(
        session.open_document(&DocumentId::from("x")).await,
        Err(SessionError::IllegalState(_))
    ));
    assert!(seen.borrow().is_empty());
}

#[tokio::test]
async fn test_concurrent_edits_converge() {
    let hub = SyncHub::new();
    let a = hub_session("a", &hub).await;
    let b = hub_session("b", &hub).await;

    let id = a.create_document().await.unwrap();
    b.open_document(&id).await.unwrap();
    hub.flush();

    a.apply_local_edit(0, 0, "hello").unwrap();
    b.apply_local_edit(0, 0, "world").unwrap();
    hub.flush();

    let merged = a.content();
    assert_eq!(merged, b.content());
    assert_eq!(merged.len(), 10);
    assert!(merged.contains("hello"));
    assert!(merged.contains("world"));
}

#[tokio::test]
async fn test_offline_edits_reach_peer_after_reconnect() {
    let hub = SyncHub::new();
    let peer = hub_session("peer", &hub).await;
    let id = peer.create_document().await.unwrap();

    let session = hub_session("laptop", &hub).await;
    session.open_document(&id).await.unwrap();

    // Network drops: the link goes down, editing continues locally.
    hub.set_reachable("laptop", false);
    assert!(!session.repo().is_connected());
    session.apply_local_edit(0, 0, "draft").unwrap();
    hub.flush();
    assert_eq!(peer.content(), "");

    // Still unreachable: connect reports offline without failing.
    let (seen, _sub) = record_events(&session);
    assert_eq!(session.connect().await, ConnectionState::Offline);
    assert_eq!(*seen.borrow(), vec!["error(connect)"]);
    assert_eq!(session.content(), "draft");

    hub.set_reachable("laptop", true);
    assert_eq!(session.connect().await, ConnectionState::Connected);
    hub.flush();
    assert_eq!(peer.content(), "draft");
}

#[tokio::test]
async fn test_remote_change_events_carry_patches() {
    let hub = SyncHub::new();
    let a = hub_session("a", &hub).await;
    let b = hub_session("b", &hub).await;
    let id = a.create_document().await.unwrap();
    a.apply_local_edit(0, 0, "hello world").unwrap();
    b.open_document(&id).await.unwrap();
    hub.flush();

    let changes = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
    let c = changes.clone();
    let _sub = b.on(move |event| {
        if let SessionEvent::RemoteChange(change) = event {
            c.borrow_mut().push(change.clone());
        }
    });

    a.apply_local_edit(6, 5, "there").unwrap();
    hub.flush();

    let changes = changes.borrow();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].content.as_deref(), Some("hello there"));
    assert!(!changes[0].patches.is_empty());
}

#[tokio::test]
async fn test_offline_session_creates_and_edits() {
    let session = offline_session("solo").await;
    assert_eq!(session.connection_state(), ConnectionState::Offline);
    session.create_document().await.unwrap();
    session.apply_local_edit(0, 0, "local first").unwrap();
    assert_eq!(session.content(), "local first");
    assert_eq!(session.stats().words, 2);
}

/// Create an initialized document directly on `repo` holding `text`.
async fn new_doc(repo: &LoroRepo, text: &str) -> DocumentId {
    let handle = repo.create().await.unwrap();
    handle
        .change(|d| {
            d.put_metadata(&quire_editor_crdt::DocumentMetadata::now())?;
            d.splice("content", 0, 0, text)
        })
        .unwrap();
    handle.id().clone()
}

#[tokio::test]
async fn test_edits_match_reference_splice() {
    let session = offline_session("me").await;
    session.create_document().await.unwrap();

    let ops = [
        quire_editor_core::TextOperation::insert(0, "héllo wörld"),
        quire_editor_core::TextOperation::replace(6, 5, "🌍 there"),
        quire_editor_core::TextOperation::delete(0, 1),
        quire_editor_core::TextOperation::insert(13, "!"),
    ];
    let mut expected = String::new();
    for op in &ops {
        expected = op.apply_to(&expected).unwrap();
        session.apply_operation(op).unwrap();
        assert_eq!(session.content(), expected);
    }
}

#[tokio::test]
async fn test_offline_edits_are_persisted_locally() {
    let hub = SyncHub::new();
    let store = MemoryStore::new();
    hub.set_reachable("laptop", false);

    let session = DocumentSession::new(
        LoroRepo::new("laptop", Some(hub.clone()), store.clone()),
        Settings::default(),
    );
    assert_eq!(session.connect().await, ConnectionState::Offline);
    let id = session.create_document().await.unwrap();
    session.apply_local_edit(0, 0, "draft").unwrap();

    // A fresh repo over the same storage, as after a reload.
    let reloaded = DocumentSession::new(
        LoroRepo::new("laptop", Some(hub), store),
        Settings::default(),
    );
    reloaded.connect().await;
    reloaded.open_document(&id).await.unwrap();
    assert_eq!(reloaded.content(), "draft");
}
