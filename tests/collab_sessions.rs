//! Integration tests for collaborative document sessions.
//!
//! These drive [`SessionManager`] directly through [`Connection`] handles,
//! the same way the websocket route does, and play the client side with a
//! plain yrs document.

use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use yrs::updates::decoder::Decode;
use yrs::{
    Doc, GetString, ReadTxn, Transact, Update, XmlElementPrelim, XmlFragment, XmlFragmentRef,
    XmlTextPrelim,
};

use quire::collab::hydrate::HydrationOutcome;
use quire::collab::{
    Connection, DocumentAccess, Outbound, ParticipantView, PresenceState, SessionError,
    SessionManager, SessionState,
};

const WAIT: Duration = Duration::from_secs(5);
const QUIET: Duration = Duration::from_millis(200);

fn manager(unload_after: Duration) -> SessionManager {
    SessionManager::new(DocumentAccess::unrestricted(), unload_after)
}

fn write_doc(dir: &TempDir, relative: &str, contents: &str) -> PathBuf {
    let path = dir.path().join(relative);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, contents).unwrap();
    path
}

fn name_of(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

fn user(id: &str, name: &str) -> Option<PresenceState> {
    Some(PresenceState {
        id: Some(id.to_string()),
        name: Some(name.to_string()),
        color: None,
    })
}

async fn next(conn: &mut Connection) -> Outbound {
    tokio::time::timeout(WAIT, conn.recv())
        .await
        .expect("timed out waiting for a session message")
        .expect("session closed")
}

/// The full-state message every connection receives first
async fn initial_state(conn: &mut Connection) -> Vec<u8> {
    match next(conn).await {
        Outbound::Sync(state) => state,
        other => panic!("expected initial sync, got {other:?}"),
    }
}

/// Wait for a participant list of exactly `count` entries
async fn presence_of(conn: &mut Connection, count: usize) -> Vec<ParticipantView> {
    loop {
        if let Outbound::Presence(participants) = next(conn).await {
            if participants.len() == count {
                return participants;
            }
        }
    }
}

/// Everything that arrives within a short quiet period
async fn drain(conn: &mut Connection) -> Vec<Outbound> {
    let mut received = Vec::new();
    while let Ok(Some(message)) = tokio::time::timeout(QUIET, conn.recv()).await {
        received.push(message);
    }
    received
}

struct Client {
    doc: Doc,
    fragment: XmlFragmentRef,
}

impl Client {
    fn from_state(state: &[u8]) -> Self {
        let doc = Doc::new();
        let fragment = doc.get_or_insert_xml_fragment("default");
        doc.transact_mut()
            .apply_update(Update::decode_v1(state).unwrap())
            .unwrap();
        Self { doc, fragment }
    }

    fn xml(&self) -> String {
        self.fragment.get_string(&self.doc.transact())
    }

    /// Append a paragraph and return the resulting update
    fn append_paragraph(&self, text: &str) -> Vec<u8> {
        let before = self.doc.transact().state_vector();
        {
            let mut txn = self.doc.transact_mut();
            let paragraph = self
                .fragment
                .push_back(&mut txn, XmlElementPrelim::empty("paragraph"));
            paragraph.push_back(&mut txn, XmlTextPrelim::new(text));
        }
        self.doc.transact().encode_state_as_update_v1(&before)
    }
}

async fn wait_for_unload(sessions: &SessionManager, document: &str) {
    tokio::time::timeout(WAIT, async {
        while sessions.session_names().iter().any(|n| n == document) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("session was not unloaded");
}

#[tokio::test]
async fn test_hydrates_once_per_live_session() {
    let dir = TempDir::new().unwrap();
    let path = write_doc(&dir, "docs/doc.md", "# Doc\nBody");
    let document = name_of(&path);
    let sessions = manager(Duration::from_secs(60));

    let mut first = sessions.connect(&document, None).unwrap();
    let client = Client::from_state(&initial_state(&mut first).await);
    assert!(client.xml().contains("Doc"));
    assert!(client.xml().contains("Body"));

    first.send_update(client.append_paragraph("Edited together"));
    // A rewrite on disk must not be imported into the live session
    std::fs::write(&path, "# Other\nRewritten on disk").unwrap();
    first.disconnect();

    let mut second = sessions.connect(&document, None).unwrap();
    let replica = Client::from_state(&initial_state(&mut second).await);
    let xml = replica.xml();
    assert!(xml.contains("Edited together"), "{xml}");
    assert!(!xml.contains("Rewritten on disk"), "{xml}");
    assert_eq!(xml.matches("<heading").count(), 1, "{xml}");

    let snapshot = sessions.inspect(&document).await.unwrap();
    assert_eq!(snapshot.state, SessionState::Live);
    assert_eq!(snapshot.hydration, Some(HydrationOutcome::Hydrated { blocks: 2 }));
    assert_eq!(snapshot.connections, 1);
    assert_eq!(snapshot.content, xml);
}

#[tokio::test]
async fn test_concurrent_connections_share_one_session() {
    let dir = TempDir::new().unwrap();
    let path = write_doc(&dir, "docs/shared.md", "Hello");
    let document = name_of(&path);
    let sessions = manager(Duration::from_secs(60));

    let mut a = sessions.connect(&document, None).unwrap();
    let mut b = sessions.connect(&document, None).unwrap();
    let state_a = initial_state(&mut a).await;
    let state_b = initial_state(&mut b).await;
    assert_eq!(
        Client::from_state(&state_a).xml(),
        Client::from_state(&state_b).xml()
    );
    assert_eq!(sessions.session_names(), vec![document.clone()]);
    assert_eq!(sessions.sessions()[0].connections, 2);
}

#[tokio::test]
async fn test_updates_reach_other_connections_only() {
    let dir = TempDir::new().unwrap();
    let document = name_of(&write_doc(&dir, "docs/live.md", "Start"));
    let sessions = manager(Duration::from_secs(60));

    let mut a = sessions.connect(&document, None).unwrap();
    let mut b = sessions.connect(&document, None).unwrap();
    let client_a = Client::from_state(&initial_state(&mut a).await);
    let client_b = Client::from_state(&initial_state(&mut b).await);
    drain(&mut a).await;
    drain(&mut b).await;

    let update = client_a.append_paragraph("From A");
    a.send_update(update.clone());

    let relayed = loop {
        if let Outbound::Update(bytes) = next(&mut b).await {
            break bytes;
        }
    };
    assert_eq!(relayed, update);
    client_b
        .doc
        .transact_mut()
        .apply_update(Update::decode_v1(&relayed).unwrap())
        .unwrap();
    assert!(client_b.xml().contains("From A"));

    assert!(drain(&mut a)
        .await
        .iter()
        .all(|m| !matches!(m, Outbound::Update(_))));
}

#[tokio::test]
async fn test_malformed_update_is_reported_to_sender() {
    let dir = TempDir::new().unwrap();
    let document = name_of(&write_doc(&dir, "docs/bad.md", "Text"));
    let sessions = manager(Duration::from_secs(60));

    let mut a = sessions.connect(&document, None).unwrap();
    initial_state(&mut a).await;
    a.send_update(vec![0xff, 0xff, 0xff]);

    let reported = loop {
        if let Outbound::Error(message) = next(&mut a).await {
            break message;
        }
    };
    assert!(!reported.is_empty());
}

#[tokio::test]
async fn test_session_rehydrates_after_unload() {
    let dir = TempDir::new().unwrap();
    let path = write_doc(&dir, "docs/cold.md", "First version");
    let document = name_of(&path);
    let sessions = manager(Duration::ZERO);

    let mut first = sessions.connect(&document, None).unwrap();
    let client = Client::from_state(&initial_state(&mut first).await);
    assert!(client.xml().contains("First version"));
    first.disconnect();

    wait_for_unload(&sessions, &document).await;
    assert!(sessions.inspect(&document).await.is_none());

    std::fs::write(&path, "Second version").unwrap();
    let mut second = sessions.connect(&document, None).unwrap();
    let client = Client::from_state(&initial_state(&mut second).await);
    assert!(client.xml().contains("Second version"));
    assert!(!client.xml().contains("First version"));
}

#[tokio::test]
async fn test_presence_counts_follow_connections() {
    let dir = TempDir::new().unwrap();
    let document = name_of(&write_doc(&dir, "docs/team.md", "Team notes"));
    let sessions = manager(Duration::from_secs(60));

    let mut alice = sessions.connect(&document, user("u-alice", "Alice")).unwrap();
    let mut bob = sessions.connect(&document, user("u-bob", "Bob")).unwrap();
    let mut carol = sessions.connect(&document, user("u-carol", "Carol")).unwrap();
    // Connections without presence are not participants
    let mut lurker = sessions.connect(&document, None).unwrap();

    for conn in [&mut alice, &mut bob, &mut carol, &mut lurker] {
        let participants = presence_of(conn, 3).await;
        assert_eq!(participants.len(), 3);
    }

    carol.disconnect();
    for conn in [&mut alice, &mut bob, &mut lurker] {
        let participants = presence_of(conn, 2).await;
        let names: Vec<&str> = participants.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["Alice", "Bob"]);
    }
}

#[tokio::test]
async fn test_presence_marks_self_and_applies_defaults() {
    let dir = TempDir::new().unwrap();
    let document = name_of(&write_doc(&dir, "docs/tabs.md", "Tabs"));
    let sessions = manager(Duration::from_secs(60));

    let mut tab_one = sessions.connect(&document, user("u-alice", "Alice")).unwrap();
    let mut tab_two = sessions.connect(&document, user("u-alice", "Alice")).unwrap();
    let mut anonymous = sessions
        .connect(&document, Some(PresenceState::default()))
        .unwrap();

    let view = presence_of(&mut tab_one, 3).await;
    let selves: Vec<&ParticipantView> = view.iter().filter(|p| p.is_self).collect();
    assert_eq!(selves.len(), 2);
    assert!(selves.iter().all(|p| p.display_name == "Me" && p.name == "Alice"));

    let view = presence_of(&mut anonymous, 3).await;
    let me = view.iter().find(|p| p.is_self).unwrap();
    assert_eq!(me.name, "Anonymous");
    assert_eq!(me.display_name, "Me");
    assert_eq!(me.color, "#e06c75");
    assert!(view
        .iter()
        .filter(|p| !p.is_self)
        .all(|p| p.display_name == "Alice"));

    // Renaming is visible to everyone else
    drain(&mut tab_two).await;
    anonymous.set_presence(PresenceState {
        id: None,
        name: Some("Dana".to_string()),
        color: Some("#61afef".to_string()),
    });
    let view = loop {
        let view = presence_of(&mut tab_two, 3).await;
        if view.iter().any(|p| p.name == "Dana") {
            break view;
        }
    };
    let dana = view.iter().find(|p| p.name == "Dana").unwrap();
    assert!(!dana.is_self);
    assert_eq!(dana.color, "#61afef");
}

#[tokio::test]
async fn test_saved_notice_stays_within_its_document() {
    let dir = TempDir::new().unwrap();
    let doc_a = name_of(&write_doc(&dir, "docs/a.md", "A"));
    let doc_b = name_of(&write_doc(&dir, "docs/b.md", "B"));
    let sessions = manager(Duration::from_secs(60));

    let mut a1 = sessions.connect(&doc_a, None).unwrap();
    let mut a2 = sessions.connect(&doc_a, None).unwrap();
    let mut a3 = sessions.connect(&doc_a, None).unwrap();
    let mut b1 = sessions.connect(&doc_b, None).unwrap();
    for conn in [&mut a1, &mut a2, &mut a3, &mut b1] {
        initial_state(conn).await;
        drain(conn).await;
    }

    let saved = r#"{"type":"doc:saved"}"#;
    a1.send_stateless(saved);

    for conn in [&mut a2, &mut a3] {
        let payload = loop {
            if let Outbound::Stateless(payload) = next(conn).await {
                break payload;
            }
        };
        assert_eq!(payload, saved);
    }
    for conn in [&mut a1, &mut b1] {
        assert!(drain(conn)
            .await
            .iter()
            .all(|m| !matches!(m, Outbound::Stateless(_))));
    }
}

#[tokio::test]
async fn test_missing_file_yields_empty_document() {
    let dir = TempDir::new().unwrap();
    let document = name_of(&dir.path().join("docs/missing.md"));
    let sessions = manager(Duration::from_secs(60));

    let mut conn = sessions.connect(&document, None).unwrap();
    let client = Client::from_state(&initial_state(&mut conn).await);
    assert_eq!(client.xml(), "");

    let snapshot = sessions.inspect(&document).await.unwrap();
    assert_eq!(snapshot.hydration, Some(HydrationOutcome::ReadFailed));
    assert_eq!(snapshot.state, SessionState::Live);
}

#[tokio::test]
async fn test_task_documents_skip_front_matter() {
    let dir = TempDir::new().unwrap();
    let path = write_doc(
        &dir,
        ".quire/tasks/ship.mdx",
        "---\ntitle: Ship it\nstatus: todo\n---\n\nShip the release\n",
    );
    let sessions = manager(Duration::from_secs(60));

    let mut conn = sessions
        .connect(&format!("task:{}", name_of(&path)), None)
        .unwrap();
    let xml = Client::from_state(&initial_state(&mut conn).await).xml();
    assert!(xml.contains("Ship the release"), "{xml}");
    assert!(!xml.contains("title"), "{xml}");
    assert!(!xml.contains("status"), "{xml}");
}

#[tokio::test]
async fn test_html_and_jsx_text_survives_hydration() {
    let dir = TempDir::new().unwrap();
    let path = write_doc(
        &dir,
        ".quire/docs/guide.mdx",
        "# Guide\n\n<div>\nHidden text\n</div>\n\n<Callout>MDX content</Callout>\n\nAfter\n",
    );
    let sessions = manager(Duration::from_secs(60));

    let mut conn = sessions.connect(&name_of(&path), None).unwrap();
    let xml = Client::from_state(&initial_state(&mut conn).await).xml();
    assert!(xml.contains("Hidden text"), "{xml}");
    assert!(xml.contains("MDX content"), "{xml}");
    assert!(xml.contains("After"), "{xml}");
    assert!(!xml.contains("Callout"), "{xml}");

    let snapshot = sessions.inspect(&name_of(&path)).await.unwrap();
    assert_eq!(snapshot.hydration, Some(HydrationOutcome::Hydrated { blocks: 4 }));
}

#[tokio::test]
async fn test_rejects_invalid_and_foreign_documents() {
    let served = TempDir::new().unwrap();
    let foreign = TempDir::new().unwrap();
    let inside = name_of(&write_doc(&served, "docs/ok.md", "Fine"));
    let outside = name_of(&write_doc(&foreign, "secret.md", "Nope"));

    let sessions = SessionManager::new(
        DocumentAccess::restricted_to([served.path().to_path_buf()]),
        Duration::from_secs(60),
    );

    assert!(sessions.connect(&inside, None).is_ok());
    assert_eq!(
        sessions.connect(&outside, None).err(),
        Some(SessionError::AccessDenied(outside.clone()))
    );
    assert_eq!(
        sessions.connect("docs/ok.md", None).err(),
        Some(SessionError::InvalidDocumentName("docs/ok.md".to_string()))
    );
    let traversal = format!("{}/../secret.md", served.path().display());
    assert!(matches!(
        sessions.connect(&traversal, None),
        Err(SessionError::InvalidDocumentName(_))
    ));
    assert!(!sessions.session_names().contains(&outside));
}

#[tokio::test]
async fn test_slow_connection_is_dropped_when_its_queue_fills() {
    let dir = TempDir::new().unwrap();
    let document = name_of(&write_doc(&dir, "docs/busy.md", "Busy"));
    let sessions = manager(Duration::from_secs(60)).with_outbound_buffer(4);

    // Never reads until the end
    let mut slow = sessions.connect(&document, user("u-slow", "Slow")).unwrap();
    let mut fast = sessions.connect(&document, user("u-fast", "Fast")).unwrap();
    presence_of(&mut fast, 2).await;

    for i in 0..10 {
        fast.send_stateless(format!(r#"{{"type":"ping","n":{i}}}"#));
    }

    let remaining = presence_of(&mut fast, 1).await;
    assert_eq!(remaining[0].name, "Fast");
    assert_eq!(sessions.inspect(&document).await.unwrap().connections, 1);

    // The queued backlog is still delivered, then the stream ends
    let mut received = 0;
    loop {
        match tokio::time::timeout(WAIT, slow.recv()).await {
            Ok(Some(_)) => received += 1,
            Ok(None) => break,
            Err(_) => panic!("slow connection was not closed"),
        }
    }
    assert_eq!(received, 4);
}
