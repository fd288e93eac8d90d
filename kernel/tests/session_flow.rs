// End-to-end flow: mutate entities, persist them, record changes and
// replay the feed to learn what to re-fetch.

use docstore_kernel::adapters::{FileBackend, InMemoryBackend};
use docstore_kernel::{
    Backend, Change, ChangesFeed, Document, Entity, FixedClock, Journal, NewAssets, Session,
    StoreError,
};
use tempfile::TempDir;

const DOC_ID: &str = "0034-8910-rsp-48-2-0347";

fn publish(session: &Session) {
    let t1 = FixedClock::new("2018-08-05T22:33:49.795151Z");
    let doc = Document::create(DOC_ID).new_version(
        "/rawfiles/7ca9f9b2687cb/0034-8910-rsp-48-2-0347.xml",
        vec!["0034-8910-rsp-48-2-0347-gf01", "0034-8910-rsp-48-2-0347-gf02"],
        &t1,
    );
    session.documents().add(&doc).unwrap();
    session
        .changes()
        .add(&Change::for_entity::<Document>("2018-08-05T22:33:49.795151Z", DOC_ID))
        .unwrap();

    let t2 = FixedClock::new("2018-08-05T22:34:00.000000Z");
    let doc = session
        .documents()
        .fetch(DOC_ID)
        .unwrap()
        .new_asset_version(
            "0034-8910-rsp-48-2-0347-gf01",
            "/rawfiles/8e644999a8fa4/0034-8910-rsp-48-2-0347-gf01.jpg",
            &t2,
        )
        .unwrap();
    session.documents().update(&doc).unwrap();
    session
        .changes()
        .add(&Change::for_entity::<Document>("2018-08-05T22:34:00.000000Z", DOC_ID))
        .unwrap();

    let t3 = FixedClock::new("2018-08-05T22:35:00.000000Z");
    let journal =
        Journal::create("0034-8910").new_version("/journals/rsp.json", NewAssets::none(), &t3);
    session.journals().add(&journal).unwrap();
    session
        .changes()
        .add(&Change::for_entity::<Journal>("2018-08-05T22:35:00.000000Z", "0034-8910"))
        .unwrap();
}

fn check(session: &Session) {
    let mut feed = ChangesFeed::from_start(session.changes(), 2);
    let first = feed.next_page().unwrap();
    assert_eq!(first.len(), 2);
    assert!(first.iter().all(|c| c.entity() == Some("Document")));

    let second = feed.next_page().unwrap();
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].entity(), Some("Journal"));
    assert!(feed.next_page().unwrap().is_empty());

    let doc = session.documents().fetch(DOC_ID).unwrap();
    let latest = doc.version(-1).unwrap();
    assert_eq!(
        latest.assets["0034-8910-rsp-48-2-0347-gf01"],
        "/rawfiles/8e644999a8fa4/0034-8910-rsp-48-2-0347-gf01.jpg"
    );
    assert_eq!(latest.assets["0034-8910-rsp-48-2-0347-gf02"], "");

    assert!(matches!(
        session.journals().fetch(DOC_ID),
        Err(StoreError::DoesNotExist { .. })
    ));
    assert!(matches!(
        session.documents().add(&Document::create(DOC_ID)),
        Err(StoreError::AlreadyExists(_))
    ));
    // the failed add left the stored document alone
    assert_eq!(session.documents().fetch(DOC_ID).unwrap(), doc);
}

fn run(backend: &dyn Backend) {
    let session = Session::new(backend).unwrap();
    publish(&session);
    check(&session);
}

#[test]
fn in_memory_backend_flow() {
    run(&InMemoryBackend::new());
}

#[test]
fn file_backend_flow() {
    let dir = TempDir::new().unwrap();
    run(&FileBackend::open(dir.path()).unwrap());
}

#[test]
fn file_backend_flow_survives_restart() {
    let dir = TempDir::new().unwrap();
    {
        let backend = FileBackend::open(dir.path()).unwrap();
        publish(&Session::new(&backend).unwrap());
    }

    let backend = FileBackend::open(dir.path()).unwrap();
    check(&Session::new(&backend).unwrap());
}
