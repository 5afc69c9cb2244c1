mod common;

use common::listeners::{deliver, Recorder};
use common::selections::{config, friends_field, user_fields, viewer};
use graph_cache::selection::{FieldSelection, Selection};
use graph_cache::stale::Freshness;
use graph_cache::{Cache, ReadOptions, SharedCache, SubscriptionSpec, WriteOptions, ROOT_ID};
use serde_json::{json, Value};

fn seeded() -> Cache {
    let mut cache = Cache::new(config());
    cache
        .write(WriteOptions::new(
            &viewer(),
            &json!({
                "viewer": {
                    "id": "1",
                    "firstName": "bob",
                    "friends": [{"id": "2", "firstName": "jane"}]
                }
            }),
        ))
        .unwrap();
    cache
}

#[test]
fn nested_records_are_covered_on_subscribe() {
    let mut cache = seeded();
    let recorder = Recorder::new();
    cache.subscribe(&recorder.spec(viewer()));
    assert!(cache.subscriptions().is_active("User:2", "firstName"));

    let notify = cache
        .record("User", &json!("2"))
        .unwrap()
        .write(&user_fields(), &json!({"id": "2", "firstName": "janet"}), Default::default(), None)
        .unwrap();
    assert!(notify.contains(&recorder.listener));
    deliver(&cache, notify);
    assert_eq!(recorder.count(), 1);
    assert_eq!(
        recorder.last().unwrap()["viewer"]["friends"][0]["firstName"],
        json!("janet")
    );
}

#[test]
fn one_listener_two_paths() {
    let mut cache = seeded();
    let favorite = Selection::new().with_field(
        "favorite",
        FieldSelection::link("User", "favorite", user_fields()),
    );
    cache
        .write(WriteOptions::new(
            &favorite,
            &json!({"favorite": {"id": "2", "firstName": "jane"}}),
        ))
        .unwrap();

    let recorder = Recorder::new();
    let through_viewer = recorder.spec(viewer());
    let through_favorite = recorder.spec(favorite);
    cache.subscribe(&through_viewer);
    cache.subscribe(&through_favorite);
    let subscriptions = cache.subscriptions();
    assert_eq!(subscriptions.reference_count("User:2", "firstName", &recorder.listener), 2);

    cache.unsubscribe(&through_viewer);
    assert!(cache.subscriptions().is_active("User:2", "firstName"));
    assert!(!cache.subscriptions().is_active("User:1", "firstName"));
    assert_eq!(
        cache.subscriptions().reference_count("User:2", "firstName", &recorder.listener),
        1
    );

    cache.unsubscribe(&through_favorite);
    assert!(!cache.subscriptions().is_active("User:2", "firstName"));
    assert_eq!(cache.subscriptions().active_count(), 0);
}

#[test]
fn list_membership_moves_subscriptions() {
    let mut cache = seeded();
    let recorder = Recorder::new();
    cache.subscribe(&recorder.spec(viewer()));

    let notify = cache
        .write(WriteOptions::new(
            &viewer(),
            &json!({"viewer": {"id": "1", "friends": [{"id": "3", "firstName": "max"}]}}),
        ))
        .unwrap();
    assert!(notify.contains(&recorder.listener));
    assert!(!cache.subscriptions().is_active("User:2", "firstName"));
    assert!(cache.subscriptions().is_active("User:3", "firstName"));
}

#[test]
fn deleting_a_record_detaches_and_notifies() {
    let mut cache = seeded();
    let recorder = Recorder::new();
    cache.subscribe(&recorder.spec(viewer()));

    let notify = cache.delete("User:2", None).unwrap();
    assert!(notify.contains(&recorder.listener));
    assert!(cache.subscriptions().get_all("User:2").is_empty());

    let data = cache.read(ReadOptions::new(&viewer())).data;
    assert_eq!(data["viewer"]["friends"], json!([]));
    assert_eq!(cache.field_time("User:2", "firstName"), None);
    assert!(matches!(
        cache.field_time("User:1", "firstName"),
        Some(Freshness::Fresh(_))
    ));
}

#[test]
fn one_spec_reaching_a_record_twice_is_fully_released() {
    let mut cache = Cache::new(config());
    let selection = Selection::new().with_field(
        "viewer",
        FieldSelection::link(
            "User",
            "viewer",
            user_fields()
                .with_field("bestFriend", FieldSelection::link("User", "bestFriend", user_fields()))
                .with_field("friends", friends_field()),
        ),
    );
    cache
        .write(WriteOptions::new(
            &selection,
            &json!({
                "viewer": {
                    "id": "1",
                    "firstName": "bob",
                    "bestFriend": {"id": "2", "firstName": "jane"},
                    "friends": [{"id": "2", "firstName": "jane"}]
                }
            }),
        ))
        .unwrap();

    let recorder = Recorder::new();
    let spec = recorder.spec(selection);
    cache.subscribe(&spec);
    assert_eq!(
        cache.subscriptions().reference_count("User:2", "firstName", &recorder.listener),
        2
    );

    cache.unsubscribe(&spec);
    assert!(!cache.subscriptions().is_active("User:2", "firstName"));
    assert_eq!(cache.subscriptions().active_count(), 0);
}

#[test]
fn aliased_fields_are_fully_released() {
    let mut cache = seeded();
    let selection = viewer().with_field("me", FieldSelection::link("User", "viewer", user_fields()));

    let recorder = Recorder::new();
    let spec = recorder.spec(selection);
    cache.subscribe(&spec);
    let subscriptions = cache.subscriptions();
    assert_eq!(subscriptions.reference_count(ROOT_ID, "viewer", &recorder.listener), 2);
    assert_eq!(subscriptions.reference_count("User:1", "firstName", &recorder.listener), 2);

    cache.unsubscribe(&spec);
    assert_eq!(cache.subscriptions().active_count(), 0);

    let notify = cache
        .write(WriteOptions::new(
            &viewer(),
            &json!({"viewer": {"id": "1", "firstName": "robert", "friends": []}}),
        ))
        .unwrap();
    assert!(!notify.contains(&recorder.listener));
}

#[test]
fn key_maps_copy_subscribers() {
    let mut cache = seeded();
    let recorder = Recorder::new();
    cache.subscribe(&recorder.spec(viewer()));
    cache.register_key_map("User:2", "User:99");
    assert!(cache.subscriptions().is_active("User:99", "firstName"));
}

#[test]
fn variable_accessor_is_read_on_every_walk() {
    let mut cache = Cache::default();
    let selection = Selection::new().with_field(
        "user",
        FieldSelection::link("User", "user(id: $id)", user_fields()),
    );
    let variables = std::rc::Rc::new(std::cell::RefCell::new(json!({"id": "1"})));
    let spec = {
        let variables = variables.clone();
        SubscriptionSpec::new(selection, |_: &Value| {}).with_variable_accessor(move || {
            variables
                .borrow()
                .as_object()
                .cloned()
                .unwrap_or_default()
        })
    };
    cache.subscribe(&spec);
    assert!(cache.subscriptions().is_active("_ROOT_", "user(id: \"1\")"));

    cache.unsubscribe(&spec);
    *variables.borrow_mut() = json!({"id": "2"});
    cache.subscribe(&spec);
    assert!(!cache.subscriptions().is_active("_ROOT_", "user(id: \"1\")"));
    assert!(cache.subscriptions().is_active("_ROOT_", "user(id: \"2\")"));
}

#[test]
fn shared_cache_delivers_after_write() {
    let shared = SharedCache::new(config());
    let selection = viewer();
    shared
        .write(WriteOptions::new(
            &selection,
            &json!({"viewer": {"id": "1", "firstName": "bob", "friends": []}}),
        ))
        .unwrap();
    let recorder = Recorder::new();
    shared.subscribe(&recorder.spec(selection.clone()));

    shared
        .write(WriteOptions::new(
            &selection,
            &json!({"viewer": {"id": "1", "firstName": "robert", "friends": []}}),
        ))
        .unwrap();
    assert_eq!(recorder.count(), 1);
    assert_eq!(recorder.last().unwrap()["viewer"]["firstName"], json!("robert"));

    shared.delete("User:1", None).unwrap();
    assert_eq!(recorder.count(), 2);
    assert_eq!(recorder.last().unwrap()["viewer"], Value::Null);
}
