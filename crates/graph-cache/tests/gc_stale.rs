mod common;

use common::listeners::Recorder;
use common::selections::{config, viewer, FRIENDS};
use graph_cache::key::Variables;
use graph_cache::selection::{FieldSelection, Selection};
use graph_cache::stale::Freshness;
use graph_cache::{Cache, ReadOptions, WriteOptions, ROOT_ID};
use graph_cache_util::ManualClock;
use serde_json::json;

fn write_viewer(cache: &mut Cache) {
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
}

#[test]
fn idle_fields_survive_the_buffer_then_go() {
    let mut cache = Cache::new(config().with_buffer_size(2));
    write_viewer(&mut cache);

    cache.collect_garbage();
    cache.collect_garbage();
    assert!(cache.storage().get("User:1", "firstName").value.is_some());
    assert!(!cache.read(ReadOptions::new(&viewer())).partial);

    cache.collect_garbage();
    assert!(cache.storage().get("User:1", "firstName").value.is_none());
    assert!(cache.storage().get(ROOT_ID, "viewer").value.is_none());
    let result = cache.read(ReadOptions::new(&viewer()));
    assert!(!result.has_data);
    assert!(cache.list(FRIENDS, None, false).is_err());
}

#[test]
fn subscribed_fields_are_never_evicted() {
    let mut cache = Cache::new(config().with_buffer_size(1));
    write_viewer(&mut cache);
    let recorder = Recorder::new();
    let spec = recorder.spec(viewer());
    cache.subscribe(&spec);

    for _ in 0..5 {
        cache.collect_garbage();
    }
    assert_eq!(
        cache.storage().get("User:2", "firstName").scalar(),
        Some(&json!("jane"))
    );

    cache.unsubscribe(&spec);
    cache.collect_garbage();
    assert!(cache.storage().get("User:2", "firstName").value.is_some());
    cache.collect_garbage();
    assert!(cache.storage().get("User:2", "firstName").value.is_none());
}

#[test]
fn rewriting_resets_the_idle_counter() {
    let mut cache = Cache::new(config().with_buffer_size(1));
    write_viewer(&mut cache);
    cache.collect_garbage();
    write_viewer(&mut cache);
    cache.collect_garbage();
    assert!(cache.storage().get("User:1", "firstName").value.is_some());
}

#[test]
fn type_staleness_is_scoped() {
    let mut cache = Cache::new(config());
    write_viewer(&mut cache);

    cache.mark_type_stale("User", Some("firstName"), None);
    assert_eq!(cache.field_time("User:1", "firstName"), Some(Freshness::Stale));
    assert_eq!(cache.field_time("User:2", "firstName"), Some(Freshness::Stale));
    assert!(matches!(cache.field_time("User:1", "id"), Some(Freshness::Fresh(_))));

    cache.mark_type_stale("User", None, None);
    assert_eq!(cache.field_time("User:1", "id"), Some(Freshness::Stale));
    assert!(matches!(cache.field_time(ROOT_ID, "viewer"), Some(Freshness::Fresh(_))));
    assert!(cache.read(ReadOptions::new(&viewer())).stale);
    assert_eq!(cache.cached_data(&viewer(), ROOT_ID, Variables::new()), None);

    write_viewer(&mut cache);
    assert!(!cache.read(ReadOptions::new(&viewer())).stale);
}

#[test]
fn field_arguments_narrow_staleness() {
    let mut cache = Cache::new(config());
    let selection = Selection::new().with_field(
        "user",
        FieldSelection::link(
            "User",
            "user",
            Selection::new()
                .with_field("id", FieldSelection::scalar("ID", "id"))
                .with_field("small", FieldSelection::scalar("String", "avatar(size: 1)"))
                .with_field("large", FieldSelection::scalar("String", "avatar(size: 2)")),
        ),
    );
    cache
        .write(WriteOptions::new(
            &selection,
            &json!({"user": {"id": "1", "small": "s.png", "large": "l.png"}}),
        ))
        .unwrap();

    let args = json!({"size": 1});
    cache.mark_type_stale("User", Some("avatar"), args.as_object());
    assert_eq!(cache.field_time("User:1", "avatar(size: 1)"), Some(Freshness::Stale));
    assert!(matches!(
        cache.field_time("User:1", "avatar(size: 2)"),
        Some(Freshness::Fresh(_))
    ));

    cache.mark_type_stale("User", Some("avatar"), None);
    assert_eq!(cache.field_time("User:1", "avatar(size: 2)"), Some(Freshness::Stale));
}

#[test]
fn forced_stale_writes_read_stale() {
    let mut cache = Cache::new(config());
    cache
        .write(
            WriteOptions::new(
                &viewer(),
                &json!({"viewer": {"id": "1", "firstName": "bob", "friends": []}}),
            )
            .force_stale(),
        )
        .unwrap();
    let result = cache.read(ReadOptions::new(&viewer()));
    assert!(result.stale);
    assert!(!result.partial);
}

#[test]
fn max_age_expires_on_collection() {
    let clock = ManualClock::new(1_000);
    let mut cache = Cache::new(config().with_clock(clock.clone()).with_lifetime(500));
    write_viewer(&mut cache);
    assert_eq!(cache.field_time("User:1", "firstName"), Some(Freshness::Fresh(1_000)));

    clock.advance(400);
    cache.collect_garbage();
    assert!(!cache.read(ReadOptions::new(&viewer())).stale);

    clock.advance(200);
    cache.collect_garbage();
    assert!(cache.read(ReadOptions::new(&viewer())).stale);
    assert_eq!(cache.field_time("User:1", "firstName"), Some(Freshness::Stale));
}
