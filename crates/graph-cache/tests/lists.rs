mod common;

use common::listeners::Recorder;
use common::selections::{config, connection_viewer, friends_field, user_fields, viewer, FRIENDS};
use graph_cache::key::Variables;
use graph_cache::selection::{
    Argument, FieldSelection, ListOperation, ListWhen, OperationAction, Position, Selection,
};
use graph_cache::{Cache, CacheError, ReadOptions, WriteOptions};
use serde_json::json;

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

fn seeded_connection() -> Cache {
    let mut cache = Cache::new(config());
    cache
        .write(WriteOptions::new(
            &connection_viewer(),
            &json!({
                "viewer": {
                    "id": "1",
                    "friends": {
                        "edges": [{"cursor": "a", "node": {"id": "2", "firstName": "jane"}}],
                        "pageInfo": {"endCursor": "a", "hasNextPage": false}
                    }
                }
            }),
        ))
        .unwrap();
    cache
}

fn operation(action: OperationAction) -> ListOperation {
    ListOperation {
        action,
        list: Some(FRIENDS.to_string()),
        type_name: None,
        parent_id: None,
        position: Position::Last,
        all_lists: false,
        when: None,
    }
}

#[test]
fn append_and_prepend_order() {
    let mut cache = seeded();
    let recorder = Recorder::new();
    cache.subscribe(&recorder.spec(viewer()));
    let vars = Variables::new();

    let mut list = cache.list(FRIENDS, None, false).unwrap();
    let notify = list
        .append(&user_fields(), &json!({"id": "3", "firstName": "max"}), &vars, None)
        .unwrap();
    assert!(notify.contains(&recorder.listener));
    assert_eq!(list.iterate(), ["User:2", "User:3"]);

    list.prepend(&user_fields(), &json!({"id": "4", "firstName": "liz"}), &vars, None)
        .unwrap();
    assert_eq!(list.iterate(), ["User:4", "User:2", "User:3"]);
    assert_eq!(list.len(), 3);

    assert!(cache.subscriptions().is_active("User:3", "firstName"));
    let data = cache.read(ReadOptions::new(&viewer())).data;
    assert_eq!(
        data["viewer"]["friends"],
        json!([
            {"id": "4", "firstName": "liz"},
            {"id": "2", "firstName": "jane"},
            {"id": "3", "firstName": "max"}
        ])
    );
}

#[test]
fn connections_wrap_entries_in_edges() {
    let mut cache = seeded_connection();
    let vars = Variables::new();
    let mut list = cache.list(FRIENDS, None, false).unwrap();
    list.append(&user_fields(), &json!({"id": "3", "firstName": "max"}), &vars, None)
        .unwrap();
    list.prepend(&user_fields(), &json!({"id": "4", "firstName": "liz"}), &vars, None)
        .unwrap();
    assert_eq!(list.iterate(), ["User:4", "User:2", "User:3"]);

    let removed = list.remove(&json!({"id": "2"}), &vars, None).unwrap();
    assert!(removed.is_empty());
    assert_eq!(list.iterate(), ["User:4", "User:3"]);

    let result = cache.read(ReadOptions::new(&connection_viewer()));
    let edges = &result.data["viewer"]["friends"]["edges"];
    assert_eq!(edges[0]["node"], json!({"id": "4", "firstName": "liz"}));
    assert_eq!(edges[1]["node"], json!({"id": "3", "firstName": "max"}));
    assert_eq!(edges[1]["cursor"], json!(null));
    assert!(!result.partial);
    assert_eq!(
        result.data["viewer"]["friends"]["pageInfo"],
        json!({"endCursor": "a", "hasNextPage": false})
    );
}

#[test]
fn when_filters_gate_operations() {
    let mut cache = Cache::new(config());
    let mut friends = FieldSelection::link("User", "friends(filter: \"close\")", user_fields())
        .with_list(FRIENDS, "User", false);
    friends
        .filters
        .insert("filter".to_string(), Argument::Literal(json!("close")));
    let selection = Selection::new().with_field(
        "viewer",
        FieldSelection::link(
            "User",
            "viewer",
            Selection::new()
                .with_field("id", FieldSelection::scalar("ID", "id"))
                .with_field("friends", friends),
        ),
    );
    cache
        .write(WriteOptions::new(
            &selection,
            &json!({"viewer": {"id": "1", "friends": []}}),
        ))
        .unwrap();
    let vars = Variables::new();

    let mut far = cache
        .list(FRIENDS, None, false)
        .unwrap()
        .when(ListWhen::default().must("filter", json!("far")));
    assert!(far
        .append(&user_fields(), &json!({"id": "3"}), &vars, None)
        .unwrap()
        .is_empty());
    assert!(far.is_empty());
    assert_eq!(far.filters(), Some(&json!({"filter": "close"}).as_object().cloned().unwrap()));

    let mut close = cache
        .list(FRIENDS, None, false)
        .unwrap()
        .when(ListWhen::default().must("filter", json!("close")));
    close
        .append(&user_fields(), &json!({"id": "3"}), &vars, None)
        .unwrap();
    assert_eq!(close.iterate(), ["User:3"]);
}

#[test]
fn toggle_flips_membership() {
    let mut cache = seeded();
    let vars = Variables::new();
    let mut list = cache.list(FRIENDS, None, false).unwrap();
    let entry = json!({"id": "3", "firstName": "max"});

    list.toggle(&user_fields(), &entry, &vars, Position::First, None)
        .unwrap();
    assert_eq!(list.iterate(), ["User:3", "User:2"]);

    list.toggle(&user_fields(), &entry, &vars, Position::First, None)
        .unwrap();
    assert_eq!(list.iterate(), ["User:2"]);

    assert!(list.remove_id("User:9", &vars, None).unwrap().is_none());
    assert!(list.remove_id("User:2", &vars, None).unwrap().is_some());
    assert!(list.is_empty());
}

#[test]
fn several_owners_need_a_parent() {
    let mut cache = seeded();
    let other = Selection::new().with_field(
        "other",
        FieldSelection::link("User", "other", user_fields().with_field("friends", friends_field())),
    );
    cache
        .write(WriteOptions::new(
            &other,
            &json!({"other": {"id": "5", "firstName": "al", "friends": [{"id": "6", "firstName": "cy"}]}}),
        ))
        .unwrap();

    assert!(matches!(
        cache.list(FRIENDS, None, false).err(),
        Some(CacheError::AmbiguousList { .. })
    ));
    assert_eq!(cache.list(FRIENDS, Some("5"), false).unwrap().iterate(), ["User:6"]);
    assert_eq!(cache.list(FRIENDS, Some("User:1"), false).unwrap().iterate(), ["User:2"]);
    assert_eq!(cache.list(FRIENDS, None, true).unwrap().lists().len(), 2);
    assert!(matches!(
        cache.list("Nope", None, false).err(),
        Some(CacheError::ListNotFound { .. })
    ));
}

#[test]
fn mutation_operations() {
    let mut cache = seeded();
    let recorder = Recorder::new();
    cache.subscribe(&recorder.spec(viewer()));

    // the same insert twice in one payload lands once
    let add = Selection::new().with_field(
        "addFriend",
        FieldSelection::link("User", "addFriend", user_fields())
            .with_operation(operation(OperationAction::Insert))
            .with_operation(operation(OperationAction::Insert)),
    );
    let notify = cache
        .write(WriteOptions::new(
            &add,
            &json!({"addFriend": {"id": "3", "firstName": "max"}}),
        ))
        .unwrap();
    assert!(notify.contains(&recorder.listener));
    assert_eq!(cache.list(FRIENDS, None, false).unwrap().iterate(), ["User:2", "User:3"]);

    let remove = Selection::new().with_field(
        "dropFriend",
        FieldSelection::link("User", "dropFriend", user_fields())
            .with_operation(operation(OperationAction::Remove)),
    );
    cache
        .write(WriteOptions::new(&remove, &json!({"dropFriend": {"id": "2"}})))
        .unwrap();
    assert_eq!(cache.list(FRIENDS, None, false).unwrap().iterate(), ["User:3"]);

    let mut delete = operation(OperationAction::Delete);
    delete.list = None;
    delete.type_name = Some("User".to_string());
    let delete_selection = Selection::new().with_field(
        "deleteUser",
        FieldSelection::scalar("ID", "deleteUser").with_operation(delete),
    );
    let notify = cache
        .write(WriteOptions::new(&delete_selection, &json!({"deleteUser": "3"})))
        .unwrap();
    assert!(notify.contains(&recorder.listener));
    let data = cache.read(ReadOptions::new(&viewer())).data;
    assert_eq!(data["viewer"]["friends"], json!([]));
}

#[test]
fn operations_on_unknown_lists_are_ignored() {
    let mut cache = Cache::new(config());
    let add = Selection::new().with_field(
        "addFriend",
        FieldSelection::link("User", "addFriend", user_fields())
            .with_operation(operation(OperationAction::Insert)),
    );
    let notify = cache
        .write(WriteOptions::new(
            &add,
            &json!({"addFriend": {"id": "3", "firstName": "max"}}),
        ))
        .unwrap();
    assert!(notify.is_empty());
    assert!(matches!(
        cache.list(FRIENDS, None, false).err(),
        Some(CacheError::ListNotFound { .. })
    ));
}

#[test]
fn parent_id_variable_targets_one_owner() {
    let mut cache = seeded();
    let other = Selection::new().with_field(
        "other",
        FieldSelection::link("User", "other", user_fields().with_field("friends", friends_field())),
    );
    cache
        .write(WriteOptions::new(
            &other,
            &json!({"other": {"id": "5", "firstName": "al", "friends": []}}),
        ))
        .unwrap();

    let mut insert = operation(OperationAction::Insert);
    insert.parent_id = Some(Argument::Variable("owner".to_string()));
    let add = Selection::new().with_field(
        "addFriend",
        FieldSelection::link("User", "addFriend", user_fields()).with_operation(insert),
    );
    let mut variables = Variables::new();
    variables.insert("owner".to_string(), json!("5"));
    cache
        .write(
            WriteOptions::new(&add, &json!({"addFriend": {"id": "3", "firstName": "max"}}))
                .with_variables(variables),
        )
        .unwrap();
    assert_eq!(cache.list(FRIENDS, Some("5"), false).unwrap().iterate(), ["User:3"]);
    assert_eq!(cache.list(FRIENDS, Some("1"), false).unwrap().iterate(), ["User:2"]);
}
