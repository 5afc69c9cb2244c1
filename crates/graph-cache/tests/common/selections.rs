#![allow(dead_code)]

use graph_cache::key::Variables;
use graph_cache::selection::{FieldSelection, Selection};
use graph_cache::CacheConfig;
use serde_json::Value;

pub const FRIENDS: &str = "User_Friends";

pub fn vars(value: Value) -> Variables {
    match value {
        Value::Object(map) => map,
        _ => Variables::new(),
    }
}

pub fn config() -> CacheConfig {
    CacheConfig::default().with_keys("PageInfo", Vec::<String>::new())
}

/// `{ id firstName }`
pub fn user_fields() -> Selection {
    Selection::new()
        .with_field("id", FieldSelection::scalar("ID", "id"))
        .with_field("firstName", FieldSelection::scalar("String", "firstName"))
}

/// A list-annotated `friends` field selecting `{ id firstName }`.
pub fn friends_field() -> FieldSelection {
    FieldSelection::link("User", "friends", user_fields()).with_list(FRIENDS, "User", false)
}

/// `viewer { id firstName friends @list { id firstName } }`
pub fn viewer() -> Selection {
    Selection::new().with_field(
        "viewer",
        FieldSelection::link("User", "viewer", user_fields().with_field("friends", friends_field())),
    )
}

/// `viewer { id friends @list(connection) { edges { cursor node { id firstName } } pageInfo { endCursor hasNextPage } } }`
pub fn connection_viewer() -> Selection {
    let edges = FieldSelection::link(
        "UserEdge",
        "edges",
        Selection::new()
            .with_field("cursor", FieldSelection::scalar("String", "cursor"))
            .with_field("node", FieldSelection::link("User", "node", user_fields())),
    );
    let page_info = FieldSelection::link(
        "PageInfo",
        "pageInfo",
        Selection::new()
            .with_field("endCursor", FieldSelection::scalar("String", "endCursor").nullable())
            .with_field("hasNextPage", FieldSelection::scalar("Boolean", "hasNextPage")),
    );
    let friends = FieldSelection::link(
        "UserConnection",
        "friends",
        Selection::new()
            .with_field("edges", edges)
            .with_field("pageInfo", page_info),
    )
    .with_list(FRIENDS, "User", true);
    Selection::new().with_field(
        "viewer",
        FieldSelection::link(
            "User",
            "viewer",
            Selection::new()
                .with_field("id", FieldSelection::scalar("ID", "id"))
                .with_field("friends", friends),
        ),
    )
}
