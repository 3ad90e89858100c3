//! End-to-end store scenarios: a subscriber watching a joined query stays
//! correct across an optimistic mutation, a rejected custom procedure, and
//! a confirmed one arriving out of order.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use sync_schema::{EntitySchema, FieldSpec, FieldValue, MutationPayload, RelationSpec, SchemaRegistry, ScalarType};
use sync_store::{CustomMutationMessage, DefaultMutation, OptimisticStore};
use sync_wire::{Include, IncludeTree, Procedure, Query, SortDirection, SortKey};

fn ts(secs: i64) -> chrono::DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).unwrap()
}

fn payload(fields: &[(&str, serde_json::Value, i64)]) -> MutationPayload {
    let mut map = BTreeMap::new();
    for (name, value, at) in fields {
        map.insert(name.to_string(), FieldValue::new(value.clone(), ts(*at)));
    }
    MutationPayload::new(map).unwrap()
}

fn schema() -> Arc<SchemaRegistry> {
    let mut registry = SchemaRegistry::new();
    registry.register(
        EntitySchema::new("posts")
            .with_field(
                "title",
                FieldSpec {
                    scalar_type: ScalarType::String,
                    default: None,
                },
            )
            .with_field(
                "likes",
                FieldSpec {
                    scalar_type: ScalarType::Number,
                    default: None,
                },
            )
            .with_relation(
                "author",
                RelationSpec::One {
                    target: "users".into(),
                    local_column: "authorId".into(),
                },
            ),
    );
    registry.register(EntitySchema::new("users").with_field(
        "name",
        FieldSpec {
            scalar_type: ScalarType::String,
            default: None,
        },
    ));
    Arc::new(registry)
}

#[tokio::test]
async fn subscriber_sees_joined_field_change_through_relation() {
    let store = OptimisticStore::new(schema());

    store
        .add_mutation(
            DefaultMutation {
                id: "u1-insert".into(),
                resource: "users".into(),
                resource_id: "u1".into(),
                procedure: Procedure::Insert,
                payload: payload(&[("name", "Ann".into(), 0)]),
            },
            false,
        )
        .await
        .unwrap();
    store
        .add_mutation(
            DefaultMutation {
                id: "p1-insert".into(),
                resource: "posts".into(),
                resource_id: "p1".into(),
                procedure: Procedure::Insert,
                payload: payload(&[
                    ("title", "Hello".into(), 0),
                    ("likes", 3.into(), 0),
                    ("authorId", "u1".into(), 0),
                ]),
            },
            false,
        )
        .await
        .unwrap();

    let mut include = IncludeTree::new();
    include.insert("author".to_string(), Include::Flag(true));
    let query = Query {
        resource: "posts".into(),
        include: Some(include),
        ..Default::default()
    };

    let hits = Arc::new(AtomicUsize::new(0));
    let hits_clone = Arc::clone(&hits);
    let handle = store
        .subscribe(query.clone(), move |_| {
            hits_clone.fetch_add(1, AtomicOrdering::SeqCst);
        })
        .await;

    // Renaming the author doesn't touch `posts` directly, but the query's
    // flat include set contains `users`, so the subscription still fires.
    store
        .add_mutation(
            DefaultMutation {
                id: "u1-rename".into(),
                resource: "users".into(),
                resource_id: "u1".into(),
                procedure: Procedure::Update,
                payload: payload(&[("name", "Annette".into(), 10)]),
            },
            true,
        )
        .await
        .unwrap();

    assert_eq!(hits.load(AtomicOrdering::SeqCst), 1);

    let result = store.get(&query, None, true).await;
    assert_eq!(result[0]["author"]["value"]["name"], "Annette");

    handle.unsubscribe().await;
}

#[tokio::test]
async fn rejected_custom_mutation_unwinds_its_optimistic_writes() {
    let store = OptimisticStore::new(schema());
    store
        .add_mutation(
            DefaultMutation {
                id: "p1-insert".into(),
                resource: "posts".into(),
                resource_id: "p1".into(),
                procedure: Procedure::Insert,
                payload: payload(&[("title", "Draft".into(), 0), ("likes", 0.into(), 0)]),
            },
            false,
        )
        .await
        .unwrap();

    // A custom "publish" procedure optimistically bumps likes before the
    // server has confirmed or rejected it.
    store
        .add_mutation(
            DefaultMutation {
                id: "publish-bump".into(),
                resource: "posts".into(),
                resource_id: "p1".into(),
                procedure: Procedure::Update,
                payload: payload(&[("likes", 1.into(), 5)]),
            },
            true,
        )
        .await
        .unwrap();
    store
        .add_custom_mutation_message(CustomMutationMessage {
            id: "msg-publish".into(),
            resource: "posts".into(),
            procedure: "publish".into(),
            payload: None,
        })
        .await;
    store
        .register_custom_mutation("msg-publish", vec![("posts".to_string(), "publish-bump".to_string())])
        .await;

    let query = Query {
        resource: "posts".into(),
        ..Default::default()
    };
    let before = store.get(&query, None, true).await;
    assert_eq!(before[0]["likes"], 1);

    let undone = store.undo_custom_mutation("msg-publish").await.unwrap();
    assert_eq!(undone, vec![("posts".to_string(), "p1".to_string(), "publish-bump".to_string())]);

    let after = store.get(&query, None, true).await;
    assert_eq!(after[0]["likes"], 0);
}

#[tokio::test]
async fn sort_treats_missing_field_as_least_for_ascending_order() {
    let store = OptimisticStore::new(schema());
    store
        .add_mutation(
            DefaultMutation {
                id: "p1".into(),
                resource: "posts".into(),
                resource_id: "p1".into(),
                procedure: Procedure::Insert,
                payload: payload(&[("title", "No likes field".into(), 0)]),
            },
            false,
        )
        .await
        .unwrap();
    store
        .add_mutation(
            DefaultMutation {
                id: "p2".into(),
                resource: "posts".into(),
                resource_id: "p2".into(),
                procedure: Procedure::Insert,
                payload: payload(&[("title", "Has likes".into(), 0), ("likes", 5.into(), 0)]),
            },
            false,
        )
        .await
        .unwrap();

    let query = Query {
        resource: "posts".into(),
        sort: Some(vec![SortKey {
            key: "likes".into(),
            direction: SortDirection::Asc,
        }]),
        ..Default::default()
    };
    let result = store.get(&query, None, true).await;
    assert_eq!(result[0]["id"], "p1");
    assert_eq!(result[1]["id"], "p2");
}
