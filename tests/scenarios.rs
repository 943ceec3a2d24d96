//! Integration tests exercising the engine end to end through its public
//! API: the six numbered scenarios plus a sample of the universal
//! properties.

use std::sync::Arc;

use cim_schema::{alias, date, identifier, list, object, primitive, reference};
use cim_schema::{deserialize, deserialize_many, serialize};
use cim_schema::{DynamicObject, Instance, ModelSchema, PropEntry, SchemaCell};
use indexmap::IndexMap;
use serde_json::json;

fn dynamic_factory() -> cim_schema::Factory {
    Arc::new(|_ctx| Some(Box::new(DynamicObject::new())))
}

#[tokio::test]
async fn scenario_1_simple_round_trip() {
    let mut props = IndexMap::new();
    props.insert("title".to_string(), PropEntry::Primitive);
    props.insert("done".to_string(), PropEntry::Primitive);
    let schema = ModelSchema::create_simple(props).unwrap();

    let mut instance = DynamicObject::new();
    instance.set_prop("title", json!("A").into());
    instance.set_prop("done", json!(false).into());

    let encoded = serialize(&schema, &instance).unwrap();
    assert_eq!(encoded, json!({"title": "A", "done": false}));

    let decoded = deserialize(schema, encoded, None).await.unwrap();
    let handle = decoded.as_instance().unwrap();
    assert_eq!(handle.get_prop("title").unwrap(), json!("A").into());
    assert_eq!(handle.get_prop("done").unwrap(), json!(false).into());
}

#[tokio::test]
async fn scenario_2_alias_preserves_in_memory_name() {
    let mut props = IndexMap::new();
    props.insert("title".to_string(), PropEntry::Schema(alias("task", primitive()).unwrap()));
    let schema = ModelSchema::create_simple(props).unwrap();

    let mut instance = DynamicObject::new();
    instance.set_prop("title", json!("x").into());
    let encoded = serialize(&schema, &instance).unwrap();
    assert_eq!(encoded, json!({"task": "x"}));

    let decoded = deserialize(schema, encoded, None).await.unwrap();
    let handle = decoded.as_instance().unwrap();
    assert_eq!(handle.get_prop("title").unwrap(), json!("x").into());
    assert!(handle.get_prop("task").is_none());
}

#[tokio::test]
async fn scenario_3_date_round_trips_epoch_millis() {
    use chrono::{TimeZone, Utc};

    let mut props = IndexMap::new();
    props.insert("at".to_string(), PropEntry::Schema(date()));
    let schema = ModelSchema::create_simple(props).unwrap();

    let mut instance = DynamicObject::new();
    let at = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
    instance.set_prop("at", at.into());
    let encoded = serialize(&schema, &instance).unwrap();
    assert_eq!(encoded, json!({"at": 1_700_000_000_000i64}));

    let decoded = deserialize(schema, encoded, None).await.unwrap();
    let handle = decoded.as_instance().unwrap();
    let got = handle.get_prop("at").unwrap();
    assert_eq!(got.as_date_time().unwrap().timestamp_millis(), 1_700_000_000_000);
}

#[tokio::test]
async fn scenario_4_list_of_objects_preserves_order() {
    let mut sub_props = IndexMap::new();
    sub_props.insert("title".to_string(), PropEntry::Primitive);
    let sub_schema = ModelSchema::create_simple(sub_props).unwrap();
    let sub_cell = SchemaCell::new();
    sub_cell.set(sub_schema);

    let mut todo_props = IndexMap::new();
    todo_props.insert("title".to_string(), PropEntry::Primitive);
    todo_props.insert("subs".to_string(), PropEntry::Schema(list(object(sub_cell))));
    let todo_schema = ModelSchema::create_simple(todo_props).unwrap();

    let json = json!({"title": "T", "subs": [{"title": "a"}, {"title": "b"}]});
    let decoded = deserialize(todo_schema, json, None).await.unwrap();
    let todo = decoded.as_instance().unwrap();
    let subs = todo.get_prop("subs").unwrap();
    let subs = subs.as_list().unwrap();
    assert_eq!(subs.len(), 2);
    assert_eq!(
        subs[0].as_instance().unwrap().get_prop("title").unwrap(),
        json!("a").into()
    );
    assert_eq!(
        subs[1].as_instance().unwrap().get_prop("title").unwrap(),
        json!("b").into()
    );
}

fn user_post_schemas() -> (ModelSchema, ModelSchema) {
    let user_cell = SchemaCell::new();
    let mut user_props = IndexMap::new();
    user_props.insert("uuid".to_string(), PropEntry::Schema(identifier(None)));
    user_props.insert("name".to_string(), PropEntry::Primitive);
    let user_schema = ModelSchema::create::<DynamicObject>("User", user_props, None, dynamic_factory()).unwrap();
    user_cell.set(user_schema.clone());

    let mut post_props = IndexMap::new();
    post_props.insert("author".to_string(), PropEntry::Schema(reference(user_cell)));
    post_props.insert("msg".to_string(), PropEntry::Primitive);
    let post_schema = ModelSchema::create_simple(post_props).unwrap();

    (user_schema, post_schema)
}

#[tokio::test]
async fn scenario_5_reference_resolves_within_a_union_document() {
    let (user_schema, post_schema) = user_post_schemas();
    let entries = vec![
        (user_schema, json!({"uuid": 1, "name": "X"})),
        (post_schema, json!({"author": 1, "msg": "hi"})),
    ];
    let results = deserialize_many(entries, None).await.unwrap();

    let user = results[0].as_instance().unwrap();
    let post = results[1].as_instance().unwrap();
    let author = post.get_prop("author").unwrap();
    assert!(Arc::ptr_eq(author.as_instance().unwrap(), user));
}

#[tokio::test]
async fn scenario_6_unresolvable_reference_names_the_identifier() {
    let (_user_schema, post_schema) = user_post_schemas();
    let err = deserialize(post_schema, json!({"author": 99, "msg": "hi"}), None)
        .await
        .unwrap_err();
    match err {
        cim_schema::DeserializeError::UnresolvableReferences { identifiers } => {
            assert_eq!(identifiers, vec!["99".to_string()]);
        }
        other => panic!("expected UnresolvableReferences, got {other:?}"),
    }
}

#[tokio::test]
async fn universal_round_trip_primitives_is_structurally_equal() {
    let mut props = IndexMap::new();
    props.insert("title".to_string(), PropEntry::Primitive);
    props.insert("nickname".to_string(), PropEntry::Schema(alias("nick", primitive()).unwrap()));
    let schema = ModelSchema::create_simple(props).unwrap();

    let mut instance = DynamicObject::new();
    instance.set_prop("title", json!("A").into());
    instance.set_prop("nickname", json!("Ada").into());

    let encoded = serialize(&schema, &instance).unwrap();
    let decoded = deserialize(schema.clone(), encoded.clone(), None).await.unwrap();
    let handle = decoded.as_instance().unwrap();
    let re_encoded = handle.with_instance(|i| serialize(&schema, i)).unwrap();
    assert_eq!(encoded, re_encoded);
}

#[tokio::test]
async fn universal_extends_order_child_overwrites_parent_for_shared_key() {
    let mut base_props = IndexMap::new();
    base_props.insert("shared".to_string(), PropEntry::Primitive);
    let base = ModelSchema::create_simple(base_props).unwrap();

    let mut child_props = IndexMap::new();
    child_props.insert("shared".to_string(), PropEntry::Schema(alias("shared_alias", primitive()).unwrap()));
    let child = ModelSchema::create::<DynamicObject>("Child", child_props, Some(base), dynamic_factory()).unwrap();

    let decoded = deserialize(child, json!({"shared_alias": "child-value"}), None).await.unwrap();
    let handle = decoded.as_instance().unwrap();
    assert_eq!(handle.get_prop("shared").unwrap(), json!("child-value").into());
}
