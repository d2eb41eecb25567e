#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Query service integration tests: creation with relations, lookups,
//! tenant isolation, transactions and domain events.

mod common;

use std::sync::Arc;

use serde_json::json;
use tally_kernel::QueryError;
use tally_kernel::events::DomainEventKind;
use tally_kernel::models::{Tag, TimeEntry};
use tally_kernel::query::{
    Filter, Lookup, Query, QueryService, RelationQuery, RequestContext, StrategyRegistry,
    TransactionPolicy,
};
use tally_kernel::repository::{Dialect, SqlRepository};
use tally_kernel::schema;
use tally_test_utils::{client, memory_pool, project, record, tag, time_entry};

use common::{ACME, ALICE, TestApp, alice, bob, id, related_ids};

#[tokio::test]
async fn create_stamps_tenant_owner_and_timestamps() {
    let app = TestApp::new().await;
    let saved = app
        .service()
        .create_one(&alice(), "TimeEntry", time_entry("standup", 100, 900).build())
        .await
        .unwrap();

    assert_eq!(saved["tenant_id"], json!(ACME));
    assert_eq!(saved["user_id"], json!(ALICE));
    assert!(saved["created"].as_i64().unwrap() > 0);
    assert_eq!(saved["created"], saved["changed"]);
}

#[tokio::test]
async fn create_with_foreign_tag_fails_and_writes_nothing() {
    let app = TestApp::new().await;
    let foreign = app.create(&bob(), "Tag", tag("globex-only").build()).await;

    let err = app
        .service()
        .create_one(
            &alice(),
            "TimeEntry",
            time_entry("sneaky", 100, 60).with_ids("tags", &[foreign]).build(),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        QueryError::RelationResolution { ref relation, .. } if relation == "tags"
    ));
    assert_eq!(app.count_all::<TimeEntry>().await, 0);
}

#[tokio::test]
async fn create_with_unknown_tag_id_fails() {
    let app = TestApp::new().await;
    let err = app
        .service()
        .create_one(
            &alice(),
            "TimeEntry",
            time_entry("ghost", 100, 60).with_ids("tags", &[999]).build(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, QueryError::RelationResolution { .. }));
}

#[tokio::test]
async fn tag_ids_sent_as_text_resolve_like_numbers() {
    let app = TestApp::new().await;
    let ctx = alice();
    let billing = app.create(&ctx, "Tag", tag("billing").build()).await;
    let urgent = app.create(&ctx, "Tag", tag("urgent").build()).await;

    let created = app
        .service()
        .create_one(
            &ctx,
            "TimeEntry",
            time_entry("invoice run", 100, 60)
                .with("tags", json!([billing.to_string()]))
                .build(),
        )
        .await
        .unwrap();
    assert_eq!(related_ids(&created, "tags"), vec![billing]);
    let entry = created["id"].as_i64().unwrap();

    // The attached tag is recognised, not resolved a second time.
    let updated = app
        .service()
        .update_one(
            &ctx,
            "TimeEntry",
            &id(entry),
            record(json!({"tags": [billing.to_string(), {"id": urgent.to_string()}]})),
        )
        .await
        .unwrap();
    assert_eq!(related_ids(&updated, "tags"), vec![billing, urgent]);

    let err = app
        .service()
        .update_one(&ctx, "TimeEntry", &id(entry), record(json!({"tags": ["billing"]})))
        .await
        .unwrap_err();
    assert!(matches!(err, QueryError::InvalidRecord(_)));
}

#[tokio::test]
async fn update_keeps_existing_and_adds_new_tags() {
    let app = TestApp::new().await;
    let ctx = alice();
    let old = app.create(&ctx, "Tag", tag("old").build()).await;
    let new = app.create(&ctx, "Tag", tag("new").build()).await;
    let dropped = app.create(&ctx, "Tag", tag("dropped").build()).await;
    let entry = app
        .create(
            &ctx,
            "TimeEntry",
            time_entry("work", 100, 60).with_ids("tags", &[old, dropped]).build(),
        )
        .await;

    let updated = app
        .service()
        .update_one(&ctx, "TimeEntry", &id(entry), record(json!({"tags": [old, new]})))
        .await
        .unwrap();
    assert_eq!(related_ids(&updated, "tags"), vec![old, new]);

    let query = Query {
        relations: vec![RelationQuery::new("tags")],
        ..Query::filtered(Filter::new().field("id", "eq", entry))
    };
    let rows = app.service().query(&ctx, "TimeEntry", &query).await.unwrap();
    assert_eq!(related_ids(&rows[0], "tags"), vec![old, new]);
}

#[tokio::test]
async fn tenants_cannot_see_each_other() {
    let app = TestApp::new().await;
    let acme_tag = app.create(&alice(), "Tag", tag("mine").build()).await;

    let err = app
        .service()
        .get_by_id(&bob(), "Tag", &id(acme_tag))
        .await
        .unwrap_err();
    assert!(matches!(err, QueryError::NotFound { .. }));
    assert!(app.service().find_by_id(&bob(), "Tag", &id(acme_tag)).await.unwrap().is_none());
    assert!(app.all(&bob(), "Tag").await.is_empty());

    // Updates and deletes see the same scope.
    let err = app
        .service()
        .update_one(&bob(), "Tag", &id(acme_tag), record(json!({"name": "stolen"})))
        .await
        .unwrap_err();
    assert!(matches!(err, QueryError::NotFound { .. }));
    let err = app
        .service()
        .delete_one(&bob(), "Tag", &id(acme_tag))
        .await
        .unwrap_err();
    assert!(matches!(err, QueryError::NotFound { .. }));
    assert_eq!(app.count_all::<Tag>().await, 1);
}

#[tokio::test]
async fn tenant_scoped_reads_need_a_tenant() {
    let app = TestApp::new().await;
    let err = app
        .service()
        .query(&RequestContext::default(), "Tag", &Query::default())
        .await
        .unwrap_err();
    assert!(matches!(err, QueryError::MissingContext(_)));
}

#[tokio::test]
async fn create_rejects_existing_records() {
    let app = TestApp::new().await;
    let ctx = alice();
    let existing = app.create(&ctx, "Tag", tag("dup").build()).await;

    let err = app
        .service()
        .create_one(&ctx, "Tag", tag("other").with("id", existing).build())
        .await
        .unwrap_err();
    assert!(matches!(err, QueryError::AlreadyExists { .. }));

    let unique = Filter::new().field("name", "eq", "dup");
    let err = app
        .service()
        .create_with_relations(&ctx, "Tag", tag("dup").build(), Some(&unique))
        .await
        .unwrap_err();
    assert!(matches!(err, QueryError::AlreadyExists { .. }));

    // The same name in another tenant is fine.
    app.service()
        .create_with_relations(&bob(), "Tag", tag("dup").build(), Some(&unique))
        .await
        .unwrap();
}

#[tokio::test]
async fn primary_keys_are_immutable() {
    let app = TestApp::new().await;
    let ctx = alice();
    let tag_id = app.create(&ctx, "Tag", tag("fixed").build()).await;

    let err = app
        .service()
        .update_one(&ctx, "Tag", &id(tag_id), record(json!({"id": 42})))
        .await
        .unwrap_err();
    assert!(matches!(err, QueryError::IdImmutable { .. }));

    let err = app
        .service()
        .update_many(&ctx, "Tag", record(json!({"id": 42})), &Filter::new())
        .await
        .unwrap_err();
    assert!(matches!(err, QueryError::IdImmutable { .. }));
}

#[tokio::test]
async fn unknown_payload_keys_are_rejected() {
    let app = TestApp::new().await;
    let err = app
        .service()
        .create_one(&alice(), "Tag", record(json!({"name": "x", "owner": 1})))
        .await
        .unwrap_err();
    assert!(matches!(err, QueryError::UnknownField { field, .. } if field == "owner"));
}

#[tokio::test]
async fn update_by_filter_lookup() {
    let app = TestApp::new().await;
    let ctx = alice();
    app.create(&ctx, "Tag", tag("draft").build()).await;

    let lookup = Lookup::Filter(Filter::new().field("name", "eq", "draft"));
    let updated = app
        .service()
        .update_with_relations(&ctx, "Tag", &lookup, record(json!({"color": "green"})))
        .await
        .unwrap();
    assert_eq!(updated["color"], json!("green"));

    let missing = Lookup::Filter(Filter::new().field("name", "eq", "absent"));
    let err = app
        .service()
        .update_with_relations(&ctx, "Tag", &missing, record(json!({"color": "red"})))
        .await
        .unwrap_err();
    assert!(matches!(err, QueryError::NotFound { .. }));
}

#[tokio::test]
async fn query_one_refuses_ambiguous_matches() {
    let app = TestApp::new().await;
    let ctx = alice();
    app.create(&ctx, "Tag", tag("same").with("color", "red").build()).await;
    app.create(&ctx, "Tag", tag("same").with("color", "blue").build()).await;

    let err = app
        .service()
        .query_one(&ctx, "Tag", &Filter::new().field("name", "eq", "same"))
        .await
        .unwrap_err();
    assert!(matches!(err, QueryError::MultipleFound { .. }));

    let one = app
        .service()
        .query_one(&ctx, "Tag", &Filter::new().field("color", "eq", "red"))
        .await
        .unwrap();
    assert_eq!(one.unwrap()["color"], json!("red"));

    let none = app
        .service()
        .query_one(&ctx, "Tag", &Filter::new().field("color", "eq", "pink"))
        .await
        .unwrap();
    assert!(none.is_none());
}

#[tokio::test]
async fn required_transactions_refuse_plain_repositories() {
    let pool = memory_pool().await.unwrap();
    tally_kernel::db::migrate(&pool, Dialect::Sqlite).await.unwrap();
    sqlx::query("INSERT INTO tenant (name) VALUES ('Acme')")
        .execute(&pool)
        .await
        .unwrap();
    let repository = Arc::new(SqlRepository::new(pool, Dialect::Sqlite).without_transactions());
    let registry = StrategyRegistry::with_defaults();
    let service = QueryService::new(Arc::new(schema::time_tracking().unwrap()), repository)
        .with_registry(Arc::new(registry));
    let ctx = RequestContext::for_tenant(ACME);

    let err = service
        .create_one(&ctx, "Tag", tag("nope").build())
        .await
        .unwrap_err();
    assert!(matches!(err, QueryError::Configuration(_)));

    // Reads still work.
    assert!(service.query(&ctx, "Tag", &Query::default()).await.unwrap().is_empty());

    let lenient = service.with_transaction_policy(TransactionPolicy::BestEffort);
    let saved = lenient.create_one(&ctx, "Tag", tag("ok").build()).await.unwrap();
    assert_eq!(saved["tenant_id"], json!(ACME));
}

#[tokio::test]
async fn events_follow_committed_writes() {
    let app = TestApp::new().await;
    let ctx = alice();

    // Tags do not emit events.
    app.create(&ctx, "Tag", tag("quiet").build()).await;
    assert!(app.events.drain().await.is_empty());

    let client_id = app.create(&ctx, "Client", client("Initech").build()).await;
    app.service()
        .update_one(&ctx, "Client", &id(client_id), record(json!({"email": "a@b.c"})))
        .await
        .unwrap();
    app.service()
        .delete_one(&ctx, "Client", &id(client_id))
        .await
        .unwrap();

    let events = app.events.drain().await;
    let kinds: Vec<_> = events.iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![
            DomainEventKind::Created,
            DomainEventKind::Updated,
            DomainEventKind::Deleted
        ]
    );
    assert!(events.iter().all(|e| e.entity == "Client" && e.id == json!(client_id)));
    assert_eq!(events[0].tenant_id, Some(ACME));
    assert_eq!(events[1].snapshot["email"], json!("a@b.c"));

    // A failed write publishes nothing.
    let _ = app
        .service()
        .create_one(&ctx, "Client", client("Bad").with("bogus", 1).build())
        .await;
    assert!(app.events.drain().await.is_empty());
}

#[tokio::test]
async fn relation_maintenance_on_many_to_many() {
    let app = TestApp::new().await;
    let ctx = alice();
    let a = app.create(&ctx, "Tag", tag("a").build()).await;
    let b = app.create(&ctx, "Tag", tag("b").build()).await;
    let c = app.create(&ctx, "Tag", tag("c").build()).await;
    let entry = app
        .create(&ctx, "TimeEntry", time_entry("e", 1, 1).with_ids("tags", &[a]).build())
        .await;
    let service = app.service();

    let added = service
        .add_relations(&ctx, "TimeEntry", "tags", &id(entry), vec![id(b)])
        .await
        .unwrap();
    assert_eq!(related_ids(&added, "tags"), vec![a, b]);

    let removed = service
        .remove_relations(&ctx, "TimeEntry", "tags", &id(entry), vec![id(a)])
        .await
        .unwrap();
    assert_eq!(related_ids(&removed, "tags"), vec![b]);

    let set = service
        .set_relations(&ctx, "TimeEntry", "tags", &id(entry), vec![id(a), id(c)])
        .await
        .unwrap();
    assert_eq!(related_ids(&set, "tags"), vec![a, c]);

    let cleared = service
        .set_relations(&ctx, "TimeEntry", "tags", &id(entry), vec![])
        .await
        .unwrap();
    assert!(related_ids(&cleared, "tags").is_empty());

    let err = service
        .add_relations(&ctx, "TimeEntry", "labels", &id(entry), vec![id(a)])
        .await
        .unwrap_err();
    assert!(matches!(err, QueryError::UnknownRelation { .. }));
}

#[tokio::test]
async fn many_to_one_assignment_writes_the_join_column() {
    let app = TestApp::new().await;
    let ctx = alice();
    let first = app.create(&ctx, "Client", client("First").build()).await;
    let second = app.create(&ctx, "Client", client("Second").build()).await;
    let site = app.create(&ctx, "Project", project("Site", Some(first)).build()).await;

    let stored = app.service().get_by_id(&ctx, "Project", &id(site)).await.unwrap();
    assert_eq!(stored["client_id"], json!(first));

    let moved = app
        .service()
        .set_relations(&ctx, "Project", "client", &id(site), vec![id(second)])
        .await
        .unwrap();
    assert_eq!(moved["client_id"], json!(second));

    // A foreign client cannot be assigned.
    let foreign = app.create(&bob(), "Client", client("Globex Inc").build()).await;
    let err = app
        .service()
        .update_one(&ctx, "Project", &id(site), record(json!({"client": foreign})))
        .await
        .unwrap_err();
    assert!(matches!(err, QueryError::RelationResolution { .. }));
}

#[tokio::test]
async fn one_to_many_sync_moves_children() {
    let app = TestApp::new().await;
    let ctx = alice();
    let web = app.create(&ctx, "Project", project("Web", None).build()).await;
    let app_project = app.create(&ctx, "Project", project("App", None).build()).await;
    let owner = app
        .create(&ctx, "Client", client("Owner").with_ids("projects", &[web]).build())
        .await;

    let web_row = app.service().get_by_id(&ctx, "Project", &id(web)).await.unwrap();
    assert_eq!(web_row["client_id"], json!(owner));

    app.service()
        .update_one(
            &ctx,
            "Client",
            &id(owner),
            record(json!({"projects": [app_project]})),
        )
        .await
        .unwrap();

    let web_row = app.service().get_by_id(&ctx, "Project", &id(web)).await.unwrap();
    let app_row = app
        .service()
        .get_by_id(&ctx, "Project", &id(app_project))
        .await
        .unwrap();
    assert!(web_row["client_id"].is_null());
    assert_eq!(app_row["client_id"], json!(owner));
}

#[tokio::test]
async fn system_context_sees_every_tenant() {
    let app = TestApp::new().await;
    app.create(&alice(), "Tag", tag("acme").build()).await;
    app.create(&bob(), "Tag", tag("globex").build()).await;

    let all = app.all(&RequestContext::system(), "Tag").await;
    assert_eq!(all.len(), 2);
    assert_eq!(app.all(&alice(), "Tag").await.len(), 1);
}
