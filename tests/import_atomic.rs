#![allow(clippy::unwrap_used, clippy::expect_used)]

mod util;

use publish_import::import::{EnvelopeError, EntityType, ProblemLevel, Stage};
use publish_import::{import_bundle, ImportContext, ImportError, ImportOptions, VersionPolicy};
use serde_json::json;
use util::{bundle, content_counts, count, full_bundle, temp_pool};

#[tokio::test]
async fn example_bundle_commits_with_resolved_author() {
    let pool = temp_pool().await;
    let policy = VersionPolicy::default();
    let input = bundle(json!({
        "meta": {"version": "2.0.0"},
        "data": {
            "roles": [{"name": "Author"}],
            "users": [{"email": "a@example.com", "roles": ["Author"]}],
            "posts": [{"title": "Hi", "author": "a@example.com"}]
        }
    }));

    let report = import_bundle(&input, &ImportContext::new(&pool, &policy), &ImportOptions::default())
        .await
        .unwrap();

    assert!(report.problems.is_empty());
    assert!(report.data.is_empty());
    assert_eq!(report.original_data, input.data);

    let user_id: String = sqlx::query_scalar("SELECT id FROM users WHERE email = 'a@example.com'")
        .fetch_one(&pool)
        .await
        .unwrap();
    let author_id: String = sqlx::query_scalar("SELECT author_id FROM posts WHERE slug = 'hi'")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(author_id, user_id);
    let linked: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM roles_users ru JOIN roles r ON r.id = ru.role_id WHERE r.name = 'Author' AND ru.user_id = ?1",
    )
    .bind(&user_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(linked, 1);
}

#[tokio::test]
async fn full_bundle_resolves_legacy_ids_across_entities() {
    let pool = temp_pool().await;
    let policy = VersionPolicy::default();
    let options = ImportOptions {
        return_imported_data: true,
        import_persist_user: None,
    };

    let report = import_bundle(&bundle(full_bundle()), &ImportContext::new(&pool, &policy), &options)
        .await
        .unwrap();

    assert_eq!(content_counts(&pool).await, vec![2, 2, 1, 1, 2, 1]);
    assert_eq!(count(&pool, "roles_users").await, 2);
    assert_eq!(count(&pool, "posts_tags").await, 2);

    // Only the protected setting was dropped.
    assert_eq!(report.problems.len(), 1);
    assert_eq!(report.problems[0].entity, EntityType::Settings);
    assert_eq!(report.problems[0].level, ProblemLevel::Warning);

    let eve: String = sqlx::query_scalar("SELECT id FROM users WHERE email = 'e@example.com'")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(report.data["tags"][0]["created_by"], json!(eve));
    assert_eq!(report.data["posts"].len(), 2);
    assert_eq!(report.data["posts"][1]["author_id"], json!(eve));
    assert!(report.data["users"].iter().all(|u| u["id"].is_string()));
    assert_eq!(report.data["users"][0]["status"], json!("locked"));
}

#[tokio::test]
async fn one_failed_row_rolls_back_every_entity() {
    let pool = temp_pool().await;
    let policy = VersionPolicy::default();
    let input = bundle(json!({
        "meta": {"version": "2.0.0"},
        "data": {
            "roles": [{"name": "Author"}],
            "users": [{"email": "a@example.com", "roles": ["Author"]}],
            "tags": [{"name": "News"}],
            "posts": [
                {"title": "Hi", "author": "a@example.com", "tags": ["news"]},
                {"title": "Orphan", "author": "ghost@example.com"}
            ],
            "settings": [{"key": "title", "value": "Blog"}]
        }
    }));

    let err = import_bundle(&input, &ImportContext::new(&pool, &policy), &ImportOptions::default())
        .await
        .unwrap_err();

    match err {
        ImportError::Aborted { errors, .. } => {
            assert_eq!(errors.len(), 1);
            assert_eq!(errors[0].entity, EntityType::Posts);
            assert_eq!(errors[0].reference, "orphan");
            assert!(errors[0].message.contains("ghost@example.com"));
        }
        other => panic!("expected aborted import, got {other:?}"),
    }
    assert_eq!(content_counts(&pool).await, vec![0; 6]);
    assert_eq!(count(&pool, "roles_users").await, 0);
    assert_eq!(count(&pool, "posts_tags").await, 0);
}

#[tokio::test]
async fn aborted_import_keeps_warnings_for_diagnostics() {
    let pool = temp_pool().await;
    let policy = VersionPolicy::default();
    let input = bundle(json!({
        "meta": {"version": "2.0.0"},
        "data": {
            "users": [{"email": "a@example.com", "password": "secret"}],
            "subscribers": [{"name": "No Email"}]
        }
    }));

    let err = import_bundle(&input, &ImportContext::new(&pool, &policy), &ImportOptions::default())
        .await
        .unwrap_err();

    let ImportError::Aborted { errors, problems } = err else {
        panic!("expected aborted import");
    };
    assert_eq!(errors[0].entity, EntityType::Subscribers);
    assert_eq!(problems.len(), 1);
    assert_eq!(problems[0].entity, EntityType::Users);
    assert!(problems.iter().all(|p| p.level == ProblemLevel::Warning));
    assert_eq!(count(&pool, "users").await, 0);
}

#[tokio::test]
async fn envelope_failures_write_nothing() {
    let pool = temp_pool().await;
    let policy = VersionPolicy::default();
    let data = json!({"roles": [{"name": "Author"}]});

    let cases = [
        (json!({"data": data}), EnvelopeError::MissingMetadata),
        (json!({"meta": {}, "data": data}), EnvelopeError::MissingVersion),
        (json!({"meta": {"version": null}, "data": data}), EnvelopeError::MissingVersion),
    ];
    for (value, expected) in cases {
        let err = import_bundle(&bundle(value), &ImportContext::new(&pool, &policy), &ImportOptions::default())
            .await
            .unwrap_err();
        match err {
            ImportError::Envelope(actual) => assert_eq!(actual, expected),
            other => panic!("expected envelope error, got {other:?}"),
        }
    }

    for version in [json!("0.11.14"), json!("not-a-version"), json!(2)] {
        let value = json!({"meta": {"version": version}, "data": data});
        let err = import_bundle(&bundle(value), &ImportContext::new(&pool, &policy), &ImportOptions::default())
            .await
            .unwrap_err();
        assert!(
            matches!(err, ImportError::Envelope(EnvelopeError::UnsupportedVersion { .. })),
            "version {version} should be unsupported, got {err:?}"
        );
    }

    assert_eq!(count(&pool, "roles").await, 0);
}

#[tokio::test]
async fn structural_failure_aborts_after_earlier_writes() {
    let pool = temp_pool().await;
    let policy = VersionPolicy::default();
    let input = bundle(json!({
        "meta": {"version": "2.0.0"},
        "data": {
            "roles": [{"name": "Author"}],
            "users": ["a@example.com"]
        }
    }));

    let err = import_bundle(&input, &ImportContext::new(&pool, &policy), &ImportOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ImportError::Stage {
            entity: EntityType::Users,
            stage: Stage::BeforeImport,
            ..
        }
    ));
    assert!(err.row_errors().is_empty());
    assert_eq!(count(&pool, "roles").await, 0);
}

#[tokio::test]
async fn non_array_payload_is_rejected_before_writes() {
    let pool = temp_pool().await;
    let policy = VersionPolicy::default();
    let input = bundle(json!({
        "meta": {"version": "2.0.0"},
        "data": {"roles": [{"name": "Author"}], "posts": {"title": "Hi"}}
    }));

    let err = import_bundle(&input, &ImportContext::new(&pool, &policy), &ImportOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, ImportError::Bundle(_)));
    assert_eq!(count(&pool, "roles").await, 0);
}

#[tokio::test]
async fn reimport_matches_natural_keys_instead_of_duplicating() {
    let pool = temp_pool().await;
    let policy = VersionPolicy::default();
    let ctx = ImportContext::new(&pool, &policy);
    let input = bundle(full_bundle());

    import_bundle(&input, &ctx, &ImportOptions::default()).await.unwrap();
    let before = content_counts(&pool).await;

    let options = ImportOptions {
        return_imported_data: true,
        ..ImportOptions::default()
    };
    let report = import_bundle(&input, &ctx, &options).await.unwrap();

    assert_eq!(content_counts(&pool).await, before);
    assert_eq!(count(&pool, "roles_users").await, 2);
    assert!(report.data["posts"].is_empty());
    assert!(report.data["users"].is_empty());
    assert!(report
        .problems
        .iter()
        .any(|p| p.entity == EntityType::Posts && p.message.contains("duplicated entry")));
    assert!(report.problems.iter().all(|p| p.level == ProblemLevel::Warning));
}

#[tokio::test]
async fn persist_user_is_recorded_as_creator() {
    let pool = temp_pool().await;
    let policy = VersionPolicy::default();
    let options = ImportOptions {
        import_persist_user: Some("owner-1".into()),
        ..ImportOptions::default()
    };
    let input = bundle(json!({
        "meta": {"version": "v3.0.0"},
        "data": {
            "roles": [{"name": "Author"}],
            "subscribers": [{"email": "reader@example.com"}],
            "tags": [{"name": "News"}]
        }
    }));

    import_bundle(&input, &ImportContext::new(&pool, &policy), &options)
        .await
        .unwrap();

    for table in ["roles", "subscribers", "tags"] {
        let creator: Option<String> =
            sqlx::query_scalar(&format!("SELECT created_by FROM {table}"))
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(creator.as_deref(), Some("owner-1"), "{table}");
    }
}

#[tokio::test]
async fn custom_minimum_version_is_enforced() {
    let pool = temp_pool().await;
    let policy = VersionPolicy::with_minimum(semver::Version::new(3, 0, 0));
    let input = bundle(json!({"meta": {"version": "2.9.9"}, "data": {}}));

    let err = import_bundle(&input, &ImportContext::new(&pool, &policy), &ImportOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ImportError::Envelope(EnvelopeError::UnsupportedVersion { .. })));
}

#[tokio::test]
async fn trigger_rollback_mid_import_commits_nothing() {
    let pool = temp_pool().await;
    let policy = VersionPolicy::default();
    sqlx::query(
        "CREATE TRIGGER reject_subscriber BEFORE INSERT ON subscribers WHEN NEW.email = 'bad@example.com' \
         BEGIN SELECT RAISE(ROLLBACK, 'subscriber rejected'); END",
    )
    .execute(&pool)
    .await
    .unwrap();
    let input = bundle(json!({
        "meta": {"version": "2.0.0"},
        "data": {
            "roles": [{"name": "Author"}],
            "users": [{"email": "a@example.com", "roles": ["Author"]}],
            "subscribers": [{"email": "ok@example.com"}, {"email": "bad@example.com"}],
            "posts": [{"title": "Hi", "author": "a@example.com"}],
            "settings": [{"key": "title", "value": "Blog"}]
        }
    }));

    let err = import_bundle(&input, &ImportContext::new(&pool, &policy), &ImportOptions::default())
        .await
        .unwrap_err();

    assert!(
        matches!(
            err,
            ImportError::Stage {
                entity: EntityType::Subscribers,
                stage: Stage::DoImport,
                ..
            }
        ),
        "expected structural failure, got {err:?}"
    );
    assert_eq!(content_counts(&pool).await, vec![0; 6]);
    assert_eq!(count(&pool, "roles_users").await, 0);
}

#[tokio::test]
async fn in_bundle_duplicate_resolves_to_first_record() {
    let pool = temp_pool().await;
    let policy = VersionPolicy::default();
    let input = bundle(json!({
        "meta": {"version": "2.0.0"},
        "data": {
            "users": [
                {"id": 1, "email": "a@example.com", "name": "Ada"},
                {"id": 2, "email": "a@example.com", "name": "Ada again"}
            ],
            "posts": [{"title": "Hi", "author_id": 2}]
        }
    }));

    let report = import_bundle(&input, &ImportContext::new(&pool, &policy), &ImportOptions::default())
        .await
        .unwrap();

    assert_eq!(count(&pool, "users").await, 1);
    let user_id: String = sqlx::query_scalar("SELECT id FROM users WHERE email = 'a@example.com'")
        .fetch_one(&pool)
        .await
        .unwrap();
    let author_id: String = sqlx::query_scalar("SELECT author_id FROM posts WHERE slug = 'hi'")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(author_id, user_id);
    assert!(report
        .problems
        .iter()
        .any(|p| p.entity == EntityType::Users && p.message.contains("duplicated entry")));
}

