//! Dispatcher integration tests
//!
//! End-to-end tests driving the dispatcher with the in-memory session
//! authority and data store. Covers authentication, every operation,
//! path resolution, graph sanitization, reply delivery and concurrency.

use a3s_backbone::{
    AmbientContext, BackboneConfig, BackboneError, Dispatcher, FileRecord, MemoryDataStore,
    MemorySessionAuthority, ObjectNode, Operation, Payload, Reply, Request, Result, Session,
    SessionAuthority, StoreStats,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::oneshot;

struct Fixture {
    dispatcher: Dispatcher,
    store: Arc<MemoryDataStore>,
    sessions: Arc<MemorySessionAuthority>,
}

fn fixture_with(store: MemoryDataStore, root: &str) -> Fixture {
    let sessions = Arc::new(MemorySessionAuthority::new());
    sessions.insert("T1", Session::new("uuid-1", "User")).unwrap();
    sessions.insert("T3", Session::new("uuid-3", "User")).unwrap();

    let store = Arc::new(store);
    let mut config = BackboneConfig::new(root);
    config.worker_pool_size = Some(4);
    let dispatcher = Dispatcher::from_config(&config, sessions.clone(), store.clone()).unwrap();
    Fixture {
        dispatcher,
        store,
        sessions,
    }
}

fn seeded_store() -> MemoryDataStore {
    let store = MemoryDataStore::new();
    store.insert(
        ObjectNode::new("Image", 42)
            .with_value("name", "cells.tiff")
            .with_owner(7, 3),
    );
    store.insert_image(
        ObjectNode::new("Image", 1).with_value("name", "plate"),
        ObjectNode::new("Pixels", 10).with_value("sizeX", 1024),
    );
    store.insert_rendering_settings(10, ObjectNode::new("RenderingDef", 100));
    store.insert_enumeration(
        "PixelsType",
        vec![
            ObjectNode::new("PixelsType", 1).with_value("value", "uint8"),
            ObjectNode::new("PixelsType", 2).with_value("value", "uint16"),
        ],
    );
    store.insert_managed_file(
        FileRecord::managed(200, "img001.tiff", "repo"),
        &["2024", "01", "img001.tiff"],
    );
    store.insert_managed_file(
        FileRecord::managed(201, "passwd", "repo"),
        &["a", "..", "..", "etc", "passwd"],
    );
    store.insert_legacy_file(FileRecord::legacy(202, "old.tif"), "/OMERO/Files/202");
    store.insert_file_annotation(300, 200);
    store.insert_fileset(1, vec![200, 202]);
    store.hide_from("Image", 42, "uuid-3");
    store
}

fn fixture() -> Fixture {
    fixture_with(seeded_store(), "/data/repo")
}

fn session(token: &str) -> Payload {
    Payload::new().with("sessionKey", token)
}

async fn call(fx: &Fixture, op: Operation, payload: Payload) -> Reply {
    fx.dispatcher.handle(Request::new(op.subject(), payload)).await
}

// ─── Authentication ──────────────────────────────────────────────

#[tokio::test]
async fn test_known_token_get_object() {
    let fx = fixture();
    let payload = session("T1")
        .with("type", "Image")
        .with("id", 42);

    let reply = call(&fx, Operation::GetObject, payload).await;
    assert!(reply.is_success());

    let json = reply.json().unwrap();
    let root = json["roots"][0].as_u64().unwrap() as usize;
    assert_eq!(json["nodes"][root]["kind"], "Image");
    assert_eq!(json["nodes"][root]["id"], 42);
    assert_eq!(json["nodes"][root]["fields"]["name"]["value"], "cells.tiff");
    assert_eq!(json["nodes"][root]["details"]["ownerId"], 7);
}

#[tokio::test]
async fn test_unknown_token_rejected_without_store_calls() {
    let fx = fixture();

    for op in Operation::ALL {
        if op == Operation::IsSessionValid {
            continue;
        }
        let payload = session("T2")
            .with("type", "Image")
            .with("id", 42)
            .with("imageId", 1)
            .with("pixelsId", 10)
            .with("originalFileIds", serde_json::json!([200]));
        let reply = call(&fx, op, payload).await;
        assert_eq!(
            reply,
            Reply::Failure(a3s_backbone::Failure {
                code: 403,
                message: "Session invalid".to_string()
            }),
            "{}",
            op
        );
    }

    assert_eq!(fx.store.stats(), StoreStats::default());
}

#[tokio::test]
async fn test_revoked_token_rejected() {
    let fx = fixture();
    let payload = || session("T1").with("type", "Image").with("id", 42);

    assert_eq!(call(&fx, Operation::CanRead, payload()).await, Reply::bool(true));
    assert!(fx.sessions.revoke("T1").unwrap());
    assert_eq!(
        call(&fx, Operation::CanRead, payload()).await.failure_code(),
        Some(403)
    );
}

#[tokio::test]
async fn test_is_session_valid() {
    let fx = fixture();
    let valid = call(&fx, Operation::IsSessionValid, session("T1")).await;
    let invalid = call(&fx, Operation::IsSessionValid, session("T2")).await;
    let missing = call(&fx, Operation::IsSessionValid, Payload::new()).await;

    assert_eq!(valid, Reply::bool(true));
    assert_eq!(invalid, Reply::bool(false));
    assert_eq!(missing, Reply::bool(false));
    assert_eq!(fx.store.stats().begun, 0);
}

struct UnreachableAuthority;

#[async_trait]
impl SessionAuthority for UnreachableAuthority {
    async fn find(&self, _token: &str) -> Result<Option<Session>> {
        Err(BackboneError::Connection("session service down".to_string()))
    }
}

#[tokio::test]
async fn test_throwing_authority() {
    let store = Arc::new(seeded_store());
    let config = BackboneConfig::new("/data/repo");
    let dispatcher =
        Dispatcher::from_config(&config, Arc::new(UnreachableAuthority), store.clone()).unwrap();

    let valid = dispatcher
        .handle(Request::new(
            "omero.is_session_valid",
            session("T1"),
        ))
        .await;
    assert_eq!(valid, Reply::bool(false));

    let get = dispatcher
        .handle(Request::new(
            "omero.get_object",
            session("T1").with("type", "Image").with("id", 42),
        ))
        .await;
    assert_eq!(get.failure_code(), Some(403));
    assert_eq!(store.stats().calls, 0);
}

#[tokio::test]
async fn test_unsupported_operation() {
    let fx = fixture();
    let reply = fx
        .dispatcher
        .handle(Request::new("omero.delete_object", session("T1")))
        .await;
    assert_eq!(reply.failure_code(), Some(404));
    assert_eq!(fx.store.stats().begun, 0);
}

// ─── Operations ──────────────────────────────────────────────────

#[tokio::test]
async fn test_can_read_respects_visibility() {
    let fx = fixture();
    let payload = |token: &str| session(token).with("type", "Image").with("id", 42);

    assert_eq!(call(&fx, Operation::CanRead, payload("T1")).await, Reply::bool(true));
    assert_eq!(call(&fx, Operation::CanRead, payload("T3")).await, Reply::bool(false));
}

#[tokio::test]
async fn test_get_object_failures() {
    let fx = fixture();

    let missing = call(
        &fx,
        Operation::GetObject,
        session("T1").with("type", "Image").with("id", 99),
    )
    .await;
    assert_eq!(missing.failure_code(), Some(404));

    let hidden = call(
        &fx,
        Operation::GetObject,
        session("T3").with("type", "Image").with("id", 42),
    )
    .await;
    assert_eq!(hidden.failure_code(), Some(500));

    let bad_payload = call(
        &fx,
        Operation::GetObject,
        session("T1").with("type", "Image").with("id", "42"),
    )
    .await;
    let Reply::Failure(failure) = bad_payload else {
        panic!("expected failure");
    };
    assert_eq!(failure.code, 500);
    assert!(failure.message.contains("'id'"));

    let stats = fx.store.stats();
    assert_eq!(stats.begun, 3);
    assert_eq!(stats.rolled_back, 3);
    assert_eq!(stats.committed, 0);
}

#[tokio::test]
async fn test_get_all_enumerations() {
    let fx = fixture();
    let reply = call(
        &fx,
        Operation::GetAllEnumerations,
        session("T1").with("type", "PixelsType"),
    )
    .await;
    let json = reply.json().unwrap();
    assert_eq!(json["roots"].as_array().unwrap().len(), 2);
    assert_eq!(json["nodes"][1]["fields"]["value"]["value"], "uint16");
}

#[tokio::test]
async fn test_get_rendering_settings() {
    let fx = fixture();
    let found = call(
        &fx,
        Operation::GetRenderingSettings,
        session("T1").with("pixelsId", 10),
    )
    .await;
    assert_eq!(found.json().unwrap()["nodes"][0]["kind"], "RenderingDef");

    let none = call(
        &fx,
        Operation::GetRenderingSettings,
        session("T1").with("pixelsId", 11),
    )
    .await;
    assert_eq!(none.json(), Some(serde_json::Value::Null));
}

#[tokio::test]
async fn test_get_pixels_description_and_pixels_agree() {
    let fx = fixture();
    let mut replies = Vec::new();
    for op in [Operation::GetPixelsDescription, Operation::GetPixels] {
        let reply = call(&fx, op, session("T1").with("imageId", 1)).await;
        replies.push(reply.json().unwrap());
    }
    assert_eq!(replies[0], replies[1]);

    let json = &replies[0];
    let root = json["roots"][0].as_u64().unwrap() as usize;
    assert_eq!(json["nodes"][root]["kind"], "Pixels");
    let image = json["nodes"][root]["fields"]["image"]["ref"].as_u64().unwrap() as usize;
    assert_eq!(json["nodes"][image]["kind"], "Image");

    let missing = call(
        &fx,
        Operation::GetPixels,
        session("T1").with("imageId", 77),
    )
    .await;
    assert_eq!(missing.failure_code(), Some(404));
}

#[tokio::test]
async fn test_get_imported_image_files() {
    let fx = fixture();
    let reply = call(
        &fx,
        Operation::GetImportedImageFiles,
        session("T1").with("imageId", 1),
    )
    .await;
    let json = reply.json().unwrap();
    let names: Vec<_> = json["nodes"]
        .as_array()
        .unwrap()
        .iter()
        .map(|n| n["fields"]["name"]["value"].clone())
        .collect();
    assert_eq!(names, vec!["img001.tiff", "old.tif"]);
}

// ─── Path Resolution ─────────────────────────────────────────────

#[tokio::test]
async fn test_file_path_inside_root() {
    let fx = fixture();
    let reply = call(
        &fx,
        Operation::GetFilePath,
        session("T1").with("type", "OriginalFile").with("id", 200),
    )
    .await;
    assert_eq!(
        reply.json(),
        Some(serde_json::json!("/data/repo/2024/01/img001.tiff"))
    );

    let via_annotation = call(
        &fx,
        Operation::GetFilePath,
        session("T1").with("type", "FileAnnotation").with("id", 300),
    )
    .await;
    assert_eq!(reply, via_annotation);
}

#[tokio::test]
async fn test_file_path_traversal_rejected() {
    let fx = fixture();
    for _ in 0..2 {
        let reply = call(
            &fx,
            Operation::GetFilePath,
            session("T1").with("type", "OriginalFile").with("id", 201),
        )
        .await;
        let Reply::Failure(failure) = reply else {
            panic!("expected failure");
        };
        assert_eq!(failure.code, 404);
        assert_eq!(failure.message, "Illegal path for original file 201");
        assert!(!failure.message.contains("/etc"));
        assert!(!failure.message.contains("/data/repo"));
    }
}

#[tokio::test]
async fn test_legacy_file_path() {
    let fx = fixture();
    let reply = call(
        &fx,
        Operation::GetFilePath,
        session("T1").with("type", "OriginalFile").with("id", 202),
    )
    .await;
    assert_eq!(reply.json(), Some(serde_json::json!("/OMERO/Files/202")));
}

#[tokio::test]
async fn test_original_file_paths() {
    let fx = fixture();
    let reply = call(
        &fx,
        Operation::GetOriginalFilePaths,
        session("T1")
            .with("originalFileIds", serde_json::json!([200, 202])),
    )
    .await;
    assert_eq!(
        reply.json(),
        Some(serde_json::json!({
            "managedRepositoryRoot": "/data/repo",
            "paths": ["/data/repo/2024/01/img001.tiff", "/OMERO/Files/202"],
        }))
    );

    let rejected = call(
        &fx,
        Operation::GetOriginalFilePaths,
        session("T1")
            .with("originalFileIds", serde_json::json!([200, 201])),
    )
    .await;
    assert_eq!(rejected.failure_code(), Some(404));
}

#[tokio::test]
async fn test_resolved_paths_share_root_prefix() {
    let root = "/srv/omero/ManagedRepository";
    let store = MemoryDataStore::new();
    let layouts: &[&[&str]] = &[
        &["user_1", "2024-03", "plate.zarr", "0", "0"],
        &["a", "b", "..", "c.tif"],
        &["x", ".", "y.tif"],
        &["single.tif"],
    ];
    for (i, parts) in layouts.iter().enumerate() {
        store.insert_managed_file(FileRecord::managed(i as i64, "f", "repo"), parts);
    }
    let fx = fixture_with(store, root);

    for i in 0..layouts.len() {
        let reply = call(
            &fx,
            Operation::GetFilePath,
            session("T1").with("type", "OriginalFile").with("id", i as i64),
        )
        .await;
        if let Some(serde_json::Value::String(path)) = reply.json() {
            assert!(path.starts_with(root), "{}", path);
        } else {
            assert_eq!(reply.failure_code(), Some(404));
        }
    }
}

// ─── Sanitization ────────────────────────────────────────────────

#[tokio::test]
async fn test_ambient_context_stripped_from_replies() {
    let mut props = HashMap::new();
    props.insert("omero.db.pass".to_string(), "hunter2".to_string());
    let store = seeded_store().with_ambient_context(AmbientContext::new(props));
    let fx = fixture_with(store, "/data/repo");

    let reply = call(
        &fx,
        Operation::GetPixelsDescription,
        session("T1").with("imageId", 1),
    )
    .await;
    assert!(reply.is_success());

    let Reply::Success(a3s_backbone::ReplyBody::Serialized(bytes)) = reply else {
        panic!("expected serialized body");
    };
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(!text.contains("hunter2"));
    assert!(!text.contains("contexts"));
}

// ─── Delivery & Concurrency ──────────────────────────────────────

#[tokio::test]
async fn test_exactly_one_reply_per_request() {
    let fx = fixture();
    let cases = [
        ("omero.get_object", session("T1").with("type", "Image").with("id", 42)),
        ("omero.get_object", session("T2")),
        ("omero.nope", Payload::new()),
        ("omero.is_session_valid", Payload::new()),
    ];
    for (subject, payload) in cases {
        let (tx, rx) = oneshot::channel();
        assert!(fx.dispatcher.handle_with_reply(Request::new(subject, payload), tx).await);
        assert!(rx.await.is_ok());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_isolated() {
    let fx = Arc::new(fixture());

    let mut handles = Vec::new();
    for i in 0..64 {
        let fx = fx.clone();
        handles.push(tokio::spawn(async move {
            let (token, expect_ok) = match i % 3 {
                0 => ("T1", true),
                1 => ("T3", false),
                _ => ("T2", false),
            };
            let reply = call(
                &fx,
                Operation::GetObject,
                session(token).with("type", "Image").with("id", 42),
            )
            .await;
            assert_eq!(reply.is_success(), expect_ok, "request {} as {}", i, token);
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let stats = fx.store.stats();
    assert_eq!(stats.begun, stats.committed + stats.rolled_back);
    assert_eq!(fx.dispatcher.executor().idle(), 4);
}
