//! Contract tests for KuboClient against a mocked `/api/v0` RPC.
//!
//! | Command | Test |
//! |---------|------|
//! | `add` | `add_*` |
//! | `object/new`, `object/patch/add-link` | `directory_*` |
//! | `key/*` | `key_*` |
//! | `name/*` | `name_*` |
//! | `repo/gc` | `gc_*` |

use ipt_core::config::NodeConfig;
use ipt_core::{Cid, IptError, NamingKey};
use ipt_storage::{check_health, ContentNode, KuboClient};
use wiremock::matchers::{method, path, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> KuboClient {
    KuboClient::new(&NodeConfig {
        api_url: server.uri(),
        request_timeout_secs: 5,
        ..Default::default()
    })
    .unwrap()
}

fn key() -> NamingKey {
    NamingKey {
        name: "tiles-demo".into(),
        id: "k51demo".into(),
    }
}

// ── version / health ────────────────────────────────────────────────

#[tokio::test]
async fn version_reports_node_version() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v0/version"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "Version": "0.29.0", "Commit": "", "Repo": "15"
        })))
        .mount(&server)
        .await;

    assert_eq!(check_health(&client(&server)).await.unwrap(), "0.29.0");
}

#[tokio::test]
async fn unreachable_node_is_storage_unavailable() {
    let node = KuboClient::new(&NodeConfig {
        api_url: "http://127.0.0.1:9".into(),
        request_timeout_secs: 2,
        ..Default::default()
    })
    .unwrap();
    assert!(matches!(
        node.version().await,
        Err(IptError::StorageUnavailable { .. })
    ));
}

// ── add ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn add_is_unpinned_and_returns_last_hash() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v0/add"))
        .and(query_param("pin", "false"))
        .and(query_param("cid-version", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "{\"Name\":\"tile\",\"Hash\":\"QmTile\",\"Size\":\"12\"}\n",
        ))
        .expect(1)
        .mount(&server)
        .await;

    let cid = client(&server).add(b"tile bytes".to_vec(), false).await.unwrap();
    assert_eq!(cid, Cid::new("QmTile"));
}

#[tokio::test]
async fn add_error_body_message_is_surfaced() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v0/add"))
        .respond_with(ResponseTemplate::new(500).set_body_json(serde_json::json!({
            "Message": "repo is full", "Code": 0, "Type": "error"
        })))
        .mount(&server)
        .await;

    match client(&server).add(b"x".to_vec(), false).await {
        Err(IptError::StorageUnavailable { operation, message }) => {
            assert_eq!(operation, "add");
            assert!(message.contains("repo is full"), "got {message}");
        }
        other => panic!("unexpected: {other:?}"),
    }
}

// ── directories ─────────────────────────────────────────────────────

#[tokio::test]
async fn directory_new_and_patch_add_link() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v0/object/new"))
        .and(query_param("arg", "unixfs-dir"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "Hash": "QmUNLLsPACCz1vLxQVkXqqLX5R1X345qqfHbsf67hvA3Nn"
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v0/object/patch/add-link"))
        .and(query_param("create", "true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "Hash": "QmPatched"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let node = client(&server);
    let empty = node.empty_directory().await.unwrap();
    let root = node
        .patch_add_link(&empty, "0/0/0.png", &Cid::new("QmTile"))
        .await
        .unwrap();
    assert_eq!(root, Cid::new("QmPatched"));
}

// ── keys ────────────────────────────────────────────────────────────

#[tokio::test]
async fn key_list_and_gen() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v0/key/list"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "Keys": [
                {"Name": "self", "Id": "k51self"},
                {"Name": "tiles-demo", "Id": "k51demo"}
            ]
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v0/key/gen"))
        .and(query_param("arg", "tiles-new"))
        .and(query_param("type", "ed25519"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "Name": "tiles-new", "Id": "k51new"
        })))
        .mount(&server)
        .await;

    let node = client(&server);
    let keys = node.key_list().await.unwrap();
    assert_eq!(keys.len(), 2);
    assert_eq!(keys[1], key());

    let created = node.key_gen("tiles-new", "ed25519").await.unwrap();
    assert_eq!(created.id, "k51new");
}

// ── names ───────────────────────────────────────────────────────────

#[tokio::test]
async fn name_publish_uses_key_name_and_ipfs_path() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v0/name/publish"))
        .and(query_param("arg", "/ipfs/QmRoot"))
        .and(query_param("key", "tiles-demo"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "Name": "k51demo", "Value": "/ipfs/QmRoot"
        })))
        .expect(1)
        .mount(&server)
        .await;

    client(&server)
        .name_publish(&key(), &Cid::new("QmRoot"))
        .await
        .unwrap();
}

#[tokio::test]
async fn name_resolve_returns_root() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v0/name/resolve"))
        .and(query_param("arg", "/ipns/k51demo"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "Path": "/ipfs/QmRoot"
        })))
        .mount(&server)
        .await;

    let root = client(&server).name_resolve(&key()).await.unwrap();
    assert_eq!(root, Some(Cid::new("QmRoot")));
}

#[tokio::test]
async fn name_resolve_failure_is_absent() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v0/name/resolve"))
        .respond_with(ResponseTemplate::new(500).set_body_json(serde_json::json!({
            "Message": "could not resolve name", "Code": 0, "Type": "error"
        })))
        .mount(&server)
        .await;

    assert_eq!(client(&server).name_resolve(&key()).await.unwrap(), None);
}

// ── repo/gc ─────────────────────────────────────────────────────────

#[tokio::test]
async fn gc_counts_removed_and_collects_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v0/repo/gc"))
        // quiet mode drops the per-key lines the summary counts
        .and(query_param_is_missing("quiet"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "{\"Key\":{\"/\":\"QmA\"}}\n{\"Key\":{\"/\":\"QmB\"}}\n{\"Error\":\"block busy\"}\n",
        ))
        .mount(&server)
        .await;

    let summary = client(&server).repo_gc().await.unwrap();
    assert_eq!(summary.removed, 2);
    assert_eq!(summary.errors, vec!["block busy".to_string()]);
}
