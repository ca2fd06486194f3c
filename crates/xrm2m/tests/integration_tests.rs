//! End-to-end client behaviour against a stub M2M server

mod integration;

use anyhow::Result;
use integration::*;
use serde_json::{json, Value};
use xrm2m::proto::{RemoteErrorKind, RpcError};
use xrm2m::M2mError;

fn not_found(path: &str) -> RpcError {
    RpcError::new(-32000, format!("No such path: {}", path))
        .with_data(json!({"type": "not_found_error", "path": path}))
}

#[tokio::test]
async fn test_set_then_commit_returns_revision() -> Result<()> {
    let (mut client, server) = StubServer::start(|req| match req.method.as_str() {
        "set" => Ok(Value::Null),
        "commit" => Ok(json!("1001")),
        other => panic!("unexpected method {}", other),
    });

    client.set("RootCfg.Hostname", "xr-lab-1").await;
    let commit_id = client.commit(None, None).await;

    assert!(client.error().is_none());
    assert_eq!(commit_id.as_deref(), Some("1001"));
    assert_eq!(server.methods(), vec!["set", "commit"]);
    assert_eq!(server.params(0), json!({"path": "RootCfg.Hostname", "value": "xr-lab-1"}));

    client.into_result().await?;
    Ok(())
}

#[tokio::test]
async fn test_rejected_delete_skips_later_calls() -> Result<()> {
    let (mut client, server) = StubServer::start(|req| match req.method.as_str() {
        "delete" => Err(not_found("RootCfg.Hostname")),
        _ => Ok(json!([{"path": "RootCfg.Hostname", "operation": "DELETE", "value": null}])),
    });

    client.delete("RootCfg.Hostname").await;
    assert_eq!(server.request_count(), 1);

    let changes = client.get_changes().await;
    assert!(changes.is_empty());
    assert_eq!(server.request_count(), 1);

    assert_eq!(client.last_op(), "delete");
    let remote = client.error().and_then(M2mError::remote).expect("remote error latched");
    assert_eq!(remote.kind(), RemoteErrorKind::NotFound);
    assert_eq!(remote.path(), Some("RootCfg.Hostname"));
    Ok(())
}

#[tokio::test]
async fn test_latch_once_returns_zero_values() -> Result<()> {
    let (mut client, server) = StubServer::start(|req| match req.method.as_str() {
        "cli_set" => Err(RpcError::new(-32000, "Invalid input").with_data(json!({"type": "cisco_error"}))),
        "get_version" => Ok(json!({"major": 1, "minor": 0})),
        _ => Ok(json!("should never be sent")),
    });

    let version = client.get_version().await;
    assert_eq!(version.get("minor"), Some(&json!(0)));

    client.cli_set("hostnme typo").await;
    let first_error = client.error().map(ToString::to_string);
    assert!(first_error.is_some());

    assert_eq!(client.cli_exec("show clock").await, "");
    assert!(client.cli_get("show interfaces").await.is_empty());
    assert!(client.get("RootCfg").await.is_empty());
    assert!(client.get_children("RootCfg").await.is_empty());
    assert_eq!(client.get_nested("RootCfg").await, Value::Null);
    assert_eq!(client.get_parent("RootCfg.Hostname").await, "");
    assert_eq!(client.normalize_path("RootCfg.Hostname").await, "");
    client.set("RootCfg.Hostname", "xr1").await;
    client.replace("RootCfg").await;
    client.write_file("disk0:/f", b"x").await;
    assert_eq!(client.commit(Some("c"), Some("l")).await, None);
    assert_eq!(client.commit_replace(None, None).await, None);
    client.discard_changes().await;
    assert!(client.get_changes().await.is_empty());
    assert!(client.get_schema("RootCfg", "").await.is_empty());
    assert!(client.get_version().await.is_empty());
    assert!(client.cli_describe("hostname x", true).await.is_empty());

    assert_eq!(server.methods(), vec!["get_version", "cli_set"]);
    assert_eq!(client.last_op(), "cli_set");
    assert_eq!(client.error().map(ToString::to_string), first_error);
    Ok(())
}

#[tokio::test]
async fn test_calls_wait_for_preamble() -> Result<()> {
    let (mut client, mut server) = StubServer::start_held(|_| Ok(json!({"major": 1})));

    let call = tokio::spawn(async move {
        let version = client.get_version().await;
        (client, version)
    });

    tokio::time::sleep(settle()).await;
    assert_eq!(server.request_count(), 0);
    assert!(!call.is_finished());

    server.release_preamble();
    let (client, version) = call.await?;

    assert_eq!(version.get("major"), Some(&json!(1)));
    assert!(client.error().is_none());
    assert_eq!(server.request_count(), 1);
    Ok(())
}

#[tokio::test]
async fn test_preamble_failure_latches_transport_error() -> Result<()> {
    let (mut client, server) = StubServer::start_held(|_| Ok(Value::Null));
    // Server goes away without ever printing its preamble
    drop(server);

    assert_eq!(client.cli_exec("show clock").await, "");
    match client.error() {
        Some(M2mError::Io(e)) => assert_eq!(e.kind(), std::io::ErrorKind::BrokenPipe),
        other => panic!("expected a transport error, got {:?}", other),
    }
    assert_eq!(client.last_op(), "cli_exec");
    Ok(())
}

#[tokio::test]
async fn test_operations_keep_issue_order() -> Result<()> {
    let (mut client, server) = StubServer::start(|req| match req.method.as_str() {
        "get_children" => Ok(json!(["RootCfg.Hostname"])),
        "commit_replace" => Ok(json!("1002")),
        _ => Ok(Value::Null),
    });

    client.cli_set("hostname xr2").await;
    let children = client.get_children("RootCfg").await;
    client.replace("RootCfg.Hostname").await;
    let commit_id = client.commit_replace(Some("reset"), None).await;

    assert_eq!(children, vec!["RootCfg.Hostname".to_string()]);
    assert_eq!(commit_id.as_deref(), Some("1002"));
    assert_eq!(
        server.methods(),
        vec!["cli_set", "get_children", "replace", "commit_replace"]
    );
    assert_eq!(server.params(3), json!({"comment": "reset"}));
    Ok(())
}
