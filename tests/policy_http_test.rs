//! Integration tests for the HTTP clients (policy engine, key authority,
//! status sink) against an in-process stub server.

use hub_gateway::error::GatewayError;
use hub_gateway::identity::{HttpKeyAuthority, KeyAuthority};
use hub_gateway::policy::{HttpPolicyClient, PolicyApi, PolicyDecision};
use hub_gateway::resource::Action;
use hub_gateway::status::{ConnectionStatus, HttpStatusSink, StatusSink};

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use warp::http::StatusCode;
use warp::Filter;

const PUBLIC_PEM: &str = include_str!("fixtures/device_a.pub.pem");

const PAGE_SIZE: usize = 50;
const TOTAL_CONSENTS: usize = 120;

async fn spawn_stub() -> SocketAddr {
    let check = warp::path!("check")
        .and(warp::post())
        .and(warp::body::json())
        .map(|body: serde_json::Value| {
            let status = if body["subject"] == "allowed-thing" {
                StatusCode::OK
            } else if body["subject"] == "broken-thing" {
                StatusCode::INTERNAL_SERVER_ERROR
            } else {
                StatusCode::FORBIDDEN
            };
            warp::reply::with_status(warp::reply::json(&serde_json::json!({})), status)
        });

    let policies = warp::path!("policies")
        .and(warp::get())
        .and(warp::query::<HashMap<String, String>>())
        .map(|query: HashMap<String, String>| {
            if query.get("resource").map(String::as_str) == Some("boom") {
                return warp::reply::with_status(
                    warp::reply::json(&serde_json::json!({})),
                    StatusCode::INTERNAL_SERVER_ERROR,
                );
            }
            let limit: usize = query["limit"].parse().unwrap();
            let offset: usize = query["offset"].parse().unwrap();
            let end = TOTAL_CONSENTS.min(offset + limit);
            let page: Vec<serde_json::Value> = (offset.min(TOTAL_CONSENTS)..end)
                .map(|i| {
                    serde_json::json!({
                        "id": format!("consent-{i}"),
                        "subjects": ["group-1"],
                        "actions": ["read"],
                        "resources": ["dcd:properties:XYZ"],
                        "effect": "allow",
                    })
                })
                .collect();
            warp::reply::with_status(warp::reply::json(&page), StatusCode::OK)
        });

    let roles = warp::path!("roles")
        .and(warp::get())
        .and(warp::query::<HashMap<String, String>>())
        .map(|query: HashMap<String, String>| {
            if query.get("member").map(String::as_str) == Some("member-1") {
                warp::reply::json(&serde_json::json!([{"id": "group-1"}, {"id": "group-2"}]))
            } else {
                warp::reply::json(&serde_json::json!([]))
            }
        });

    let keys = warp::path!("things" / String / "key")
        .and(warp::get())
        .map(|device_id: String| {
            if device_id == "thing-1" {
                warp::reply::with_status(
                    warp::reply::json(&serde_json::json!({ "publicKey": PUBLIC_PEM })),
                    StatusCode::OK,
                )
            } else {
                warp::reply::with_status(
                    warp::reply::json(&serde_json::json!({})),
                    StatusCode::NOT_FOUND,
                )
            }
        });

    let status = warp::path!("things" / String / "status")
        .and(warp::put())
        .and(warp::body::json())
        .map(|_device_id: String, _body: serde_json::Value| warp::reply());

    let slow_check = warp::path!("slow" / "check").and(warp::post()).and_then(|| async {
        tokio::time::sleep(Duration::from_millis(500)).await;
        Ok::<_, warp::Rejection>(warp::reply())
    });

    let routes = check
        .or(policies)
        .or(roles)
        .or(keys)
        .or(status)
        .or(slow_check);
    let (addr, server) = warp::serve(routes).bind_ephemeral(([127, 0, 0, 1], 0));
    tokio::spawn(server);
    addr
}

fn policy_client(addr: SocketAddr) -> HttpPolicyClient {
    HttpPolicyClient::new(
        format!("http://{addr}"),
        Duration::from_secs(5),
        PAGE_SIZE,
    )
    .unwrap()
}

#[tokio::test]
async fn check_maps_status_codes_to_decisions() {
    let addr = spawn_stub().await;
    let client = policy_client(addr);

    let allowed = client
        .check("allowed-thing", Action::Update, "dcd:things:ABC")
        .await
        .unwrap();
    assert_eq!(allowed, PolicyDecision::Allow);

    let denied = client
        .check("denied-thing", Action::Update, "dcd:things:ABC")
        .await
        .unwrap();
    assert_eq!(denied, PolicyDecision::Deny);

    let err = client
        .check("broken-thing", Action::Update, "dcd:things:ABC")
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::PolicyEngine(_)));
}

#[tokio::test]
async fn consent_listing_accumulates_every_page() {
    let addr = spawn_stub().await;
    let client = policy_client(addr);

    let grants = client.list_consents("dcd:properties:XYZ").await.unwrap();
    assert_eq!(grants.len(), TOTAL_CONSENTS);
    assert_eq!(grants[0].id, "consent-0");
    assert_eq!(grants[TOTAL_CONSENTS - 1].id, "consent-119");
}

#[tokio::test]
async fn consent_listing_surfaces_server_errors() {
    let addr = spawn_stub().await;
    let client = policy_client(addr);

    let err = client.list_consents("boom").await.unwrap_err();
    assert!(matches!(err, GatewayError::PolicyEngine(_)));
}

#[tokio::test]
async fn group_membership_checks_the_role_listing() {
    let addr = spawn_stub().await;
    let client = policy_client(addr);

    assert!(client
        .check_group_membership("member-1", "group-2")
        .await
        .unwrap());
    assert!(!client
        .check_group_membership("member-1", "group-9")
        .await
        .unwrap());
    assert!(!client
        .check_group_membership("stranger", "group-1")
        .await
        .unwrap());
}

#[tokio::test]
async fn exceeding_the_round_trip_budget_is_an_error() {
    let addr = spawn_stub().await;
    let client = HttpPolicyClient::new(
        format!("http://{addr}/slow"),
        Duration::from_millis(100),
        PAGE_SIZE,
    )
    .unwrap();

    let err = client
        .check("allowed-thing", Action::Update, "dcd:things:ABC")
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::PolicyEngine(_)));
}

#[tokio::test]
async fn key_authority_fetches_and_misses() {
    let addr = spawn_stub().await;
    let authority =
        HttpKeyAuthority::new(format!("http://{addr}"), Duration::from_secs(5)).unwrap();

    let pem = authority.fetch_key("thing-1").await.unwrap();
    assert_eq!(pem, PUBLIC_PEM);

    let err = authority.fetch_key("ghost").await.unwrap_err();
    assert!(matches!(err, GatewayError::UnknownIdentity(ref id) if id == "ghost"));
}

#[tokio::test]
async fn status_sink_delivers_updates() {
    let addr = spawn_stub().await;
    let sink = HttpStatusSink::new(format!("http://{addr}"), Duration::from_secs(5)).unwrap();

    sink.update_status("thing-1", ConnectionStatus::Connected)
        .await
        .unwrap();
}
