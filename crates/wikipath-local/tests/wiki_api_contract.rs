//! Contract for the MediaWiki client against a local fixture server.
//!
//! The fixture speaks just enough of the action API (formatversion=2) to
//! exercise pagination, missing pages, backlink caps, opensearch and the
//! soft failure surfaces. Strictly offline.

use std::collections::HashMap;
use std::net::SocketAddr;

use axum::extract::Query;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use wikipath_core::{ClientConfig, LinkSource};
use wikipath_local::wiki::WikiClient;

async fn api(Query(params): Query<HashMap<String, String>>) -> Response {
    match params.get("action").map(String::as_str) {
        Some("opensearch") => opensearch(&params),
        Some("query") if params.contains_key("bltitle") => backlinks(&params),
        Some("query") => links(&params),
        _ => (StatusCode::BAD_REQUEST, "unknown action").into_response(),
    }
}

fn opensearch(params: &HashMap<String, String>) -> Response {
    let q = params.get("search").map(String::as_str).unwrap_or("");
    match q {
        "boom" => (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response(),
        "pythn" => Json(json!([
            "pythn",
            ["Python (programming language)"],
            [""],
            ["https://en.wikipedia.org/wiki/Python_(programming_language)"]
        ]))
        .into_response(),
        _ => Json(json!([q, [], [], []])).into_response(),
    }
}

fn backlinks(params: &HashMap<String, String>) -> Response {
    let title = params.get("bltitle").map(String::as_str).unwrap_or("");
    let bllimit: usize = params
        .get("bllimit")
        .and_then(|v| v.parse().ok())
        .unwrap_or(500);
    let count = match title {
        // More backlinks exist than any single request can return.
        "Popular page" => bllimit,
        _ => 2,
    };
    let backlinks: Vec<_> = (0..count)
        .map(|i| json!({"pageid": i + 1, "ns": 0, "title": format!("Backlink {i}")}))
        .collect();
    Json(json!({"query": {"backlinks": backlinks}})).into_response()
}

fn links(params: &HashMap<String, String>) -> Response {
    let title = params.get("titles").map(String::as_str).unwrap_or("");
    match title {
        "Boom" => (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response(),
        "Missing page" => Json(json!({
            "query": {"pages": [{"ns": 0, "title": title, "missing": true}]}
        }))
        .into_response(),
        "Paginated page" => {
            if params.contains_key("plcontinue") {
                Json(json!({
                    "query": {"pages": [{
                        "pageid": 7, "ns": 0, "title": title,
                        "links": [
                            {"ns": 0, "title": "Link D"},
                            {"ns": 0, "title": "Link E"}
                        ]
                    }]}
                }))
                .into_response()
            } else {
                Json(json!({
                    "continue": {"plcontinue": "7|0|Link_D", "continue": "||"},
                    "query": {"pages": [{
                        "pageid": 7, "ns": 0, "title": title,
                        "links": [
                            {"ns": 0, "title": "Link A"},
                            {"ns": 0, "title": "Link B"},
                            {"ns": 0, "title": "Link C"}
                        ]
                    }]}
                }))
                .into_response()
            }
        }
        _ => Json(json!({
            "query": {"pages": [{
                "pageid": 1, "ns": 0, "title": title,
                "links": [
                    {"ns": 0, "title": "Adolescent cliques"},
                    {"ns": 0, "title": "Business model"}
                ]
            }]}
        }))
        .into_response(),
    }
}

async fn fixture_client() -> (WikiClient, SocketAddr) {
    let app = Router::new().route("/w/api.php", get(api));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind fixture");
    let addr = listener.local_addr().expect("fixture addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("axum serve");
    });

    let cfg = ClientConfig {
        endpoint: format!("http://{addr}/w/api.php"),
        retry_base_ms: 1,
        ..ClientConfig::default()
    };
    (WikiClient::new(&cfg).expect("client"), addr)
}

#[tokio::test]
async fn outbound_links_follow_pagination() {
    let (client, _addr) = fixture_client().await;
    let links = client
        .outbound_links("Paginated page")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(links, vec!["Link A", "Link B", "Link C", "Link D", "Link E"]);
}

#[tokio::test]
async fn missing_page_is_not_found_not_an_error() {
    let (client, _addr) = fixture_client().await;
    assert_eq!(client.outbound_links("Missing page").await.unwrap(), None);
}

#[tokio::test]
async fn server_errors_surface_as_dead_ends() {
    let (client, _addr) = fixture_client().await;
    // HTTP 5xx is not retried and yields an empty link list.
    assert_eq!(
        client.outbound_links("Boom").await.unwrap(),
        Some(Vec::new())
    );
    assert_eq!(client.resolve("boom").await.unwrap(), None);
}

#[tokio::test]
async fn backlinks_are_capped_and_truncated() {
    let (client, _addr) = fixture_client().await;

    let some = client.inbound_links("Popular page", 200).await.unwrap();
    assert_eq!(some.len(), 200);

    // Requests beyond the remote cap are clamped to 500.
    let many = client.inbound_links("Popular page", 700).await.unwrap();
    assert_eq!(many.len(), 500);

    let few = client.inbound_links("Quiet page", 200).await.unwrap();
    assert_eq!(few, vec!["Backlink 0", "Backlink 1"]);
}

#[tokio::test]
async fn resolve_returns_the_top_hit_or_none() {
    let (client, _addr) = fixture_client().await;
    assert_eq!(
        client.resolve("pythn").await.unwrap().as_deref(),
        Some("Python (programming language)")
    );
    assert_eq!(client.resolve("zzzz no such").await.unwrap(), None);
}

#[tokio::test]
async fn unreachable_endpoint_retries_then_dead_ends() {
    // Nothing listens here; connection failures are transient, retried
    // with (tiny, for the test) backoff, then surfaced softly.
    let cfg = ClientConfig {
        endpoint: "http://127.0.0.1:1/w/api.php".to_string(),
        retry_base_ms: 1,
        connect_timeout_ms: 200,
        ..ClientConfig::default()
    };
    let client = WikiClient::new(&cfg).expect("client");

    assert_eq!(
        client.outbound_links("Anything").await.unwrap(),
        Some(Vec::new())
    );
    assert_eq!(client.inbound_links("Anything", 10).await.unwrap(), Vec::<String>::new());
    assert_eq!(client.resolve("anything").await.unwrap(), None);
}
