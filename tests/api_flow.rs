//! End-to-end request flows through the dispatcher with in-memory collaborators

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use hyper::{Method, StatusCode};
use serde_json::{json, Value};
use tokio::sync::RwLock;

use communitypatch::auth::{KeyRing, KeySource};
use communitypatch::services::{DefinitionFetcher, FetchError, MemoryNotifier, MessageType};
use communitypatch::store::{MemoryCatalogStore, MemoryObjectStore};
use communitypatch::{handle_request, ApiRequest, ApiResponse, AppState, Collaborators, Settings};

const PRIVATE_PEM: &str = include_str!("fixtures/token_private.pem");
const PUBLIC_PEM: &str = include_str!("fixtures/token_public.pem");
const FEED_URL: &str = "https://feeds.example.com/firefox.json";

#[derive(Default)]
struct StaticFetcher {
    bodies: RwLock<HashMap<String, Bytes>>,
}

#[async_trait]
impl DefinitionFetcher for StaticFetcher {
    async fn fetch(&self, url: &str) -> Result<Bytes, FetchError> {
        self.bodies
            .read()
            .await
            .get(url)
            .cloned()
            .ok_or(FetchError::Status(404))
    }
}

struct Harness {
    state: AppState,
    notifier: Arc<MemoryNotifier>,
    fetcher: Arc<StaticFetcher>,
}

impl Harness {
    fn new() -> Self {
        let keys = KeyRing::new(
            None,
            Some(KeySource::Inline(PRIVATE_PEM.into())),
            Some(KeySource::Inline(PUBLIC_PEM.into())),
        )
        .unwrap();
        let notifier = Arc::new(MemoryNotifier::new());
        let fetcher = Arc::new(StaticFetcher::default());
        let state = AppState::new(
            Collaborators {
                catalog: Arc::new(MemoryCatalogStore::new()),
                objects: Arc::new(MemoryObjectStore::new()),
                notifier: notifier.clone(),
                fetcher: fetcher.clone(),
                keys: Arc::new(keys),
            },
            Settings {
                domain: "example.com".into(),
                ..Settings::default()
            },
        );
        Self {
            state,
            notifier,
            fetcher,
        }
    }

    async fn send(&self, req: ApiRequest) -> ApiResponse {
        handle_request(&self.state, req).await
    }

    /// Register and verify a contributor; returns (id, token)
    async fn onboard(&self, name: &str) -> (String, String) {
        let resp = self
            .send(
                ApiRequest::new(Method::POST, "/v1/contributors/register")
                    .with_json(&json!({ "name": name, "email": "someone@example.com" })),
            )
            .await;
        assert_eq!(resp.status(), StatusCode::CREATED);

        let sent = self.notifier.last_of(MessageType::Verification).await.unwrap();
        let link = sent.message_data["url"].as_str().unwrap().to_string();
        let query = link.split_once('?').unwrap().1;
        let pairs: HashMap<String, String> = serde_urlencoded::from_str(query).unwrap();

        let resp = self
            .send(ApiRequest::new(Method::GET, &format!("/v1/contributors/verify?{}", query)))
            .await;
        assert_eq!(resp.status(), StatusCode::OK);

        let sent = self.notifier.last_of(MessageType::ApiToken).await.unwrap();
        let token = sent.message_data["api_token"].as_str().unwrap().to_string();
        (pairs["id"].clone(), token)
    }
}

fn patch(version: &str) -> Value {
    json!({
        "version": version,
        "releaseDate": "2024-01-01T00:00:00Z",
        "standalone": true,
        "minimumOperatingSystem": "10.15",
        "reboot": false,
        "killApps": [],
        "components": [{ "name": "Firefox", "version": version, "criteria": [] }],
        "capabilities": [],
    })
}

fn definition(versions: &[&str]) -> Value {
    let patches: Vec<Value> = versions.iter().map(|v| patch(v)).collect();
    json!({
        "id": "Firefox",
        "name": "Firefox",
        "publisher": "Mozilla",
        "appName": "Firefox.app",
        "bundleId": "org.mozilla.firefox",
        "currentVersion": versions[0],
        "lastModified": "2024-01-01T00:00:00Z",
        "requirements": [],
        "patches": patches,
    })
}

fn versions_of(body: &Value) -> Vec<String> {
    body["patches"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["version"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn test_title_and_version_lifecycle() {
    let h = Harness::new();
    let (cid, token) = h.onboard("Jane Admin").await;
    let titles = format!("/v1/{}/titles", cid);

    let resp = h
        .send(ApiRequest::new(Method::POST, &titles).with_bearer(&token).with_json(&definition(&["2.0"])))
        .await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    assert_eq!(resp.body_json()["message"], "Title 'firefox' created");
    assert_eq!(resp.headers["Content-Type"], "application/json");

    let resp = h
        .send(ApiRequest::new(Method::POST, &titles).with_bearer(&token).with_json(&definition(&["2.0"])))
        .await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);

    // Default placement goes to the front
    let versions = format!("{}/firefox/versions", titles);
    let resp = h
        .send(
            ApiRequest::new(Method::POST, &versions)
                .with_bearer(&token)
                .with_json(&patch("3.0")),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    let resp = h
        .send(
            ApiRequest::new(Method::POST, &format!("{}?insert_after=2.0", versions))
                .with_bearer(&token)
                .with_json(&patch("1.0")),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    let resp = h
        .send(ApiRequest::new(Method::GET, &format!("{}/FIREFOX", titles)).with_bearer(&token))
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = resp.body_json();
    assert_eq!(versions_of(&body), ["3.0", "2.0", "1.0"]);
    assert_eq!(body["currentVersion"], "3.0");
    assert_eq!(body["bundleId"], "org.mozilla.firefox");

    // Both placement parameters at once
    let resp = h
        .send(
            ApiRequest::new(Method::POST, &format!("{}?insert_after=2.0&insert_before=1.0", versions))
                .with_bearer(&token)
                .with_json(&patch("1.5")),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = h
        .send(
            ApiRequest::new(Method::POST, &versions)
                .with_bearer(&token)
                .with_json(&patch("2.0")),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);

    let resp = h
        .send(ApiRequest::new(Method::DELETE, &format!("{}/3.0", versions)).with_bearer(&token))
        .await;
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = h
        .send(ApiRequest::new(Method::DELETE, &format!("{}/9.9", versions)).with_bearer(&token))
        .await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    // Public Jamf view follows the edits
    let resp = h.send(ApiRequest::new(Method::GET, &format!("/v1/{}/software", cid))).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let listing = resp.body_json();
    assert_eq!(listing[0]["id"], "firefox");
    assert_eq!(listing[0]["currentVersion"], "2.0");

    let resp = h
        .send(ApiRequest::new(Method::GET, &format!("/v1/{}/software?extend", cid)))
        .await;
    assert!(resp.body_json()[0].get("last_sync_result").is_some());

    let resp = h
        .send(ApiRequest::new(Method::GET, &format!("/v1/{}/software/firefox,missing", cid)))
        .await;
    assert_eq!(resp.body_json().as_array().unwrap().len(), 1);

    let resp = h
        .send(ApiRequest::new(Method::GET, &format!("/v1/{}/patch/firefox", cid)))
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(versions_of(&resp.body_json()), ["2.0", "1.0"]);

    let resp = h
        .send(ApiRequest::new(Method::DELETE, &format!("{}/firefox", titles)).with_bearer(&token))
        .await;
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = h
        .send(ApiRequest::new(Method::GET, &format!("/v1/{}/patch/firefox", cid)))
        .await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_malformed_definitions_are_rejected() {
    let h = Harness::new();
    let (cid, token) = h.onboard("Jane Admin").await;
    let titles = format!("/v1/{}/titles", cid);

    let resp = h
        .send(ApiRequest::new(Method::POST, &titles).with_bearer(&token).with_json(&definition(&["2.0"])))
        .await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    // A version entry Jamf cannot consume
    let versions = format!("{}/firefox/versions", titles);
    let resp = h
        .send(
            ApiRequest::new(Method::POST, &versions)
                .with_bearer(&token)
                .with_json(&json!({ "version": "3.0" })),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let mut missing_bundle = definition(&["1.0"]);
    missing_bundle["id"] = json!("chrome");
    missing_bundle.as_object_mut().unwrap().remove("bundleId");
    let resp = h
        .send(ApiRequest::new(Method::POST, &titles).with_bearer(&token).with_json(&missing_bundle))
        .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    for bad in ["a/b", ".."] {
        let mut doc = definition(&["1.0"]);
        doc["id"] = json!(bad);
        let resp = h
            .send(ApiRequest::new(Method::POST, &titles).with_bearer(&token).with_json(&doc))
            .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{bad:?} accepted");
    }

    let resp = h
        .send(ApiRequest::new(Method::GET, &format!("{}/firefox", titles)).with_bearer(&token))
        .await;
    assert_eq!(versions_of(&resp.body_json()), ["2.0"]);
}

#[tokio::test]
async fn test_denials_have_generic_bodies() {
    let h = Harness::new();
    let (cid, token) = h.onboard("Jane Admin").await;
    let (other, _) = h.onboard("John Admin").await;
    let titles = format!("/v1/{}/titles", cid);

    let resp = h
        .send(ApiRequest::new(Method::POST, &titles).with_json(&definition(&["1.0"])))
        .await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(resp.body_json(), json!({ "message": "Unauthorized" }));

    let resp = h
        .send(
            ApiRequest::new(Method::POST, &titles)
                .with_header("authorization", "Bearer not-a-token")
                .with_json(&definition(&["1.0"])),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    // A valid token against someone else's path
    let resp = h
        .send(
            ApiRequest::new(Method::POST, &format!("/v1/{}/titles", other))
                .with_bearer(&token)
                .with_json(&definition(&["1.0"])),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    assert_eq!(resp.body_json(), json!({ "message": "Forbidden" }));

    let resp = h.send(ApiRequest::new(Method::GET, "/v1/nowhere")).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = h
        .send(ApiRequest::new(Method::PATCH, &format!("{}/firefox", titles)).with_bearer(&token))
        .await;
    assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);

    let resp = h
        .send(ApiRequest::new(Method::POST, &titles).with_bearer(&token))
        .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_token_rotation_and_revocation() {
    let h = Harness::new();
    let (cid, first) = h.onboard("Jane Admin").await;
    let title = format!("/v1/{}/titles/firefox", cid);
    let tokens = format!("/v1/{}/tokens", cid);

    let resp = h.send(ApiRequest::new(Method::POST, &tokens).with_bearer(&first)).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let body = resp.body_json();
    let second = body["api_token"].as_str().unwrap().to_string();
    let jti = body["id"].as_str().unwrap().to_string();

    // Rotation retires the previous token
    let resp = h.send(ApiRequest::new(Method::POST, &tokens).with_bearer(&first)).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let resp = h
        .send(ApiRequest::new(Method::DELETE, &format!("{}/{}", tokens, jti)).with_bearer(&second))
        .await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    assert!(resp.body.is_empty());

    let resp = h.send(ApiRequest::new(Method::GET, &title).with_bearer(&second)).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_scoped_tokens() {
    let h = Harness::new();
    let (cid, first) = h.onboard("Jane Admin").await;
    let titles = format!("/v1/{}/titles", cid);
    let tokens = format!("/v1/{}/tokens", cid);

    let resp = h
        .send(ApiRequest::new(Method::POST, &titles).with_bearer(&first).with_json(&definition(&["1.0"])))
        .await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    let resp = h
        .send(
            ApiRequest::new(Method::POST, &tokens)
                .with_bearer(&first)
                .with_json(&json!({ "titles_in_scope": ["firefox"], "expires_in_days": 30 })),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let body = resp.body_json();
    let scoped = body["api_token"].as_str().unwrap().to_string();
    let jti = body["id"].as_str().unwrap().to_string();

    let resp = h
        .send(ApiRequest::new(Method::GET, &format!("{}/firefox", titles)).with_bearer(&scoped))
        .await;
    assert_eq!(resp.status(), StatusCode::OK);

    let mut chrome = definition(&["1.0"]);
    chrome["id"] = "chrome".into();
    let resp = h
        .send(ApiRequest::new(Method::POST, &titles).with_bearer(&scoped).with_json(&chrome))
        .await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let resp = h
        .send(ApiRequest::new(Method::GET, &format!("{}/chrome", titles)).with_bearer(&scoped))
        .await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    // Token management needs full access
    let resp = h
        .send(ApiRequest::new(Method::DELETE, &format!("{}/{}", tokens, jti)).with_bearer(&scoped))
        .await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_subscribed_titles_are_read_only() {
    let h = Harness::new();
    let (cid, token) = h.onboard("Jane Admin").await;
    h.fetcher.bodies.write().await.insert(
        FEED_URL.to_string(),
        Bytes::from(serde_json::to_vec(&definition(&["2.0", "1.0"])).unwrap()),
    );

    let resp = h
        .send(
            ApiRequest::new(Method::POST, &format!("/v1/{}/subscriptions", cid))
                .with_bearer(&token)
                .with_json(&json!({ "json_url": FEED_URL })),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    let title = format!("/v1/{}/titles/firefox", cid);
    let resp = h
        .send(
            ApiRequest::new(Method::POST, &format!("{}/versions", title))
                .with_bearer(&token)
                .with_json(&patch("3.0")),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let resp = h
        .send(ApiRequest::new(Method::PUT, &title).with_bearer(&token).with_json(&definition(&["3.0"])))
        .await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    // Upstream moves on; the sweep follows
    h.fetcher.bodies.write().await.insert(
        FEED_URL.to_string(),
        Bytes::from(serde_json::to_vec(&definition(&["3.0", "2.0", "1.0"])).unwrap()),
    );
    let report = h.state.sync.sweep().await.unwrap();
    assert_eq!(report.updated, 1);

    let resp = h
        .send(ApiRequest::new(Method::GET, &format!("/v1/{}/patch/firefox", cid)))
        .await;
    assert_eq!(resp.body_json()["currentVersion"], "3.0");

    let report = h.state.reconciler.sweep().await.unwrap();
    assert_eq!(report.repaired, 0);

    // Synced titles may still be removed
    let resp = h.send(ApiRequest::new(Method::DELETE, &title).with_bearer(&token)).await;
    assert_eq!(resp.status(), StatusCode::OK);
}
