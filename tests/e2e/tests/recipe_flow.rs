//! Recipe-sharing flows over the full HTTP surface.
//!
//! One app, three users: michael creates and owns a recipe, shares it
//! with jennifer and takes it back; kim holds edit, which lets her share
//! view but never edit itself.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, Request, StatusCode};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use http_body_util::BodyExt;
use latchkey_axum::{AccessibleGuard, AuthEndpoint, AuthnGuard, Identity, RoleGuard};
use latchkey_core::{
    AuthzClient, AutoAssign, CallOptions, DecisionEngine, Error, MemoryRoleStore, PolicyFlags,
    RoleStore, ScanPage, IDENTITY_HEADER,
};
use serde_json::{json, Value};
use tower::ServiceExt;

type Recipes = Arc<Mutex<HashMap<String, Value>>>;

async fn create_recipe(
    State(recipes): State<Recipes>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let title = body["title"].as_str().unwrap_or("untitled").to_string();
    let id = format!("recipe-{title}");
    let recipe = json!({ "id": id, "title": title });
    recipes.lock().unwrap().insert(id, recipe.clone());
    (StatusCode::CREATED, Json(recipe))
}

async fn read_recipe(
    State(recipes): State<Recipes>,
    Path(id): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    recipes
        .lock()
        .unwrap()
        .get(&id)
        .cloned()
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

async fn list_recipes(State(recipes): State<Recipes>, Identity(ctx): Identity) -> Json<Value> {
    let recipes = recipes.lock().unwrap();
    let visible: Vec<Value> = ctx
        .accessible_ids()
        .unwrap_or_default()
        .iter()
        .filter_map(|id| recipes.get(id).cloned())
        .collect();
    Json(json!(visible))
}

async fn update_recipe(
    State(recipes): State<Recipes>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, StatusCode> {
    let mut recipes = recipes.lock().unwrap();
    let recipe = recipes.get_mut(&id).ok_or(StatusCode::NOT_FOUND)?;
    recipe["title"] = body["title"].clone();
    Ok(Json(recipe.clone()))
}

async fn engine_flags(store: Arc<dyn RoleStore>, flags: PolicyFlags) -> Arc<DecisionEngine> {
    let client = AuthzClient::builder("recipes")
        .store(store)
        .build()
        .await
        .unwrap();
    Arc::new(DecisionEngine::with_flags(client, flags))
}

fn recipe_app(engine: Arc<DecisionEngine>) -> Router {
    let recipes: Recipes = Arc::new(Mutex::new(HashMap::new()));

    let create = Router::new()
        .route("/recipe", post(create_recipe))
        .route_layer(
            AuthnGuard::new(engine.clone())
                .auto_assign(AutoAssign::new("id", ["own", "edit", "view"]))
                .layer(),
        );
    let list = Router::new()
        .route("/recipe", get(list_recipes))
        .route_layer(AccessibleGuard::new(engine.clone(), "view").layer());
    let read = Router::new()
        .route("/recipe/:id", get(read_recipe))
        .route_layer(RoleGuard::new(engine.clone(), "view").layer());
    let edit = Router::new()
        .route("/recipe/:id", patch(update_recipe))
        .route_layer(
            RoleGuard::new(engine.clone(), "edit")
                .options(CallOptions {
                    dont_wait: Some(false),
                    ..CallOptions::default()
                })
                .layer(),
        );
    let auth = AuthEndpoint::new(engine, "auth")
        .allow_grant("own", ["own", "edit", "view"])
        .allow_grant("edit", ["view"])
        .into_router();

    Router::new()
        .merge(create)
        .merge(list)
        .merge(read)
        .merge(edit)
        .with_state(recipes)
        .merge(auth)
}

fn envelope(user: &str) -> String {
    STANDARD.encode(json!({ "email": user }).to_string())
}

fn req(method: &str, uri: &str, user: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(user) = user {
        builder = builder.header(IDENTITY_HEADER, envelope(user));
    }
    match body {
        Some(value) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(value.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    user: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(req(method, uri, user, body))
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn recipe_sharing_lifecycle() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let engine = engine_flags(Arc::new(MemoryRoleStore::new()), PolicyFlags::default()).await;
    let app = recipe_app(engine);

    // michael creates a recipe and becomes its owner
    let (status, created) = send(
        &app,
        "POST",
        "/recipe",
        Some("michael"),
        Some(json!({ "title": "pie" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = created["id"].as_str().unwrap().to_string();
    let path = format!("/recipe/{id}");

    // the creator reads it back
    let (status, mine) = send(&app, "GET", &path, Some("michael"), None).await;
    assert_eq!(status, StatusCode::OK);

    // jennifer cannot
    let (status, denied) = send(&app, "GET", &path, Some("jennifer"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(denied["message"], "Not authorized");

    // michael shares view with jennifer
    let (status, echoed) = send(
        &app,
        "POST",
        "/auth",
        Some("michael"),
        Some(json!({ "id": id, "user": "jennifer", "requires": "own", "grants": ["view"] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(echoed["user"], "jennifer");

    // jennifer now reads exactly what michael reads
    let (status, theirs) = send(&app, "GET", &path, Some("jennifer"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(theirs, mine);

    // view does not imply edit
    let (status, _) = send(
        &app,
        "PATCH",
        &path,
        Some("jennifer"),
        Some(json!({ "title": "cake" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // jennifer cannot grant herself anything either
    let (status, denied) = send(
        &app,
        "POST",
        "/auth",
        Some("jennifer"),
        Some(json!({ "id": id, "user": "jennifer", "requires": "own", "grants": ["edit"] })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(denied["message"]
        .as_str()
        .unwrap()
        .starts_with("Not authorized to grant"));

    // michael takes view back
    let (status, _) = send(
        &app,
        "POST",
        "/auth",
        Some("michael"),
        Some(json!({
            "id": id, "user": "jennifer", "requires": "own",
            "grants": ["view"], "revoke": true
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(&app, "GET", &path, Some("jennifer"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn edit_holders_share_view_but_never_edit() {
    let engine = engine_flags(Arc::new(MemoryRoleStore::new()), PolicyFlags::default()).await;
    let app = recipe_app(engine);

    let (_, created) = send(
        &app,
        "POST",
        "/recipe",
        Some("michael"),
        Some(json!({ "title": "stew" })),
    )
    .await;
    let id = created["id"].as_str().unwrap().to_string();
    let path = format!("/recipe/{id}");

    // michael hands kim edit
    let (status, _) = send(
        &app,
        "POST",
        "/auth",
        Some("michael"),
        Some(json!({ "id": id, "user": "kim", "requires": "own", "grants": ["edit"] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, updated) = send(
        &app,
        "PATCH",
        &path,
        Some("kim"),
        Some(json!({ "title": "goulash" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["title"], "goulash");

    // edit lets kim share view
    let (status, _) = send(
        &app,
        "POST",
        "/auth",
        Some("kim"),
        Some(json!({ "id": id, "user": "jennifer", "requires": "edit", "grants": ["view"] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&app, "GET", &path, Some("jennifer"), None).await;
    assert_eq!(status, StatusCode::OK);

    // but never edit itself
    let (status, denied) = send(
        &app,
        "POST",
        "/auth",
        Some("kim"),
        Some(json!({ "id": id, "user": "jennifer", "requires": "edit", "grants": ["edit"] })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(denied["message"]
        .as_str()
        .unwrap()
        .starts_with("Not authorized to grant"));
}

#[tokio::test]
async fn listing_reflects_current_grants() {
    let engine = engine_flags(Arc::new(MemoryRoleStore::new()), PolicyFlags::default()).await;
    let app = recipe_app(engine);

    for title in ["pie", "stew"] {
        let (status, _) = send(
            &app,
            "POST",
            "/recipe",
            Some("michael"),
            Some(json!({ "title": title })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (status, listed) = send(&app, "GET", "/recipe", Some("michael"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed.as_array().unwrap().len(), 2);

    // jennifer sees nothing until a grant lands
    let (_, listed) = send(&app, "GET", "/recipe", Some("jennifer"), None).await;
    assert_eq!(listed.as_array().unwrap().len(), 0);

    let (status, _) = send(
        &app,
        "POST",
        "/auth",
        Some("michael"),
        Some(json!({
            "id": "recipe-pie", "user": "jennifer", "requires": "own", "grants": ["view"]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, listed) = send(&app, "GET", "/recipe", Some("jennifer"), None).await;
    let titles: Vec<&str> = listed
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["title"].as_str().unwrap())
        .collect();
    assert_eq!(titles, ["pie"]);
}

#[tokio::test]
async fn malformed_envelope_never_passes_as_anonymous() {
    // relaxed policy: anonymous callers bypass checks
    let engine = engine_flags(
        Arc::new(MemoryRoleStore::new()),
        PolicyFlags {
            enabled: true,
            strict: false,
        },
    )
    .await;
    let app = recipe_app(engine);

    // no envelope at all: bypass reaches the handler (404, nothing stored)
    let (status, _) = send(&app, "GET", "/recipe/nothing-here", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // a present-but-garbled envelope is an error, not anonymity
    let garbled = Request::builder()
        .method("GET")
        .uri("/recipe/nothing-here")
        .header(IDENTITY_HEADER, "%%%not-an-envelope%%%")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(garbled).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert!(body["message"]
        .as_str()
        .unwrap()
        .starts_with("Malformed identity envelope"));
}

#[tokio::test]
async fn disabled_engine_bypasses_routes_but_never_grants() {
    let engine = engine_flags(
        Arc::new(MemoryRoleStore::new()),
        PolicyFlags {
            enabled: false,
            strict: true,
        },
    )
    .await;
    let app = recipe_app(engine);

    let (status, created) = send(
        &app,
        "POST",
        "/recipe",
        Some("michael"),
        Some(json!({ "title": "pie" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = created["id"].as_str().unwrap().to_string();

    // no roles exist, but reads pass while the engine is off
    let (status, _) = send(&app, "GET", &format!("/recipe/{id}"), Some("jennifer"), None).await;
    assert_eq!(status, StatusCode::OK);

    // grants still refuse: role state must never mutate on bypass
    let (status, _) = send(
        &app,
        "POST",
        "/auth",
        Some("michael"),
        Some(json!({ "id": id, "user": "jennifer", "requires": "own", "grants": ["view"] })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[derive(Debug)]
struct OutageStore;

#[async_trait]
impl RoleStore for OutageStore {
    async fn add_member(&self, _key: &str, _member: &str) -> latchkey_core::Result<()> {
        Err(Error::StoreUnavailable("connection refused".into()))
    }

    async fn remove_member(&self, _key: &str, _member: &str) -> latchkey_core::Result<()> {
        Err(Error::StoreUnavailable("connection refused".into()))
    }

    async fn is_member(&self, _key: &str, _member: &str) -> latchkey_core::Result<bool> {
        Err(Error::StoreUnavailable("connection refused".into()))
    }

    async fn members(
        &self,
        _key: &str,
        _limit: Option<usize>,
    ) -> latchkey_core::Result<Vec<String>> {
        Err(Error::StoreUnavailable("connection refused".into()))
    }

    async fn scan_members(
        &self,
        _key: &str,
        _cursor: u64,
        _count: usize,
    ) -> latchkey_core::Result<ScanPage> {
        Err(Error::StoreUnavailable("connection refused".into()))
    }

    async fn keys_matching(&self, _prefix: &str) -> latchkey_core::Result<Vec<String>> {
        Err(Error::StoreUnavailable("connection refused".into()))
    }
}

#[tokio::test]
async fn store_outage_is_503_everywhere_not_denial() {
    let engine = engine_flags(Arc::new(OutageStore), PolicyFlags::default()).await;
    let app = recipe_app(engine);

    // the guarded read cannot decide
    let (status, body) = send(&app, "GET", "/recipe/r1", Some("michael"), None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["message"], "Authorization store unavailable");

    // neither can the grant endpoint
    let (status, _) = send(
        &app,
        "POST",
        "/auth",
        Some("michael"),
        Some(json!({ "id": "r1", "user": "jennifer", "requires": "own", "grants": ["view"] })),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    // creation fails at auto-assign time rather than recording nothing
    let (status, _) = send(
        &app,
        "POST",
        "/recipe",
        Some("michael"),
        Some(json!({ "title": "pie" })),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}
