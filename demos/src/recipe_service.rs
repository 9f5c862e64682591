//! Recipe service: every latchkey guard on one small CRUD app.
//!
//! Recipes live in process memory; role assignments live in redis when
//! connection parameters are given, otherwise in process memory too.
//!
//! ```bash
//! # in-memory roles, relaxed toward anonymous readers
//! cargo run --bin recipe-service
//!
//! # redis-backed roles, strict
//! LATCHKEY_REDIS_HOST=127.0.0.1 cargo run --bin recipe-service -- --strict
//! ```
//!
//! Identity arrives the way a trusted gateway delivers it: the
//! `X-Endpoint-Api-Userinfo` header carrying base64 JSON with an `email`
//! claim. To poke at the service directly:
//!
//! ```bash
//! curl -H "X-Endpoint-Api-Userinfo: $(echo -n '{"email":"michael"}' | base64)" \
//!     -H 'Content-Type: application/json' \
//!     -d '{"title":"pie"}' http://localhost:8080/recipe
//! ```
//!
//! Owners share recipes through the grant endpoint:
//!
//! ```bash
//! curl -H "X-Endpoint-Api-Userinfo: $(echo -n '{"email":"michael"}' | base64)" \
//!     -H 'Content-Type: application/json' \
//!     -d '{"id":"<recipe id>","user":"jennifer","requires":"own","grants":["view"]}' \
//!     http://localhost:8080/auth-recipe
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use clap::Parser;
use dashmap::DashMap;
use latchkey_axum::{AccessibleGuard, AuthEndpoint, AuthnGuard, Identity, RoleGuard};
use latchkey_core::{
    AuthzClient, AutoAssign, CallOptions, DecisionEngine, MemoryRoleStore, PolicyFlags,
    RedisParams,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "recipe-service", about = "Recipe CRUD demo guarded by latchkey")]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "0.0.0.0:8080", env = "LATCHKEY_BIND")]
    bind: SocketAddr,

    /// Redis host; omit to keep role state in process memory
    #[arg(long, env = "LATCHKEY_REDIS_HOST")]
    redis_host: Option<String>,

    /// Redis port
    #[arg(long, default_value = "6379", env = "LATCHKEY_REDIS_PORT")]
    redis_port: u16,

    /// Redis database index
    #[arg(long, default_value = "0", env = "LATCHKEY_REDIS_DB")]
    redis_db: i64,

    /// Redis password
    #[arg(long, env = "LATCHKEY_REDIS_PASSWORD")]
    redis_password: Option<String>,

    /// Deny anonymous callers instead of letting them bypass checks
    #[arg(long, env = "LATCHKEY_STRICT")]
    strict: bool,
}

#[derive(Debug, Clone, Serialize)]
struct Recipe {
    id: String,
    title: String,
    ingredients: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct NewRecipe {
    title: String,
    #[serde(default)]
    ingredients: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RecipePatch {
    title: Option<String>,
    ingredients: Option<Vec<String>>,
}

#[derive(Default)]
struct AppState {
    recipes: DashMap<String, Recipe>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing();

    let engine = build_engine(&args).await?;
    let app = router(engine);

    let listener = TcpListener::bind(args.bind)
        .await
        .with_context(|| format!("failed to bind {}", args.bind))?;
    info!("recipe service listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    info!("shutdown complete");
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "recipe_service=info,latchkey_core=info,latchkey_axum=info,tower_http=info".into()
        }))
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

async fn build_engine(args: &Args) -> Result<Arc<DecisionEngine>> {
    let mut builder = AuthzClient::builder("recipes");
    match &args.redis_host {
        Some(host) => {
            info!(host, port = args.redis_port, "using redis role store");
            builder = builder.redis_params(RedisParams {
                host: Some(host.clone()),
                port: Some(args.redis_port),
                db: args.redis_db,
                password: args.redis_password.clone(),
            });
        }
        None => {
            info!("no redis host configured; role state is process-local");
            builder = builder.store(Arc::new(MemoryRoleStore::new()));
        }
    }
    let client = builder.build().await?;
    let engine = DecisionEngine::with_flags(
        client,
        PolicyFlags {
            enabled: true,
            strict: args.strict,
        },
    );
    Ok(Arc::new(engine))
}

fn router(engine: Arc<DecisionEngine>) -> Router {
    let state = Arc::new(AppState::default());

    // creating a recipe makes the caller its owner
    let create = Router::new()
        .route("/recipe", post(create_recipe))
        .route_layer(
            AuthnGuard::new(engine.clone())
                .auto_assign(AutoAssign::new("id", ["own", "edit", "view"]))
                .layer(),
        );
    let list = Router::new()
        .route("/recipe", get(list_recipes))
        .route_layer(AccessibleGuard::new(engine.clone(), "view").limit(50).layer());
    let read = Router::new()
        .route("/recipe/:id", get(read_recipe))
        .route_layer(RoleGuard::new(engine.clone(), "view").layer());
    // mutations always wait for the check
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
    // owners may share any role on their recipes; editors may share view
    let auth = AuthEndpoint::new(engine, "auth-recipe")
        .allow_grant("own", ["own", "edit", "view"])
        .allow_grant("edit", ["view"])
        .into_router();

    Router::new()
        .merge(create)
        .merge(list)
        .merge(read)
        .merge(edit)
        .with_state(state)
        .merge(auth)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

async fn create_recipe(
    State(state): State<Arc<AppState>>,
    Identity(ctx): Identity,
    Json(new): Json<NewRecipe>,
) -> (StatusCode, Json<Recipe>) {
    let recipe = Recipe {
        id: Uuid::new_v4().to_string(),
        title: new.title,
        ingredients: new.ingredients,
    };
    state.recipes.insert(recipe.id.clone(), recipe.clone());
    info!(
        id = %recipe.id,
        creator = ?ctx.calling_principal().map(|p| p.as_str()),
        "recipe created"
    );
    (StatusCode::CREATED, Json(recipe))
}

async fn list_recipes(
    State(state): State<Arc<AppState>>,
    Identity(ctx): Identity,
) -> Json<Vec<Recipe>> {
    let recipes = match ctx.accessible_ids() {
        Some(ids) => ids
            .iter()
            .filter_map(|id| state.recipes.get(id).map(|entry| entry.clone()))
            .collect(),
        None => Vec::new(),
    };
    Json(recipes)
}

async fn read_recipe(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Recipe>, StatusCode> {
    state
        .recipes
        .get(&id)
        .map(|entry| Json(entry.clone()))
        .ok_or(StatusCode::NOT_FOUND)
}

async fn update_recipe(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<RecipePatch>,
) -> Result<Json<Recipe>, StatusCode> {
    let mut entry = state.recipes.get_mut(&id).ok_or(StatusCode::NOT_FOUND)?;
    if let Some(title) = body.title {
        entry.title = title;
    }
    if let Some(ingredients) = body.ingredients {
        entry.ingredients = ingredients;
    }
    Ok(Json(entry.clone()))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received ctrl-c, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
