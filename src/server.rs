//! HTTP server: the question page, a JSON endpoint, and a health probe.
//!
//! Every route goes through [`handle_query`], which ignores empty input without
//! touching the pipeline and otherwise answers through the memoized
//! [`AppContext::pipeline`].

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Json, Response};
use axum::routing::{get, post};
use serde::Deserialize;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::error::QaError;
use crate::pipeline::AppContext;
use crate::render::{PageRenderer, PageView, RenderedAnswer};

/// Shared state handed to every handler.
pub struct AppState {
    pub ctx: AppContext,
    pub renderer: PageRenderer,
}

impl AppState {
    pub fn new(ctx: AppContext) -> Result<Self, QaError> {
        let renderer = PageRenderer::new(ctx.config())?;
        Ok(Self { ctx, renderer })
    }
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct PageQuery {
    #[serde(default)]
    q: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AskRequest {
    #[serde(default)]
    query: String,
}

/// Answer `raw` if it holds anything besides whitespace.
///
/// Returns `Ok(None)` for empty input; the pipeline is not consulted at all.
pub async fn handle_query(ctx: &AppContext, raw: &str) -> Result<Option<RenderedAnswer>, QaError> {
    let query = raw.trim();
    if query.is_empty() {
        return Ok(None);
    }

    let pipeline = ctx.pipeline().await?;
    let result = pipeline.ask(query).await?;
    info!("Answered query with {} sources", result.source_documents.len());
    Ok(Some(RenderedAnswer::from_result(&result)))
}

fn status_for(err: &QaError) -> StatusCode {
    match err {
        QaError::Provider { .. } => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Build the router over shared state.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/ask", post(ask))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server on the given address.
///
/// Returns a handle that resolves when the server shuts down. The server stops
/// accepting connections once `shutdown_rx` observes `true`.
pub async fn start_http_server(
    bind: SocketAddr,
    state: Arc<AppState>,
    shutdown_rx: tokio::sync::watch::Receiver<bool>,
) -> Result<tokio::task::JoinHandle<()>, QaError> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .map_err(|e| QaError::Configuration(format!("cannot bind {bind}: {e}")))?;
    info!(%bind, "HTTP server listening");

    let handle = tokio::spawn(async move {
        let mut shutdown = shutdown_rx;
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.wait_for(|v| *v).await;
            })
            .await
        {
            error!("HTTP server stopped: {}", e);
        }
    });

    Ok(handle)
}

// -- handlers --

async fn index(State(state): State<Arc<AppState>>, Query(params): Query<PageQuery>) -> Response {
    let query = params.q.unwrap_or_default();

    let (status, answer, error) = match handle_query(&state.ctx, &query).await {
        Ok(answer) => (StatusCode::OK, answer, None),
        Err(e) => {
            error!("Query failed: {}", e);
            (status_for(&e), None, Some(e.to_string()))
        }
    };

    let view = PageView {
        query: &query,
        answer: answer.as_ref(),
        error,
    };
    match state.renderer.render(&view) {
        Ok(page) => (status, Html(page)).into_response(),
        Err(e) => {
            error!("Page render failed: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

async fn ask(State(state): State<Arc<AppState>>, Json(request): Json<AskRequest>) -> Response {
    match handle_query(&state.ctx, &request.query).await {
        Ok(Some(answer)) => Json(serde_json::json!({
            "answer": answer.answer,
            "sources": answer.sources,
        }))
        .into_response(),
        Ok(None) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => {
            error!("Query failed: {}", e);
            (status_for(&e), Json(serde_json::json!({ "error": e.to_string() }))).into_response()
        }
    }
}

async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let status = if state.ctx.is_ready() { "ready" } else { "initializing" };
    Json(serde_json::json!({ "status": status }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderErrorKind;
    use crate::pipeline::tests::{StubChat, StubEmbedder, StubLoader, test_config};
    use crate::template::ChatTemplate;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, header};
    use std::sync::atomic::Ordering;
    use tower::ServiceExt;

    struct Harness {
        state: Arc<AppState>,
        loader: Arc<StubLoader>,
        embedder: Arc<StubEmbedder>,
        chat: Arc<StubChat>,
    }

    fn harness(pages: &[&str], embedder: StubEmbedder) -> Harness {
        let loader = Arc::new(StubLoader::new(pages));
        let embedder = Arc::new(embedder);
        let chat = Arc::new(StubChat::new("Format X"));
        let ctx = AppContext::new(
            test_config(),
            loader.clone(),
            embedder.clone(),
            chat.clone(),
            ChatTemplate::default(),
        );
        Harness {
            state: Arc::new(AppState::new(ctx).unwrap()),
            loader,
            embedder,
            chat,
        }
    }

    async fn body_string(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_empty_query_never_touches_pipeline() {
        let h = harness(&["page"], StubEmbedder::new());

        for raw in ["", "   ", "\n\t"] {
            assert!(handle_query(&h.state.ctx, raw).await.unwrap().is_none());
        }

        let response = router(h.state.clone())
            .oneshot(Request::get("/?q=").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let page = body_string(response).await;
        assert!(!page.contains("Answer ready"));

        assert_eq!(h.loader.calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.embedder.queries.load(Ordering::SeqCst), 0);
        assert!(h.chat.prompts.lock().unwrap().is_empty());
        assert!(!h.state.ctx.is_ready());
    }

    #[tokio::test]
    async fn test_page_shows_answer_and_numbered_sources() {
        let short = "x".repeat(500);
        let long = "y".repeat(900);
        let h = harness(&[short.as_str(), long.as_str()], StubEmbedder::new());

        let response = router(h.state.clone())
            .oneshot(
                Request::get("/?q=What%20is%20the%20TIN%20format%3F")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let page = body_string(response).await;
        assert!(page.contains("Answer ready"));
        assert!(page.contains("Format X"));
        assert!(page.contains("Source 1"));
        assert!(page.contains("Source 2"));
        assert!(!page.contains("Source 3"));
        assert!(page.contains(&format!("{}...", "y".repeat(800))));
        assert!(!page.contains(&"y".repeat(801)));
        assert_eq!(h.chat.prompts.lock().unwrap()[0].user, "What is the TIN format?");
    }

    #[tokio::test]
    async fn test_repeated_query_renders_identically() {
        let long = "y".repeat(900);
        let h = harness(&["TIN is C followed by digits", long.as_str()], StubEmbedder::new());

        let first = handle_query(&h.state.ctx, "What is the TIN format?")
            .await
            .unwrap()
            .unwrap();
        for _ in 0..3 {
            let again = handle_query(&h.state.ctx, "What is the TIN format?")
                .await
                .unwrap()
                .unwrap();
            assert_eq!(again, first);
        }

        let app = router(h.state.clone());
        let mut pages = Vec::new();
        for _ in 0..3 {
            let response = app
                .clone()
                .oneshot(
                    Request::get("/?q=What%20is%20the%20TIN%20format%3F")
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            pages.push(body_string(response).await);
        }
        assert!(pages.iter().all(|page| page == &pages[0]));
        assert_eq!(h.loader.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_api_ask_returns_json_sources() {
        let long = "z".repeat(900);
        let h = harness(&["short page", long.as_str()], StubEmbedder::new());

        let response = router(h.state.clone())
            .oneshot(
                Request::post("/api/ask")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"query":"  short?  "}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(body["answer"], "Format X");
        let sources = body["sources"].as_array().unwrap();
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0]["number"], 1);
        assert_eq!(sources[1]["number"], 2);
        let truncated: Vec<bool> = sources
            .iter()
            .map(|s| s["truncated"].as_bool().unwrap())
            .collect();
        assert_eq!(truncated.iter().filter(|t| **t).count(), 1);
    }

    #[tokio::test]
    async fn test_api_ask_empty_is_no_content() {
        let h = harness(&["page"], StubEmbedder::new());

        let response = router(h.state.clone())
            .oneshot(
                Request::post("/api/ask")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"query":"  "}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(h.loader.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_provider_failure_is_bad_gateway() {
        let h = harness(&["page"], StubEmbedder::failing(ProviderErrorKind::Authentication));

        let response = router(h.state.clone())
            .oneshot(Request::get("/?q=hello").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let page = body_string(response).await;
        assert!(page.contains("class=\"error\""));
        assert!(page.contains("Incorrect API key provided"));
        assert!(!page.contains("Answer ready"));
    }

    #[tokio::test]
    async fn test_health_reports_readiness() {
        let h = harness(&["page"], StubEmbedder::new());
        let app = router(h.state.clone());

        let before = app
            .clone()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(body_string(before).await.contains("initializing"));

        h.state.ctx.pipeline().await.unwrap();

        let after = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(body_string(after).await.contains("ready"));
    }

    #[test]
    fn test_status_mapping() {
        let provider = QaError::provider(ProviderErrorKind::RateLimit, "slow down");
        assert_eq!(status_for(&provider), StatusCode::BAD_GATEWAY);
        assert_eq!(
            status_for(&QaError::DocumentLoad("missing".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
