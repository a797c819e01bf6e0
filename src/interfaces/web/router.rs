use axum::{
    Router,
    body::Body,
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method, Request, header},
    middleware,
    middleware::Next,
    routing::post,
};
use std::time::Duration;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::warn;

use super::AppState;
use super::handlers::{analyze, chat, images};
use crate::core::config::ServerConfig;
use crate::core::protocol::{ANALYZE_IMAGE_PATH, CHAT_PATH, GENERATE_IMAGE_PATH, IMAGE_EDIT_PATH};

const PREFLIGHT_MAX_AGE: Duration = Duration::from_secs(86400);

/// Production answers only the configured origin; everything else is open.
fn build_cors(server: &ServerConfig) -> CorsLayer {
    let origin = if server.production {
        match HeaderValue::from_str(&server.allowed_origin) {
            Ok(origin) => AllowOrigin::exact(origin),
            Err(_) => {
                warn!(
                    "Allowed origin '{}' is not a valid header value, refusing cross-origin requests",
                    server.allowed_origin
                );
                AllowOrigin::list(Vec::<HeaderValue>::new())
            }
        }
    } else {
        AllowOrigin::from(Any)
    };

    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .max_age(PREFLIGHT_MAX_AGE)
}

pub fn build_api_router(state: AppState) -> Router {
    let body_limit = state.config.body_limit_bytes();
    let cors = build_cors(&state.config.server);

    Router::new()
        .route(CHAT_PATH, post(chat::chat_endpoint))
        .route(GENERATE_IMAGE_PATH, post(images::generate_image_endpoint))
        .route(IMAGE_EDIT_PATH, post(images::image_edit_endpoint))
        .route(ANALYZE_IMAGE_PATH, post(analyze::analyze_image_endpoint))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(middleware::from_fn(security_headers))
        .layer(cors)
        .with_state(state)
}

async fn security_headers(req: Request<Body>, next: Next) -> axum::response::Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static("default-src 'none'; frame-ancestors 'none'"),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::AppConfig;
    use crate::core::llm::{AssistantBackend, ChatError, ImageAnalysis};
    use crate::core::tasks::{
        CompletedTask, ImageGenerator, ImageJob, JobError, SubmitError, TaskArtifact, TaskError,
        TaskId,
    };
    use async_trait::async_trait;
    use axum::http::StatusCode;
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use tower::util::ServiceExt;

    enum ImageOutcome {
        Done,
        Timeout,
        NoKey,
    }

    struct FakeImages {
        outcome: ImageOutcome,
        jobs: Mutex<Vec<ImageJob>>,
    }

    #[async_trait]
    impl ImageGenerator for FakeImages {
        async fn run(&self, job: ImageJob) -> Result<CompletedTask, JobError> {
            self.jobs.lock().unwrap().push(job);
            match self.outcome {
                ImageOutcome::Done => Ok(CompletedTask {
                    task_id: TaskId::new("t1"),
                    results: vec![TaskArtifact::with_url("https://x/img.png")],
                    details: json!({"task_status": "SUCCEEDED"}),
                }),
                ImageOutcome::Timeout => Err(TaskError::Timeout {
                    task_id: TaskId::new("t1"),
                    attempts: 20,
                }
                .into()),
                ImageOutcome::NoKey => Err(SubmitError::MissingCredential.into()),
            }
        }
    }

    struct FakeAssistant {
        fail: bool,
        questions: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl AssistantBackend for FakeAssistant {
        async fn chat(&self, message: &str) -> Result<String, ChatError> {
            if self.fail {
                return Err(ChatError::Upstream {
                    status: 429,
                    code: Some("Throttling".into()),
                    message: "Requests rate limit exceeded".into(),
                });
            }
            Ok(format!("echo: {}", message))
        }

        async fn analyze_image(
            &self,
            _image_data_url: &str,
            question: &str,
        ) -> Result<ImageAnalysis, ChatError> {
            self.questions.lock().unwrap().push(question.to_string());
            Ok(ImageAnalysis {
                text: "a cat on a sofa".into(),
                model: Some("qwen-vl-max".into()),
                usage: Some(json!({"total_tokens": 42})),
            })
        }
    }

    struct Fixture {
        state: AppState,
        images: Arc<FakeImages>,
        assistant: Arc<FakeAssistant>,
    }

    fn fixture(outcome: ImageOutcome, chat_fails: bool, config: AppConfig) -> Fixture {
        let images = Arc::new(FakeImages {
            outcome,
            jobs: Mutex::new(Vec::new()),
        });
        let assistant = Arc::new(FakeAssistant {
            fail: chat_fails,
            questions: Mutex::new(Vec::new()),
        });
        let state = AppState {
            config: Arc::new(config),
            images: images.clone(),
            assistant: assistant.clone(),
        };
        Fixture {
            state,
            images,
            assistant,
        }
    }

    fn ok_fixture() -> Fixture {
        fixture(ImageOutcome::Done, false, AppConfig::default())
    }

    async fn json_request(
        app: Router,
        path: &str,
        body: serde_json::Value,
    ) -> (StatusCode, serde_json::Value) {
        let req = Request::builder()
            .method(Method::POST)
            .uri(path)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let body_bytes = axum::body::to_bytes(resp.into_body(), 1024 * 1024)
            .await
            .unwrap();
        let json: serde_json::Value =
            serde_json::from_slice(&body_bytes).unwrap_or(serde_json::json!({}));
        (status, json)
    }

    #[tokio::test]
    async fn generate_image_returns_results_and_task_id() {
        let fx = ok_fixture();
        let app = build_api_router(fx.state.clone());
        let (status, json) = json_request(
            app,
            "/api/generate-image",
            json!({"prompt": "a red fox", "size": "1024*768"}),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["message"], "Image generation successful");
        assert_eq!(json["task_id"], "t1");
        assert_eq!(json["results"], json!([{"url": "https://x/img.png"}]));

        let jobs = fx.images.jobs.lock().unwrap();
        match &jobs[0] {
            ImageJob::Generate(req) => assert_eq!(req.size.as_deref(), Some("1024*768")),
            other => panic!("expected Generate, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_prompt_is_rejected_without_running_a_job() {
        let fx = ok_fixture();
        let app = build_api_router(fx.state.clone());
        let (status, json) = json_request(app, "/api/generate-image", json!({"prompt": " "})).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "prompt is required");
        assert!(fx.images.jobs.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_json_is_a_bad_request() {
        let app = build_api_router(ok_fixture().state);
        let req = Request::builder()
            .method(Method::POST)
            .uri("/api/chat")
            .header("content-type", "application/json")
            .body(Body::from("{\"message\": "))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn timeout_maps_to_gateway_timeout() {
        let fx = fixture(ImageOutcome::Timeout, false, AppConfig::default());
        let app = build_api_router(fx.state);
        let (status, json) =
            json_request(app, "/api/generate-image", json!({"prompt": "a red fox"})).await;

        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(json["error"], "Image generation task timeout.");
        assert_eq!(json["task_id"], "t1");
    }

    #[tokio::test]
    async fn missing_api_key_is_a_server_error() {
        let fx = fixture(ImageOutcome::NoKey, false, AppConfig::default());
        let app = build_api_router(fx.state);
        let (status, json) = json_request(
            app,
            "/api/image-edit",
            json!({"base_image_data": "data:image/png;base64,AA", "edit_prompt": "blue"}),
        )
        .await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json["error"], "AI service API key not configured.");
    }

    #[tokio::test]
    async fn image_edit_accepts_style_prompt_alias_and_defaults_function() {
        let fx = ok_fixture();
        let app = build_api_router(fx.state.clone());
        let (status, json) = json_request(
            app,
            "/api/image-edit",
            json!({"base_image_data": "data:image/png;base64,AA", "style_prompt": "ink wash"}),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["message"], "Image edit (stylization_all) successful");
        let jobs = fx.images.jobs.lock().unwrap();
        match &jobs[0] {
            ImageJob::Edit(req) => {
                assert_eq!(req.prompt(), Some("ink wash"));
                assert_eq!(req.function(), "stylization_all");
            }
            other => panic!("expected Edit, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn image_edit_requires_image_and_prompt() {
        let app = build_api_router(ok_fixture().state);
        let (status, json) =
            json_request(app, "/api/image-edit", json!({"edit_prompt": "blue"})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "base_image_data and edit_prompt are required");
    }

    #[tokio::test]
    async fn analyze_uses_default_question() {
        let fx = ok_fixture();
        let app = build_api_router(fx.state.clone());
        let (status, json) = json_request(
            app,
            "/api/analyze-image",
            json!({"imageDataB64": "data:image/png;base64,AA"}),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["analysis"], "a cat on a sofa");
        assert_eq!(json["details"]["model"], "qwen-vl-max");
        assert_eq!(json["details"]["usage"]["total_tokens"], 42);
        assert_eq!(
            fx.assistant.questions.lock().unwrap()[0],
            crate::core::protocol::DEFAULT_ANALYSIS_QUESTION
        );
    }

    #[tokio::test]
    async fn analyze_requires_image_data() {
        let app = build_api_router(ok_fixture().state);
        let (status, json) = json_request(app, "/api/analyze-image", json!({})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "imageDataB64 is required");
    }

    #[tokio::test]
    async fn chat_round_trip_and_validation() {
        let app = build_api_router(ok_fixture().state);
        let (status, json) = json_request(app.clone(), "/api/chat", json!({"message": "hi"})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["reply"], "echo: hi");

        let (status, json) = json_request(app, "/api/chat", json!({})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "Message is required");
    }

    #[tokio::test]
    async fn upstream_chat_error_is_bad_gateway_with_details() {
        let fx = fixture(ImageOutcome::Done, true, AppConfig::default());
        let app = build_api_router(fx.state);
        let (status, json) = json_request(app, "/api/chat", json!({"message": "hi"})).await;

        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(json["details"]["code"], "Throttling");
        assert_eq!(json["details"]["message"], "Requests rate limit exceeded");
    }

    #[tokio::test]
    async fn security_headers_present_on_responses() {
        let app = build_api_router(ok_fixture().state);
        let req = Request::builder()
            .method(Method::POST)
            .uri("/api/chat")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"message":"hi"}"#))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();

        assert_eq!(
            resp.headers().get("x-content-type-options").unwrap(),
            "nosniff"
        );
        assert_eq!(resp.headers().get("x-frame-options").unwrap(), "DENY");
    }

    fn preflight(origin: &str) -> Request<Body> {
        Request::builder()
            .method(Method::OPTIONS)
            .uri("/api/generate-image")
            .header("origin", origin)
            .header("access-control-request-method", "POST")
            .header("access-control-request-headers", "content-type")
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn preflight_is_open_outside_production() {
        let app = build_api_router(ok_fixture().state);
        let resp = app.oneshot(preflight("http://localhost:5173")).await.unwrap();

        assert!(resp.status().is_success());
        let headers = resp.headers();
        assert_eq!(headers.get("access-control-allow-origin").unwrap(), "*");
        assert_eq!(headers.get("access-control-max-age").unwrap(), "86400");
        let methods = headers
            .get("access-control-allow-methods")
            .unwrap()
            .to_str()
            .unwrap();
        assert!(methods.contains("POST") && methods.contains("OPTIONS"));
    }

    #[tokio::test]
    async fn production_only_allows_configured_origin() {
        let mut config = AppConfig::default();
        config.server.production = true;
        let app = build_api_router(fixture(ImageOutcome::Done, false, config).state);

        let resp = app
            .clone()
            .oneshot(preflight("https://erlinmall.com"))
            .await
            .unwrap();
        assert_eq!(
            resp.headers().get("access-control-allow-origin").unwrap(),
            "https://erlinmall.com"
        );

        let resp = app.oneshot(preflight("https://evil.example")).await.unwrap();
        assert!(resp.headers().get("access-control-allow-origin").is_none());
    }

    #[tokio::test]
    async fn oversized_body_is_rejected() {
        let mut config = AppConfig::default();
        config.server.body_limit_mb = 1;
        let app = build_api_router(fixture(ImageOutcome::Done, false, config).state);
        let big = "A".repeat(2 * 1024 * 1024);
        let req = Request::builder()
            .method(Method::POST)
            .uri("/api/analyze-image")
            .header("content-type", "application/json")
            .body(Body::from(json!({"imageDataB64": big}).to_string()))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }
}
