pub mod characters;
pub mod chat;
pub mod downloads;
pub mod models;
pub mod session;

use std::sync::Arc;

use axum::Router;
use utoipa::OpenApi;

use crate::state::AppState;

/// Routes nested under `/api`.
pub fn router(state: &AppState) -> Router<Arc<AppState>> {
    Router::new()
        .merge(session::router())
        .merge(chat::router(state.config.max_upload_bytes()))
        .merge(characters::router())
        .merge(models::router())
        .merge(downloads::router())
}

#[derive(OpenApi)]
#[openapi()]
pub struct Api;

pub fn api_docs() -> utoipa::openapi::OpenApi {
    let mut spec = Api::openapi();
    spec.merge(session::SessionApi::openapi());
    spec.merge(chat::ChatApi::openapi());
    spec.merge(characters::CharactersApi::openapi());
    spec.merge(models::ModelsApi::openapi());
    spec.merge(downloads::DownloadsApi::openapi());
    spec
}

// ── Tests ──────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod test {
    use axum::body::Body;
    use axum::http::header::{CONTENT_TYPE, SET_COOKIE};
    use axum::http::{HeaderMap, Request, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use crate::middleware::session::X_SESSION_ID;
    use crate::routes;
    use crate::test_support::{MockRuntime, TINY_PNG, test_state};

    struct Reply {
        status: StatusCode,
        headers: HeaderMap,
        body: Value,
    }

    impl Reply {
        fn session(&self) -> String {
            self.headers
                .get(X_SESSION_ID)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_owned()
        }
    }

    async fn call(
        app: &axum::Router,
        method: &str,
        uri: &str,
        session: Option<&str>,
        body: Option<Value>,
    ) -> Reply {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(id) = session {
            req = req.header(X_SESSION_ID, id);
        }
        let req = match body {
            Some(body) => req
                .header(CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => req.body(Body::empty()).unwrap(),
        };
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let headers = resp.headers().clone();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        Reply { status, headers, body }
    }

    async fn app(runtime: MockRuntime) -> axum::Router {
        routes::build(test_state(runtime).await)
    }

    fn installed() -> MockRuntime {
        MockRuntime::new()
            .with_model("llama3.2:3b", 2_000_000_000)
            .with_model("llava:7b", 4_000_000_000)
    }

    #[tokio::test]
    async fn initial_data_issues_session_and_lists_everything() {
        let app = app(installed()).await;
        let r = call(&app, "GET", "/api/get_initial_data", None, None).await;

        assert_eq!(r.status, StatusCode::OK);
        assert_eq!(r.body["success"], true);
        let id = r.session();
        assert!(!id.is_empty());
        assert_eq!(r.body["data"]["session"]["id"], id.as_str());
        let cookie = r.headers.get(SET_COOKIE).unwrap().to_str().unwrap();
        assert!(cookie.starts_with(&format!("persona_session={id}")));

        assert_eq!(r.body["data"]["chat_models"], json!(["llama3.2:3b"]));
        assert_eq!(r.body["data"]["caption_models"], json!(["llava:7b"]));
        assert_eq!(r.body["data"]["characters"].as_array().unwrap().len(), 4);
        assert_eq!(r.body["data"]["current_character"], Value::Null);
    }

    #[tokio::test]
    async fn session_token_is_honoured_and_unknown_tokens_replaced() {
        let app = app(installed()).await;
        let first = call(&app, "GET", "/api/session", None, None).await;
        let id = first.session();

        let again = call(&app, "GET", "/api/session", Some(&id), None).await;
        assert_eq!(again.session(), id);

        let forged = call(&app, "GET", "/api/session", Some("forged-token"), None).await;
        assert_ne!(forged.session(), "forged-token");
        assert_ne!(forged.session(), id);
    }

    #[tokio::test]
    async fn chat_flow_over_http() {
        let app = app(installed().with_reply("Hello from the assistant")).await;
        let id = call(&app, "GET", "/api/session", None, None).await.session();

        let r = call(&app, "POST", "/api/send_message", Some(&id), Some(json!({"message": "hello"}))).await;
        assert_eq!(r.status, StatusCode::BAD_REQUEST);
        assert_eq!(r.body["success"], false);
        assert_eq!(r.body["code"], "validation_error");

        let r = call(&app, "POST", "/api/select_character", Some(&id), Some(json!({"character": "assistant"}))).await;
        assert_eq!(r.status, StatusCode::OK);
        assert_eq!(r.body["data"]["name"], "Assistant");

        let r = call(&app, "POST", "/api/send_message", Some(&id), Some(json!({"message": "hello"}))).await;
        assert_eq!(r.status, StatusCode::OK);
        assert_eq!(r.body["data"]["sender"], "bot");
        assert_eq!(r.body["data"]["content"], "Hello from the assistant");
        assert_eq!(r.body["data"]["is_error"], false);

        let r = call(&app, "GET", "/api/session", Some(&id), None).await;
        assert_eq!(r.body["data"]["history"].as_array().unwrap().len(), 2);
        assert_eq!(r.body["data"]["active_character"], "assistant");

        let r = call(&app, "POST", "/api/reset_chat", Some(&id), None).await;
        assert_eq!(r.status, StatusCode::OK);
        let r = call(&app, "GET", "/api/session", Some(&id), None).await;
        assert!(r.body["data"]["history"].as_array().unwrap().is_empty());
        assert_eq!(r.body["data"]["active_character"], "assistant");
    }

    #[tokio::test]
    async fn model_selection_over_http() {
        let app = app(installed()).await;
        let id = call(&app, "GET", "/api/session", None, None).await.session();

        let r = call(&app, "POST", "/api/select_chat_model", Some(&id), Some(json!({"model": "llama3.2:3b"}))).await;
        assert_eq!(r.status, StatusCode::OK);
        assert_eq!(r.body["data"]["selected_chat_model"], "llama3.2:3b");

        let r = call(&app, "POST", "/api/select_image_model", Some(&id), Some(json!({"model": "ghost:1b"}))).await;
        assert_eq!(r.status, StatusCode::NOT_FOUND);
        assert_eq!(r.body["code"], "not_found");
    }

    #[tokio::test]
    async fn upload_image_captions_and_replies() {
        let app = app(installed()).await;
        let id = call(&app, "GET", "/api/session", None, None).await.session();
        call(&app, "POST", "/api/select_character", Some(&id), Some(json!({"character": "Creative Writer"}))).await;

        let boundary = "persona-test-boundary";
        let mut body = format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"cat.png\"\r\n\
             Content-Type: image/png\r\n\r\n"
        )
        .into_bytes();
        body.extend_from_slice(TINY_PNG);
        body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

        let req = Request::builder()
            .method("POST")
            .uri("/api/upload_image")
            .header(X_SESSION_ID, &id)
            .header(CONTENT_TYPE, format!("multipart/form-data; boundary={boundary}"))
            .body(Body::from(body))
            .unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["data"]["filename"], "cat.png");
        assert_eq!(body["data"]["caption"], "a cat on a windowsill");
        assert_eq!(body["data"]["reply"]["image_caption"], "a cat on a windowsill");
    }

    #[tokio::test]
    async fn character_crud_over_http() {
        let app = app(installed()).await;

        let r = call(
            &app,
            "POST",
            "/api/characters",
            None,
            Some(json!({"name": "Captain Hook", "description": "A grumpy pirate"})),
        )
        .await;
        assert_eq!(r.status, StatusCode::OK);
        assert_eq!(r.body["data"]["key"], "captain_hook");
        assert_eq!(r.body["data"]["role"], "A grumpy pirate");
        assert_eq!(r.body["data"]["is_builtin"], false);

        let r = call(&app, "PUT", "/api/characters/captain_hook", None, Some(json!({"role": "Retired"}))).await;
        assert_eq!(r.body["data"]["role"], "Retired");
        assert_eq!(r.body["data"]["system_prompt"], "A grumpy pirate");

        let r = call(&app, "GET", "/api/characters", None, None).await;
        assert_eq!(r.body["data"].as_array().unwrap().len(), 5);
        assert_eq!(r.body["data"][4]["key"], "captain_hook");

        let r = call(&app, "DELETE", "/api/characters/assistant", None, None).await;
        assert_eq!(r.status, StatusCode::FORBIDDEN);
        assert_eq!(r.body["code"], "forbidden");

        let r = call(&app, "DELETE", "/api/characters/captain_hook", None, None).await;
        assert_eq!(r.status, StatusCode::OK);
        let r = call(&app, "DELETE", "/api/characters/captain_hook", None, None).await;
        assert_eq!(r.status, StatusCode::NOT_FOUND);

        let r = call(&app, "POST", "/api/characters", None, Some(json!({"name": ""}))).await;
        assert_eq!(r.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn download_lifecycle_over_http() {
        let (runtime, _steps) = installed().scripted_pull();
        let app = app(runtime).await;

        let r = call(&app, "GET", "/api/models/download", None, None).await;
        assert_eq!(r.body["data"]["active"], false);
        assert_eq!(r.body["data"]["job"], Value::Null);

        let r = call(&app, "POST", "/api/models/download", None, Some(json!({"model": "llama3.2:3b"}))).await;
        assert_eq!(r.status, StatusCode::OK);
        assert_eq!(r.body["data"]["status"], "starting");

        let r = call(&app, "POST", "/api/models/download", None, Some(json!({"model": "phi3:mini"}))).await;
        assert_eq!(r.status, StatusCode::CONFLICT);
        assert_eq!(r.body["code"], "conflict");

        let r = call(&app, "POST", "/api/models/download/reset", None, None).await;
        assert_eq!(r.status, StatusCode::CONFLICT);

        let r = call(&app, "POST", "/api/models/download/cancel", None, None).await;
        assert_eq!(r.status, StatusCode::OK);
        assert_eq!(r.body["data"]["status"], "cancelled");

        let r = call(&app, "POST", "/api/models/download/cancel", None, None).await;
        assert_eq!(r.status, StatusCode::CONFLICT);

        let r = call(&app, "POST", "/api/models/download/reset", None, None).await;
        assert_eq!(r.status, StatusCode::OK);
        let r = call(&app, "POST", "/api/models/download/cancel", None, None).await;
        assert_eq!(r.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn model_listings_degrade_when_runtime_is_down() {
        let app = app(MockRuntime::unreachable()).await;

        let r = call(&app, "GET", "/api/models", None, None).await;
        assert_eq!(r.status, StatusCode::OK);
        assert_eq!(r.body["data"], json!([]));

        let r = call(&app, "GET", "/api/models/stats", None, None).await;
        assert_eq!(r.body["data"]["total_models"], 0);

        let r = call(&app, "POST", "/api/refresh_models", None, None).await;
        assert_eq!(r.body["data"]["chat_models"], json!([]));

        let r = call(&app, "GET", "/api/models/popular", None, None).await;
        assert!(!r.body["data"].as_array().unwrap().is_empty());

        let r = call(&app, "POST", "/api/models/delete", None, Some(json!({"model": "llama3.2:3b"}))).await;
        assert_eq!(r.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(r.body["code"], "unavailable");
    }

    #[tokio::test]
    async fn model_stats_and_running() {
        let app = app(installed().with_running("llama3.2:3b")).await;
        let r = call(&app, "GET", "/api/models/stats", None, None).await;
        assert_eq!(r.body["data"]["total_models"], 2);
        assert_eq!(r.body["data"]["total_size"], 6_000_000_000u64);
        assert_eq!(r.body["data"]["running_count"], 1);

        let r = call(&app, "GET", "/api/models/running", None, None).await;
        assert_eq!(r.body["data"], json!(["llama3.2:3b"]));
    }

    #[tokio::test]
    async fn deleting_session_expires_cookie() {
        let app = app(installed()).await;
        let id = call(&app, "GET", "/api/session", None, None).await.session();

        let r = call(&app, "DELETE", "/api/session", Some(&id), None).await;
        assert_eq!(r.status, StatusCode::OK);
        assert!(r.headers.get(X_SESSION_ID).is_none());
        let cookie = r.headers.get(SET_COOKIE).unwrap().to_str().unwrap();
        assert!(cookie.contains("Max-Age=0"));

        let r = call(&app, "GET", "/api/session", Some(&id), None).await;
        assert_ne!(r.session(), id);
    }
}
