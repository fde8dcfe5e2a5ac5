//! HTTP client for the session registry.

use std::time::Duration;

use protocol::{
    CreateSessionRequest, CreateSessionResponse, ErrorResponse, LogEntry, Origin, SessionId,
    SessionInfo, SessionStatus,
};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use url::Url;

use super::{RegistryError, SessionRegistry};

/// Registry reached over its REST API.
#[derive(Debug, Clone)]
pub struct HttpRegistry {
    client: Client,
    base: Url,
}

impl HttpRegistry {
    /// Creates a client for the registry at `base` with a per-request timeout.
    pub fn new(base: Url, request_timeout: Duration) -> Result<Self, RegistryError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .user_agent(concat!("vmsh/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| RegistryError::Http(e.to_string()))?;

        Ok(Self { client, base })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, RegistryError> {
        let mut url = self.base.clone();
        url.set_query(None);
        url.set_fragment(None);
        url.path_segments_mut()
            .map_err(|_| RegistryError::Http(format!("invalid registry url: {}", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Maps non-success statuses to registry errors.
    async fn check(response: Response, id: Option<&str>) -> Result<Response, RegistryError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorResponse>(&body)
            .map(|e| e.message)
            .unwrap_or(body);

        tracing::debug!("Registry returned {}: {}", status, message);

        Err(match (status, id) {
            (StatusCode::NOT_FOUND, Some(id)) => RegistryError::NotFound(id.to_string()),
            (StatusCode::GONE, Some(id)) => RegistryError::AlreadyDeleted(id.to_string()),
            (StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY, _) => {
                RegistryError::Rejected(message)
            }
            _ => RegistryError::Unexpected {
                status: status.as_u16(),
                message,
            },
        })
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, RegistryError> {
        let bytes = response
            .bytes()
            .await
            .map_err(|e| RegistryError::Http(e.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|e| RegistryError::Decode(e.to_string()))
    }
}

fn request_failed(err: reqwest::Error) -> RegistryError {
    if err.is_timeout() {
        RegistryError::Http(format!("request timed out: {}", err))
    } else {
        RegistryError::Http(err.to_string())
    }
}

impl SessionRegistry for HttpRegistry {
    async fn create_session(&self, origin: &Origin) -> Result<SessionId, RegistryError> {
        let url = self.endpoint(&["sessions"])?;
        let body = CreateSessionRequest {
            origin: origin.clone(),
        };

        let response = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(request_failed)?;
        let response = Self::check(response, None).await?;
        let created: CreateSessionResponse = Self::decode(response).await?;

        protocol::validate_session_id(&created.id)
            .map_err(|e| RegistryError::Decode(e.to_string()))?;
        Ok(created.id)
    }

    async fn list_sessions(&self) -> Result<Vec<SessionInfo>, RegistryError> {
        let url = self.endpoint(&["sessions"])?;
        let response = self.client.get(url).send().await.map_err(request_failed)?;
        let response = Self::check(response, None).await?;
        Self::decode(response).await
    }

    async fn get_status(&self, id: &str) -> Result<SessionStatus, RegistryError> {
        let url = self.endpoint(&["sessions", id])?;
        let response = self.client.get(url).send().await.map_err(request_failed)?;
        let response = Self::check(response, Some(id)).await?;
        Self::decode(response).await
    }

    async fn delete_session(&self, id: &str) -> Result<(), RegistryError> {
        let url = self.endpoint(&["sessions", id])?;
        let response = self
            .client
            .delete(url)
            .send()
            .await
            .map_err(request_failed)?;
        Self::check(response, Some(id)).await?;
        Ok(())
    }

    async fn fetch_logs(
        &self,
        id: &str,
        tail: Option<usize>,
    ) -> Result<Vec<LogEntry>, RegistryError> {
        let mut url = self.endpoint(&["sessions", id, "logs"])?;
        if let Some(tail) = tail {
            url.query_pairs_mut().append_pair("tail", &tail.to_string());
        }

        let response = self.client.get(url).send().await.map_err(request_failed)?;
        let response = Self::check(response, Some(id)).await?;
        Self::decode(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, Query};
    use axum::http::StatusCode as AxumStatus;
    use axum::response::IntoResponse;
    use axum::routing::get;
    use axum::{Json, Router};
    use protocol::SessionState;
    use serde_json::json;
    use std::collections::HashMap;

    async fn serve(router: Router) -> Url {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        Url::parse(&format!("http://{}/api", addr)).unwrap()
    }

    fn registry(base: Url) -> HttpRegistry {
        HttpRegistry::new(base, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_endpoint_keeps_base_path() {
        let registry = registry(Url::parse("https://api.vmsh.dev/v1/").unwrap());
        let url = registry.endpoint(&["sessions", "abc", "logs"]).unwrap();
        assert_eq!(url.as_str(), "https://api.vmsh.dev/v1/sessions/abc/logs");
    }

    #[tokio::test]
    async fn test_create_session() {
        let router = Router::new().route(
            "/api/sessions",
            axum::routing::post(|Json(body): Json<serde_json::Value>| async move {
                assert_eq!(body, json!({"origin": {"kind": "local"}}));
                (AxumStatus::CREATED, Json(json!({"id": "session-1"})))
            }),
        );
        let registry = registry(serve(router).await);

        let id = registry.create_session(&Origin::Local).await.unwrap();
        assert_eq!(id, "session-1");
    }

    #[tokio::test]
    async fn test_create_session_rejected() {
        let router = Router::new().route(
            "/api/sessions",
            axum::routing::post(|| async {
                (
                    AxumStatus::UNPROCESSABLE_ENTITY,
                    Json(json!({"message": "repository not reachable"})),
                )
            }),
        );
        let registry = registry(serve(router).await);

        let err = registry.create_session(&Origin::Local).await.unwrap_err();
        assert_eq!(
            err,
            RegistryError::Rejected("repository not reachable".to_string())
        );
    }

    #[tokio::test]
    async fn test_list_sessions() {
        let router = Router::new().route(
            "/api/sessions",
            get(|| async {
                Json(json!([
                    {"id": "a", "state": "created", "description": "local",
                     "created_at": 1, "last_activity": 1},
                    {"id": "b", "state": "disconnected", "description": "https://github.com/u/r",
                     "created_at": 2, "last_activity": 5}
                ]))
            }),
        );
        let registry = registry(serve(router).await);

        let sessions = registry.list_sessions().await.unwrap();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].id, "a");
        assert_eq!(sessions[1].state, SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_status_not_found_and_gone() {
        let router = Router::new().route(
            "/api/sessions/:id",
            get(|Path(id): Path<String>| async move {
                match id.as_str() {
                    "live" => Json(json!({"state": "connected", "created_at": 1, "last_activity": 9}))
                        .into_response(),
                    "gone" => AxumStatus::GONE.into_response(),
                    _ => (AxumStatus::NOT_FOUND, Json(json!({"message": "no such session"})))
                        .into_response(),
                }
            }),
        );
        let registry = registry(serve(router).await);

        let status = registry.get_status("live").await.unwrap();
        assert_eq!(status.state, SessionState::Connected);
        assert_eq!(status.last_activity, 9);

        assert_eq!(
            registry.get_status("missing").await,
            Err(RegistryError::NotFound("missing".to_string()))
        );
        assert_eq!(
            registry.get_status("gone").await,
            Err(RegistryError::AlreadyDeleted("gone".to_string()))
        );
    }

    #[tokio::test]
    async fn test_delete_session() {
        let router = Router::new().route(
            "/api/sessions/:id",
            axum::routing::delete(|| async { AxumStatus::NO_CONTENT }),
        );
        let registry = registry(serve(router).await);

        assert!(registry.delete_session("a").await.is_ok());
    }

    #[tokio::test]
    async fn test_fetch_logs_with_tail() {
        let router = Router::new().route(
            "/api/sessions/:id/logs",
            get(
                |Path(id): Path<String>, Query(query): Query<HashMap<String, String>>| async move {
                    assert_eq!(id, "a");
                    assert_eq!(query.get("tail").map(String::as_str), Some("2"));
                    Json(json!([
                        {"timestamp": 10, "message": "cloning"},
                        {"timestamp": 11, "message": "ready"}
                    ]))
                },
            ),
        );
        let registry = registry(serve(router).await);

        let logs = registry.fetch_logs("a", Some(2)).await.unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[1].message, "ready");
    }

    #[tokio::test]
    async fn test_unexpected_status() {
        let router = Router::new().route(
            "/api/sessions",
            get(|| async { (AxumStatus::INTERNAL_SERVER_ERROR, "boom") }),
        );
        let registry = registry(serve(router).await);

        assert_eq!(
            registry.list_sessions().await,
            Err(RegistryError::Unexpected {
                status: 500,
                message: "boom".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_invalid_body() {
        let router = Router::new().route("/api/sessions", get(|| async { "not json" }));
        let registry = registry(serve(router).await);

        assert!(matches!(
            registry.list_sessions().await,
            Err(RegistryError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_registry() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let registry = registry(Url::parse(&format!("http://{}", addr)).unwrap());
        assert!(matches!(
            registry.list_sessions().await,
            Err(RegistryError::Http(_))
        ));
    }
}
