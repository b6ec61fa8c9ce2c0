//! Drives the full router in process with `tower::ServiceExt::oneshot`

#![allow(dead_code)]

use assetgraph::graph::GraphStore;
use assetgraph::{AppState, ServerConfig, bootstrap, build_router, features};
use axum::Router;
use axum::body::Body;
use axum::http::{HeaderName, Method, Request, StatusCode, header};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use std::sync::Arc;
use tower::ServiceExt;

pub const ADMIN_EMAIL: &str = "root@assetgraph.test";
pub const ADMIN_PASSWORD: &str = "correct horse battery";

pub struct TestApp {
    pub router: Router,
}

pub struct Reply {
    pub status: StatusCode,
    pub location: Option<String>,
    pub etag: Option<String>,
    pub body: Value,
}

impl TestApp {
    pub fn new() -> Self {
        let mut config = ServerConfig::with_secret("integration-secret-0123456789abcdef");
        config.allow_registration = true;
        config.bootstrap_admin_email = Some(ADMIN_EMAIL.into());
        config.bootstrap_admin_password = Some(ADMIN_PASSWORD.into());

        features::register_all().unwrap();
        let state = Arc::new(AppState::with_store(Arc::new(config), GraphStore::new().unwrap()));
        bootstrap::run(&state).unwrap();
        Self {
            router: build_router(state),
        }
    }

    pub async fn send(&self, method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> Reply {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            request = request.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let body = match body {
            Some(body) => {
                request = request.header(header::CONTENT_TYPE, "application/vnd.api+json");
                Body::from(body.to_string())
            }
            None => Body::empty(),
        };

        self.dispatch(request.body(body).unwrap()).await
    }

    pub async fn get_if_none_match(&self, uri: &str, token: &str, etag: &str) -> Reply {
        let request = Request::builder()
            .method(Method::GET)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .header(header::IF_NONE_MATCH, etag)
            .body(Body::empty())
            .unwrap();
        self.dispatch(request).await
    }

    async fn dispatch(&self, request: Request<Body>) -> Reply {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let header_text = |name: HeaderName| {
            response
                .headers()
                .get(name)
                .map(|value| value.to_str().unwrap().to_string())
        };
        let location = header_text(header::LOCATION);
        let etag = header_text(header::ETAG);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        Reply {
            status,
            location,
            etag,
            body,
        }
    }

    pub async fn get(&self, uri: &str, token: &str) -> Reply {
        self.send(Method::GET, uri, Some(token), None).await
    }

    pub async fn post(&self, uri: &str, token: &str, body: Value) -> Reply {
        self.send(Method::POST, uri, Some(token), Some(body)).await
    }

    pub async fn login(&self, email: &str, password: &str) -> String {
        let reply = self
            .send(
                Method::POST,
                "/auth/login",
                None,
                Some(json!({ "data": { "type": "auth", "attributes": { "email": email, "password": password } } })),
            )
            .await;
        assert_eq!(reply.status, StatusCode::OK, "{}", reply.body);
        token_of(&reply)
    }

    /// A new company whose administrator is returned logged in
    pub async fn register(&self, company: &str, email: &str) -> String {
        let reply = self
            .send(
                Method::POST,
                "/auth/register",
                None,
                Some(json!({ "data": { "type": "auth", "attributes": {
                    "companyName": company,
                    "name": format!("{company} admin"),
                    "email": email,
                    "password": "s3cret-password",
                } } })),
            )
            .await;
        assert_eq!(reply.status, StatusCode::CREATED, "{}", reply.body);
        token_of(&reply)
    }

    pub async fn create(&self, token: &str, endpoint: &str, attributes: Value, relationships: Value) -> String {
        let reply = self
            .post(
                &format!("/{endpoint}"),
                token,
                json!({ "data": { "type": endpoint, "attributes": attributes, "relationships": relationships } }),
            )
            .await;
        assert_eq!(reply.status, StatusCode::CREATED, "{}", reply.body);
        reply.body["data"]["id"].as_str().unwrap().to_string()
    }
}

pub fn token_of(reply: &Reply) -> String {
    reply.body["data"]["attributes"]["token"].as_str().unwrap().to_string()
}

pub fn link(kind: &str, id: &str) -> Value {
    json!({ "data": { "type": kind, "id": id } })
}
