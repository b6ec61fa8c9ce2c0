mod support;

use assetgraph::bootstrap;
use axum::http::{Method, StatusCode};
use serde_json::json;
use support::{ADMIN_EMAIL, ADMIN_PASSWORD, TestApp, link};

#[tokio::test]
async fn health_endpoints_are_public() {
    let app = TestApp::new();
    let reply = app.send(Method::GET, "/health", None, None).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["status"], "healthy");

    let reply = app.send(Method::GET, "/ready", None, None).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["ready"], true);
}

#[tokio::test]
async fn resources_require_a_bearer_token() {
    let app = TestApp::new();
    let reply = app.send(Method::GET, "/equipments", None, None).await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert_eq!(reply.body["errors"][0]["status"], "401");

    let reply = app.send(Method::GET, "/equipments", Some("not-a-token"), None).await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn unknown_routes_are_json_api_not_found() {
    let app = TestApp::new();
    let token = app.login(ADMIN_EMAIL, ADMIN_PASSWORD).await;
    let reply = app.get("/no-such-thing", &token).await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
    assert_eq!(reply.body["errors"][0]["status"], "404");
}

#[tokio::test]
async fn bootstrap_admin_can_log_in() {
    let app = TestApp::new();
    let token = app.login(ADMIN_EMAIL, ADMIN_PASSWORD).await;
    let reply = app.get("/users/me", &token).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["data"]["type"], "users");
    assert_eq!(reply.body["data"]["attributes"]["email"], ADMIN_EMAIL);
    assert!(reply.body["data"]["attributes"].get("passwordHash").is_none());

    let reply = app
        .send(
            Method::POST,
            "/auth/login",
            None,
            Some(json!({ "data": { "type": "auth", "attributes": { "email": ADMIN_EMAIL, "password": "wrong password" } } })),
        )
        .await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn equipment_crud_round() {
    let app = TestApp::new();
    let token = app.register("Acme", "owner@acme.test").await;

    let reply = app
        .post(
            "/equipments",
            &token,
            json!({ "data": { "type": "equipments", "attributes": { "name": "Cordless drill", "category": "tools" } } }),
        )
        .await;
    assert_eq!(reply.status, StatusCode::CREATED, "{}", reply.body);
    let id = reply.body["data"]["id"].as_str().unwrap().to_string();
    assert!(reply.location.unwrap().ends_with(&format!("/equipments/{id}")));
    assert_eq!(reply.body["data"]["attributes"]["status"], "available");

    let reply = app.get("/equipments?filter[category]=tools&sort=-name", &token).await;
    assert_eq!(reply.status, StatusCode::OK, "{}", reply.body);
    assert_eq!(reply.body["meta"]["total"], 1);
    assert_eq!(reply.body["data"][0]["id"], id.as_str());

    let reply = app
        .send(
            Method::PATCH,
            &format!("/equipments/{id}"),
            Some(&token),
            Some(json!({ "data": { "type": "equipments", "id": id, "attributes": { "name": "Hammer drill" } } })),
        )
        .await;
    assert_eq!(reply.status, StatusCode::OK, "{}", reply.body);
    assert_eq!(reply.body["data"]["attributes"]["name"], "Hammer drill");

    let reply = app.send(Method::DELETE, &format!("/equipments/{id}"), Some(&token), None).await;
    assert_eq!(reply.status, StatusCode::NO_CONTENT);
    let reply = app.get(&format!("/equipments/{id}"), &token).await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn type_mismatch_is_a_conflict() {
    let app = TestApp::new();
    let token = app.register("Acme", "owner@acme.test").await;
    let reply = app
        .post(
            "/equipments",
            &token,
            json!({ "data": { "type": "suppliers", "attributes": { "name": "Drill" } } }),
        )
        .await;
    assert_eq!(reply.status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn loan_lifecycle_over_http() {
    let app = TestApp::new();
    let token = app.register("Acme", "owner@acme.test").await;
    let employee = app
        .create(&token, "employees", json!({ "firstName": "Ada", "lastName": "Lovelace" }), json!({}))
        .await;
    let equipment = app.create(&token, "equipments", json!({ "name": "Laptop" }), json!({})).await;

    let reply = app
        .post(
            "/loans",
            &token,
            json!({ "data": {
                "type": "loans",
                "attributes": { "startDate": "2024-01-01T00:00:00Z", "endDate": "2024-02-01T00:00:00Z" },
                "relationships": { "employee": link("employees", &employee), "equipment": link("equipments", &equipment) }
            } }),
        )
        .await;
    assert_eq!(reply.status, StatusCode::CREATED, "{}", reply.body);
    let loan = reply.body["data"]["id"].as_str().unwrap().to_string();
    let included = reply.body["included"].as_array().unwrap();
    let loaned = included
        .iter()
        .find(|resource| resource["type"] == "equipments" && resource["id"] == equipment.as_str())
        .unwrap();
    assert_eq!(loaned["attributes"]["status"], "on_loan");

    let reply = app.get(&format!("/equipments/{equipment}"), &token).await;
    assert_eq!(reply.body["data"]["attributes"]["status"], "on_loan");

    let reply = app.get("/loans?filter[overdue]=true", &token).await;
    assert_eq!(reply.body["meta"]["total"], 1);

    let reply = app
        .send(Method::DELETE, &format!("/equipments/{equipment}"), Some(&token), None)
        .await;
    assert_eq!(reply.status, StatusCode::CONFLICT);

    let reply = app
        .send(Method::DELETE, &format!("/employees/{employee}"), Some(&token), None)
        .await;
    assert_eq!(reply.status, StatusCode::CONFLICT);

    let reply = app.post(&format!("/loans/{loan}/return"), &token, json!({})).await;
    assert_eq!(reply.status, StatusCode::OK, "{}", reply.body);
    assert!(reply.body["data"]["attributes"]["returnedAt"].is_string());

    let reply = app.get(&format!("/equipments/{equipment}"), &token).await;
    assert_eq!(reply.body["data"]["attributes"]["status"], "available");

    let reply = app.post(&format!("/loans/{loan}/return"), &token, json!({})).await;
    assert_eq!(reply.status, StatusCode::CONFLICT);

    let reply = app
        .send(Method::DELETE, &format!("/employees/{employee}"), Some(&token), None)
        .await;
    assert_eq!(reply.status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn out_of_range_pages_are_bad_requests() {
    let app = TestApp::new();
    let token = app.register("Acme", "owner@acme.test").await;
    let reply = app
        .get(&format!("/employees?page[number]={}", usize::MAX), &token)
        .await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.body["errors"][0]["source"]["parameter"], "page[number]");
}

#[tokio::test]
async fn viewers_read_but_cannot_write() {
    let app = TestApp::new();
    let owner = app.register("Acme", "owner@acme.test").await;
    app.create(&owner, "equipments", json!({ "name": "Ladder" }), json!({})).await;

    let viewer_role = bootstrap::role_id("Viewer").to_string();
    app.create(
        &owner,
        "users",
        json!({ "email": "viewer@acme.test", "name": "Vera Viewer", "password": "viewer-password" }),
        json!({ "roles": { "data": [{ "type": "roles", "id": viewer_role }] } }),
    )
    .await;
    let viewer = app.login("viewer@acme.test", "viewer-password").await;

    let reply = app.get("/equipments", &viewer).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["meta"]["total"], 1);

    let reply = app
        .post(
            "/equipments",
            &viewer,
            json!({ "data": { "type": "equipments", "attributes": { "name": "Saw" } } }),
        )
        .await;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);
    assert_eq!(reply.body["errors"][0]["status"], "403");
}

#[tokio::test]
async fn companies_do_not_see_each_other() {
    let app = TestApp::new();
    let acme = app.register("Acme", "owner@acme.test").await;
    let globex = app.register("Globex", "owner@globex.test").await;

    let ladder = app.create(&acme, "equipments", json!({ "name": "Ladder" }), json!({})).await;

    let reply = app.get("/equipments", &globex).await;
    assert_eq!(reply.body["meta"]["total"], 0);
    let reply = app.get(&format!("/equipments/{ladder}"), &globex).await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn refresh_issues_a_new_session() {
    let app = TestApp::new();
    let reply = app
        .send(
            Method::POST,
            "/auth/login",
            None,
            Some(json!({ "data": { "type": "auth", "attributes": { "email": ADMIN_EMAIL, "password": ADMIN_PASSWORD } } })),
        )
        .await;
    let refresh = reply.body["data"]["attributes"]["refreshToken"].as_str().unwrap().to_string();

    let reply = app
        .send(
            Method::POST,
            "/auth/refresh",
            None,
            Some(json!({ "data": { "type": "auth", "attributes": { "refreshToken": refresh } } })),
        )
        .await;
    assert_eq!(reply.status, StatusCode::OK, "{}", reply.body);
    let token = support::token_of(&reply);
    assert_eq!(app.get("/users/me", &token).await.status, StatusCode::OK);
}

#[tokio::test]
async fn matching_etags_are_not_modified() {
    let app = TestApp::new();
    let token = app.login(ADMIN_EMAIL, ADMIN_PASSWORD).await;

    let first = app.get("/users/me", &token).await;
    assert_eq!(first.status, StatusCode::OK);
    let etag = first.etag.expect("reads carry an etag");

    let cached = app.get_if_none_match("/users/me", &token, &etag).await;
    assert_eq!(cached.status, StatusCode::NOT_MODIFIED);
    assert_eq!(cached.etag.as_deref(), Some(etag.as_str()));
    assert!(cached.body.is_null());

    let stale = app.get_if_none_match("/users/me", &token, "W/\"000000\"").await;
    assert_eq!(stale.status, StatusCode::OK);
    assert_eq!(stale.body, first.body);
}
