//! Integration test: start the Portico server and drive the HTTP API.

use std::sync::Arc;
use std::time::Duration;

use portico_core::db::Database;
use portico_core::identity::LocalIdentityProvider;
use portico_core::state::AppStateInner;
use portico_server::api::SESSION_HEADER;

const ACCOUNTS: &str = r#"
- uid: ada
  email: ada@example.org
  password: hunter2
  profile: { role: member, firstName: Ada, lastName: Lovelace }
- uid: newbie
  email: newbie@example.org
  password: letmein
"#;

async fn spawn_app() -> String {
    let db = Database::open_in_memory().unwrap();
    let accounts = Arc::new(LocalIdentityProvider::from_yaml(ACCOUNTS).unwrap());
    let state = Arc::new(AppStateInner::local(db, accounts).await.unwrap());
    let app = portico_server::build_router(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    format!("http://{}", addr)
}

fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap()
}

async fn new_session(client: &reqwest::Client, base_url: &str) -> String {
    let resp = client
        .post(format!("{}/api/sessions", base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["snapshot"]["loading"], false);
    assert!(body["snapshot"]["identity"].is_null());
    body["sessionId"].as_str().unwrap().to_string()
}

async fn sign_in(client: &reqwest::Client, base_url: &str, session: &str, email: &str, password: &str) -> reqwest::Response {
    client
        .post(format!("{}/api/sessions/current/sign-in", base_url))
        .header(SESSION_HEADER, session)
        .json(&serde_json::json!({ "email": email, "password": password }))
        .send()
        .await
        .unwrap()
}

async fn post(client: &reqwest::Client, url: String, session: &str, body: serde_json::Value) -> reqwest::Response {
    client
        .post(url)
        .header(SESSION_HEADER, session)
        .json(&body)
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn test_health_and_workflow_listing() {
    let base_url = spawn_app().await;
    let client = client();

    let resp = client.get(format!("{}/api/health", base_url)).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");

    let body: serde_json::Value = client
        .get(format!("{}/api/workflows", base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let names: Vec<&str> = body["workflows"]
        .as_array()
        .unwrap()
        .iter()
        .map(|w| w["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["directory", "onboarding"]);
}

#[tokio::test]
async fn test_requests_without_session_are_unauthorized() {
    let base_url = spawn_app().await;
    let resp = client()
        .post(format!("{}/api/workflows/onboarding/views", base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["success"], false);

    let resp = client()
        .get(format!("{}/api/sessions/current", base_url))
        .header(SESSION_HEADER, "no-such-session")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn test_gates_redirect_with_see_other() {
    let base_url = spawn_app().await;
    let client = client();
    let session = new_session(&client, &base_url).await;

    let resp = post(
        &client,
        format!("{}/api/workflows/onboarding/views", base_url),
        &session,
        serde_json::json!({}),
    )
    .await;
    assert_eq!(resp.status(), 303);
    assert_eq!(resp.headers()["location"], "/login");
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["redirect"]["to"], "/login");

    let resp = client
        .get(format!("{}/api/gates/login", base_url))
        .header(SESSION_HEADER, &session)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let resp = sign_in(&client, &base_url, &session, "ada@example.org", "wrong").await;
    assert_eq!(resp.status(), 401);

    let resp = sign_in(&client, &base_url, &session, "ada@example.org", "hunter2").await;
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["snapshot"]["identity"]["uid"], "ada");
    assert_eq!(body["snapshot"]["profile"]["role"], "member");

    let resp = client
        .get(format!("{}/api/gates/login", base_url))
        .header(SESSION_HEADER, &session)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 303);
    assert_eq!(resp.headers()["location"], "/");
}

#[tokio::test]
async fn test_identity_without_profile_is_kept_out_of_directory() {
    let base_url = spawn_app().await;
    let client = client();
    let session = new_session(&client, &base_url).await;

    let resp = sign_in(&client, &base_url, &session, "newbie@example.org", "letmein").await;
    assert_eq!(resp.status(), 200);

    let resp = client
        .get(format!("{}/api/workflows/directory", base_url))
        .header(SESSION_HEADER, &session)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 303);
    assert_eq!(resp.headers()["location"], "/login");
}

#[tokio::test]
async fn test_onboarding_walkthrough() {
    let base_url = spawn_app().await;
    let client = client();
    let session = new_session(&client, &base_url).await;
    sign_in(&client, &base_url, &session, "ada@example.org", "hunter2").await;

    let resp = post(
        &client,
        format!("{}/api/workflows/onboarding/views", base_url),
        &session,
        serde_json::json!({}),
    )
    .await;
    assert_eq!(resp.status(), 200);
    let view: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(view["step"], 1);
    let views = format!(
        "{}/api/workflows/onboarding/views/{}",
        base_url,
        view["viewId"].as_str().unwrap()
    );

    // Invalid email is rejected before the store is touched.
    let resp = post(
        &client,
        format!("{}/advance", views),
        &session,
        serde_json::json!({ "data": { "email": "nope", "firstName": "Ada", "lastName": "L" } }),
    )
    .await;
    assert_eq!(resp.status(), 400);

    let resp = post(
        &client,
        format!("{}/advance", views),
        &session,
        serde_json::json!({ "data": { "email": "ada@example.org", "firstName": "Ada", "lastName": "L" } }),
    )
    .await;
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["advance"]["outcome"], "moved");
    assert_eq!(body["view"]["step"], 2);

    let body: serde_json::Value = post(
        &client,
        format!("{}/advance", views),
        &session,
        serde_json::json!({ "data": { "field1": "yes" } }),
    )
    .await
    .json()
    .await
    .unwrap();
    assert_eq!(body["view"]["step"], 3);

    let body: serde_json::Value = post(&client, format!("{}/retreat", views), &session, serde_json::json!({}))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(body["step"], 2);

    let body: serde_json::Value = post(
        &client,
        format!("{}/advance", views),
        &session,
        serde_json::json!({ "data": { "field1": "no" } }),
    )
    .await
    .json()
    .await
    .unwrap();
    assert_eq!(body["view"]["step"], 4);

    let resp = post(
        &client,
        format!("{}/advance", views),
        &session,
        serde_json::json!({ "data": { "school": "State U" } }),
    )
    .await;
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["view"]["step"], 5);
    assert_eq!(body["view"]["terminal"], true);
    assert_eq!(body["committed"]["school"], "State U");
    assert_eq!(body["view"]["position"]["trail"], serde_json::json!([1, 2, 4]));

    let body: serde_json::Value = client
        .get(format!("{}/api/sessions/current", base_url))
        .header(SESSION_HEADER, &session)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["snapshot"]["profile"]["firstName"], "Ada");
    assert_eq!(body["views"], 1);

    let body: serde_json::Value = post(&client, format!("{}/restart", views), &session, serde_json::json!({}))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(body["step"], 1);
    assert_eq!(body["fields"]["school"], "");

    let resp = client
        .delete(&views)
        .header(SESSION_HEADER, &session)
        .send()
        .await
        .unwrap();
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["deleted"], true);
}

async fn next_event(resp: &mut reqwest::Response) -> String {
    let mut buf = String::new();
    loop {
        let chunk = tokio::time::timeout(Duration::from_secs(5), resp.chunk())
            .await
            .expect("timed out waiting for SSE event")
            .unwrap()
            .expect("stream ended");
        buf.push_str(&String::from_utf8_lossy(&chunk));
        if buf.contains("\n\n") {
            return buf;
        }
    }
}

#[tokio::test]
async fn test_event_streams() {
    let base_url = spawn_app().await;
    let client = client();
    let session = new_session(&client, &base_url).await;

    let mut events = client
        .get(format!("{}/api/sessions/current/events", base_url))
        .header(SESSION_HEADER, &session)
        .send()
        .await
        .unwrap();
    assert_eq!(events.status(), 200);
    let first = next_event(&mut events).await;
    assert!(first.contains("event: snapshot"));
    assert!(first.contains("\"loading\":false"));

    sign_in(&client, &base_url, &session, "ada@example.org", "hunter2").await;
    let view: serde_json::Value = post(
        &client,
        format!("{}/api/workflows/directory/views", base_url),
        &session,
        serde_json::json!({}),
    )
    .await
    .json()
    .await
    .unwrap();

    let mut redirects = client
        .get(format!(
            "{}/api/workflows/directory/views/{}/redirects",
            base_url,
            view["viewId"].as_str().unwrap()
        ))
        .header(SESSION_HEADER, &session)
        .send()
        .await
        .unwrap();
    assert_eq!(redirects.status(), 200);

    post(
        &client,
        format!("{}/api/sessions/current/sign-out", base_url),
        &session,
        serde_json::json!({}),
    )
    .await;

    let event = next_event(&mut redirects).await;
    assert!(event.contains("event: redirect"));
    assert!(event.contains("\"to\":\"/login\""));
}

#[tokio::test]
async fn test_create_app_state_from_config() {
    let dir = tempfile::tempdir().unwrap();
    let accounts = dir.path().join("accounts.yaml");
    std::fs::write(&accounts, ACCOUNTS).unwrap();
    let guards = dir.path().join("guards.yaml");
    std::fs::write(
        &guards,
        "intake:\n  - predicate: { require: signed_in }\n    redirectTo: /login\n",
    )
    .unwrap();
    let workflows = dir.path().join("workflows");
    std::fs::create_dir(&workflows).unwrap();
    std::fs::write(
        workflows.join("intake.yaml"),
        "name: intake\nentry: 1\ndefaults: { reason: \"\" }\nsteps:\n  - id: 1\n    fields: [reason]\n    next: 2\n  - id: 2\n    terminal: true\n",
    )
    .unwrap();

    let config = portico_server::ServerConfig {
        db_path: dir.path().join("portico.db").to_string_lossy().to_string(),
        workflows_dir: Some(workflows.to_string_lossy().to_string()),
        accounts_path: Some(accounts.to_string_lossy().to_string()),
        guards_path: Some(guards.to_string_lossy().to_string()),
        session_idle_secs: 90,
        ..Default::default()
    };
    let state = portico_server::create_app_state(&config).await.unwrap();

    assert_eq!(state.schemas.names(), vec!["directory", "intake", "onboarding"]);
    assert!(!state.guards.for_view("intake").is_empty());
    assert!(!state.guards.for_view("onboarding").is_empty());
    assert_eq!(state.sessions.idle_timeout(), std::time::Duration::from_secs(90));

    let session = state.create_session().await;
    let snapshot = session.identity.sign_in("ada@example.org", "hunter2").await.unwrap();
    assert_eq!(snapshot.profile.unwrap().last_name, "Lovelace");
}
