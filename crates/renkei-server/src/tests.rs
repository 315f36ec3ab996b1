use super::*;

use argon2::{Argon2, PasswordHasher, password_hash::SaltString};
use axum::{
  body::Body,
  http::{Request, StatusCode, header},
};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use chrono::{DateTime, Duration, NaiveDate, Timelike as _, Utc};
use rand_core::OsRng;
use renkei_core::{
  credential::{ClaimCredential, CredentialKind, CredentialStatus},
  directory::{Appointment, Clinic, MenuAssignment, MessageTemplate, Patient},
  gateway::{GatewayAck, GatewayError},
  link::{AccountLink, LinkEventKind, Relationship},
  schedule::NotificationType,
};
use renkei_gateway::recording::{GatewayCall, RecordingGateway};
use renkei_store_sqlite::SqliteStore;
use serde_json::{Value, json};
use tower::ServiceExt as _;
use uuid::Uuid;

type TestState = AppState<SqliteStore, RecordingGateway>;

// ─── Fixtures ────────────────────────────────────────────────────────────────

fn test_config(password_hash: String) -> ServerConfig {
  ServerConfig {
    server:   ListenSettings { host: "127.0.0.1".to_string(), port: 8900 },
    store:    StoreSettings { path: PathBuf::from(":memory:") },
    auth:     AuthSettings { username: "staff".to_string(), password_hash },
    gateway:  GatewaySettings {
      base_url:      "http://gateway.invalid".to_string(),
      channel_token: "channel-token".to_string(),
      timeout_secs:  10,
    },
    dispatch: DispatchSettings {
      cron_secret:    "tick-tock".to_string(),
      window_minutes: 5,
      max_retries:    3,
    },
  }
}

/// A state over in-memory SQLite and a recording gateway, plus a handle to
/// the gateway for scripting and call assertions.
async fn make_state(password: &str) -> (TestState, Arc<RecordingGateway>) {
  let store = SqliteStore::open_in_memory().await.unwrap();
  let salt = SaltString::generate(&mut OsRng);
  let hash = Argon2::default()
    .hash_password(password.as_bytes(), &salt)
    .unwrap()
    .to_string();

  let gateway = Arc::new(RecordingGateway::new());
  let state = AppState::new(Arc::new(store), gateway.clone(), test_config(hash));
  (state, gateway)
}

fn auth_header(user: &str, pass: &str) -> String {
  format!("Basic {}", B64.encode(format!("{user}:{pass}")))
}

async fn oneshot_raw(
  state:   TestState,
  method:  &str,
  uri:     &str,
  headers: Vec<(header::HeaderName, &str)>,
  body:    &str,
) -> axum::response::Response {
  let mut builder = Request::builder().method(method).uri(uri);
  for (k, v) in headers {
    builder = builder.header(k, v);
  }
  let req = builder.body(Body::from(body.to_string())).unwrap();
  router(state).oneshot(req).await.unwrap()
}

/// Authenticated staff request carrying a JSON body.
async fn staff_json(
  state:  TestState,
  method: &str,
  uri:    &str,
  body:   Value,
) -> axum::response::Response {
  let auth = auth_header("staff", "secret");
  oneshot_raw(
    state,
    method,
    uri,
    vec![
      (header::AUTHORIZATION, auth.as_str()),
      (header::CONTENT_TYPE, "application/json"),
    ],
    &body.to_string(),
  )
  .await
}

async fn staff_get(state: TestState, uri: &str) -> axum::response::Response {
  let auth = auth_header("staff", "secret");
  oneshot_raw(state, "GET", uri, vec![(header::AUTHORIZATION, auth.as_str())], "")
    .await
}

async fn staff_delete(state: TestState, uri: &str) -> axum::response::Response {
  let auth = auth_header("staff", "secret");
  oneshot_raw(
    state,
    "DELETE",
    uri,
    vec![(header::AUTHORIZATION, auth.as_str())],
    "",
  )
  .await
}

/// Unauthenticated patient-side POST with a JSON body.
async fn patient_json(
  state: TestState,
  uri:   &str,
  body:  Value,
) -> axum::response::Response {
  oneshot_raw(
    state,
    "POST",
    uri,
    vec![(header::CONTENT_TYPE, "application/json")],
    &body.to_string(),
  )
  .await
}

async fn cron_dispatch(state: TestState) -> axum::response::Response {
  oneshot_raw(
    state,
    "POST",
    "/cron/dispatch",
    vec![(header::AUTHORIZATION, "Bearer tick-tock")],
    "",
  )
  .await
}

async fn json_body(resp: axum::response::Response) -> Value {
  let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
  serde_json::from_slice(&bytes).unwrap()
}

fn uuid_at(value: &Value, field: &str) -> Uuid {
  value[field].as_str().unwrap().parse().unwrap()
}

fn dt_at(value: &Value, field: &str) -> DateTime<Utc> {
  DateTime::parse_from_rfc3339(value[field].as_str().unwrap())
    .unwrap()
    .with_timezone(&Utc)
}

// ─── Seeding ─────────────────────────────────────────────────────────────────

async fn seed_clinic(state: &TestState) -> Uuid {
  let id = Uuid::new_v4();
  state
    .store
    .insert_clinic(Clinic { id, name: "ほがらか歯科".to_string() })
    .await
    .unwrap();
  id
}

async fn seed_patient(
  state: &TestState,
  clinic_id: Uuid,
  patient_number: &str,
) -> Uuid {
  let id = Uuid::new_v4();
  state
    .store
    .insert_patient(Patient {
      id,
      clinic_id,
      patient_number: patient_number.to_string(),
      family_name: "山田".to_string(),
      given_name: "太郎".to_string(),
      birth_date: NaiveDate::from_ymd_opt(1990, 4, 1).unwrap(),
    })
    .await
    .unwrap();
  id
}

async fn seed_menu(state: &TestState, clinic_id: Uuid) {
  state
    .store
    .upsert_menu_assignment(MenuAssignment {
      clinic_id,
      linked_menu_ref: Some("richmenu-linked".to_string()),
      unlinked_menu_ref: Some("richmenu-unlinked".to_string()),
      updated_at: Utc::now(),
    })
    .await
    .unwrap();
}

async fn seed_link(
  state: &TestState,
  clinic_id: Uuid,
  account: &str,
  patient_id: Uuid,
) -> Uuid {
  let id = Uuid::new_v4();
  state
    .store
    .insert_link(AccountLink {
      id,
      clinic_id,
      external_account_id: account.to_string(),
      patient_id,
      relationship: Relationship::Myself,
      nickname: None,
      is_primary: true,
      linked_at: Utc::now(),
      last_selected_at: None,
    })
    .await
    .unwrap();
  id
}

async fn seed_appointment(
  state: &TestState,
  clinic_id: Uuid,
  patient_id: Uuid,
  start_at: DateTime<Utc>,
) {
  state
    .store
    .insert_appointment(Appointment {
      id: Uuid::new_v4(),
      clinic_id,
      patient_id,
      start_at,
      checked_in_at: None,
      check_in_method: None,
    })
    .await
    .unwrap();
}

/// Issue an invitation over the API and return its code.
async fn issue_code(state: &TestState, clinic_id: Uuid, patient_id: Uuid) -> String {
  let resp = staff_json(
    state.clone(),
    "POST",
    "/api/invitations",
    json!({ "patient_id": patient_id, "clinic_id": clinic_id }),
  )
  .await;
  assert_eq!(resp.status(), StatusCode::CREATED);
  json_body(resp).await["credential"]["value"].as_str().unwrap().to_string()
}

fn link_body(account: &str, clinic_id: Uuid, proof: Value) -> Value {
  json!({
    "external_account_id": account,
    "clinic_id": clinic_id,
    "proof": proof,
  })
}

// ─── Health and auth ─────────────────────────────────────────────────────────

#[tokio::test]
async fn healthz_is_public() {
  let (state, _) = make_state("secret").await;
  let resp = oneshot_raw(state, "GET", "/healthz", vec![], "").await;
  assert_eq!(resp.status(), StatusCode::OK);
  let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
  assert_eq!(&bytes[..], b"ok");
}

#[tokio::test]
async fn staff_surface_requires_basic_auth() {
  let (state, _) = make_state("secret").await;
  let patient_id = Uuid::new_v4();
  let uri = format!("/api/links?patient_id={patient_id}");

  let resp = oneshot_raw(state.clone(), "GET", &uri, vec![], "").await;
  assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
  let challenge =
    resp.headers().get(header::WWW_AUTHENTICATE).unwrap().to_str().unwrap();
  assert!(challenge.contains("Basic"), "challenge: {challenge}");

  let wrong = auth_header("staff", "wrong");
  let resp = oneshot_raw(
    state,
    "GET",
    &uri,
    vec![(header::AUTHORIZATION, wrong.as_str())],
    "",
  )
  .await;
  assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

// ─── Invitations ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn invitation_issue_is_idempotent_while_active() {
  let (state, _) = make_state("secret").await;
  let clinic_id = seed_clinic(&state).await;
  let patient_id = seed_patient(&state, clinic_id, "1024").await;

  let body = json!({ "patient_id": patient_id, "clinic_id": clinic_id });
  let resp =
    staff_json(state.clone(), "POST", "/api/invitations", body.clone()).await;
  assert_eq!(resp.status(), StatusCode::CREATED);
  let first = json_body(resp).await;
  assert_eq!(first["reused"], json!(false));
  let code = first["credential"]["value"].as_str().unwrap();
  assert_eq!(code.len(), 8);
  // The code alphabet drops the lookalikes 0, 1, I, and O.
  assert!(code.chars().all(|c| !"01IO".contains(c)), "code: {code}");

  let resp = staff_json(state, "POST", "/api/invitations", body).await;
  assert_eq!(resp.status(), StatusCode::CREATED);
  let second = json_body(resp).await;
  assert_eq!(second["reused"], json!(true));
  assert_eq!(second["credential"]["id"], first["credential"]["id"]);
}

#[tokio::test]
async fn invitation_listing_and_revocation() {
  let (state, _) = make_state("secret").await;
  let clinic_id = seed_clinic(&state).await;
  let patient_id = seed_patient(&state, clinic_id, "1024").await;

  let resp = staff_json(
    state.clone(),
    "POST",
    "/api/invitations",
    json!({ "patient_id": patient_id, "clinic_id": clinic_id }),
  )
  .await;
  let issued = json_body(resp).await;
  let credential_id = uuid_at(&issued["credential"], "id");

  let resp = staff_get(
    state.clone(),
    &format!("/api/invitations?patient_id={patient_id}"),
  )
  .await;
  assert_eq!(resp.status(), StatusCode::OK);
  let listed = json_body(resp).await;
  assert_eq!(listed.as_array().unwrap().len(), 1);
  assert_eq!(listed[0]["status"], json!("active"));

  let resp =
    staff_delete(state.clone(), &format!("/api/invitations/{credential_id}"))
      .await;
  assert_eq!(resp.status(), StatusCode::NO_CONTENT);

  // The revoked invitation no longer blocks a fresh issue.
  let resp = staff_json(
    state,
    "POST",
    "/api/invitations",
    json!({ "patient_id": patient_id, "clinic_id": clinic_id }),
  )
  .await;
  let reissued = json_body(resp).await;
  assert_eq!(reissued["reused"], json!(false));
  assert_ne!(reissued["credential"]["id"], issued["credential"]["id"]);
}

#[tokio::test]
async fn invitation_for_unknown_patient_returns_404() {
  let (state, _) = make_state("secret").await;
  let clinic_id = seed_clinic(&state).await;

  let resp = staff_json(
    state,
    "POST",
    "/api/invitations",
    json!({ "patient_id": Uuid::new_v4(), "clinic_id": clinic_id }),
  )
  .await;
  assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn invitation_rejects_non_positive_ttl() {
  let (state, _) = make_state("secret").await;
  let clinic_id = seed_clinic(&state).await;
  let patient_id = seed_patient(&state, clinic_id, "1024").await;

  let resp = staff_json(
    state,
    "POST",
    "/api/invitations",
    json!({ "patient_id": patient_id, "clinic_id": clinic_id, "ttl_days": 0 }),
  )
  .await;
  assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

// ─── Linking ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn first_link_via_invitation_is_primary() {
  let (state, gateway) = make_state("secret").await;
  let clinic_id = seed_clinic(&state).await;
  let patient_id = seed_patient(&state, clinic_id, "1024").await;
  seed_menu(&state, clinic_id).await;
  let code = issue_code(&state, clinic_id, patient_id).await;

  let resp = patient_json(
    state.clone(),
    "/links",
    link_body("U100", clinic_id, json!({ "kind": "invitation", "code": code })),
  )
  .await;
  assert_eq!(resp.status(), StatusCode::CREATED);
  let link = json_body(resp).await;
  assert_eq!(link["external_account_id"], json!("U100"));
  assert_eq!(uuid_at(&link, "patient_id"), patient_id);
  assert_eq!(link["is_primary"], json!(true));
  assert_eq!(link["relationship"], json!("self"));

  // The invitation is consumed by the redemption.
  let resp = staff_get(
    state,
    &format!("/api/invitations?patient_id={patient_id}"),
  )
  .await;
  let listed = json_body(resp).await;
  assert_eq!(listed[0]["status"], json!("used"));

  // Linking drives the account onto the clinic's linked menu.
  assert_eq!(
    gateway.calls(),
    vec![
      GatewayCall::UnbindMenu { account_id: "U100".to_string() },
      GatewayCall::BindMenu {
        account_id: "U100".to_string(),
        menu_ref:   "richmenu-linked".to_string(),
      },
    ]
  );
}

#[tokio::test]
async fn invitation_code_is_single_use() {
  let (state, _) = make_state("secret").await;
  let clinic_id = seed_clinic(&state).await;
  let patient_id = seed_patient(&state, clinic_id, "1024").await;
  let code = issue_code(&state, clinic_id, patient_id).await;

  let proof = json!({ "kind": "invitation", "code": code });
  let resp = patient_json(
    state.clone(),
    "/links",
    link_body("U100", clinic_id, proof.clone()),
  )
  .await;
  assert_eq!(resp.status(), StatusCode::CREATED);

  let resp =
    patient_json(state, "/links", link_body("U200", clinic_id, proof)).await;
  assert_eq!(resp.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn invitation_for_wrong_clinic_is_unknown() {
  let (state, _) = make_state("secret").await;
  let clinic_id = seed_clinic(&state).await;
  let other_clinic = seed_clinic(&state).await;
  let patient_id = seed_patient(&state, clinic_id, "1024").await;
  let code = issue_code(&state, clinic_id, patient_id).await;

  let resp = patient_json(
    state,
    "/links",
    link_body(
      "U100",
      other_clinic,
      json!({ "kind": "invitation", "code": code }),
    ),
  )
  .await;
  assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn expired_invitation_returns_410_and_flips_status() {
  let (state, _) = make_state("secret").await;
  let clinic_id = seed_clinic(&state).await;
  let patient_id = seed_patient(&state, clinic_id, "1024").await;

  let credential_id = Uuid::new_v4();
  state
    .store
    .insert_credential(ClaimCredential {
      id: credential_id,
      clinic_id,
      patient_id,
      external_account_id: None,
      kind: CredentialKind::Invitation,
      value: "AB2DEF3H".to_string(),
      payload: None,
      status: CredentialStatus::Active,
      expires_at: Utc::now() - Duration::hours(1),
      created_by: None,
      created_at: Utc::now() - Duration::hours(2),
      used_at: None,
    })
    .await
    .unwrap();

  let resp = patient_json(
    state.clone(),
    "/links",
    link_body(
      "U100",
      clinic_id,
      json!({ "kind": "invitation", "code": "AB2DEF3H" }),
    ),
  )
  .await;
  assert_eq!(resp.status(), StatusCode::GONE);

  // The lazy expiry is persisted and no link was created.
  let stored = state.store.get_credential(credential_id).await.unwrap().unwrap();
  assert_eq!(stored.status, CredentialStatus::Expired);
  let links = state.store.links_for_account("U100").await.unwrap();
  assert!(links.is_empty());
}

#[tokio::test]
async fn link_via_directory_proof() {
  let (state, _) = make_state("secret").await;
  let clinic_id = seed_clinic(&state).await;
  let patient_id = seed_patient(&state, clinic_id, "1024").await;

  // Slashes in the entered birthdate are fine; comparison is digits-only.
  let resp = patient_json(
    state.clone(),
    "/links",
    link_body(
      "U100",
      clinic_id,
      json!({
        "kind": "directory",
        "patient_number": "1024",
        "birth_date": "1990/04/01",
      }),
    ),
  )
  .await;
  assert_eq!(resp.status(), StatusCode::CREATED);
  let link = json_body(resp).await;
  assert_eq!(uuid_at(&link, "patient_id"), patient_id);
  assert_eq!(link["is_primary"], json!(true));
}

#[tokio::test]
async fn directory_mismatch_is_indistinguishable() {
  let (state, _) = make_state("secret").await;
  let clinic_id = seed_clinic(&state).await;
  seed_patient(&state, clinic_id, "1024").await;

  let wrong_birthdate = patient_json(
    state.clone(),
    "/links",
    link_body(
      "U100",
      clinic_id,
      json!({
        "kind": "directory",
        "patient_number": "1024",
        "birth_date": "1991-01-01",
      }),
    ),
  )
  .await;
  let unknown_number = patient_json(
    state,
    "/links",
    link_body(
      "U100",
      clinic_id,
      json!({
        "kind": "directory",
        "patient_number": "9999",
        "birth_date": "1990-04-01",
      }),
    ),
  )
  .await;

  // Same status and same body; the response must not reveal which patient
  // numbers exist.
  assert_eq!(wrong_birthdate.status(), StatusCode::NOT_FOUND);
  assert_eq!(unknown_number.status(), StatusCode::NOT_FOUND);
  assert_eq!(json_body(wrong_birthdate).await, json_body(unknown_number).await);
}

#[tokio::test]
async fn relinking_same_pair_conflicts() {
  let (state, _) = make_state("secret").await;
  let clinic_id = seed_clinic(&state).await;
  seed_patient(&state, clinic_id, "1024").await;

  let proof = json!({
    "kind": "directory",
    "patient_number": "1024",
    "birth_date": "1990-04-01",
  });
  let resp = patient_json(
    state.clone(),
    "/links",
    link_body("U100", clinic_id, proof.clone()),
  )
  .await;
  assert_eq!(resp.status(), StatusCode::CREATED);

  let resp =
    patient_json(state, "/links", link_body("U100", clinic_id, proof)).await;
  assert_eq!(resp.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn second_link_for_account_is_not_primary() {
  let (state, _) = make_state("secret").await;
  let clinic_id = seed_clinic(&state).await;
  seed_patient(&state, clinic_id, "1024").await;

  let id = Uuid::new_v4();
  state
    .store
    .insert_patient(Patient {
      id,
      clinic_id,
      patient_number: "2048".to_string(),
      family_name: "山田".to_string(),
      given_name: "花子".to_string(),
      birth_date: NaiveDate::from_ymd_opt(1992, 7, 15).unwrap(),
    })
    .await
    .unwrap();

  let resp = patient_json(
    state.clone(),
    "/links",
    link_body(
      "U100",
      clinic_id,
      json!({
        "kind": "directory",
        "patient_number": "1024",
        "birth_date": "1990-04-01",
      }),
    ),
  )
  .await;
  assert_eq!(json_body(resp).await["is_primary"], json!(true));

  let resp = patient_json(
    state,
    "/links",
    json!({
      "external_account_id": "U100",
      "clinic_id": clinic_id,
      "proof": {
        "kind": "directory",
        "patient_number": "2048",
        "birth_date": "1992-07-15",
      },
      "relationship": "parent",
      "nickname": "母",
    }),
  )
  .await;
  assert_eq!(resp.status(), StatusCode::CREATED);
  let second = json_body(resp).await;
  assert_eq!(second["is_primary"], json!(false));
  assert_eq!(second["relationship"], json!("parent"));
  assert_eq!(second["nickname"], json!("母"));
}

#[tokio::test]
async fn unlink_last_link_switches_menu() {
  let (state, gateway) = make_state("secret").await;
  let clinic_id = seed_clinic(&state).await;
  let patient_id = seed_patient(&state, clinic_id, "1024").await;
  seed_menu(&state, clinic_id).await;
  let link_id = seed_link(&state, clinic_id, "U100", patient_id).await;

  let resp = staff_delete(state, &format!("/api/links/{link_id}")).await;
  assert_eq!(resp.status(), StatusCode::OK);
  let receipt = json_body(resp).await;
  assert_eq!(receipt["remaining_links"], json!(0));
  assert_eq!(receipt["menu_switched"], json!(true));

  assert_eq!(
    gateway.calls(),
    vec![
      GatewayCall::UnbindMenu { account_id: "U100".to_string() },
      GatewayCall::BindMenu {
        account_id: "U100".to_string(),
        menu_ref:   "richmenu-unlinked".to_string(),
      },
    ]
  );
}

#[tokio::test]
async fn unlink_with_links_remaining_keeps_menu() {
  let (state, gateway) = make_state("secret").await;
  let clinic_id = seed_clinic(&state).await;
  let first = seed_patient(&state, clinic_id, "1024").await;
  let second = seed_patient(&state, clinic_id, "2048").await;
  seed_menu(&state, clinic_id).await;
  let link_id = seed_link(&state, clinic_id, "U100", first).await;
  seed_link(&state, clinic_id, "U100", second).await;

  let resp = staff_delete(state, &format!("/api/links/{link_id}")).await;
  assert_eq!(resp.status(), StatusCode::OK);
  let receipt = json_body(resp).await;
  assert_eq!(receipt["remaining_links"], json!(1));
  assert_eq!(receipt["menu_switched"], json!(false));
  assert!(gateway.calls().is_empty());
}

#[tokio::test]
async fn linking_without_menu_config_is_tolerated() {
  let (state, gateway) = make_state("secret").await;
  let clinic_id = seed_clinic(&state).await;
  seed_patient(&state, clinic_id, "1024").await;

  let resp = patient_json(
    state.clone(),
    "/links",
    link_body(
      "U100",
      clinic_id,
      json!({
        "kind": "directory",
        "patient_number": "1024",
        "birth_date": "1990-04-01",
      }),
    ),
  )
  .await;
  assert_eq!(resp.status(), StatusCode::CREATED);
  let link_id = uuid_at(&json_body(resp).await, "id");

  let resp = staff_delete(state, &format!("/api/links/{link_id}")).await;
  assert_eq!(resp.status(), StatusCode::OK);
  let receipt = json_body(resp).await;
  assert_eq!(receipt["menu_switched"], json!(false));

  // Incomplete config short-circuits before any platform traffic.
  assert!(gateway.calls().is_empty());
}

#[tokio::test]
async fn link_tolerates_account_with_no_current_menu() {
  let (state, gateway) = make_state("secret").await;
  let clinic_id = seed_clinic(&state).await;
  seed_patient(&state, clinic_id, "1024").await;
  seed_menu(&state, clinic_id).await;
  // Fresh accounts have nothing bound; the platform answers 404.
  gateway.script_unbind(Ok(GatewayAck::NotFound));

  let resp = patient_json(
    state.clone(),
    "/links",
    link_body(
      "U100",
      clinic_id,
      json!({
        "kind": "directory",
        "patient_number": "1024",
        "birth_date": "1990-04-01",
      }),
    ),
  )
  .await;
  assert_eq!(resp.status(), StatusCode::CREATED);

  // The not-found unbind counts as success and the bind still runs.
  assert_eq!(
    gateway.calls(),
    vec![
      GatewayCall::UnbindMenu { account_id: "U100".to_string() },
      GatewayCall::BindMenu {
        account_id: "U100".to_string(),
        menu_ref:   "richmenu-linked".to_string(),
      },
    ]
  );
}

#[tokio::test]
async fn select_patient_stamps_link() {
  let (state, _) = make_state("secret").await;
  let clinic_id = seed_clinic(&state).await;
  let patient_id = seed_patient(&state, clinic_id, "1024").await;
  seed_link(&state, clinic_id, "U100", patient_id).await;

  let resp = patient_json(
    state.clone(),
    "/links/select",
    json!({ "external_account_id": "U100", "patient_id": patient_id }),
  )
  .await;
  assert_eq!(resp.status(), StatusCode::OK);
  let link = json_body(resp).await;
  assert!(link["last_selected_at"].is_string());

  let resp = patient_json(
    state,
    "/links/select",
    json!({ "external_account_id": "U999", "patient_id": patient_id }),
  )
  .await;
  assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn link_lifecycle_is_audited() {
  let (state, _) = make_state("secret").await;
  let clinic_id = seed_clinic(&state).await;
  let patient_id = seed_patient(&state, clinic_id, "1024").await;

  let resp = patient_json(
    state.clone(),
    "/links",
    link_body(
      "U100",
      clinic_id,
      json!({
        "kind": "directory",
        "patient_number": "1024",
        "birth_date": "1990-04-01",
      }),
    ),
  )
  .await;
  let link_id = uuid_at(&json_body(resp).await, "id");

  patient_json(
    state.clone(),
    "/links/select",
    json!({ "external_account_id": "U100", "patient_id": patient_id }),
  )
  .await;
  staff_delete(state.clone(), &format!("/api/links/{link_id}")).await;

  let events = state.store.link_events(link_id).await.unwrap();
  let kinds: Vec<LinkEventKind> = events.iter().map(|e| e.kind).collect();
  assert_eq!(
    kinds,
    vec![LinkEventKind::Linked, LinkEventKind::Selected, LinkEventKind::Unlinked]
  );
  assert!(events.iter().all(|e| e.external_account_id == "U100"));
}

#[tokio::test]
async fn links_listing_requires_exactly_one_filter() {
  let (state, _) = make_state("secret").await;
  let clinic_id = seed_clinic(&state).await;
  let patient_id = seed_patient(&state, clinic_id, "1024").await;
  seed_link(&state, clinic_id, "U100", patient_id).await;

  let resp = staff_get(state.clone(), "/api/links").await;
  assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

  let resp = staff_get(
    state.clone(),
    &format!("/api/links?external_account_id=U100&patient_id={patient_id}"),
  )
  .await;
  assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

  let resp = staff_get(state.clone(), "/api/links?external_account_id=U100").await;
  assert_eq!(resp.status(), StatusCode::OK);
  assert_eq!(json_body(resp).await.as_array().unwrap().len(), 1);

  let resp =
    staff_get(state, &format!("/api/links?patient_id={patient_id}")).await;
  assert_eq!(resp.status(), StatusCode::OK);
  assert_eq!(json_body(resp).await.as_array().unwrap().len(), 1);
}

// ─── Check-in ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn checkin_redeems_against_todays_appointment() {
  let (state, _) = make_state("secret").await;
  let clinic_id = seed_clinic(&state).await;
  let patient_id = seed_patient(&state, clinic_id, "1024").await;
  seed_appointment(&state, clinic_id, patient_id, Utc::now()).await;

  let resp = staff_json(
    state.clone(),
    "POST",
    "/api/checkin-tokens",
    json!({
      "patient_id": patient_id,
      "clinic_id": clinic_id,
      "external_account_id": "U100",
    }),
  )
  .await;
  assert_eq!(resp.status(), StatusCode::CREATED);
  let credential = json_body(resp).await;
  assert_eq!(credential["kind"], json!("checkin"));
  let token = credential["value"].as_str().unwrap().to_string();
  assert_eq!(credential["payload"]["token"].as_str().unwrap(), token);

  let resp =
    patient_json(state.clone(), "/checkin", json!({ "token": token })).await;
  assert_eq!(resp.status(), StatusCode::OK);
  let outcome = json_body(resp).await;
  assert_eq!(outcome["outcome"], json!("checked_in"));
  assert_eq!(uuid_at(&outcome["patient"], "id"), patient_id);
  assert!(outcome["appointment"]["checked_in_at"].is_string());
  assert_eq!(outcome["appointment"]["check_in_method"], json!("qr_code"));

  // Single use: the same token cannot check in twice.
  let resp = patient_json(state, "/checkin", json!({ "token": token })).await;
  assert_eq!(resp.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn checkin_without_appointment_still_consumes_token() {
  let (state, _) = make_state("secret").await;
  let clinic_id = seed_clinic(&state).await;
  let patient_id = seed_patient(&state, clinic_id, "1024").await;

  let resp = staff_json(
    state.clone(),
    "POST",
    "/api/checkin-tokens",
    json!({
      "patient_id": patient_id,
      "clinic_id": clinic_id,
      "external_account_id": "U100",
    }),
  )
  .await;
  let token =
    json_body(resp).await["value"].as_str().unwrap().to_string();

  let resp =
    patient_json(state.clone(), "/checkin", json!({ "token": token })).await;
  assert_eq!(resp.status(), StatusCode::OK);
  let outcome = json_body(resp).await;
  assert_eq!(outcome["outcome"], json!("no_appointment_today"));

  let resp = patient_json(state, "/checkin", json!({ "token": token })).await;
  assert_eq!(resp.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn checkin_with_unknown_token_returns_404() {
  let (state, _) = make_state("secret").await;
  let resp =
    patient_json(state, "/checkin", json!({ "token": "no-such-token" })).await;
  assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn expired_checkin_token_returns_410() {
  let (state, _) = make_state("secret").await;
  let clinic_id = seed_clinic(&state).await;
  let patient_id = seed_patient(&state, clinic_id, "1024").await;

  let credential_id = Uuid::new_v4();
  state
    .store
    .insert_credential(ClaimCredential {
      id: credential_id,
      clinic_id,
      patient_id,
      external_account_id: Some("U100".to_string()),
      kind: CredentialKind::Checkin,
      value: "stale-checkin-token".to_string(),
      payload: None,
      status: CredentialStatus::Active,
      expires_at: Utc::now() - Duration::minutes(5),
      created_by: None,
      created_at: Utc::now() - Duration::minutes(20),
      used_at: None,
    })
    .await
    .unwrap();

  let resp = patient_json(
    state.clone(),
    "/checkin",
    json!({ "token": "stale-checkin-token" }),
  )
  .await;
  assert_eq!(resp.status(), StatusCode::GONE);
  let stored = state.store.get_credential(credential_id).await.unwrap().unwrap();
  assert_eq!(stored.status, CredentialStatus::Expired);
}

// ─── Schedules ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn schedule_requires_message_or_template() {
  let (state, _) = make_state("secret").await;
  let clinic_id = seed_clinic(&state).await;
  let patient_id = seed_patient(&state, clinic_id, "1024").await;

  let resp = staff_json(
    state,
    "POST",
    "/api/schedules",
    json!({
      "clinic_id": clinic_id,
      "patient_id": patient_id,
      "notification_type": "custom",
      "send_at": (Utc::now() + Duration::hours(1)).to_rfc3339(),
    }),
  )
  .await;
  assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn schedule_rejects_foreign_patient() {
  let (state, _) = make_state("secret").await;
  let clinic_id = seed_clinic(&state).await;
  let other_clinic = seed_clinic(&state).await;
  let patient_id = seed_patient(&state, other_clinic, "1024").await;

  let resp = staff_json(
    state,
    "POST",
    "/api/schedules",
    json!({
      "clinic_id": clinic_id,
      "patient_id": patient_id,
      "notification_type": "custom",
      "message": "検診のお知らせです",
      "send_at": (Utc::now() + Duration::hours(1)).to_rfc3339(),
    }),
  )
  .await;
  assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn schedule_create_list_cancel_roundtrip() {
  let (state, _) = make_state("secret").await;
  let clinic_id = seed_clinic(&state).await;
  let patient_id = seed_patient(&state, clinic_id, "1024").await;

  let resp = staff_json(
    state.clone(),
    "POST",
    "/api/schedules",
    json!({
      "clinic_id": clinic_id,
      "patient_id": patient_id,
      "notification_type": "custom",
      "message": "検診のお知らせです",
      "send_at": (Utc::now() + Duration::hours(1)).to_rfc3339(),
    }),
  )
  .await;
  assert_eq!(resp.status(), StatusCode::CREATED);
  let created = json_body(resp).await;
  assert_eq!(created["status"], json!("scheduled"));
  assert_eq!(created["channel"], json!("platform"));
  assert_eq!(created["auto_send"], json!(true));
  assert!(created["auto_reminder_sequence"].is_null());
  let schedule_id = uuid_at(&created, "id");

  let resp = staff_get(
    state.clone(),
    &format!("/api/schedules?patient_id={patient_id}"),
  )
  .await;
  assert_eq!(resp.status(), StatusCode::OK);
  assert_eq!(json_body(resp).await.as_array().unwrap().len(), 1);

  let resp = staff_json(
    state.clone(),
    "POST",
    &format!("/api/schedules/{schedule_id}/cancel"),
    json!({}),
  )
  .await;
  assert_eq!(resp.status(), StatusCode::OK);
  assert_eq!(json_body(resp).await["status"], json!("cancelled"));

  // A cancelled schedule cannot be cancelled again.
  let resp = staff_json(
    state,
    "POST",
    &format!("/api/schedules/{schedule_id}/cancel"),
    json!({}),
  )
  .await;
  assert_eq!(resp.status(), StatusCode::CONFLICT);
}

// ─── Dispatch ────────────────────────────────────────────────────────────────

/// Create a platform schedule due shortly after now and return its id.
async fn due_schedule(
  state: &TestState,
  clinic_id: Uuid,
  patient_id: Uuid,
  message: &str,
) -> Uuid {
  let resp = staff_json(
    state.clone(),
    "POST",
    "/api/schedules",
    json!({
      "clinic_id": clinic_id,
      "patient_id": patient_id,
      "notification_type": "periodic_checkup",
      "message": message,
      "send_at": (Utc::now() + Duration::minutes(2)).to_rfc3339(),
    }),
  )
  .await;
  assert_eq!(resp.status(), StatusCode::CREATED);
  uuid_at(&json_body(resp).await, "id")
}

#[tokio::test]
async fn dispatch_requires_bearer_secret() {
  let (state, _) = make_state("secret").await;

  let resp = oneshot_raw(state.clone(), "POST", "/cron/dispatch", vec![], "").await;
  assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
  let challenge =
    resp.headers().get(header::WWW_AUTHENTICATE).unwrap().to_str().unwrap();
  assert!(challenge.contains("Bearer"), "challenge: {challenge}");

  let resp = oneshot_raw(
    state.clone(),
    "POST",
    "/cron/dispatch",
    vec![(header::AUTHORIZATION, "Bearer wrong")],
    "",
  )
  .await;
  assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

  // Staff Basic credentials do not open the cron surface.
  let basic = auth_header("staff", "secret");
  let resp = oneshot_raw(
    state,
    "POST",
    "/cron/dispatch",
    vec![(header::AUTHORIZATION, basic.as_str())],
    "",
  )
  .await;
  assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn dispatch_sends_due_schedule_once() {
  let (state, gateway) = make_state("secret").await;
  let clinic_id = seed_clinic(&state).await;
  let patient_id = seed_patient(&state, clinic_id, "1024").await;
  seed_link(&state, clinic_id, "U100", patient_id).await;
  let schedule_id =
    due_schedule(&state, clinic_id, patient_id, "検診のお知らせです").await;

  let resp = cron_dispatch(state.clone()).await;
  assert_eq!(resp.status(), StatusCode::OK);
  assert_eq!(
    json_body(resp).await,
    json!({ "total": 1, "sent": 1, "failed": 0 })
  );

  let pushes = gateway.pushes();
  assert_eq!(pushes.len(), 1);
  assert_eq!(pushes[0].0, "U100");
  assert_eq!(
    pushes[0].1,
    renkei_core::gateway::OutboundMessage::text("検診のお知らせです")
  );

  let stored = state.store.get_schedule(schedule_id).await.unwrap().unwrap();
  assert_eq!(stored.status.discriminant(), "sent");
  assert!(stored.sent_at.is_some());

  // A second tick finds nothing left to do.
  let resp = cron_dispatch(state).await;
  assert_eq!(
    json_body(resp).await,
    json!({ "total": 0, "sent": 0, "failed": 0 })
  );
  assert_eq!(gateway.pushes().len(), 1);
}

#[tokio::test]
async fn dispatch_renders_template_with_placeholders() {
  let (state, gateway) = make_state("secret").await;
  let clinic_id = seed_clinic(&state).await;
  let patient_id = seed_patient(&state, clinic_id, "1024").await;
  seed_link(&state, clinic_id, "U100", patient_id).await;
  state
    .store
    .insert_template(MessageTemplate {
      id: Uuid::new_v4(),
      clinic_id,
      notification_type: NotificationType::PeriodicCheckup,
      body: "{patient_name}様、{clinic_name}より検診のご案内です".to_string(),
    })
    .await
    .unwrap();
  due_schedule(&state, clinic_id, patient_id, "fallback body").await;

  let resp = cron_dispatch(state).await;
  assert_eq!(
    json_body(resp).await,
    json!({ "total": 1, "sent": 1, "failed": 0 })
  );

  // The clinic template wins over the schedule's own message.
  let pushes = gateway.pushes();
  assert_eq!(
    pushes[0].1,
    renkei_core::gateway::OutboundMessage::text(
      "山田 太郎様、ほがらか歯科より検診のご案内です"
    )
  );
}

#[tokio::test]
async fn dispatch_retries_until_terminal_failure() {
  let (state, gateway) = make_state("secret").await;
  let clinic_id = seed_clinic(&state).await;
  let patient_id = seed_patient(&state, clinic_id, "1024").await;
  seed_link(&state, clinic_id, "U100", patient_id).await;
  let schedule_id =
    due_schedule(&state, clinic_id, patient_id, "検診のお知らせです").await;

  for _ in 0..3 {
    gateway.script_push(Err(GatewayError::retryable("boom", Some(500))));
  }

  for expected_retry in 1..=3u32 {
    let resp = cron_dispatch(state.clone()).await;
    assert_eq!(
      json_body(resp).await,
      json!({ "total": 1, "sent": 0, "failed": 1 })
    );
    let stored = state.store.get_schedule(schedule_id).await.unwrap().unwrap();
    assert_eq!(stored.retry_count, expected_retry);
    let expected_status = if expected_retry < 3 { "scheduled" } else { "failed" };
    assert_eq!(stored.status.discriminant(), expected_status);
    assert!(stored.failure_reason.as_deref().unwrap().contains("boom"));
  }

  // Terminally failed schedules drop out of later ticks.
  let resp = cron_dispatch(state.clone()).await;
  assert_eq!(
    json_body(resp).await,
    json!({ "total": 0, "sent": 0, "failed": 0 })
  );

  let failures = state.store.failures_for_schedule(schedule_id).await.unwrap();
  assert_eq!(failures.len(), 3);
  assert!(failures[0].is_retryable);
  assert!(failures[1].is_retryable);
  assert!(!failures[2].is_retryable);
}

#[tokio::test]
async fn dispatch_leaves_undeliverable_channels_scheduled() {
  let (state, gateway) = make_state("secret").await;
  let clinic_id = seed_clinic(&state).await;
  let patient_id = seed_patient(&state, clinic_id, "1024").await;
  seed_link(&state, clinic_id, "U100", patient_id).await;

  let resp = staff_json(
    state.clone(),
    "POST",
    "/api/schedules",
    json!({
      "clinic_id": clinic_id,
      "patient_id": patient_id,
      "notification_type": "custom",
      "channel": "email",
      "message": "検診のお知らせです",
      "send_at": (Utc::now() + Duration::minutes(2)).to_rfc3339(),
    }),
  )
  .await;
  let schedule_id = uuid_at(&json_body(resp).await, "id");

  let resp = cron_dispatch(state.clone()).await;
  assert_eq!(
    json_body(resp).await,
    json!({ "total": 1, "sent": 0, "failed": 0 })
  );
  assert!(gateway.pushes().is_empty());

  let stored = state.store.get_schedule(schedule_id).await.unwrap().unwrap();
  assert_eq!(stored.status.discriminant(), "scheduled");
  assert_eq!(stored.retry_count, 0);
}

#[tokio::test]
async fn dispatch_fails_without_linked_account() {
  let (state, gateway) = make_state("secret").await;
  let clinic_id = seed_clinic(&state).await;
  let patient_id = seed_patient(&state, clinic_id, "1024").await;
  let schedule_id =
    due_schedule(&state, clinic_id, patient_id, "検診のお知らせです").await;

  let resp = cron_dispatch(state.clone()).await;
  assert_eq!(
    json_body(resp).await,
    json!({ "total": 1, "sent": 0, "failed": 1 })
  );
  assert!(gateway.pushes().is_empty());

  let stored = state.store.get_schedule(schedule_id).await.unwrap().unwrap();
  assert!(
    stored.failure_reason.as_deref().unwrap().contains("no linked account")
  );
}

// ─── Auto reminders ──────────────────────────────────────────────────────────

#[tokio::test]
async fn reminder_rule_defaults_until_configured() {
  let (state, _) = make_state("secret").await;
  let clinic_id = seed_clinic(&state).await;

  let resp = staff_get(
    state,
    &format!("/api/clinics/{clinic_id}/reminder-rule"),
  )
  .await;
  assert_eq!(resp.status(), StatusCode::OK);
  let rule = json_body(resp).await;
  assert_eq!(rule["enabled"], json!(false));
  assert_eq!(rule["default_send_hour"], json!(18));
  assert_eq!(
    rule["intervals"],
    json!([
      { "value": 3, "unit": "months" },
      { "value": 3, "unit": "months" },
      { "value": 6, "unit": "months" },
    ])
  );
}

#[tokio::test]
async fn reminder_rule_upsert_validates() {
  let (state, _) = make_state("secret").await;
  let clinic_id = seed_clinic(&state).await;
  let uri = format!("/api/clinics/{clinic_id}/reminder-rule");

  let resp = staff_json(
    state.clone(),
    "PUT",
    &uri,
    json!({
      "enabled": true,
      "intervals": [{ "value": 4, "unit": "months" }],
      "default_send_hour": 9,
    }),
  )
  .await;
  assert_eq!(resp.status(), StatusCode::OK);
  let saved = json_body(resp).await;
  assert_eq!(saved["enabled"], json!(true));
  assert_eq!(uuid_at(&saved, "clinic_id"), clinic_id);

  let resp = staff_get(state.clone(), &uri).await;
  let fetched = json_body(resp).await;
  assert_eq!(fetched["default_send_hour"], json!(9));
  assert_eq!(fetched["intervals"], json!([{ "value": 4, "unit": "months" }]));

  let resp = staff_json(
    state.clone(),
    "PUT",
    &uri,
    json!({
      "enabled": true,
      "intervals": [{ "value": 4, "unit": "months" }],
      "default_send_hour": 24,
    }),
  )
  .await;
  assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

  let resp = staff_json(
    state,
    "PUT",
    &uri,
    json!({
      "enabled": true,
      "intervals": [{ "value": 0, "unit": "days" }],
      "default_send_hour": 9,
    }),
  )
  .await;
  assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

/// Enable a single 90-day interval so window math stays exact under the
/// evaluator's own clock.
async fn enable_ninety_day_rule(state: &TestState, clinic_id: Uuid) {
  let resp = staff_json(
    state.clone(),
    "PUT",
    &format!("/api/clinics/{clinic_id}/reminder-rule"),
    json!({
      "enabled": true,
      "intervals": [{ "value": 90, "unit": "days" }],
      "default_send_hour": 18,
    }),
  )
  .await;
  assert_eq!(resp.status(), StatusCode::OK);
}

async fn evaluate(state: &TestState, clinic_id: Uuid) -> Value {
  let resp = staff_json(
    state.clone(),
    "POST",
    &format!("/api/clinics/{clinic_id}/evaluate-reminders"),
    json!({}),
  )
  .await;
  assert_eq!(resp.status(), StatusCode::OK);
  json_body(resp).await
}

#[tokio::test]
async fn auto_reminders_sequence_and_reset() {
  let (state, _) = make_state("secret").await;
  let clinic_id = seed_clinic(&state).await;
  let patient_id = seed_patient(&state, clinic_id, "1024").await;
  enable_ninety_day_rule(&state, clinic_id).await;
  // Last visit 93 days ago: inside the 90-day window with its 7-day grace.
  seed_appointment(&state, clinic_id, patient_id, Utc::now() - Duration::days(93))
    .await;

  let created = evaluate(&state, clinic_id).await;
  assert_eq!(created.as_array().unwrap().len(), 1);
  let reminder = &created[0];
  assert_eq!(uuid_at(reminder, "patient_id"), patient_id);
  assert_eq!(reminder["notification_type"], json!("periodic_checkup"));
  assert_eq!(reminder["auto_send"], json!(true));
  assert_eq!(reminder["auto_reminder_sequence"], json!(1));
  let send_at = dt_at(reminder, "send_at");
  assert_eq!(send_at.hour(), 18);
  assert!(send_at > Utc::now());

  // Re-running the evaluation does not duplicate the open reminder.
  let again = evaluate(&state, clinic_id).await;
  assert!(again.as_array().unwrap().is_empty());

  // A booking cancels the pending cycle; the next evaluation starts the
  // following sequence.
  let resp = staff_json(
    state.clone(),
    "POST",
    "/api/schedules/cancel-auto",
    json!({ "patient_id": patient_id }),
  )
  .await;
  assert_eq!(resp.status(), StatusCode::OK);
  assert_eq!(json_body(resp).await, json!({ "cancelled": 1 }));

  let next = evaluate(&state, clinic_id).await;
  assert_eq!(next.as_array().unwrap().len(), 1);
  assert_eq!(next[0]["auto_reminder_sequence"], json!(2));
}

#[tokio::test]
async fn rebooked_patients_are_skipped() {
  let (state, _) = make_state("secret").await;
  let clinic_id = seed_clinic(&state).await;
  let patient_id = seed_patient(&state, clinic_id, "1024").await;
  enable_ninety_day_rule(&state, clinic_id).await;
  seed_appointment(&state, clinic_id, patient_id, Utc::now() - Duration::days(93))
    .await;
  // The future booking moves the patient's latest visit out of every
  // lookback window.
  seed_appointment(&state, clinic_id, patient_id, Utc::now() + Duration::days(1))
    .await;

  let created = evaluate(&state, clinic_id).await;
  assert!(created.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn disabled_rule_emits_nothing() {
  let (state, _) = make_state("secret").await;
  let clinic_id = seed_clinic(&state).await;
  let patient_id = seed_patient(&state, clinic_id, "1024").await;
  seed_appointment(&state, clinic_id, patient_id, Utc::now() - Duration::days(93))
    .await;

  // The default rule exists but is disabled.
  let created = evaluate(&state, clinic_id).await;
  assert!(created.as_array().unwrap().is_empty());
}

// ─── Menus ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn menu_health_reports_missing_refs() {
  let (state, _) = make_state("secret").await;
  let clinic_id = seed_clinic(&state).await;
  let uri = format!("/api/clinics/{clinic_id}/menu-health");

  let resp = staff_get(state.clone(), &uri).await;
  assert_eq!(resp.status(), StatusCode::OK);
  let health = json_body(resp).await;
  assert_eq!(health["complete"], json!(false));
  assert_eq!(
    health["missing"],
    json!(["linked_menu_ref", "unlinked_menu_ref"])
  );

  seed_menu(&state, clinic_id).await;
  let resp = staff_get(state, &uri).await;
  let health = json_body(resp).await;
  assert_eq!(health["complete"], json!(true));
  assert_eq!(health["missing"], json!([]));
}

#[tokio::test]
async fn menu_resync_without_config_conflicts() {
  let (state, _) = make_state("secret").await;
  let clinic_id = seed_clinic(&state).await;

  let resp = staff_json(
    state,
    "POST",
    &format!("/api/clinics/{clinic_id}/menu-resync"),
    json!({}),
  )
  .await;
  assert_eq!(resp.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn menu_resync_reapplies_linked_menu() {
  let (state, gateway) = make_state("secret").await;
  let clinic_id = seed_clinic(&state).await;
  let first = seed_patient(&state, clinic_id, "1024").await;
  let second = seed_patient(&state, clinic_id, "2048").await;
  seed_menu(&state, clinic_id).await;
  seed_link(&state, clinic_id, "U100", first).await;
  seed_link(&state, clinic_id, "U200", second).await;

  let resp = staff_json(
    state,
    "POST",
    &format!("/api/clinics/{clinic_id}/menu-resync"),
    json!({}),
  )
  .await;
  assert_eq!(resp.status(), StatusCode::OK);
  assert_eq!(
    json_body(resp).await,
    json!({ "total": 2, "applied": 2, "failed": 0 })
  );

  // Accounts are walked in order; each gets an unbind then the linked bind.
  assert_eq!(
    gateway.calls(),
    vec![
      GatewayCall::UnbindMenu { account_id: "U100".to_string() },
      GatewayCall::BindMenu {
        account_id: "U100".to_string(),
        menu_ref:   "richmenu-linked".to_string(),
      },
      GatewayCall::UnbindMenu { account_id: "U200".to_string() },
      GatewayCall::BindMenu {
        account_id: "U200".to_string(),
        menu_ref:   "richmenu-linked".to_string(),
      },
    ]
  );
}

#[tokio::test]
async fn menu_resync_counts_failures() {
  let (state, gateway) = make_state("secret").await;
  let clinic_id = seed_clinic(&state).await;
  let first = seed_patient(&state, clinic_id, "1024").await;
  let second = seed_patient(&state, clinic_id, "2048").await;
  seed_menu(&state, clinic_id).await;
  seed_link(&state, clinic_id, "U100", first).await;
  seed_link(&state, clinic_id, "U200", second).await;

  // First bind errors; the second account still gets its menu.
  gateway.script_bind(Err(GatewayError::terminal("menu gone", Some(404))));

  let resp = staff_json(
    state,
    "POST",
    &format!("/api/clinics/{clinic_id}/menu-resync"),
    json!({}),
  )
  .await;
  assert_eq!(resp.status(), StatusCode::OK);
  assert_eq!(
    json_body(resp).await,
    json!({ "total": 2, "applied": 1, "failed": 1 })
  );
}
