use super::*;
use crate::auth::AuthChangeKind;
use crate::storage::MemoryStorage;

fn backend_with(storage: Arc<dyn KeyValueStorage>) -> RestAuthBackend {
    let config = AuthConfig { url: "https://project.supabase.test/".to_owned(), api_key: "anon".to_owned() };
    RestAuthBackend::new(&config, HttpTimeouts::default(), storage).unwrap()
}

fn stored(id: &str, name: &str) -> StoredSession {
    let mut user_metadata = Map::new();
    user_metadata.insert("name".to_owned(), Value::from(name));
    StoredSession {
        access_token: "token".to_owned(),
        refresh_token: Some("refresh".to_owned()),
        user: WireUser { id: id.to_owned(), email: Some(format!("{id}@example.test")), user_metadata },
    }
}

fn seeded(session: &StoredSession) -> Arc<MemoryStorage> {
    let storage = Arc::new(MemoryStorage::new());
    storage
        .set_item(SESSION_STORAGE_KEY, &serde_json::to_string(session).unwrap())
        .unwrap();
    storage
}

// =============================================================================
// URL helpers
// =============================================================================

#[test]
fn auth_and_rest_urls() {
    assert_eq!(
        auth_url("https://p.test", "token?grant_type=password"),
        "https://p.test/auth/v1/token?grant_type=password"
    );
    assert_eq!(rest_url("https://p.test", "profiles"), "https://p.test/rest/v1/profiles");
}

fn query_pairs(request: &reqwest::Request) -> Vec<(String, String)> {
    request.url().query_pairs().map(|(k, v)| (k.into_owned(), v.into_owned())).collect()
}

#[test]
fn profile_lookup_filters_by_id_and_selects_columns() {
    let backend = backend_with(Arc::new(MemoryStorage::new()));
    let request = backend.profile_lookup("5f1c-aa").build().unwrap();

    assert_eq!(request.method(), &reqwest::Method::GET);
    assert_eq!(request.url().path(), "/rest/v1/profiles");
    assert_eq!(
        query_pairs(&request),
        vec![
            ("id".to_owned(), "eq.5f1c-aa".to_owned()),
            ("select".to_owned(), "full_name,avatar_url".to_owned()),
        ]
    );
}

#[test]
fn profile_lookup_escapes_reserved_characters_in_subject() {
    let backend = backend_with(Arc::new(MemoryStorage::new()));
    let request = backend.profile_lookup("a b&c=d").build().unwrap();

    let raw = request.url().query().unwrap();
    assert!(!raw.contains("a b&c=d"), "subject left unescaped: {raw}");
    assert_eq!(query_pairs(&request)[0], ("id".to_owned(), "eq.a b&c=d".to_owned()));
    assert_eq!(query_pairs(&request).len(), 2);
}

#[test]
fn profile_lookup_sends_bearer_for_anonymous_callers() {
    let backend = backend_with(Arc::new(MemoryStorage::new()));
    let request = backend.profile_lookup("u1").build().unwrap();
    assert_eq!(request.headers()["authorization"], "Bearer anon");
}

#[test]
fn new_trims_trailing_slash_from_base_url() {
    let backend = backend_with(Arc::new(MemoryStorage::new()));
    assert_eq!(backend.base_url, "https://project.supabase.test");
}

// =============================================================================
// Response parsing
// =============================================================================

#[test]
fn rejection_message_prefers_error_description() {
    let body = r#"{"error":"invalid_grant","error_description":"Invalid login credentials"}"#;
    assert_eq!(rejection_message(400, body), "Invalid login credentials");
}

#[test]
fn rejection_message_reads_msg_then_message_then_error() {
    assert_eq!(rejection_message(422, r#"{"msg":"User already registered"}"#), "User already registered");
    assert_eq!(rejection_message(400, r#"{"message":"bad"}"#), "bad");
    assert_eq!(rejection_message(400, r#"{"error":"nope","msg":"  "}"#), "nope");
}

#[test]
fn rejection_message_falls_back_to_status() {
    assert_eq!(rejection_message(502, "<html>bad gateway</html>"), "request failed with status 502");
    assert_eq!(rejection_message(500, "{}"), "request failed with status 500");
}

#[test]
fn profile_rows_take_first_or_none() {
    let row = parse_profile_rows(r#"[{"full_name":"Anna","avatar_url":null}]"#).unwrap();
    assert_eq!(row, Some(ProfileRow { display_name: Some("Anna".to_owned()), avatar_ref: None }));
    assert_eq!(parse_profile_rows("[]").unwrap(), None);
    assert!(matches!(parse_profile_rows("{}"), Err(AuthError::Parse(_))));
}

#[test]
fn sign_up_response_without_token_has_no_session() {
    let pending: SignUpResponse =
        serde_json::from_str(r#"{"user":{"id":"u1","email":"a@b.c","user_metadata":{"name":"Ann"}}}"#).unwrap();
    assert_eq!(pending.into_session(), None);

    let confirmed: SignUpResponse =
        serde_json::from_str(r#"{"access_token":"t","user":{"id":"u1","user_metadata":{}}}"#).unwrap();
    let session = confirmed.into_session().unwrap();
    assert_eq!(session.user.id, "u1");
    assert_eq!(session.refresh_token, None);
}

#[test]
fn profile_upsert_body_uses_column_names() {
    let row = ProfileRow { display_name: Some("Anna".to_owned()), avatar_ref: None };
    let body = serde_json::to_value(ProfileUpsert { id: "u1", row: &row }).unwrap();
    assert_eq!(body, serde_json::json!({"id": "u1", "full_name": "Anna"}));
}

#[test]
fn wire_user_snapshot_drops_empty_email() {
    let user = WireUser { id: "u1".to_owned(), email: Some(String::new()), user_metadata: Map::new() };
    assert_eq!(user.snapshot(), SessionSnapshot::new("u1"));
}

// =============================================================================
// Persisted session
// =============================================================================

#[tokio::test]
async fn get_session_reads_persisted_session() {
    let backend = backend_with(seeded(&stored("u1", "Ann")));
    let session = backend.get_session().await.unwrap().unwrap();
    assert_eq!(session.subject_id, "u1");
    assert_eq!(session.email.as_deref(), Some("u1@example.test"));
    assert_eq!(session.metadata.get("name"), Some(&Value::from("Ann")));
}

#[tokio::test]
async fn get_session_without_persisted_session_is_none() {
    let backend = backend_with(Arc::new(MemoryStorage::new()));
    assert_eq!(backend.get_session().await.unwrap(), None);
}

#[tokio::test]
async fn corrupt_persisted_session_counts_as_signed_out() {
    let storage = Arc::new(MemoryStorage::new());
    storage.set_item(SESSION_STORAGE_KEY, "{not json").unwrap();
    let backend = backend_with(storage);
    assert_eq!(backend.get_session().await.unwrap(), None);
}

#[tokio::test]
async fn subscription_starts_with_initial_session() {
    let backend = backend_with(seeded(&stored("u1", "Ann")));
    let mut changes = backend.subscribe_session_changes();

    let first = changes.recv().await.unwrap();
    assert_eq!(first.kind, AuthChangeKind::InitialSession);
    assert_eq!(first.session.map(|s| s.subject_id), Some("u1".to_owned()));
}

#[tokio::test]
async fn sign_out_without_session_clears_and_notifies() {
    let storage = Arc::new(MemoryStorage::new());
    let backend = backend_with(storage.clone());
    let mut changes = backend.subscribe_session_changes();
    assert_eq!(changes.recv().await.map(|c| c.kind), Some(AuthChangeKind::InitialSession));

    backend.sign_out().await.unwrap();

    assert_eq!(changes.recv().await, Some(SessionChange::signed_out()));
    assert_eq!(storage.get_item(SESSION_STORAGE_KEY).unwrap(), None);
}

#[test]
fn establish_persists_and_announces_sign_in() {
    let storage = Arc::new(MemoryStorage::new());
    let backend = backend_with(storage.clone());
    let mut changes = backend.events.subscribe(None);

    let snapshot = backend.establish(&stored("u2", "Bo")).unwrap();

    assert_eq!(snapshot.subject_id, "u2");
    assert_eq!(backend.bearer(), "token");
    let raw = storage.get_item(SESSION_STORAGE_KEY).unwrap().unwrap();
    assert_eq!(decode_stored_session(&raw).unwrap(), Some(stored("u2", "Bo")));
    assert_eq!(changes.rx.try_recv().unwrap(), SessionChange::signed_in(snapshot));
}

#[test]
fn bearer_falls_back_to_api_key_when_signed_out() {
    let backend = backend_with(Arc::new(MemoryStorage::new()));
    assert_eq!(backend.bearer(), "anon");
}
