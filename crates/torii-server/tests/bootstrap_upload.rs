use serde_json::json;
use torii_server::bootstrap::{UploadStats, upload_profiles};
use torii_server::config::ProfilesConfig;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn uploads_every_json_profile_and_counts_failures() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(
        dir.path().join("good.json"),
        serde_json::to_vec(&json!({
            "resourceType": "StructureDefinition",
            "url": "http://example.org/fhir/StructureDefinition/torii-condition",
        }))
        .expect("serialize"),
    )
    .expect("write profile");
    std::fs::write(
        dir.path().join("broken.json"),
        b"{ not json",
    )
    .expect("write profile");
    std::fs::write(dir.path().join("notes.txt"), b"ignored").expect("write note");

    let store = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/profiles"))
        .and(header("content-type", "application/fhir+json"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&store)
        .await;

    let cfg = ProfilesConfig {
        dir: Some(dir.path().to_string_lossy().into_owned()),
        upload_url: Some(format!("{}/profiles", store.uri())),
    };
    let stats = upload_profiles(&cfg).await;
    // The unparsable file fails locally, the text file is skipped.
    assert_eq!(
        stats,
        UploadStats {
            uploaded: 1,
            failed: 1,
        }
    );
}

#[tokio::test]
async fn store_rejections_are_counted_not_fatal() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(
        dir.path().join("profile.json"),
        serde_json::to_vec(&json!({"resourceType": "StructureDefinition", "name": "Torii"}))
            .expect("serialize"),
    )
    .expect("write profile");

    let store = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/profiles"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&store)
        .await;

    let cfg = ProfilesConfig {
        dir: Some(dir.path().to_string_lossy().into_owned()),
        upload_url: Some(format!("{}/profiles", store.uri())),
    };
    let stats = upload_profiles(&cfg).await;
    assert_eq!(stats.uploaded, 0);
    assert_eq!(stats.failed, 1);
}

#[tokio::test]
async fn skips_silently_when_not_configured() {
    let stats = upload_profiles(&ProfilesConfig::default()).await;
    assert_eq!(stats, UploadStats::default());
}

#[tokio::test]
async fn missing_directory_is_not_fatal() {
    let cfg = ProfilesConfig {
        dir: Some("definitely/not/here".to_string()),
        upload_url: Some("http://localhost:1/profiles".to_string()),
    };
    let stats = upload_profiles(&cfg).await;
    assert_eq!(stats, UploadStats::default());
}
