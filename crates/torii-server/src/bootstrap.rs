//! Startup upload of profile definitions to the conformance store.
//!
//! The gateway never validates against these profiles itself; it only makes
//! sure the validation engine knows them before traffic arrives.

use std::path::Path;
use std::time::Duration;

use serde_json::Value;

use crate::config::ProfilesConfig;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct UploadStats {
    pub uploaded: usize,
    pub failed: usize,
}

/// Reads every `*.json` file in the configured directory and POSTs it to
/// the conformance store. Failures are logged and counted, never fatal:
/// the gateway still serves without the uploads.
pub async fn upload_profiles(cfg: &ProfilesConfig) -> UploadStats {
    let (Some(dir), Some(upload_url)) = (&cfg.dir, &cfg.upload_url) else {
        tracing::debug!("profile upload not configured, skipping");
        return UploadStats::default();
    };

    let mut stats = UploadStats::default();
    let entries = match std::fs::read_dir(Path::new(dir)) {
        Ok(entries) => entries,
        Err(error) => {
            tracing::warn!(dir = %dir, error = %error, "cannot read profile directory");
            return stats;
        }
    };

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new());

    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
            continue;
        }
        match upload_one(&client, upload_url, &path).await {
            Ok(name) => {
                tracing::info!(profile = %name, "profile uploaded");
                stats.uploaded += 1;
            }
            Err(error) => {
                tracing::warn!(path = %path.display(), error = %error, "profile upload failed");
                stats.failed += 1;
            }
        }
    }

    tracing::info!(
        uploaded = stats.uploaded,
        failed = stats.failed,
        "profile upload finished"
    );
    stats
}

async fn upload_one(
    client: &reqwest::Client,
    upload_url: &str,
    path: &Path,
) -> anyhow::Result<String> {
    let raw = std::fs::read_to_string(path)?;
    let resource: Value = serde_json::from_str(&raw)?;
    let name = resource
        .get("url")
        .or_else(|| resource.get("name"))
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string();

    let response = client
        .post(upload_url)
        .header(reqwest::header::CONTENT_TYPE, "application/fhir+json")
        .body(raw)
        .send()
        .await?;
    if !response.status().is_success() {
        anyhow::bail!("conformance store answered {}", response.status());
    }
    Ok(name)
}
