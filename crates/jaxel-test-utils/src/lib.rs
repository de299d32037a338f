#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::{SystemTime, UNIX_EPOCH};

pub const TEST_LOG_SCHEMA_VERSION: &str = "jaxel.test-log.v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestResult {
    Pass,
    Fail,
    Skip,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestLogEnv {
    pub os: String,
    pub cargo_target_dir: String,
    pub timestamp_unix_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestLogV1 {
    pub schema_version: String,
    pub test_id: String,
    pub fixture_id: String,
    pub seed: Option<u64>,
    pub env: TestLogEnv,
    pub result: TestResult,
    pub duration_ms: u64,
    pub details: Option<String>,
}

impl TestLogV1 {
    #[must_use]
    pub fn unit(test_id: impl Into<String>, fixture_id: impl Into<String>, result: TestResult) -> Self {
        Self {
            schema_version: TEST_LOG_SCHEMA_VERSION.to_owned(),
            test_id: test_id.into(),
            fixture_id: fixture_id.into(),
            seed: capture_proptest_seed(),
            env: capture_env(),
            result,
            duration_ms: 0,
            details: None,
        }
    }
}

#[must_use]
pub fn capture_env() -> TestLogEnv {
    TestLogEnv {
        os: std::env::consts::OS.to_owned(),
        cargo_target_dir: std::env::var("CARGO_TARGET_DIR")
            .unwrap_or_else(|_| "<default>".to_owned()),
        timestamp_unix_ms: now_unix_ms_u64(),
    }
}

pub fn fixture_id_from_json<T: Serialize>(fixture: &T) -> Result<String, serde_json::Error> {
    let bytes = serde_json::to_vec(fixture)?;
    let digest = Sha256::digest(&bytes);
    Ok(digest.iter().map(|b| format!("{b:02x}")).collect())
}

#[must_use]
pub fn property_test_case_count() -> u32 {
    if let Ok(raw) = std::env::var("JAXEL_PROPTEST_CASES")
        && let Ok(parsed) = raw.parse::<u32>()
        && parsed > 0
    {
        return parsed;
    }

    if std::env::var_os("CI").is_some() { 1024 } else { 256 }
}

#[must_use]
pub fn capture_proptest_seed() -> Option<u64> {
    if let Ok(raw) = std::env::var("PROPTEST_RNG_SEED")
        && let Ok(seed) = raw.parse::<u64>()
    {
        return Some(seed);
    }
    None
}

#[must_use]
pub fn test_id(module_path: &str, test_name: &str) -> String {
    format!("{module_path}::{test_name}")
}

fn now_unix_ms_u64() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .and_then(|duration| u64::try_from(duration.as_millis()).ok())
        .unwrap_or(0)
}
