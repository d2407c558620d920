//! Request and response bodies exchanged with clients and validators.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Registration handshake sent by a validator to `/get_credentials`.
///
/// The validator reports the path suffix of its callback endpoint; the
/// gateway combines it with the connection's source address to build the
/// full callback URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakeRequest {
    /// Path suffix of the validator's callback endpoint, e.g. `:8000/generate`.
    pub postfix: String,
    /// The validator's ordinal in the stake ledger membership.
    pub uid: u64,
}

/// Gateway identity proof returned from a successful handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakeResponse {
    /// The fixed identity message the gateway signs.
    pub message: String,
    /// Base64-encoded Ed25519 signature over `message`.
    pub signature: String,
}

/// Envelope posted to a validator's callback endpoint.
///
/// Used for both generation forwards and health probes; only the payload
/// differs. Validators verify `authorization` (the gateway's base64
/// public key) against the signature obtained at handshake time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwardRequest {
    /// Opaque request payload, passed through unmodified.
    pub payload: Value,
    /// Base64-encoded Ed25519 public key of the gateway.
    pub authorization: String,
}

impl ForwardRequest {
    /// The payload a health probe carries.
    #[must_use]
    pub fn probe(authorization: impl Into<String>) -> Self {
        Self {
            payload: serde_json::json!({ "recheck": true }),
            authorization: authorization.into(),
        }
    }
}

/// Client-facing generation request accepted on `/generate`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratePrompt {
    /// The caller's api key.
    pub key: String,
    /// Text prompt.
    pub prompt: String,
    /// Target model identifier.
    pub model_name: String,
    /// Pipeline variant, `txt2img` unless the caller overrides it.
    #[serde(default = "default_pipeline_type")]
    pub pipeline_type: String,
    /// Base64 conditioning image for img2img pipelines.
    #[serde(default)]
    pub conditional_image: String,
    /// Generation seed; -1 asks the validator to pick one.
    #[serde(default = "default_seed")]
    pub seed: i64,
    /// Specific miner to target, -1 for validator's choice.
    #[serde(default = "default_seed")]
    pub miner_uid: i64,
    /// Free-form pipeline parameter overrides.
    #[serde(default = "default_pipeline_params")]
    pub pipeline_params: Value,
}

fn default_pipeline_type() -> String {
    "txt2img".to_string()
}

fn default_pipeline_params() -> Value {
    Value::Object(serde_json::Map::new())
}

fn default_seed() -> i64 {
    -1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_defaults_apply() {
        let prompt: GeneratePrompt = serde_json::from_str(
            r#"{"key":"k1","prompt":"a red fox","model_name":"sdxl-turbo"}"#,
        )
        .unwrap();
        assert_eq!(prompt.pipeline_type, "txt2img");
        assert_eq!(prompt.conditional_image, "");
        assert_eq!(prompt.seed, -1);
        assert_eq!(prompt.miner_uid, -1);
        assert_eq!(prompt.pipeline_params, serde_json::json!({}));
    }

    #[test]
    fn defaulted_prompt_forwards_empty_params_object() {
        // Validators receive the prompt verbatim, so the defaulted
        // pipeline_params must serialize as {} rather than null.
        let prompt: GeneratePrompt = serde_json::from_str(
            r#"{"key":"k1","prompt":"a red fox","model_name":"sdxl"}"#,
        )
        .unwrap();
        let forwarded = serde_json::to_value(&prompt).unwrap();
        assert_eq!(forwarded["pipeline_params"], serde_json::json!({}));
    }

    #[test]
    fn probe_request_shape() {
        let probe = ForwardRequest::probe("cHVia2V5");
        assert_eq!(probe.payload["recheck"], true);
        assert_eq!(probe.authorization, "cHVia2V5");
    }

    #[test]
    fn handshake_roundtrip() {
        let req = HandshakeRequest {
            postfix: ":8000/validator".to_string(),
            uid: 12,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["postfix"], ":8000/validator");
        assert_eq!(json["uid"], 12);
    }
}
