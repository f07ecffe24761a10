//! HTTP clients: the validation service endpoints and the submit target.
//!
//! The service speaks Apple property lists; the submit target takes JSON.
//! All payloads that pass through here are opaque byte buffers as far as
//! this crate is concerned.

use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::device::DeviceInfo;
use crate::error::{Error, Result};

pub const VALIDATION_CERT_URL: &str =
    "http://static.ess.apple.com/identity/validation/cert-1.0.plist";
pub const INITIALIZE_VALIDATION_URL: &str =
    "https://identity.ess.apple.com/WebObjects/TDIdentityService.woa/wa/initializeValidation";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

fn agent() -> ureq::Agent {
    ureq::Agent::config_builder()
        .timeout_global(Some(REQUEST_TIMEOUT))
        .build()
        .new_agent()
}

#[derive(Debug, Deserialize)]
struct CertResponse {
    cert: plist::Data,
}

#[derive(Debug, Serialize, Deserialize)]
struct InitializeValidationRequest {
    #[serde(rename = "session-info-request")]
    session_info_request: plist::Data,
}

#[derive(Debug, Deserialize)]
struct InitializeValidationResponse {
    #[serde(rename = "session-info")]
    session_info: plist::Data,
}

/// Client for the certificate and session-info endpoints.
pub struct ValidationClient {
    agent: ureq::Agent,
    user_agent: String,
}

impl ValidationClient {
    pub fn new(device: &DeviceInfo) -> Self {
        Self {
            agent: agent(),
            user_agent: device.user_agent(),
        }
    }

    /// Fetch the validation certificate.
    pub fn fetch_cert(&self) -> Result<Vec<u8>> {
        let mut response = self
            .agent
            .get(VALIDATION_CERT_URL)
            .header("User-Agent", self.user_agent.as_str())
            .call()?;
        let body = response.body_mut().read_to_vec()?;
        parse_cert_response(&body)
    }

    /// Exchange the session-info request for the service's session info.
    pub fn initialize_validation(&self, request: &[u8]) -> Result<Vec<u8>> {
        let body = encode_session_info_request(request)?;
        debug!("posting {} byte session-info request", body.len());
        let mut response = self
            .agent
            .post(INITIALIZE_VALIDATION_URL)
            .header("User-Agent", self.user_agent.as_str())
            .header("Content-Type", "application/x-apple-plist")
            .send(&body[..])?;
        let body = response.body_mut().read_to_vec()?;
        parse_session_info_response(&body)
    }
}

fn parse_cert_response(body: &[u8]) -> Result<Vec<u8>> {
    let parsed: CertResponse = plist::from_bytes(body)?;
    let cert: Vec<u8> = parsed.cert.into();
    if cert.is_empty() {
        return Err(Error::UnexpectedResponse(
            "no cert in certificate response".to_string(),
        ));
    }
    Ok(cert)
}

fn encode_session_info_request(request: &[u8]) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    plist::to_writer_xml(
        &mut buf,
        &InitializeValidationRequest {
            session_info_request: request.to_vec().into(),
        },
    )?;
    Ok(buf)
}

fn parse_session_info_response(body: &[u8]) -> Result<Vec<u8>> {
    let parsed: InitializeValidationResponse = plist::from_bytes(body)?;
    let session_info: Vec<u8> = parsed.session_info.into();
    if session_info.is_empty() {
        return Err(Error::UnexpectedResponse(
            "no session info in initialize validation response".to_string(),
        ));
    }
    Ok(session_info)
}

#[derive(Debug, Serialize)]
struct SubmitPayload<'a> {
    validation_data: String,
    device_info: &'a DeviceInfo,
}

/// Posts freshly generated validation data to an operator-supplied URL.
pub struct SubmitClient {
    agent: ureq::Agent,
    url: String,
    token: Option<String>,
    user_agent: String,
}

impl SubmitClient {
    pub fn new(url: impl Into<String>, token: Option<String>, device: &DeviceInfo) -> Self {
        let user_agent = format!(
            "validata/{} macOS/{}",
            env!("CARGO_PKG_VERSION"),
            device.software_version
        );
        Self {
            agent: agent(),
            url: url.into(),
            token,
            user_agent,
        }
    }

    pub fn submit(&self, validation_data: &[u8], device: &DeviceInfo) -> Result<()> {
        let payload = SubmitPayload {
            validation_data: BASE64.encode(validation_data),
            device_info: device,
        };
        let mut request = self
            .agent
            .post(self.url.as_str())
            .header("User-Agent", self.user_agent.as_str());
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("Bearer {token}"));
        }
        request.send_json(&payload)?;
        Ok(())
    }
}
