use serde::Serialize;
use thiserror::Error;

/// Which native entry point an invocation error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum NacCall {
    #[strum(serialize = "NACInit")]
    Init,
    #[strum(serialize = "NACKeyEstablishment")]
    KeyEstablishment,
    #[strum(serialize = "NACSign")]
    Sign,
}

/// Structured payload for the "no offsets" condition, serialized as-is when
/// the condition is reported to collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NoOffsetsReport {
    pub hash: String,
    pub os_version: String,
    pub build_id: String,
    pub arch: String,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("input truncated: need {needed} bytes, have {have}")]
    TruncatedInput { needed: usize, have: usize },

    #[error("invalid signature pattern: {0}")]
    InvalidPattern(String),

    #[error("no offsets for {}/{}/{} (hash: {})", .0.os_version, .0.build_id, .0.arch, .0.hash)]
    NoOffsets(NoOffsetsReport),

    #[error("failed to load {path}: {reason}")]
    ImageLoad { path: String, reason: String },

    #[error("failed to resolve symbol {symbol}: {reason}")]
    SymbolNotFound { symbol: String, reason: String },

    #[error("sanity probe returned unexpected code {code}")]
    SanityCheck { code: i32 },

    #[error("{call} failed with code {code}")]
    NativeCall { call: NacCall, code: i32 },

    #[error("device probe failed: {0}")]
    DeviceProbe(String),

    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("plist error: {0}")]
    Plist(#[from] plist::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] Box<ureq::Error>),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<ureq::Error> for Error {
    fn from(err: ureq::Error) -> Self {
        Error::Http(Box::new(err))
    }
}

impl Error {
    /// Resolution-phase failures abort startup; invocation-phase failures
    /// are reported per attempt.
    pub fn is_resolution_failure(&self) -> bool {
        matches!(
            self,
            Error::NoOffsets(_)
                | Error::ImageLoad { .. }
                | Error::SymbolNotFound { .. }
                | Error::SanityCheck { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_offsets_display() {
        let err = Error::NoOffsets(NoOffsetsReport {
            hash: "ab".repeat(32),
            os_version: "14.3".to_string(),
            build_id: "23D56".to_string(),
            arch: "arm64e".to_string(),
        });
        let rendered = err.to_string();
        assert!(rendered.contains("14.3/23D56/arm64e"));
        assert!(rendered.contains(&"ab".repeat(32)));
    }

    #[test]
    fn test_no_offsets_report_serializes_all_fields() {
        let report = NoOffsetsReport {
            hash: "00".to_string(),
            os_version: "13.5".to_string(),
            build_id: "22G74".to_string(),
            arch: "x86_64".to_string(),
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["hash"], "00");
        assert_eq!(json["os_version"], "13.5");
        assert_eq!(json["build_id"], "22G74");
        assert_eq!(json["arch"], "x86_64");
    }

    #[test]
    fn test_resolution_failure_classification() {
        let fatal = Error::SanityCheck { code: 0 };
        assert!(fatal.is_resolution_failure());

        let per_attempt = Error::NativeCall {
            call: NacCall::Sign,
            code: -1,
        };
        assert!(!per_attempt.is_resolution_failure());
    }

    #[test]
    fn test_nac_call_display() {
        assert_eq!(NacCall::Init.to_string(), "NACInit");
        assert_eq!(NacCall::KeyEstablishment.to_string(), "NACKeyEstablishment");
        assert_eq!(NacCall::Sign.to_string(), "NACSign");
    }
}
