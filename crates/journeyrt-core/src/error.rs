//! Fixed error-code taxonomy exposed to embedding applications.
//!
//! Every failure surfaced across the public boundary carries one of the
//! codes below. Internal errors are mapped onto the taxonomy at the edge;
//! the codes themselves are stable wire labels and never change meaning.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Stable error codes surfaced to callers and to the hosted page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Authorization token expired or was rejected (HTTP 401/403).
    AuthExpired,
    /// Certificate pinning rejected the peer.
    PinningFail,
    /// Page origin is not on the manifest allow-list.
    OriginBlocked,
    /// Network timeout (HTTP 408 or transport deadline).
    NetTimeout,
    /// Rate limited by the server (HTTP 429).
    RateLimited,
    /// Request or configuration failed validation (HTTP 400/422).
    ValidationFail,
    /// Idempotent replay detected (HTTP 409 with an idempotency key).
    IdempotentReplay,
    /// Strong customer authentication required before continuing.
    ScaRequired,
    /// The operation is held pending a compliance review.
    ComplianceHold,
    /// The server requires additional information.
    MoreInfo,
    /// Anything not covered by a more specific code.
    Unknown,
}

impl ErrorCode {
    /// Returns the stable wire label for this code.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AuthExpired => "AUTH_EXPIRED",
            Self::PinningFail => "PINNING_FAIL",
            Self::OriginBlocked => "ORIGIN_BLOCKED",
            Self::NetTimeout => "NET_TIMEOUT",
            Self::RateLimited => "RATE_LIMITED",
            Self::ValidationFail => "VALIDATION_FAIL",
            Self::IdempotentReplay => "IDEMPOTENT_REPLAY",
            Self::ScaRequired => "SCA_REQUIRED",
            Self::ComplianceHold => "COMPLIANCE_HOLD",
            Self::MoreInfo => "MORE_INFO",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Whether a journey hitting this code may be retried by the caller.
    ///
    /// Only transient transport conditions are recoverable; everything
    /// else requires caller intervention.
    #[must_use]
    pub const fn is_recoverable(self) -> bool {
        matches!(self, Self::NetTimeout | Self::RateLimited)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorCode {
    type Err = UnknownErrorCode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AUTH_EXPIRED" => Ok(Self::AuthExpired),
            "PINNING_FAIL" => Ok(Self::PinningFail),
            "ORIGIN_BLOCKED" => Ok(Self::OriginBlocked),
            "NET_TIMEOUT" => Ok(Self::NetTimeout),
            "RATE_LIMITED" => Ok(Self::RateLimited),
            "VALIDATION_FAIL" => Ok(Self::ValidationFail),
            "IDEMPOTENT_REPLAY" => Ok(Self::IdempotentReplay),
            "SCA_REQUIRED" => Ok(Self::ScaRequired),
            "COMPLIANCE_HOLD" => Ok(Self::ComplianceHold),
            "MORE_INFO" => Ok(Self::MoreInfo),
            "UNKNOWN" => Ok(Self::Unknown),
            _ => Err(UnknownErrorCode {
                label: s.to_string(),
            }),
        }
    }
}

/// Error returned when parsing an unrecognized error-code label.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown error code label: {label}")]
pub struct UnknownErrorCode {
    /// The label that failed to parse.
    pub label: String,
}
