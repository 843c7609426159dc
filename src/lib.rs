//! Service-provider half of the SAML 2.0 Web Browser SSO profile:
//! builds the outbound `AuthnRequest` redirect URL and validates the
//! inbound response (decode, time-bound conditions, signature) against a
//! per-tenant trust configuration.
//!
//! The XML-DSig primitive itself is not implemented here; callers supply
//! it through the [`SignatureVerifier`] trait.

use libxml::parser::XmlParseError;
use thiserror::Error;
use time::format_description::well_known::iso8601::{self, TimePrecision};

mod authn_request;
mod response;
mod settings;
mod signature;
mod utils;
mod validate;

pub use authn_request::AuthnRequestBuilder;
pub use response::{AuthnResponse, Conditions};
pub use settings::TenantSettings;
pub use signature::SignatureVerifier;
pub use validate::{authenticate, Identity, Validator};

pub const NAME_ID_FORMAT_EMAIL_ADDRESS: &str =
    "urn:oasis:names:tc:SAML:1.1:nameid-format:emailAddress";

pub const NS_ASSERTION: &str = "urn:oasis:names:tc:SAML:2.0:assertion";
pub const NS_PROTOCOL: &str = "urn:oasis:names:tc:SAML:2.0:protocol";
pub const NS_DSIG: &str = "http://www.w3.org/2000/09/xmldsig#";

// xs:dateTime isn't actually ISO8601, because implementors often don't support higher precisions.
pub const DATE_TIME_FORMAT: iso8601::Iso8601<
    {
        iso8601::Config::DEFAULT
            .set_time_precision(TimePrecision::Second {
                decimal_digits: None,
            })
            .encode()
    },
> = iso8601::Iso8601;

/// Reasons a response fails to parse or validate.
#[derive(Debug, Error)]
pub enum SamlError {
    /// The payload was blank or did not base64-decode.
    #[error("blank or undecodable response payload")]
    MalformedResponse,
    /// The decoded payload was not well-formed XML.
    #[error("response payload is not well-formed XML")]
    InvalidXml(XmlParseError),
    /// Neither a certificate nor a fingerprint is configured for the tenant.
    #[error("no fingerprint or certificate on settings")]
    MissingTrustMaterial,
    /// The configured IdP certificate could not be decoded.
    #[error("IdP certificate could not be decoded")]
    InvalidCertificate,
    /// No NameID was asserted for the subject.
    #[error("no identity asserted")]
    NoIdentity,
    /// The assertion's validity window has not opened yet.
    #[error("current time is earlier than the NotBefore condition")]
    NotYetValid,
    /// The assertion's validity window has closed.
    #[error("current time is on or after the NotOnOrAfter condition")]
    Expired,
    /// A protocol timestamp did not parse as xs:dateTime.
    #[error("unparseable timestamp: {0}")]
    InvalidTimestamp(String),
    /// Signature verification failed or covered the wrong element.
    #[error("signature verification failed")]
    InvalidSignature,
    /// The document shape prevented a required lookup.
    #[error("unexpected response shape: {0}")]
    SchemaViolation(String),
}

/// Validation failure surfaced by the strict calling convention.
///
/// Carries the raw (still base64-encoded) payload for operator
/// diagnostics. Callers should log it and hand the browser a uniform
/// "authentication failed" outcome rather than the reason.
#[derive(Debug, Error)]
#[error("{reason}")]
pub struct ProtocolError {
    pub reason: SamlError,
    pub raw_response: String,
}

impl ProtocolError {
    pub fn new(reason: SamlError, raw_response: impl Into<String>) -> Self {
        Self {
            reason,
            raw_response: raw_response.into(),
        }
    }
}
