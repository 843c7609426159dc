use base64::{prelude::BASE64_STANDARD, Engine};
use deflate::deflate_bytes;
use time::OffsetDateTime;
use yaserde::YaSerialize;

use crate::{settings::TenantSettings, utils::random_string, DATE_TIME_FORMAT};

const HTTP_POST_BINDING: &str = "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST";

#[derive(YaSerialize)]
#[yaserde(
  namespaces = {
    "samlp" = "urn:oasis:names:tc:SAML:2.0:protocol",
    "saml" = "urn:oasis:names:tc:SAML:2.0:assertion",
  },
  prefix = "samlp"
)]
struct AuthnRequest {
    #[yaserde(attribute = true, rename = "ID")]
    id: String,
    #[yaserde(attribute = true, rename = "Version")]
    version: String,
    #[yaserde(attribute = true, rename = "IssueInstant")]
    issue_instant: String,
    #[yaserde(attribute = true, rename = "ProtocolBinding")]
    protocol_binding: String,
    #[yaserde(attribute = true, rename = "AssertionConsumerServiceURL")]
    assertion_consumer_service_url: String,
    #[yaserde(rename = "Issuer", prefix = "saml")]
    issuer: Issuer,
    #[yaserde(rename = "NameIDPolicy", prefix = "samlp")]
    name_id_policy: NameIdPolicy,
    #[yaserde(rename = "RequestedAuthnContext", prefix = "samlp")]
    requested_authn_context: RequestedAuthnContext,
}

#[derive(YaSerialize)]
struct Issuer {
    #[yaserde(attribute = true, rename = "Format")]
    format: String,
    #[yaserde(text = true)]
    content: String,
}

#[derive(YaSerialize)]
struct NameIdPolicy {
    #[yaserde(attribute = true, rename = "Format")]
    format: String,
    #[yaserde(attribute = true, rename = "AllowCreate")]
    allow_create: bool,
}

#[derive(YaSerialize)]
struct RequestedAuthnContext {
    #[yaserde(attribute = true, rename = "Comparison")]
    comparison: String,
    #[yaserde(rename = "AuthnContextClassRef", prefix = "saml")]
    class_refs: Vec<AuthnContextClassRef>,
}

#[derive(YaSerialize)]
struct AuthnContextClassRef {
    #[yaserde(text = true)]
    content: String,
}

/// Builds the `AuthnRequest` redirect that initiates a login attempt.
///
/// The request is ephemeral: serialized straight into the redirect URL
/// and never persisted, so there is no `InResponseTo` correlation.
#[derive(Default)]
pub struct AuthnRequestBuilder {
    id: Option<String>,
    issue_instant: Option<OffsetDateTime>,
    issuer: Option<String>,
    destination: Option<String>,
    consumer_url: Option<String>,
    name_format: Option<String>,
    authn_contexts: Vec<String>,
}

impl AuthnRequestBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds every field from the tenant's trust configuration, with a
    /// fresh random request id and the current UTC time.
    pub fn for_tenant(settings: &TenantSettings) -> Self {
        Self {
            id: Some(format!("_{}", random_string(32))),
            issue_instant: Some(OffsetDateTime::now_utc()),
            issuer: Some(settings.issuer.clone()),
            destination: Some(settings.idp_sso_target_url.clone()),
            consumer_url: Some(settings.assertion_consumer_service_url.clone()),
            name_format: Some(settings.name_identifier_format.clone()),
            authn_contexts: settings
                .authentication_contexts()
                .map(str::to_owned)
                .collect(),
        }
    }

    pub fn id(self, id: &str) -> Self {
        AuthnRequestBuilder {
            id: Some(id.into()),
            ..self
        }
    }

    pub fn issue_instant(self, instant: OffsetDateTime) -> Self {
        AuthnRequestBuilder {
            issue_instant: Some(instant),
            ..self
        }
    }

    pub fn issuer(self, issuer: &str) -> Self {
        AuthnRequestBuilder {
            issuer: Some(issuer.into()),
            ..self
        }
    }

    /// The IdP single-sign-on endpoint the redirect targets.
    pub fn destination(self, destination: &str) -> Self {
        AuthnRequestBuilder {
            destination: Some(destination.into()),
            ..self
        }
    }

    pub fn consumer_url(self, url: &str) -> Self {
        AuthnRequestBuilder {
            consumer_url: Some(url.into()),
            ..self
        }
    }

    pub fn name_format(self, format: &str) -> Self {
        AuthnRequestBuilder {
            name_format: Some(format.into()),
            ..self
        }
    }

    pub fn authn_context(mut self, context: &str) -> Self {
        self.authn_contexts.push(context.into());
        self
    }

    /// Renders the request document. The assertion consumer binding is
    /// pinned to HTTP-POST; context classes appear in insertion order
    /// under a `Comparison="exact"` requested context.
    pub fn build(self) -> String {
        let request = AuthnRequest {
            id: self.id.expect("ID is required"),
            version: "2.0".to_string(),
            issue_instant: self
                .issue_instant
                .expect("IssueInstant is required")
                .format(&DATE_TIME_FORMAT)
                .expect("Infallible formatting"),
            protocol_binding: HTTP_POST_BINDING.to_string(),
            assertion_consumer_service_url: self.consumer_url.expect("Consumer URL is required"),
            issuer: Issuer {
                format: "urn:oasis:names:tc:SAML:2.0:nameid-format:entity".to_string(),
                content: self.issuer.expect("Issuer is required"),
            },
            name_id_policy: NameIdPolicy {
                format: self.name_format.expect("Name format is required"),
                allow_create: true,
            },
            requested_authn_context: RequestedAuthnContext {
                comparison: "exact".to_string(),
                class_refs: self
                    .authn_contexts
                    .into_iter()
                    .map(|content| AuthnContextClassRef { content })
                    .collect(),
            },
        };
        yaserde::ser::to_string(&request).expect("Infallible serialization")
    }

    /// Composes the full redirect URL: the XML is raw-deflated (no zlib
    /// header or trailer), base64- and percent-encoded, appended as
    /// `SAMLRequest=` to the destination, followed by any extra pairs in
    /// order. No I/O happens here; the caller performs the redirect.
    pub fn redirect_url(self, extra_params: &[(&str, &str)]) -> String {
        let destination = self.destination.clone().expect("Destination is required");
        let xml = self.build();
        let compressed = deflate_bytes(xml.as_bytes());
        let encoded = BASE64_STANDARD.encode(compressed);

        let separator = if destination.contains('?') { '&' } else { '?' };
        let mut url = format!(
            "{destination}{separator}SAMLRequest={}",
            urlencoding::encode(&encoded)
        );
        for (key, value) in extra_params {
            url.push_str(&format!(
                "&{}={}",
                urlencoding::encode(key),
                urlencoding::encode(value)
            ));
        }
        url
    }
}
