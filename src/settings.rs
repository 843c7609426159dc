use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

use crate::{utils::decode_pem_certificate, SamlError};

/// Per-tenant trust configuration, supplied by the host's configuration
/// store. Immutable for the lifetime of a login attempt.
///
/// At least one of `idp_cert` / `idp_cert_fingerprint` must be present
/// or responses can never be validated; the pipeline rejects such
/// configurations with [`SamlError::MissingTrustMaterial`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantSettings {
    /// SP entity identifier sent as the request issuer.
    pub issuer: String,
    /// Where the IdP should post the response.
    pub assertion_consumer_service_url: String,
    /// The IdP's single-sign-on endpoint the browser is redirected to.
    pub idp_sso_target_url: String,
    /// PEM-armored IdP signing certificate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idp_cert: Option<String>,
    /// Precomputed certificate fingerprint, used when no full
    /// certificate is configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idp_cert_fingerprint: Option<String>,
    pub name_identifier_format: String,
    /// Requested authentication context class URIs, comma-delimited.
    #[serde(default)]
    pub authentication_context: String,
    /// Disables the NotBefore/NotOnOrAfter window check.
    #[serde(default)]
    pub skip_conditions: bool,
}

impl TenantSettings {
    /// The configured authentication contexts in configuration order.
    pub fn authentication_contexts(&self) -> impl Iterator<Item = &str> {
        self.authentication_context
            .split(',')
            .map(str::trim)
            .filter(|context| !context.is_empty())
    }

    pub fn has_trust_material(&self) -> bool {
        self.idp_cert.is_some() || self.idp_cert_fingerprint.is_some()
    }

    /// The fingerprint the signer must match: SHA-1 over the configured
    /// certificate's DER as upper-case colon-separated hex pairs, or the
    /// preconfigured fingerprint string verbatim.
    pub fn trust_fingerprint(&self) -> Result<String, SamlError> {
        if let Some(pem) = &self.idp_cert {
            let der = decode_pem_certificate(pem)?;
            Ok(fingerprint(&der))
        } else if let Some(configured) = &self.idp_cert_fingerprint {
            Ok(configured.clone())
        } else {
            Err(SamlError::MissingTrustMaterial)
        }
    }
}

fn fingerprint(der: &[u8]) -> String {
    let digest = Sha1::digest(der);
    let mut rendered = String::with_capacity(digest.len() * 3);
    for (i, byte) in digest.iter().enumerate() {
        if i > 0 {
            rendered.push(':');
        }
        rendered.push_str(&hex::encode_upper([*byte]));
    }
    rendered
}
