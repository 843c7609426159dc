use std::collections::HashMap;

use time::OffsetDateTime;

use crate::{
    response::AuthnResponse,
    settings::TenantSettings,
    signature::SignatureVerifier,
    utils::parse_instant,
    ProtocolError, SamlError,
};

/// The identity a validated response asserts, handed to the caller.
#[derive(Debug, Clone)]
pub struct Identity {
    pub name_id: String,
    pub attributes: HashMap<String, String>,
    pub session_expires_at: Option<OffsetDateTime>,
}

/// Sequences the structural, temporal, and cryptographic checks over a
/// parsed response into a single verdict.
///
/// The check sequence itself returns a tagged failure; [`is_valid`]
/// degrades it to `false` (soft mode) and [`validate`] wraps it with the
/// raw payload (strict mode).
///
/// [`is_valid`]: Validator::is_valid
/// [`validate`]: Validator::validate
pub struct Validator<'a> {
    settings: &'a TenantSettings,
    verifier: &'a dyn SignatureVerifier,
}

impl<'a> Validator<'a> {
    pub fn new(settings: &'a TenantSettings, verifier: &'a dyn SignatureVerifier) -> Self {
        Self { settings, verifier }
    }

    /// Soft verdict: every failure degrades to `false`, never an error.
    pub fn is_valid(&self, response: &AuthnResponse) -> bool {
        match self.check_at(response, OffsetDateTime::now_utc()) {
            Ok(()) => true,
            Err(error) => {
                tracing::error!(%error, issuer = response.issuer(), "rejecting SAML response");
                false
            }
        }
    }

    /// Strict verdict: the first failure is surfaced with the raw
    /// payload attached for diagnostics.
    pub fn validate(&self, response: &AuthnResponse) -> Result<(), ProtocolError> {
        self.check_at(response, OffsetDateTime::now_utc())
            .map_err(|reason| ProtocolError::new(reason, response.raw()))
    }

    /// Runs the check sequence against an explicit clock, stopping at
    /// the first failure.
    pub fn check_at(
        &self,
        response: &AuthnResponse,
        now: OffsetDateTime,
    ) -> Result<(), SamlError> {
        self.check_response_state(response)?;
        self.check_conditions(response, now)?;
        self.check_signature(response)
    }

    fn check_response_state(&self, response: &AuthnResponse) -> Result<(), SamlError> {
        if response.raw().trim().is_empty() {
            tracing::error!("blank response payload");
            return Err(SamlError::MalformedResponse);
        }
        if !self.settings.has_trust_material() {
            tracing::error!("no fingerprint or certificate on settings");
            return Err(SamlError::MissingTrustMaterial);
        }
        Ok(())
    }

    /// NotBefore is inclusive, NotOnOrAfter exclusive. Skipped entirely
    /// when the tenant opts out or the assertion carries no window.
    fn check_conditions(
        &self,
        response: &AuthnResponse,
        now: OffsetDateTime,
    ) -> Result<(), SamlError> {
        if self.settings.skip_conditions {
            return Ok(());
        }
        let conditions = match response.conditions() {
            Some(conditions) => conditions,
            None => return Ok(()),
        };

        if let Some(value) = &conditions.not_before {
            let not_before = parse_instant(value)?;
            if now < not_before {
                tracing::error!(%not_before, "current time is earlier than the NotBefore condition");
                return Err(SamlError::NotYetValid);
            }
        }

        if let Some(value) = &conditions.not_on_or_after {
            let not_on_or_after = parse_instant(value)?;
            if now >= not_on_or_after {
                tracing::error!(
                    %not_on_or_after,
                    "current time is on or after the NotOnOrAfter condition"
                );
                return Err(SamlError::Expired);
            }
        }

        Ok(())
    }

    fn check_signature(&self, response: &AuthnResponse) -> Result<(), SamlError> {
        let fingerprint = self.settings.trust_fingerprint()?;
        self.verifier.verify(response.document(), &fingerprint)
    }
}

/// Full callback handling: parse, strictly validate, and require an
/// asserted identity. Every failure carries the raw payload.
pub fn authenticate(
    raw_response: &str,
    settings: &TenantSettings,
    verifier: &dyn SignatureVerifier,
) -> Result<Identity, ProtocolError> {
    let response = AuthnResponse::parse(raw_response, verifier)
        .map_err(|reason| ProtocolError::new(reason, raw_response))?;

    Validator::new(settings, verifier).validate(&response)?;

    let name_id = match response.name_id() {
        Some(name_id) => name_id.to_owned(),
        None => {
            tracing::error!(issuer = response.issuer(), "response asserted no NameID");
            return Err(ProtocolError::new(SamlError::NoIdentity, raw_response));
        }
    };

    Ok(Identity {
        name_id,
        attributes: response.attributes().clone(),
        session_expires_at: response.session_expires_at(),
    })
}

#[cfg(test)]
mod tests {
    use base64::{prelude::BASE64_STANDARD, Engine};

    use crate::signature::testing::StaticVerifier;
    use crate::NAME_ID_FORMAT_EMAIL_ADDRESS;

    use super::*;

    const FINGERPRINT: &str = "E3:83:DC:B9:A1:DA:3C:C5:E5:18:8D:1A:16:7B:0B:B1:53:F7:8C:F2";
    const SIGNATURE_VALUE: &str = "c2lnbmF0dXJlLWJ5dGVz";

    fn signed_response_xml() -> String {
        format!(
            r#"<samlp:Response xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol"
                xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion"
                xmlns:ds="http://www.w3.org/2000/09/xmldsig#" ID="_resp">
  <saml:Issuer>https://idp.example.com</saml:Issuer>
  <saml:Assertion ID="_a1">
    <ds:Signature>
      <ds:SignatureValue>{SIGNATURE_VALUE}</ds:SignatureValue>
    </ds:Signature>
    <saml:Subject>
      <saml:NameID>user@example.com</saml:NameID>
    </saml:Subject>
    <saml:Conditions NotBefore="2026-03-01T10:00:00Z" NotOnOrAfter="2026-03-01T10:05:00Z"/>
    <saml:AttributeStatement>
      <saml:Attribute Name="email">
        <saml:AttributeValue>user@example.com</saml:AttributeValue>
      </saml:Attribute>
    </saml:AttributeStatement>
  </saml:Assertion>
</samlp:Response>"#
        )
    }

    fn settings() -> TenantSettings {
        TenantSettings {
            issuer: "https://sp.example.com".to_owned(),
            assertion_consumer_service_url: "https://sp.example.com/auth/saml/callback".to_owned(),
            idp_sso_target_url: "https://idp.example.com/sso".to_owned(),
            idp_cert: None,
            idp_cert_fingerprint: Some(FINGERPRINT.to_owned()),
            name_identifier_format: NAME_ID_FORMAT_EMAIL_ADDRESS.to_owned(),
            authentication_context: String::new(),
            skip_conditions: false,
        }
    }

    fn verifier() -> StaticVerifier {
        StaticVerifier {
            signed_id: Some("_a1".to_owned()),
            fingerprint: Some(FINGERPRINT.to_owned()),
            signature_value: Some(SIGNATURE_VALUE.to_owned()),
        }
    }

    fn parsed(xml: &str, verifier: &StaticVerifier) -> AuthnResponse {
        AuthnResponse::parse(&BASE64_STANDARD.encode(xml), verifier).unwrap()
    }

    fn at(timestamp: &str) -> OffsetDateTime {
        parse_instant(timestamp).unwrap()
    }

    #[test]
    fn accepts_a_valid_response_inside_the_window() {
        let settings = settings();
        let verifier = verifier();
        let response = parsed(&signed_response_xml(), &verifier);
        let validator = Validator::new(&settings, &verifier);

        assert!(validator
            .check_at(&response, at("2026-03-01T10:02:30Z"))
            .is_ok());
    }

    #[test]
    fn condition_bounds_are_inclusive_then_exclusive() {
        let settings = settings();
        let verifier = verifier();
        let response = parsed(&signed_response_xml(), &verifier);
        let validator = Validator::new(&settings, &verifier);

        // Before the window opens.
        assert!(matches!(
            validator.check_at(&response, at("2026-03-01T09:59:59Z")),
            Err(SamlError::NotYetValid)
        ));
        // Exactly NotBefore is valid.
        assert!(validator
            .check_at(&response, at("2026-03-01T10:00:00Z"))
            .is_ok());
        // One second before NotOnOrAfter is valid.
        assert!(validator
            .check_at(&response, at("2026-03-01T10:04:59Z"))
            .is_ok());
        // Exactly NotOnOrAfter is expired.
        assert!(matches!(
            validator.check_at(&response, at("2026-03-01T10:05:00Z")),
            Err(SamlError::Expired)
        ));
    }

    #[test]
    fn skip_conditions_ignores_an_expired_window() {
        let mut settings = settings();
        settings.skip_conditions = true;
        let verifier = verifier();
        let response = parsed(&signed_response_xml(), &verifier);
        let validator = Validator::new(&settings, &verifier);

        assert!(validator
            .check_at(&response, at("2027-01-01T00:00:00Z"))
            .is_ok());
    }

    #[test]
    fn missing_conditions_are_no_constraint() {
        let xml = r#"<samlp:Response xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol"
            xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" ID="_resp">
            <saml:Assertion ID="_a1">
              <saml:Subject><saml:NameID>user@example.com</saml:NameID></saml:Subject>
            </saml:Assertion>
          </samlp:Response>"#;
        let settings = settings();
        let verifier = StaticVerifier {
            signed_id: Some("_a1".to_owned()),
            fingerprint: Some(FINGERPRINT.to_owned()),
            signature_value: None,
        };
        let response = parsed(xml, &verifier);
        let validator = Validator::new(&settings, &verifier);

        assert!(validator
            .check_at(&response, at("2027-01-01T00:00:00Z"))
            .is_ok());
    }

    #[test]
    fn unparseable_condition_bound_is_a_validation_failure() {
        let xml = r#"<samlp:Response xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol"
            xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" ID="_resp">
            <saml:Assertion ID="_a1">
              <saml:Subject><saml:NameID>user@example.com</saml:NameID></saml:Subject>
              <saml:Conditions NotBefore="whenever"/>
            </saml:Assertion>
          </samlp:Response>"#;
        let settings = settings();
        let verifier = StaticVerifier::covering("_a1");
        let response = parsed(xml, &verifier);
        let validator = Validator::new(&settings, &verifier);

        assert!(matches!(
            validator.check_at(&response, at("2026-03-01T10:00:00Z")),
            Err(SamlError::InvalidTimestamp(_))
        ));
    }

    #[test]
    fn missing_trust_material_fails_before_signature() {
        let mut settings = settings();
        settings.idp_cert_fingerprint = None;
        let verifier = verifier();
        let response = parsed(&signed_response_xml(), &verifier);
        let validator = Validator::new(&settings, &verifier);

        assert!(matches!(
            validator.check_at(&response, at("2026-03-01T10:02:30Z")),
            Err(SamlError::MissingTrustMaterial)
        ));
        assert!(!validator.is_valid(&response));
    }

    #[test]
    fn tampered_signature_fails_strict_and_soft() {
        let mut settings = settings();
        // Dodge the fixture's validity window so the strict and soft
        // adapters, which run on the real clock, reach the signature stage.
        settings.skip_conditions = true;
        let verifier = verifier();
        // Flip one character of the SignatureValue in the document.
        let tampered = signed_response_xml().replace(SIGNATURE_VALUE, "c2lnbmF0dXJlLWJ5dGVa");
        let response = parsed(&tampered, &verifier);
        let validator = Validator::new(&settings, &verifier);

        assert!(matches!(
            validator.check_at(&response, at("2026-03-01T10:02:30Z")),
            Err(SamlError::InvalidSignature)
        ));
        assert!(!validator.is_valid(&response));
        let error = validator.validate(&response).unwrap_err();
        assert!(matches!(error.reason, SamlError::InvalidSignature));
        assert_eq!(error.raw_response, response.raw());
    }

    #[test]
    fn wrong_tenant_fingerprint_is_rejected() {
        let mut settings = settings();
        settings.idp_cert_fingerprint = Some("AA:BB:CC".to_owned());
        let verifier = verifier();
        let response = parsed(&signed_response_xml(), &verifier);
        let validator = Validator::new(&settings, &verifier);

        assert!(matches!(
            validator.check_at(&response, at("2026-03-01T10:02:30Z")),
            Err(SamlError::InvalidSignature)
        ));
    }

    #[test]
    fn authenticate_hands_back_the_identity() {
        let mut settings = settings();
        // The fixture window is long past by the time tests run with a
        // real clock; conditions are exercised separately above.
        settings.skip_conditions = true;
        let verifier = verifier();
        let raw = BASE64_STANDARD.encode(signed_response_xml());

        let identity = authenticate(&raw, &settings, &verifier).unwrap();
        assert_eq!(identity.name_id, "user@example.com");
        assert_eq!(
            identity.attributes.get("email").map(String::as_str),
            Some("user@example.com")
        );
    }

    #[test]
    fn authenticate_rejects_blank_payload_with_malformed_reason() {
        let settings = settings();
        let verifier = verifier();

        let error = authenticate("", &settings, &verifier).unwrap_err();
        assert!(matches!(error.reason, SamlError::MalformedResponse));
        assert_eq!(error.raw_response, "");
    }

    #[test]
    fn authenticate_rejects_wrapped_name_id() {
        let mut settings = settings();
        settings.skip_conditions = true;
        // The signature covers some element other than the assertion the
        // NameID sits in, so no identity may be asserted even though the
        // signature itself verifies.
        let verifier = StaticVerifier {
            signed_id: Some("_wrapped".to_owned()),
            fingerprint: Some(FINGERPRINT.to_owned()),
            signature_value: Some(SIGNATURE_VALUE.to_owned()),
        };
        let raw = BASE64_STANDARD.encode(signed_response_xml());

        let error = authenticate(&raw, &settings, &verifier).unwrap_err();
        assert!(matches!(error.reason, SamlError::NoIdentity));
    }
}
