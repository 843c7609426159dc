use std::collections::HashMap;

use libxml::{
    parser::Parser as XmlParser,
    tree::{Document, Node},
    xpath::Context,
};
use time::OffsetDateTime;

use crate::{
    signature::SignatureVerifier,
    utils::{decode_xml_base64, parse_instant},
    SamlError, NS_ASSERTION, NS_DSIG, NS_PROTOCOL,
};

/// Validity window carried on the signed assertion. The bounds keep
/// their wire form; the validation pipeline parses and compares them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Conditions {
    pub not_before: Option<String>,
    pub not_on_or_after: Option<String>,
}

/// A decoded IdP response with its identity-bearing fields extracted
/// once at parse time. Owned by the validation call that produced it.
///
/// Every lookup that asserts identity is scoped beneath the element the
/// [`SignatureVerifier`] reports as signed, so content smuggled next to
/// a validly signed sibling never surfaces here.
pub struct AuthnResponse {
    raw: String,
    document: Document,
    issuer: Option<String>,
    name_id: Option<String>,
    attributes: HashMap<String, String>,
    conditions: Option<Conditions>,
    session_expires_at: Option<OffsetDateTime>,
}

impl AuthnResponse {
    /// Decodes and parses a base64 response payload.
    ///
    /// Fails with [`SamlError::MalformedResponse`] when the input is
    /// blank or not base64, and [`SamlError::InvalidXml`] when the
    /// decoded bytes are not a well-formed document. A signature whose
    /// coverage cannot be determined is not an error here; it simply
    /// leaves no trusted content to extract.
    pub fn parse(raw: &str, verifier: &dyn SignatureVerifier) -> Result<Self, SamlError> {
        if raw.trim().is_empty() {
            return Err(SamlError::MalformedResponse);
        }
        let xml = decode_xml_base64(raw).map_err(|_| SamlError::MalformedResponse)?;
        let document = XmlParser::default()
            .parse_string(&xml)
            .map_err(SamlError::InvalidXml)?;

        let signed_element_id = match verifier.signed_element_id(&document) {
            Ok(id) => Some(id),
            Err(error) => {
                tracing::debug!(%error, "could not determine signed element");
                None
            }
        };

        let mut context = xpath_context(&document);
        let issuer = first_node_text(&mut context, "/samlp:Response/saml:Issuer");
        let name_id = signed_element_id
            .as_deref()
            .and_then(|id| extract_name_id(&mut context, id));
        let conditions = signed_element_id
            .as_deref()
            .and_then(|id| extract_conditions(&mut context, id));
        let attributes = extract_attributes(&mut context);
        let session_expires_at = extract_session_expiry(&mut context);

        Ok(Self {
            raw: raw.to_owned(),
            document,
            issuer,
            name_id,
            attributes,
            conditions,
            session_expires_at,
        })
    }

    /// The raw payload as delivered, for diagnostics.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    /// The response-level issuer, for operator logs.
    pub fn issuer(&self) -> Option<&str> {
        self.issuer.as_deref()
    }

    /// The asserted identity, trimmed. `None` when the response asserts
    /// no identity within the signed element.
    pub fn name_id(&self) -> Option<&str> {
        self.name_id.as_deref()
    }

    /// Attribute map from the first `AttributeStatement`. One value per
    /// attribute name; an absent statement yields an empty map.
    pub fn attributes(&self) -> &HashMap<String, String> {
        &self.attributes
    }

    pub fn conditions(&self) -> Option<&Conditions> {
        self.conditions.as_ref()
    }

    /// `SessionNotOnOrAfter` from the authentication statement, when
    /// present and parseable.
    pub fn session_expires_at(&self) -> Option<OffsetDateTime> {
        self.session_expires_at
    }
}

pub(crate) fn xpath_context(document: &Document) -> Context {
    let mut context = Context::new(document).expect("Failed to create XPath context");
    context
        .register_namespace("samlp", NS_PROTOCOL)
        .expect("Failed to register namespace");
    context
        .register_namespace("saml", NS_ASSERTION)
        .expect("Failed to register namespace");
    context
        .register_namespace("ds", NS_DSIG)
        .expect("Failed to register namespace");
    context
}

fn first_node(context: &mut Context, xpath: &str) -> Option<Node> {
    context
        .evaluate(xpath)
        .ok()?
        .get_nodes_as_vec()
        .into_iter()
        .next()
}

fn first_node_text(context: &mut Context, xpath: &str) -> Option<String> {
    let node = first_node(context, xpath)?;
    let content = node.get_content();
    let trimmed = content.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_owned())
    }
}

fn extract_name_id(context: &mut Context, signed_element_id: &str) -> Option<String> {
    let assertion_signed = format!(
        "/samlp:Response/saml:Assertion[@ID={signed_element_id:?}]/saml:Subject/saml:NameID"
    );
    let response_signed = format!(
        "/samlp:Response[@ID={signed_element_id:?}]/saml:Assertion/saml:Subject/saml:NameID"
    );
    first_node_text(context, &assertion_signed)
        .or_else(|| first_node_text(context, &response_signed))
}

fn extract_conditions(context: &mut Context, signed_element_id: &str) -> Option<Conditions> {
    let xpath =
        format!("/samlp:Response/saml:Assertion[@ID={signed_element_id:?}]/saml:Conditions");
    let node = first_node(context, &xpath)?;
    Some(Conditions {
        not_before: node.get_attribute("NotBefore"),
        not_on_or_after: node.get_attribute("NotOnOrAfter"),
    })
}

fn extract_attributes(context: &mut Context) -> HashMap<String, String> {
    let statement = match first_node(
        context,
        "/samlp:Response/saml:Assertion/saml:AttributeStatement",
    ) {
        Some(statement) => statement,
        None => return HashMap::new(),
    };

    let mut attributes = HashMap::new();
    for attribute in statement.get_child_elements() {
        let name = match attribute.get_attribute("Name") {
            Some(name) => name,
            None => {
                tracing::warn!("skipping attribute without a Name");
                continue;
            }
        };
        match attribute.get_child_elements().into_iter().next() {
            Some(value) => {
                attributes.insert(name, value.get_content().trim().to_owned());
            }
            None => tracing::warn!(attribute = %name, "skipping attribute without a value"),
        }
    }
    attributes
}

fn extract_session_expiry(context: &mut Context) -> Option<OffsetDateTime> {
    let statement = first_node(context, "/samlp:Response/saml:Assertion/saml:AuthnStatement")?;
    let value = statement.get_attribute("SessionNotOnOrAfter")?;
    match parse_instant(&value) {
        Ok(instant) => Some(instant),
        Err(error) => {
            tracing::warn!(%error, "ignoring unparseable SessionNotOnOrAfter");
            None
        }
    }
}
