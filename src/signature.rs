use libxml::tree::Document;

use crate::SamlError;

/// Contract for the XML-DSig collaborator that checks enveloped
/// signatures on response documents.
///
/// Implementations must canonicalize the signed subtree, recompute its
/// digest, and verify the signature against the certificate whose
/// fingerprint matches `trusted_fingerprint`. They must also reject
/// documents where the signature does not cover the element identity
/// and attributes are read from, so unsigned content smuggled alongside
/// a validly signed sibling is never trusted (signature wrapping).
pub trait SignatureVerifier {
    /// The XML `ID` of the element the embedded signature actually
    /// covers: the `Assertion` or, for response-level signatures, the
    /// `Response` itself. The parser scopes every identity lookup
    /// beneath this element.
    fn signed_element_id(&self, document: &Document) -> Result<String, SamlError>;

    /// Verifies the enveloped signature against the trusted
    /// fingerprint. Returns [`SamlError::InvalidSignature`] on any
    /// mismatch; the soft/strict distinction is the pipeline's concern,
    /// not the verifier's.
    fn verify(&self, document: &Document, trusted_fingerprint: &str) -> Result<(), SamlError>;
}
