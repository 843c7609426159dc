use base64::{prelude::BASE64_STANDARD, Engine};
use rand::distributions::{Alphanumeric, DistString};
use time::{format_description::well_known::Iso8601, OffsetDateTime};

use crate::SamlError;

pub fn random_string(len: usize) -> String {
    Alphanumeric.sample_string(&mut rand::thread_rng(), len)
}

pub fn decode_xml_base64(input: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let stripped = input.replace([' ', '\n', '\r', '\t'], "");
    BASE64_STANDARD.decode(stripped)
}

/// Extracts the DER payload from a PEM-armored certificate.
pub fn decode_pem_certificate(pem: &str) -> Result<Vec<u8>, SamlError> {
    let body: String = pem
        .lines()
        .filter(|line| !line.starts_with("-----"))
        .collect();
    decode_xml_base64(&body).map_err(|_| SamlError::InvalidCertificate)
}

/// Parses an xs:dateTime protocol timestamp.
pub fn parse_instant(value: &str) -> Result<OffsetDateTime, SamlError> {
    OffsetDateTime::parse(value.trim(), &Iso8601::DEFAULT)
        .map_err(|_| SamlError::InvalidTimestamp(value.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_string_is_underscore_safe() {
        let id = random_string(32);
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn decodes_base64_with_embedded_whitespace() {
        let decoded = decode_xml_base64("aGVs\nbG8g\r\n d29y bGQ=").unwrap();
        assert_eq!(decoded, b"hello world");
    }

    #[test]
    fn decodes_pem_armor() {
        let pem = "-----BEGIN CERTIFICATE-----\naGVsbG8=\n-----END CERTIFICATE-----\n";
        assert_eq!(decode_pem_certificate(pem).unwrap(), b"hello");
    }

    #[test]
    fn rejects_garbage_pem() {
        assert!(matches!(
            decode_pem_certificate("-----BEGIN CERTIFICATE-----\n!!!\n-----END CERTIFICATE-----"),
            Err(SamlError::InvalidCertificate)
        ));
    }

    #[test]
    fn parses_second_and_subsecond_instants() {
        let plain = parse_instant("2026-03-01T10:00:00Z").unwrap();
        let fractional = parse_instant("2026-03-01T10:00:00.814Z").unwrap();
        assert!(fractional > plain);
    }

    #[test]
    fn rejects_unparseable_instant() {
        assert!(matches!(
            parse_instant("not-a-timestamp"),
            Err(SamlError::InvalidTimestamp(_))
        ));
    }
}
