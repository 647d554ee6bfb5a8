//! Self-signed certificate issuance.
//!
//! The certificate is assembled by hand with the [`crate::der`] encoder so
//! that the `TBSCertificate` can be signed by a private key that never
//! leaves the HSM: only the [`Signer`] capability is required.

use openssl::{
    pkey::{PKey, Public},
    x509::X509,
};
use serde::{Deserialize, Serialize};
use time::{Date, Duration, Month, OffsetDateTime};
use tracing::debug;

use crate::{
    CryptoError, der,
    error::result::CryptoResult,
    keys::{DigestAlgorithm, KeyAlgorithm, Signer},
};

/// `sha512WithRSAEncryption` (1.2.840.113549.1.1.13)
const SHA512_WITH_RSA: [u8; 9] = [0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x01, 0x0D];
const OID_COUNTRY: [u8; 3] = [0x55, 0x04, 0x06];
const OID_STATE: [u8; 3] = [0x55, 0x04, 0x08];
const OID_LOCALITY: [u8; 3] = [0x55, 0x04, 0x07];
const OID_ORGANIZATION: [u8; 3] = [0x55, 0x04, 0x0A];
const OID_ORGANIZATIONAL_UNIT: [u8; 3] = [0x55, 0x04, 0x0B];
const OID_COMMON_NAME: [u8; 3] = [0x55, 0x04, 0x03];

/// X.509 v3 is encoded as 2
const X509_V3: u64 = 2;
/// Length in bytes of the key check value used as serial number
const KCV_LENGTH: usize = 8;

/// Distinguished name fields of a self-signed certificate
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CertificateData {
    pub common_name: String,
    pub organization_name: String,
    pub organization_unit: String,
    pub city: String,
    pub state: String,
    pub country: String,
}

impl CertificateData {
    /// Check that every name field is present and encodable
    pub fn validate(&self) -> CryptoResult<()> {
        for (field, value) in [
            ("commonName", &self.common_name),
            ("organizationName", &self.organization_name),
            ("organizationUnit", &self.organization_unit),
            ("city", &self.city),
            ("state", &self.state),
            ("country", &self.country),
        ] {
            if value.trim().is_empty() {
                return Err(CryptoError::InvalidCertificateData(format!(
                    "the field {field} is missing or empty"
                )));
            }
        }
        if !der::is_printable(&self.country) {
            return Err(CryptoError::InvalidCertificateData(format!(
                "the country '{}' is not a printable string",
                self.country
            )));
        }
        Ok(())
    }

    /// DER encoded `Name`, in the order C, ST, L, O, OU, CN
    fn encode_name(&self) -> CryptoResult<Vec<u8>> {
        let country = der::printable_string(&self.country)?;
        let rdns = [
            rdn(&OID_COUNTRY, &country),
            rdn(&OID_STATE, &der::directory_string(&self.state)),
            rdn(&OID_LOCALITY, &der::directory_string(&self.city)),
            rdn(
                &OID_ORGANIZATION,
                &der::directory_string(&self.organization_name),
            ),
            rdn(
                &OID_ORGANIZATIONAL_UNIT,
                &der::directory_string(&self.organization_unit),
            ),
            rdn(&OID_COMMON_NAME, &der::directory_string(&self.common_name)),
        ];
        let refs: Vec<&[u8]> = rdns.iter().map(Vec::as_slice).collect();
        Ok(der::sequence(&refs))
    }
}

fn rdn(oid_content: &[u8], value: &[u8]) -> Vec<u8> {
    der::set(&[&der::sequence(&[&der::oid_from_content(oid_content), value])])
}

/// Key check value of a public key: the first bytes of the SHA-256 digest of
/// its DER `SubjectPublicKeyInfo`
pub fn key_check_value(public_key_der: &[u8]) -> CryptoResult<Vec<u8>> {
    let digest = DigestAlgorithm::Sha256.digest(public_key_der)?;
    Ok(digest[..KCV_LENGTH].to_vec())
}

/// Validity window of a certificate issued at `now`:
/// starts one day before issuance and lasts one calendar year
pub fn validity_window(now: OffsetDateTime) -> CryptoResult<(OffsetDateTime, OffsetDateTime)> {
    let not_before = now.replace_nanosecond(0)? - Duration::days(1);
    let not_after = add_one_year(not_before)?;
    Ok((not_before, not_after))
}

fn add_one_year(at: OffsetDateTime) -> CryptoResult<OffsetDateTime> {
    let year = at.year() + 1;
    let date = match Date::from_calendar_date(year, at.month(), at.day()) {
        Ok(date) => date,
        // 29th of February on a non leap year
        Err(_) => Date::from_calendar_date(year, Month::February, 28)?,
    };
    Ok(at.replace_date(date))
}

/// Issue a self-signed X.509 v3 certificate for `public_key`, signed with
/// `sha512WithRSAEncryption` by `signer`.
///
/// The issuer and subject are both built from `data`; the serial number is
/// the key check value of the public key.
pub fn issue_self_signed(
    public_key: &PKey<Public>,
    signer: &dyn Signer,
    data: &CertificateData,
    now: OffsetDateTime,
) -> CryptoResult<X509> {
    data.validate()?;
    if signer.key_algorithm() != KeyAlgorithm::Rsa {
        return Err(CryptoError::Certificate(format!(
            "a {} key cannot sign a sha512WithRSAEncryption certificate",
            signer.key_algorithm()
        )));
    }

    let spki = public_key.public_key_to_der()?;
    let serial = key_check_value(&spki)?;
    let name = data.encode_name()?;
    let (not_before, not_after) = validity_window(now)?;

    let algorithm = der::sequence(&[&der::oid_from_content(&SHA512_WITH_RSA), &der::null()]);
    let validity = der::sequence(&[&der::x509_time(not_before), &der::x509_time(not_after)]);
    let tbs = der::sequence(&[
        &der::explicit(0, &der::small_integer(X509_V3)),
        &der::positive_integer(&serial),
        &algorithm,
        &name,
        &validity,
        &name,
        &spki,
    ]);

    let signature = signer
        .sign(DigestAlgorithm::Sha512, &tbs)
        .map_err(|e| CryptoError::Certificate(format!("failed signing the certificate: {e}")))?;
    let certificate = der::sequence(&[&tbs, &algorithm, &der::bit_string(&signature)]);

    debug!(
        "issued a self-signed certificate for CN={}, serial {}",
        data.common_name,
        hex::encode(&serial)
    );
    X509::from_der(&certificate).map_err(|e| {
        CryptoError::Certificate(format!("the encoded certificate cannot be parsed: {e}"))
    })
}

#[expect(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use time::macros::datetime;
    use x509_parser::prelude::{FromDer, X509Certificate, X509Version};

    use super::*;
    use crate::keys::SoftwareSigner;

    fn certificate_data() -> CertificateData {
        CertificateData {
            common_name: "signer.example.com".to_owned(),
            organization_name: "Example Corp".to_owned(),
            organization_unit: "Signing".to_owned(),
            city: "Paris".to_owned(),
            state: "Ile-de-France".to_owned(),
            country: "FR".to_owned(),
        }
    }

    #[test]
    fn test_certificate_data_json() {
        let data: CertificateData = serde_json::from_str(
            r#"{"commonName":"cn","organizationName":"o","organizationUnit":"ou",
                "city":"c","state":"s","country":"US"}"#,
        )
        .unwrap();
        data.validate().unwrap();
        assert_eq!(data.organization_unit, "ou");

        let mut incomplete = data;
        incomplete.city = String::new();
        assert!(matches!(
            incomplete.validate(),
            Err(CryptoError::InvalidCertificateData(_))
        ));
    }

    #[test]
    fn test_validity_window() {
        let (not_before, not_after) =
            validity_window(datetime!(2024-06-15 10:20:30.5 UTC)).unwrap();
        assert_eq!(not_before, datetime!(2024-06-14 10:20:30 UTC));
        assert_eq!(not_after, datetime!(2025-06-14 10:20:30 UTC));

        let (not_before, not_after) = validity_window(datetime!(2024-03-01 00:00 UTC)).unwrap();
        assert_eq!(not_before, datetime!(2024-02-29 00:00 UTC));
        assert_eq!(not_after, datetime!(2025-02-28 00:00 UTC));
    }

    #[test]
    fn test_issue_self_signed() {
        hsm_signer_logger::log_init(None);
        let signer = SoftwareSigner::generate_rsa(2048).unwrap();
        let public_key = signer.public_key().unwrap();
        let now = OffsetDateTime::now_utc();
        let data = certificate_data();

        let certificate = issue_self_signed(&public_key, &signer, &data, now).unwrap();

        // signature checks with openssl
        assert!(certificate.verify(&public_key).unwrap());

        let der_bytes = certificate.to_der().unwrap();
        let (rest, parsed) = X509Certificate::from_der(&der_bytes).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed.version(), X509Version::V3);
        assert_eq!(parsed.subject(), parsed.issuer());
        assert_eq!(
            parsed
                .subject()
                .iter_common_name()
                .next()
                .unwrap()
                .as_str()
                .unwrap(),
            "signer.example.com"
        );
        let kcv = key_check_value(&public_key.public_key_to_der().unwrap()).unwrap();
        assert_eq!(parsed.raw_serial(), &der::positive_integer(&kcv)[2..]);
        assert_eq!(
            parsed.signature_algorithm.algorithm.to_id_string(),
            "1.2.840.113549.1.1.13"
        );

        let (not_before, not_after) = validity_window(now).unwrap();
        assert_eq!(
            parsed.validity().not_before.timestamp(),
            not_before.unix_timestamp()
        );
        assert_eq!(
            parsed.validity().not_after.timestamp(),
            not_after.unix_timestamp()
        );
        assert_eq!(
            not_before,
            now.replace_nanosecond(0).unwrap() - Duration::days(1)
        );
    }

    #[test]
    fn test_name_order() {
        let name = certificate_data().encode_name().unwrap();
        let (_, parsed) = x509_parser::x509::X509Name::from_der(&name).unwrap();
        let oids: Vec<String> = parsed
            .iter_attributes()
            .map(|attr| attr.attr_type().to_id_string())
            .collect();
        assert_eq!(
            oids,
            vec!["2.5.4.6", "2.5.4.8", "2.5.4.7", "2.5.4.10", "2.5.4.11", "2.5.4.3"]
        );
    }
}
