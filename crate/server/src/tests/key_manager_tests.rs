#![allow(clippy::unwrap_used)]

use std::time::Duration;

use hsm_signer_crypto::certificate::validity_window;
use serde_json::Value;
use time::OffsetDateTime;
use x509_parser::prelude::{FromDer, X509Certificate, X509Version};

use super::test_utils::{TestSigner, certificate_data};
use crate::error::SignerError;

const DOCUMENT: &str = "<invoice><amount currency=\"EUR\">42.00</amount></invoice>";

/// The certificate PEM stored in the local keystore file for `label`
fn stored_certificate(signer: &TestSigner, label: &str) -> String {
    let keystore: Value =
        serde_json::from_slice(&std::fs::read(&signer.params.keystore_file).unwrap()).unwrap();
    keystore["entries"][label]["certificate_chain"][0]
        .as_str()
        .unwrap()
        .to_owned()
}

#[tokio::test]
async fn test_unknown_label() {
    let t = TestSigner::new().await;
    let err = t
        .signer
        .sign(DOCUMENT.to_owned(), "missing")
        .await
        .unwrap_err();
    assert!(matches!(err, SignerError::ItemNotFound(_)));
    assert_eq!(t.signer.cached_keys().await, 0);
    assert_eq!(t.hsm.private_key_calls(), 0);
    t.stop().await;
}

#[tokio::test]
async fn test_create_sign_validate() {
    let t = TestSigner::new().await;
    let confirmation = t
        .signer
        .create_key("invoices", certificate_data())
        .await
        .unwrap();
    assert_eq!(
        confirmation,
        "Created a key pair with the labels invoices, invoices:public"
    );
    assert_eq!(
        t.hsm.labels(),
        vec!["invoices".to_owned(), "invoices:public".to_owned()]
    );
    assert_eq!(t.signer.list_labels().await, vec!["invoices".to_owned()]);

    let signed = t
        .signer
        .sign(DOCUMENT.to_owned(), "invoices")
        .await
        .unwrap();
    assert!(t.signer.validate(signed.clone()).await.unwrap());
    let tampered = signed.replace("42.00", "42.01");
    assert!(!t.signer.validate(tampered).await.unwrap());
    assert!(!t.signer.validate(DOCUMENT.to_owned()).await.unwrap());
    assert!(matches!(
        t.signer.validate("  ".to_owned()).await,
        Err(SignerError::InvalidRequest(_))
    ));
    t.stop().await;
}

#[tokio::test]
async fn test_second_resolution_is_cached() {
    let t = TestSigner::new().await;
    t.signer
        .create_key("invoices", certificate_data())
        .await
        .unwrap();
    let params = t.params.clone();
    let (hsm, dir) = t.stop().await;

    // a restarted signer restores the keystore and starts with an empty cache
    let t = TestSigner::start(params, hsm, dir).await;
    assert_eq!(t.signer.list_labels().await, vec!["invoices".to_owned()]);
    assert_eq!(t.signer.cached_keys().await, 0);
    for _ in 0..3 {
        let signed = t
            .signer
            .sign(DOCUMENT.to_owned(), "invoices")
            .await
            .unwrap();
        assert!(t.signer.validate(signed).await.unwrap());
    }
    assert_eq!(t.hsm.private_key_calls(), 1);
    assert_eq!(t.signer.cached_keys().await, 1);
    t.stop().await;
}

#[tokio::test]
async fn test_label_exists() {
    let t = TestSigner::new().await;
    t.signer
        .create_key("invoices", certificate_data())
        .await
        .unwrap();
    let certificate = stored_certificate(&t, "invoices");

    let mut other = certificate_data();
    other.common_name = "other.example.com".to_owned();
    let err = t.signer.create_key("invoices", other).await.unwrap_err();
    assert!(matches!(err, SignerError::LabelExists(_)));

    assert_eq!(t.signer.list_labels().await, vec!["invoices".to_owned()]);
    assert_eq!(stored_certificate(&t, "invoices"), certificate);
    assert_eq!(t.hsm.generate_calls(), 1);
    t.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_creation() {
    let t = TestSigner::new().await;
    let creations = (0..4).map(|_| {
        let signer = t.signer.clone();
        tokio::spawn(async move { signer.create_key("invoices", certificate_data()).await })
    });
    let mut created = 0;
    for creation in creations.collect::<Vec<_>>() {
        match creation.await.unwrap() {
            Ok(_) => created += 1,
            Err(e) => assert!(matches!(e, SignerError::LabelExists(_)), "{e}"),
        }
    }
    assert_eq!(created, 1);
    assert_eq!(t.hsm.generate_calls(), 1);
    assert_eq!(t.signer.list_labels().await.len(), 1);
    t.stop().await;
}

#[tokio::test]
async fn test_self_signed_certificate() {
    let t = TestSigner::new().await;
    let before = OffsetDateTime::now_utc();
    t.signer
        .create_key("invoices", certificate_data())
        .await
        .unwrap();
    let after = OffsetDateTime::now_utc();

    let pem = openssl::x509::X509::from_pem(stored_certificate(&t, "invoices").as_bytes()).unwrap();
    let der = pem.to_der().unwrap();
    let (rest, certificate) = X509Certificate::from_der(&der).unwrap();
    assert!(rest.is_empty());
    assert_eq!(certificate.version(), X509Version::V3);
    assert_eq!(certificate.subject(), certificate.issuer());
    assert_eq!(
        certificate
            .subject()
            .iter_common_name()
            .next()
            .unwrap()
            .as_str()
            .unwrap(),
        "signer.example.com"
    );

    let not_before = certificate.validity().not_before.timestamp();
    let not_after = certificate.validity().not_after.timestamp();
    let (earliest, _) = validity_window(before).unwrap();
    let (latest, _) = validity_window(after).unwrap();
    assert!(earliest.unix_timestamp() <= not_before && not_before <= latest.unix_timestamp());
    let issued = OffsetDateTime::from_unix_timestamp(not_before).unwrap() + time::Duration::days(1);
    assert_eq!(
        validity_window(issued).unwrap().1.unix_timestamp(),
        not_after
    );

    // signed by its own key
    let public_key = pem.public_key().unwrap();
    assert!(pem.verify(&public_key).unwrap());
    t.stop().await;
}

#[tokio::test]
async fn test_keystore_snapshot() {
    let t = TestSigner::new().await;
    t.signer
        .create_key("invoices", certificate_data())
        .await
        .unwrap();
    let snapshot = t
        .object_store()
        .get("KeyStoreHSM", "keystore-cluster-1234", "eu-west-1")
        .await
        .unwrap();
    assert_eq!(snapshot, std::fs::read(&t.params.keystore_file).unwrap());
    t.stop().await;
}

#[tokio::test]
async fn test_failed_creation_releases_the_label() {
    let t = TestSigner::new().await;
    // the object store cannot create its bucket directory
    let objects = t.params.object_store_root.clone();
    std::fs::write(&objects, b"not a directory").unwrap();

    let err = t
        .signer
        .create_key("invoices", certificate_data())
        .await
        .unwrap_err();
    assert!(matches!(err, SignerError::DependencyUnavailable(_)), "{err}");
    assert!(t.signer.list_labels().await.is_empty());
    assert!(t.hsm.labels().is_empty());
    assert_eq!(t.hsm.destroy_calls(), 1);
    assert!(matches!(
        t.signer.sign(DOCUMENT.to_owned(), "invoices").await,
        Err(SignerError::ItemNotFound(_))
    ));

    let params = t.params.clone();
    let (hsm, dir) = t.stop().await;
    std::fs::remove_file(&objects).unwrap();
    let t = TestSigner::start(params, hsm, dir).await;
    t.signer
        .create_key("invoices", certificate_data())
        .await
        .unwrap();
    assert_eq!(t.signer.list_labels().await, vec!["invoices".to_owned()]);
    let signed = t
        .signer
        .sign(DOCUMENT.to_owned(), "invoices")
        .await
        .unwrap();
    assert!(t.signer.validate(signed).await.unwrap());
    t.stop().await;
}

#[tokio::test]
async fn test_invalid_creation_requests() {
    let t = TestSigner::new().await;
    assert!(matches!(
        t.signer.create_key(" ", certificate_data()).await,
        Err(SignerError::InvalidRequest(_))
    ));
    let mut data = certificate_data();
    data.country = String::new();
    assert!(matches!(
        t.signer.create_key("invoices", data).await,
        Err(SignerError::InvalidCertificateData(_))
    ));
    assert!(t.signer.list_labels().await.is_empty());
    assert_eq!(t.hsm.generate_calls(), 0);
    t.stop().await;
}

#[tokio::test]
async fn test_provider_unavailable_without_fallback() {
    let t = TestSigner::new().await;
    t.hsm.set_unavailable(true);
    assert!(matches!(
        t.signer.create_key("invoices", certificate_data()).await,
        Err(SignerError::DependencyUnavailable(_))
    ));
    assert!(t.signer.list_labels().await.is_empty());
    t.stop().await;
}

#[tokio::test]
async fn test_software_fallback() {
    let t = TestSigner::with_params(|params| params.allow_software_fallback = true).await;
    t.hsm.set_unavailable(true);
    let confirmation = t
        .signer
        .create_key("invoices", certificate_data())
        .await
        .unwrap();
    assert!(confirmation.starts_with("Created a key pair with the labels invoices, invoices:public"));
    assert!(confirmation.contains("software key"));
    assert!(t.hsm.labels().is_empty());

    let params = t.params.clone();
    let (hsm, dir) = t.stop().await;
    let t = TestSigner::start(params, hsm, dir).await;
    // the private key is decrypted from the keystore, not fetched from the HSM
    let signed = t
        .signer
        .sign(DOCUMENT.to_owned(), "invoices")
        .await
        .unwrap();
    assert!(t.signer.validate(signed).await.unwrap());
    assert_eq!(t.hsm.private_key_calls(), 0);
    t.stop().await;
}

#[tokio::test]
async fn test_cached_key_expires() {
    let t = TestSigner::with_params(|params| {
        params.cache.ttl = Some(Duration::from_millis(200));
        params.cache.sweep_interval = Some(Duration::from_millis(100));
    })
    .await;
    t.signer
        .create_key("invoices", certificate_data())
        .await
        .unwrap();
    assert_eq!(t.signer.cached_keys().await, 1);
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(t.signer.cached_keys().await, 0);

    // resolved again from the keystore
    t.signer
        .sign(DOCUMENT.to_owned(), "invoices")
        .await
        .unwrap();
    assert_eq!(t.hsm.private_key_calls(), 1);
    assert_eq!(t.signer.cached_keys().await, 1);
    t.stop().await;
}
