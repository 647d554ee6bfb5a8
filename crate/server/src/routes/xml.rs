use std::sync::Arc;

use actix_web::{
    HttpResponse, Scope, get,
    http::header::ContentType,
    post,
    web::{self, Data, Json, Path},
};
use hsm_signer_crypto::certificate::CertificateData;
use tracing::{Instrument, info, info_span};

use crate::{core::HsmSigner, result::SResult};

/// The routes of the signer, under `/xml`
pub(crate) fn xml_scope() -> Scope {
    web::scope("/xml")
        .service(sign)
        .service(validate)
        .service(create_key)
        .service(list_keys)
        .service(ping)
}

/// Sign the XML body with the key `label`
#[post("/sign/{label}")]
pub(crate) async fn sign(
    label: Path<String>,
    body: String,
    signer: Data<Arc<HsmSigner>>,
) -> SResult<HttpResponse> {
    let label = label.into_inner();
    let span = info_span!("sign", label = %label);
    async move {
        info!("POST /xml/sign/{label}");
        let signed = signer.sign(body, &label).await?;
        Ok(HttpResponse::Ok()
            .content_type("application/xml")
            .body(signed))
    }
    .instrument(span)
    .await
}

/// Validate the signature of the XML body: `true` or `false`
#[post("/validate")]
pub(crate) async fn validate(body: String, signer: Data<Arc<HsmSigner>>) -> SResult<HttpResponse> {
    async move {
        info!("POST /xml/validate");
        let valid = signer.validate(body).await?;
        Ok(HttpResponse::Ok()
            .content_type(ContentType::plaintext())
            .body(valid.to_string()))
    }
    .instrument(info_span!("validate"))
    .await
}

/// Create a key pair `label` and its self-signed certificate
#[post("/create/{label}")]
pub(crate) async fn create_key(
    label: Path<String>,
    data: Json<CertificateData>,
    signer: Data<Arc<HsmSigner>>,
) -> SResult<HttpResponse> {
    let label = label.into_inner();
    let span = info_span!("create_key", label = %label);
    async move {
        info!("POST /xml/create/{label}");
        let confirmation = signer.create_key(&label, data.into_inner()).await?;
        Ok(HttpResponse::Ok()
            .content_type(ContentType::plaintext())
            .body(confirmation))
    }
    .instrument(span)
    .await
}

/// The key labels, as `[a, b, c]`
#[get("/listKeys")]
pub(crate) async fn list_keys(signer: Data<Arc<HsmSigner>>) -> HttpResponse {
    info!("GET /xml/listKeys");
    let labels = signer.list_labels().await;
    HttpResponse::Ok()
        .content_type(ContentType::plaintext())
        .body(format!("[{}]", labels.join(", ")))
}

#[get("/ping")]
pub(crate) async fn ping() -> HttpResponse {
    HttpResponse::Ok()
        .content_type(ContentType::plaintext())
        .body("true")
}
