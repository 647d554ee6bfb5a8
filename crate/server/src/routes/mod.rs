use actix_web::{
    HttpResponse, HttpResponseBuilder,
    http::{StatusCode, header},
    web::JsonConfig,
};
use tracing::{error, warn};

use crate::error::SignerError;

pub(crate) mod xml;

impl actix_web::error::ResponseError for SignerError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::ItemNotFound(_) | Self::InvalidRequest(_) => StatusCode::NOT_FOUND,

            Self::InvalidCertificateData(_) => StatusCode::UNPROCESSABLE_ENTITY,

            Self::LabelExists(_) => StatusCode::CONFLICT,

            Self::CryptographicError(_)
            | Self::NoMatchingKeyMaterial(_)
            | Self::Certificate(_)
            | Self::SessionFault(_)
            | Self::ServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,

            Self::DependencyUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,

            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status_code = self.status_code();
        let message = self.to_string();

        if status_code >= StatusCode::INTERNAL_SERVER_ERROR {
            error!("{status_code} - {message}");
        } else {
            warn!("{status_code} - {message}");
        }

        HttpResponseBuilder::new(status_code)
            .insert_header((header::CONTENT_TYPE, "text/html; charset=utf-8"))
            .body(message)
    }
}

/// JSON bodies are certificate metadata: a body that does not decode is
/// reported as invalid certificate data
pub(crate) fn json_config(limit: usize) -> JsonConfig {
    JsonConfig::default()
        .limit(limit)
        .error_handler(|err, _req| SignerError::InvalidCertificateData(err.to_string()).into())
}
