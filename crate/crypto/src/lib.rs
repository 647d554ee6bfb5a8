pub use error::{
    CryptoError,
    result::{CryptoResult, CryptoResultHelper},
};

pub mod certificate;
pub mod der;
mod error;
pub mod keys;
pub mod xmldsig;
