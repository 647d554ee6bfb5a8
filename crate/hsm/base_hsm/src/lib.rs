mod error;
mod pkcs11;
mod session;
pub mod test_helpers;

pub use error::{SessionError, SessionResult};
pub use pkcs11::{Pkcs11Connector, Pkcs11Provider, Pkcs11Signer};
pub use session::{HsmSession, SessionConfig, SessionState};
