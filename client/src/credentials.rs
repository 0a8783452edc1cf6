/// The credential fields embedded in a connect request, in the order they
/// travel on the wire.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Credentials {
    pub username: String,
    pub username_signature: Vec<u8>,
    pub domain_username: String,
    pub domain_access_token: String,
}

/// Supplies credentials for the handshake. The handshake itself only needs
/// "zero or more credential strings to embed" - an OAuth-backed
/// implementation and the always-empty [`Anonymous`] both satisfy that.
pub trait CredentialsProvider: Send {
    fn credentials(&self) -> Credentials;
}

pub struct Anonymous;

impl CredentialsProvider for Anonymous {
    fn credentials(&self) -> Credentials {
        Credentials::default()
    }
}
