//! Per-service TLS bundles.

use std::path::PathBuf;

use crate::authority::{CertAuthority, IssuedPair};
use crate::error::Result;

/// Server and client identities for one service, plus the CA that signed them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsMaterial {
    /// Pair the service presents to its clients.
    pub server: IssuedPair,
    /// Pair the service presents when it dials its peers.
    pub client: IssuedPair,
    /// Root certificate both sides trust.
    pub ca_cert: PathBuf,
}

impl TlsMaterial {
    /// Issues a server pair named `service` and a client pair named
    /// `<service>-client`, both carrying `sans`.
    ///
    /// # Errors
    /// Returns an error if either issuance fails.
    pub fn issue<S: AsRef<str>>(ca: &CertAuthority, service: &str, sans: &[S]) -> Result<Self> {
        let sans: Vec<&str> = sans.iter().map(AsRef::as_ref).collect();
        let server = ca.issue_leaf(service, sans.iter().copied(), false)?;
        let client = ca.issue_leaf(&format!("{service}-client"), sans.iter().copied(), false)?;
        Ok(Self {
            server,
            client,
            ca_cert: ca.ca_cert().to_path_buf(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authority::KeyStrength;

    #[test]
    fn test_issue_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let ca = CertAuthority::create_with(dir.path(), "ca", KeyStrength::EcdsaP256).unwrap();
        let material = TlsMaterial::issue(&ca, "bbs", &["bbs.service.cf.internal"]).unwrap();

        assert_eq!(material.ca_cert, dir.path().join("ca.crt"));
        ca.verify(&material.server).unwrap();
        ca.verify(&material.client).unwrap();
        let client_name = material.client.cert_path.file_name().unwrap().to_string_lossy();
        assert!(client_name.starts_with("bbs-client-"));
    }
}
