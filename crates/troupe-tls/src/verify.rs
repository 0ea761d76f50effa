//! Leaf verification against a root.

use std::path::Path;

use rcgen::{CertificateParams, KeyPair};
use x509_parser::certificate::X509Certificate;
use x509_parser::parse_x509_certificate;
use x509_parser::pem::parse_x509_pem;

use crate::error::{IssuanceError, Result};

fn read(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|e| IssuanceError::io(path, e))
}

fn decode_pem(path: &Path, bytes: &[u8]) -> Result<Vec<u8>> {
    let (_, pem) = parse_x509_pem(bytes).map_err(|e| IssuanceError::pem(path, e))?;
    Ok(pem.contents)
}

fn parse_cert<'a>(path: &Path, der: &'a [u8]) -> Result<X509Certificate<'a>> {
    let (_, cert) = parse_x509_certificate(der).map_err(|e| IssuanceError::pem(path, e))?;
    Ok(cert)
}

/// Checks that the leaf at `leaf_cert_path` was signed by the root at
/// `root_cert_path`, names that root as issuer, is currently valid, and
/// matches the private key at `leaf_key_path`.
///
/// # Errors
/// Returns `Verification` on any mismatch, `Io`/`Pem` if a file cannot be
/// read or decoded.
pub fn verify_leaf(
    root_cert_path: impl AsRef<Path>,
    leaf_cert_path: impl AsRef<Path>,
    leaf_key_path: impl AsRef<Path>,
) -> Result<()> {
    let root_path = root_cert_path.as_ref();
    let leaf_path = leaf_cert_path.as_ref();
    let key_path = leaf_key_path.as_ref();

    let root_der = decode_pem(root_path, &read(root_path)?)?;
    let leaf_der = decode_pem(leaf_path, &read(leaf_path)?)?;
    let root = parse_cert(root_path, &root_der)?;
    let leaf = parse_cert(leaf_path, &leaf_der)?;

    if leaf.issuer().as_raw() != root.subject().as_raw() {
        return Err(IssuanceError::verification(format!(
            "issuer {} does not match root subject {}",
            leaf.issuer(),
            root.subject()
        )));
    }
    leaf.verify_signature(Some(root.public_key()))
        .map_err(|e| IssuanceError::verification(format!("bad signature: {e}")))?;
    if !leaf.validity().is_valid() {
        return Err(IssuanceError::verification("certificate is outside its validity period"));
    }

    let key_pem = String::from_utf8(read(key_path)?).map_err(|e| IssuanceError::pem(key_path, e))?;
    let key = KeyPair::from_pem(&key_pem).map_err(|e| IssuanceError::pem(key_path, e))?;
    // Self-sign a throwaway certificate to get the key's SubjectPublicKeyInfo
    // in the same encoding the leaf uses.
    let reference = CertificateParams::default()
        .self_signed(&key)
        .map_err(IssuanceError::certificate)?;
    let reference = parse_cert(key_path, reference.der())?;
    if reference.public_key().raw != leaf.public_key().raw {
        return Err(IssuanceError::verification(format!(
            "key {} does not match certificate {}",
            key_path.display(),
            leaf_path.display()
        )));
    }

    tracing::debug!(leaf = %leaf_path.display(), root = %root_path.display(), "leaf verified");
    Ok(())
}
