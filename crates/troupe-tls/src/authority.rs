//! Run-local certificate authority.
//!
//! One authority lives for one test run. It writes its root pair under the
//! depot directory as `<cn>.key` / `<cn>.crt` and signs every leaf with the
//! same in-memory issuer. Leaf pairs land in fresh temp files prefixed by the
//! leaf's common name, so concurrent issuance never collides.

use std::fmt;
use std::io::Write;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose,
    IsCa, Issuer, KeyPair, KeyUsagePurpose, SanType,
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::{IssuanceError, Result};

/// Validity of every certificate the authority signs.
const VALIDITY: time::Duration = time::Duration::days(365);

/// Loopback address embedded in every leaf.
const LOOPBACK: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// Key algorithm and size used for every key the authority generates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyStrength {
    /// RSA 4096-bit.
    #[default]
    Rsa4096,
    /// RSA 2048-bit.
    Rsa2048,
    /// ECDSA P-256, much faster to generate.
    EcdsaP256,
}

impl KeyStrength {
    /// Generates a fresh key pair.
    ///
    /// # Errors
    /// Returns `KeyGeneration` if the crypto backend fails.
    pub fn generate(self) -> Result<KeyPair> {
        match self {
            Self::Rsa4096 => {
                KeyPair::generate_rsa_for(&rcgen::PKCS_RSA_SHA256, rcgen::RsaKeySize::_4096)
            }
            Self::Rsa2048 => {
                KeyPair::generate_rsa_for(&rcgen::PKCS_RSA_SHA256, rcgen::RsaKeySize::_2048)
            }
            Self::EcdsaP256 => KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256),
        }
        .map_err(IssuanceError::key)
    }
}

impl fmt::Display for KeyStrength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rsa4096 => f.write_str("rsa-4096"),
            Self::Rsa2048 => f.write_str("rsa-2048"),
            Self::EcdsaP256 => f.write_str("ecdsa-p256"),
        }
    }
}

/// Paths of one issued key/certificate pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedPair {
    /// PEM-encoded private key.
    pub key_path: PathBuf,
    /// PEM-encoded certificate.
    pub cert_path: PathBuf,
}

/// Per-run certificate authority.
///
/// Cheap to clone; clones share the same signer.
#[derive(Clone)]
pub struct CertAuthority {
    depot_dir: PathBuf,
    common_name: String,
    key_path: PathBuf,
    cert_path: PathBuf,
    strength: KeyStrength,
    issuer: Arc<Issuer<'static, KeyPair>>,
}

impl fmt::Debug for CertAuthority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertAuthority")
            .field("depot_dir", &self.depot_dir)
            .field("common_name", &self.common_name)
            .field("cert_path", &self.cert_path)
            .field("strength", &self.strength)
            .finish_non_exhaustive()
    }
}

impl CertAuthority {
    /// Creates an authority with the default key strength.
    ///
    /// # Errors
    /// Returns an error if key generation, signing or writing fails.
    pub fn create(depot_dir: impl AsRef<Path>, common_name: &str) -> Result<Self> {
        Self::create_with(depot_dir, common_name, KeyStrength::default())
    }

    /// Creates an authority whose keys use `strength`.
    ///
    /// # Errors
    /// Returns an error if key generation, signing or writing fails.
    pub fn create_with(
        depot_dir: impl AsRef<Path>,
        common_name: &str,
        strength: KeyStrength,
    ) -> Result<Self> {
        let depot_dir = depot_dir.as_ref().to_path_buf();
        if common_name.is_empty() {
            return Err(IssuanceError::certificate("common name cannot be empty"));
        }

        let key = strength.generate()?;
        let mut params = CertificateParams::default();
        params.distinguished_name = distinguished_name(common_name);
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        set_validity(&mut params);
        let cert = params.self_signed(&key).map_err(IssuanceError::certificate)?;

        let key_path = depot_dir.join(format!("{common_name}.key"));
        let cert_path = depot_dir.join(format!("{common_name}.crt"));
        write_read_only(&key_path, key.serialize_pem().as_bytes())?;
        write_read_only(&cert_path, cert.pem().as_bytes())?;

        tracing::info!(
            common_name = %common_name,
            strength = %strength,
            cert = %cert_path.display(),
            "created certificate authority"
        );

        Ok(Self {
            depot_dir,
            common_name: common_name.to_string(),
            key_path,
            cert_path,
            strength,
            issuer: Arc::new(Issuer::new(params, key)),
        })
    }

    /// Returns the root `(key_path, cert_path)`.
    #[must_use]
    pub fn ca_and_key(&self) -> (&Path, &Path) {
        (&self.key_path, &self.cert_path)
    }

    /// Returns the root certificate path.
    #[must_use]
    pub fn ca_cert(&self) -> &Path {
        &self.cert_path
    }

    /// Returns the depot directory.
    #[must_use]
    pub fn depot_dir(&self) -> &Path {
        &self.depot_dir
    }

    /// Returns the key strength.
    #[must_use]
    pub const fn strength(&self) -> KeyStrength {
        self.strength
    }

    /// Issues a leaf signed by this authority.
    ///
    /// Every entry of `sans` that parses as an IP address becomes an IP SAN,
    /// everything else a DNS SAN; `127.0.0.1` is always included. Host
    /// certificates carry server and client auth; `intermediate_ca` issues a
    /// CA certificate with path length 0 instead.
    ///
    /// # Errors
    /// Returns an error if key generation, signing or writing fails.
    pub fn issue_leaf<I, S>(
        &self,
        common_name: &str,
        sans: I,
        intermediate_ca: bool,
    ) -> Result<IssuedPair>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if common_name.is_empty() {
            return Err(IssuanceError::certificate("common name cannot be empty"));
        }

        let key = self.strength.generate()?;
        let mut params = CertificateParams::default();
        params.distinguished_name = distinguished_name(common_name);
        params.subject_alt_names = subject_alt_names(sans)?;
        params.use_authority_key_identifier_extension = true;
        if intermediate_ca {
            params.is_ca = IsCa::Ca(BasicConstraints::Constrained(0));
            params.key_usages = vec![
                KeyUsagePurpose::KeyCertSign,
                KeyUsagePurpose::CrlSign,
                KeyUsagePurpose::DigitalSignature,
            ];
        } else {
            params.is_ca = IsCa::NoCa;
            params.key_usages = vec![
                KeyUsagePurpose::DigitalSignature,
                KeyUsagePurpose::KeyEncipherment,
            ];
            params.extended_key_usages = vec![
                ExtendedKeyUsagePurpose::ServerAuth,
                ExtendedKeyUsagePurpose::ClientAuth,
            ];
        }
        set_validity(&mut params);
        let cert = params
            .signed_by(&key, &*self.issuer)
            .map_err(IssuanceError::certificate)?;

        let key_path = self.write_temp(common_name, ".key", key.serialize_pem().as_bytes())?;
        let cert_path = match self.write_temp(common_name, ".crt", cert.pem().as_bytes()) {
            Ok(path) => path,
            Err(e) => {
                let _ = std::fs::remove_file(&key_path);
                return Err(e);
            }
        };

        tracing::debug!(
            common_name = %common_name,
            intermediate_ca = intermediate_ca,
            cert = %cert_path.display(),
            "issued leaf certificate"
        );

        Ok(IssuedPair {
            key_path,
            cert_path,
        })
    }

    /// Verifies a pair issued by this authority.
    ///
    /// # Errors
    /// Returns `Verification` if the pair was not signed by this root or the
    /// key does not match the certificate.
    pub fn verify(&self, pair: &IssuedPair) -> Result<()> {
        crate::verify::verify_leaf(&self.cert_path, &pair.cert_path, &pair.key_path)
    }

    fn write_temp(&self, common_name: &str, suffix: &str, contents: &[u8]) -> Result<PathBuf> {
        let mut file = tempfile::Builder::new()
            .prefix(&format!("{common_name}-"))
            .suffix(suffix)
            .tempfile_in(&self.depot_dir)
            .map_err(|e| IssuanceError::io(&self.depot_dir, e))?;
        file.write_all(contents)
            .map_err(|e| IssuanceError::io(file.path(), e))?;
        file.into_temp_path()
            .keep()
            .map_err(|e| IssuanceError::io(&self.depot_dir, e.error))
    }
}

fn distinguished_name(common_name: &str) -> DistinguishedName {
    let mut name = DistinguishedName::new();
    name.push(DnType::CommonName, common_name);
    name
}

fn set_validity(params: &mut CertificateParams) {
    let now = OffsetDateTime::now_utc();
    params.not_before = now;
    params.not_after = now + VALIDITY;
}

fn subject_alt_names<I, S>(sans: I) -> Result<Vec<SanType>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out = vec![SanType::IpAddress(LOOPBACK)];
    for san in sans {
        let san = san.as_ref();
        match san.parse::<IpAddr>() {
            Ok(ip) if ip == LOOPBACK => {}
            Ok(ip) => out.push(SanType::IpAddress(ip)),
            Err(_) => out.push(SanType::DnsName(
                san.to_string().try_into().map_err(IssuanceError::certificate)?,
            )),
        }
    }
    Ok(out)
}

fn write_read_only(path: &Path, contents: &[u8]) -> Result<()> {
    std::fs::write(path, contents).map_err(|e| IssuanceError::io(path, e))?;
    let mut perms = std::fs::metadata(path)
        .map_err(|e| IssuanceError::io(path, e))?
        .permissions();
    perms.set_readonly(true);
    std::fs::set_permissions(path, perms).map_err(|e| IssuanceError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn authority(dir: &Path) -> CertAuthority {
        CertAuthority::create_with(dir, "troupe-ca", KeyStrength::EcdsaP256).unwrap()
    }

    #[test]
    fn test_create_writes_root_pair() {
        let dir = tempfile::tempdir().unwrap();
        let ca = authority(dir.path());
        let (key, cert) = ca.ca_and_key();
        assert_eq!(key, dir.path().join("troupe-ca.key"));
        assert_eq!(cert, dir.path().join("troupe-ca.crt"));
        assert!(std::fs::read_to_string(cert).unwrap().contains("BEGIN CERTIFICATE"));
        assert!(std::fs::read_to_string(key).unwrap().contains("PRIVATE KEY"));
        assert!(std::fs::metadata(cert).unwrap().permissions().readonly());
    }

    #[test]
    fn test_issue_leaf_unique_files_prefixed_by_cn() {
        let dir = tempfile::tempdir().unwrap();
        let ca = authority(dir.path());
        let a = ca.issue_leaf("bbs", ["bbs.service.cf.internal"], false).unwrap();
        let b = ca.issue_leaf("bbs", ["bbs.service.cf.internal"], false).unwrap();

        assert_ne!(a.key_path, b.key_path);
        assert_ne!(a.cert_path, b.cert_path);
        for path in [&a.key_path, &a.cert_path, &b.key_path, &b.cert_path] {
            let file = path.file_name().unwrap().to_string_lossy();
            assert!(file.starts_with("bbs-"), "{file}");
            assert_eq!(path.parent().unwrap(), dir.path());
        }
    }

    #[test]
    fn test_issue_leaf_rejects_empty_cn() {
        let dir = tempfile::tempdir().unwrap();
        let ca = authority(dir.path());
        assert!(ca.issue_leaf("", Vec::<String>::new(), false).is_err());
    }

    #[test]
    fn test_create_fails_for_missing_depot() {
        let err =
            CertAuthority::create_with("/nonexistent/troupe/depot", "ca", KeyStrength::EcdsaP256)
                .unwrap_err();
        assert!(matches!(err, IssuanceError::Io { .. }));
    }

    #[test]
    fn test_subject_alt_names_split_ip_and_dns() {
        let sans = subject_alt_names(["10.0.0.1", "localhost", "127.0.0.1"]).unwrap();
        assert_eq!(sans.len(), 3);
        assert!(matches!(sans[0], SanType::IpAddress(ip) if ip == LOOPBACK));
        assert!(matches!(sans[1], SanType::IpAddress(_)));
        assert!(matches!(sans[2], SanType::DnsName(_)));
    }

    #[test]
    fn test_key_strength_names() {
        use serde::de::IntoDeserializer;
        use serde::de::value::{Error, StrDeserializer};

        let de: StrDeserializer<'_, Error> = "ecdsa-p256".into_deserializer();
        assert_eq!(KeyStrength::deserialize(de).unwrap(), KeyStrength::EcdsaP256);
        assert_eq!(KeyStrength::default(), KeyStrength::Rsa4096);
        assert_eq!(KeyStrength::Rsa4096.to_string(), "rsa-4096");
    }
}
