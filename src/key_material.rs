//! Key pair and certificate signing request generation
//!
//! Every content item gets a fresh RSA key pair and a CSR signed with it. The CSR subject
//! is a fixed organizational identity; the signing authority decides what the issued
//! certificate actually carries.
//!
//! # Example
//! ```rust,no_run
//! # use swarm_bootstrap::key_material::RsaCsrBuilder;
//! # fn example() -> Result<(), swarm_bootstrap::error::BootstrapError> {
//! let (key, csr) = RsaCsrBuilder::new().build()?;
//! std::fs::write("item.csr", csr.as_str()).ok();
//! # let _ = key;
//! # Ok(())
//! # }
//! ```

use std::fmt;

use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, PKeyRef, Private, Public};
use openssl::rsa::Rsa;
use openssl::x509::{X509Name, X509Req};
use secrecy::{ExposeSecret, SecretSlice};

use crate::error::BootstrapError;

pub const RSA_KEY_SIZE_DEFAULT: u32 = 2048;

/// Subject attributes of every CSR, in order.
pub const CSR_SUBJECT: [(Nid, &str); 7] = [
    (Nid::COUNTRYNAME, "US"),
    (Nid::STATEORPROVINCENAME, "CA"),
    (Nid::LOCALITYNAME, "San Jose"),
    (Nid::ORGANIZATIONNAME, "ploaders, Inc"),
    (Nid::ORGANIZATIONALUNITNAME, "staff"),
    (Nid::COMMONNAME, "www.uploadersinc.com"),
    (Nid::PKCS9_EMAILADDRESS, "root@uploadersinc.com"),
];

/// A generated private key. The PEM encoding is held as a secret.
pub struct KeyMaterial {
    key: PKey<Private>,
    pem: SecretSlice<u8>,
}

impl KeyMaterial {
    fn new(key: PKey<Private>) -> Result<Self, BootstrapError> {
        let pem = key
            .private_key_to_pem_pkcs8()
            .map_err(|e| BootstrapError::crypto("Failed to encode private key", e))?;
        Ok(Self {
            key,
            pem: SecretSlice::from(pem),
        })
    }

    /// PKCS#8 PEM of the private key.
    pub fn private_key_pem(&self) -> &[u8] {
        self.pem.expose_secret()
    }

    pub fn bits(&self) -> u32 {
        self.key.bits()
    }

    /// Whether `other` is the public half of this key.
    pub fn matches_public_key(&self, other: &PKeyRef<Public>) -> bool {
        self.key.public_eq(other)
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("bits", &self.key.bits())
            .field("pem", &"<redacted>")
            .finish()
    }
}

/// PEM-encoded PKCS#10 request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateRequest {
    pem: String,
}

impl CertificateRequest {
    pub fn as_str(&self) -> &str {
        &self.pem
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.pem.as_bytes()
    }
}

// ================= RSA CSR Builder =================

/// Builder for a key pair and the CSR that requests a certificate for it
pub struct RsaCsrBuilder {
    key_size: u32,
    digest: MessageDigest,
}

impl RsaCsrBuilder {
    pub fn new() -> Self {
        Self {
            key_size: RSA_KEY_SIZE_DEFAULT,
            digest: MessageDigest::sha256(),
        }
    }

    /// RSA modulus size in bits (default 2048).
    pub fn key_size(mut self, bits: u32) -> Self {
        self.key_size = bits;
        self
    }

    /// Generate the key pair and a CSR signed with it.
    ///
    /// # Errors
    /// Any OpenSSL failure (key generation, subject encoding, signing) is returned as
    /// [`BootstrapError::Crypto`].
    pub fn build(self) -> Result<(KeyMaterial, CertificateRequest), BootstrapError> {
        let rsa = Rsa::generate(self.key_size)
            .map_err(|e| BootstrapError::crypto("Failed to generate RSA keypair", e))?;
        let private_key = PKey::from_rsa(rsa)
            .map_err(|e| BootstrapError::crypto("Failed to create private key", e))?;

        let mut name_builder = X509Name::builder()
            .map_err(|e| BootstrapError::crypto("Failed to create name builder", e))?;
        for (nid, value) in CSR_SUBJECT {
            name_builder
                .append_entry_by_nid(nid, value)
                .map_err(|e| {
                    BootstrapError::crypto(format!("Failed to set subject entry {}", value), e)
                })?;
        }
        let subject_name = name_builder.build();

        let mut builder = X509Req::builder()
            .map_err(|e| BootstrapError::crypto("Failed to create CSR builder", e))?;
        builder
            .set_version(0)
            .map_err(|e| BootstrapError::crypto("Failed to set CSR version", e))?;
        builder
            .set_subject_name(&subject_name)
            .map_err(|e| BootstrapError::crypto("Failed to set CSR subject", e))?;
        builder
            .set_pubkey(&private_key)
            .map_err(|e| BootstrapError::crypto("Failed to set CSR public key", e))?;
        builder
            .sign(&private_key, self.digest)
            .map_err(|e| BootstrapError::crypto("Failed to sign CSR", e))?;

        let pem = builder
            .build()
            .to_pem()
            .map_err(|e| BootstrapError::crypto("Failed to encode CSR", e))?;
        Ok((
            KeyMaterial::new(private_key)?,
            CertificateRequest {
                pem: String::from_utf8_lossy(&pem).into_owned(),
            },
        ))
    }
}

impl Default for RsaCsrBuilder {
    fn default() -> Self {
        Self::new()
    }
}
