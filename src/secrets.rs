use crate::error::{PipelineError, Result};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use log::debug;
use serde::Deserialize;
use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

pub const DEFAULT_SECRET_ID: &str = "iot/cert/prod";

/// A secrets service that returns the secret string stored under an id.
pub trait SecretSource {
    fn get_secret_string(&self, secret_id: &str) -> Result<String>;
}

/// Secrets stored as files: id `iot/cert/prod` lives at
/// `<root>/iot/cert/prod.json`.
#[derive(Debug, Clone)]
pub struct FileSecretSource {
    root: PathBuf,
}

impl FileSecretSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl SecretSource for FileSecretSource {
    fn get_secret_string(&self, secret_id: &str) -> Result<String> {
        let relative = Path::new(secret_id);
        if secret_id.is_empty()
            || !relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)))
        {
            return Err(PipelineError::Secret(format!(
                "invalid secret id '{}'",
                secret_id
            )));
        }

        let path = self.root.join(format!("{}.json", secret_id));
        debug!("Reading secret '{}' from {}", secret_id, path.display());
        fs::read_to_string(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => {
                PipelineError::Secret(format!("secret '{}' not found", secret_id))
            }
            _ => PipelineError::Secret(format!("cannot read secret '{}': {}", secret_id, e)),
        })
    }
}

#[derive(Deserialize)]
struct EncodedBundle {
    #[serde(rename = "PrivateKey")]
    private_key: String,
    #[serde(rename = "Cert")]
    cert: String,
    #[serde(rename = "AmazonRootCA")]
    amazon_root_ca: String,
}

/// Device certificate material, decoded to PEM text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertBundle {
    pub private_key: String,
    pub cert: String,
    pub amazon_root_ca: String,
}

/// Which part of a [`CertBundle`] to print.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum CertField {
    PrivateKey,
    Cert,
    Ca,
}

impl CertBundle {
    pub fn field(&self, field: CertField) -> &str {
        match field {
            CertField::PrivateKey => &self.private_key,
            CertField::Cert => &self.cert,
            CertField::Ca => &self.amazon_root_ca,
        }
    }
}

/// Parses the secret JSON and base64-decodes `PrivateKey`, `Cert` and
/// `AmazonRootCA` independently. Whitespace inside the encoded text is
/// ignored.
///
/// # Errors
///
/// Returns `PipelineError` if the JSON is invalid or lacks a field, or if a
/// field is not valid base64 or does not decode to UTF-8.
pub fn decode_cert_bundle(secret_string: &str) -> Result<CertBundle> {
    let encoded: EncodedBundle = serde_json::from_str(secret_string)?;
    Ok(CertBundle {
        private_key: decode_field("PrivateKey", &encoded.private_key)?,
        cert: decode_field("Cert", &encoded.cert)?,
        amazon_root_ca: decode_field("AmazonRootCA", &encoded.amazon_root_ca)?,
    })
}

fn decode_field(field: &'static str, encoded: &str) -> Result<String> {
    let compact: String = encoded.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    let bytes = STANDARD
        .decode(compact)
        .map_err(|source| PipelineError::Base64 { field, source })?;
    String::from_utf8(bytes).map_err(|source| PipelineError::Utf8 { field, source })
}

/// Fetches `secret_id` from `source` and decodes it.
pub fn fetch_cert_bundle<S: SecretSource + ?Sized>(source: &S, secret_id: &str) -> Result<CertBundle> {
    let secret = source.get_secret_string(secret_id)?;
    decode_cert_bundle(&secret)
}
