//! Standard security handler.

use md5::{Digest, Md5};

use super::algorithms::{self, KeyInputs};
use super::{aes, rc4, CryptMethod, EncryptDict, Permissions, SecurityHandler};
use crate::error::{Error, Result};
use crate::object::{Dictionary, Reference};

/// Password-based handler for `/Filter /Standard`.
#[derive(Debug, Clone)]
pub struct StandardSecurityHandler {
    dict: EncryptDict,
    file_key: Option<Vec<u8>>,
}

impl StandardSecurityHandler {
    /// Build an unauthenticated handler from an `/Encrypt` dictionary.
    pub fn new(encrypt: &Dictionary) -> Result<Self> {
        let dict = EncryptDict::from_dict(encrypt)?;
        log::info!(
            "Standard security handler V={} R={} ({} byte key, streams {:?}, strings {:?})",
            dict.version,
            dict.revision,
            dict.key_length,
            dict.stream_method,
            dict.string_method
        );
        Ok(Self { dict, file_key: None })
    }

    pub fn encrypt_dict(&self) -> &EncryptDict {
        &self.dict
    }

    pub fn permissions(&self) -> Permissions {
        self.dict.permissions()
    }

    /// File key derived by the last successful authentication.
    pub fn file_key(&self) -> Option<&[u8]> {
        self.file_key.as_deref()
    }

    fn key_inputs<'a>(&'a self, document_id: &'a [u8]) -> KeyInputs<'a> {
        KeyInputs {
            owner_key: &self.dict.owner_key,
            user_key: &self.dict.user_key,
            permissions: self.dict.permissions,
            file_id: document_id,
            revision: self.dict.revision,
            key_length: self.dict.key_length,
            encrypt_metadata: self.dict.encrypt_metadata,
        }
    }

    /// Algorithm 1: per-object key. AES-256 uses the file key unchanged.
    fn object_key(&self, method: CryptMethod, reference: Reference) -> Result<Vec<u8>> {
        let key = self.file_key.as_deref().ok_or(Error::InvalidPassword)?;
        if method == CryptMethod::AesV3 {
            return Ok(key.to_vec());
        }
        let mut hasher = Md5::new();
        hasher.update(key);
        hasher.update(&reference.object_number.to_le_bytes()[..3]);
        hasher.update(reference.generation.to_le_bytes());
        if method == CryptMethod::AesV2 {
            hasher.update(b"sAlT");
        }
        let hash = hasher.finalize();
        let len = (key.len() + 5).min(16);
        Ok(hash[..len].to_vec())
    }

    fn decrypt(&self, method: CryptMethod, data: &[u8], reference: Reference) -> Result<Vec<u8>> {
        if method == CryptMethod::Identity {
            return Ok(data.to_vec());
        }
        let key = self.object_key(method, reference)?;
        match method {
            CryptMethod::Rc4 => Ok(rc4::rc4_crypt(&key, data)),
            _ => aes::decrypt_with_iv(&key, data)
                .map_err(|e| Error::Decode(format!("object {}: {}", reference, e))),
        }
    }
}

impl SecurityHandler for StandardSecurityHandler {
    fn authenticate(&mut self, password: &str, document_id: &[u8]) -> bool {
        let password = password.as_bytes();
        let key = if self.dict.revision >= 5 {
            algorithms::authenticate_r6(
                password,
                &self.dict.owner_key,
                &self.dict.user_key,
                &self.dict.owner_encrypted,
                &self.dict.user_encrypted,
                self.dict.revision,
            )
        } else {
            let inputs = self.key_inputs(document_id);
            algorithms::authenticate_user_password(password, &inputs).or_else(|| {
                let key = algorithms::authenticate_owner_password(password, &inputs);
                if key.is_some() {
                    log::info!("Authenticated with the owner password");
                }
                key
            })
        };

        match key {
            Some(key) => {
                self.file_key = Some(key);
                true
            },
            None => {
                log::warn!("Password authentication failed");
                false
            },
        }
    }

    fn is_authenticated(&self) -> bool {
        self.file_key.is_some()
    }

    fn decrypt_string(&self, data: &[u8], reference: Reference) -> Result<Vec<u8>> {
        self.decrypt(self.dict.string_method, data, reference)
    }

    fn decrypt_stream(&self, data: &[u8], reference: Reference) -> Result<Vec<u8>> {
        self.decrypt(self.dict.stream_method, data, reference)
    }
}

/// Build an RC4 `/Encrypt` dictionary for `user`/`owner` passwords and
/// return it with the file key. Used by the tests of this crate.
#[cfg(test)]
pub(crate) fn rc4_fixture(user: &str, owner: &str, revision: u32, document_id: &[u8]) -> (Dictionary, Vec<u8>) {
    use crate::object::{Name, PdfString};

    let key_length = if revision == 2 { 5 } else { 16 };
    let owner_key = algorithms::compute_owner_key(owner.as_bytes(), user.as_bytes(), revision, key_length);
    let inputs = KeyInputs {
        owner_key: &owner_key,
        user_key: &[],
        permissions: -4,
        file_id: document_id,
        revision,
        key_length,
        encrypt_metadata: true,
    };
    let file_key = algorithms::compute_file_key(user.as_bytes(), &inputs);
    let user_key = algorithms::compute_user_key(&file_key, document_id, revision);

    let mut dict = Dictionary::new();
    dict.set("Filter", Name::new("Standard"));
    dict.set("V", if revision == 2 { 1 } else { 2 });
    dict.set("R", revision);
    if revision > 2 {
        dict.set("Length", 128);
    }
    dict.set("O", PdfString::new(owner_key));
    dict.set("U", PdfString::new(user_key));
    dict.set("P", -4);
    (dict, file_key)
}
