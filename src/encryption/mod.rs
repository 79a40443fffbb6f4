//! Encryption gate.
//!
//! Only the standard password security handler is implemented
//! (ISO 32000-2, 7.6.4), revisions 2 through 6:
//!
//! - R2/R3: RC4 with a 40 to 128 bit key
//! - R4: crypt filters selecting RC4 (`/V2`) or AES-128 (`/AESV2`)
//! - R5/R6: AES-256 (`/AESV3`)
//!
//! Producing encrypted output is out of scope.

use std::fmt;

use crate::error::{Error, Result};
use crate::object::{Dictionary, Object, Reference};

mod aes;
mod algorithms;
mod handler;
mod rc4;

pub use handler::StandardSecurityHandler;

#[cfg(test)]
pub(crate) use handler::rc4_fixture;

/// Decrypts strings and streams of an encrypted document.
///
/// A handler starts unauthenticated; [`authenticate`](Self::authenticate)
/// derives the file key from a password and the first `/ID` element.
pub trait SecurityHandler: fmt::Debug {
    /// Try `password` as user or owner password. Returns `true` on success.
    fn authenticate(&mut self, password: &str, document_id: &[u8]) -> bool;

    fn is_authenticated(&self) -> bool;

    /// Decrypt a string belonging to the indirect object `reference`.
    fn decrypt_string(&self, data: &[u8], reference: Reference) -> Result<Vec<u8>>;

    /// Decrypt a stream payload belonging to the indirect object `reference`.
    fn decrypt_stream(&self, data: &[u8], reference: Reference) -> Result<Vec<u8>>;
}

/// Decrypt every string nested in `value` in place.
pub fn decrypt_strings(handler: &dyn SecurityHandler, value: &mut Object, reference: Reference) -> Result<()> {
    match value {
        Object::String(s) => {
            let plain = handler.decrypt_string(s.as_bytes(), reference)?;
            s.set_bytes(plain);
        },
        Object::Array(arr) => {
            for i in 0..arr.len() {
                if let Some(item) = arr.get_mut(i) {
                    decrypt_strings(handler, item, reference)?;
                }
            }
        },
        Object::Dictionary(dict) => {
            let keys: Vec<String> = dict.keys().map(str::to_string).collect();
            for key in keys {
                if let Some(item) = dict.get_mut(&key) {
                    decrypt_strings(handler, item, reference)?;
                }
            }
        },
        _ => {},
    }
    Ok(())
}

/// How a class of data (strings or streams) is encrypted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptMethod {
    /// `/Identity` or `/None`: data is stored in the clear
    Identity,
    Rc4,
    /// AES-128-CBC (`/AESV2`)
    AesV2,
    /// AES-256-CBC (`/AESV3`)
    AesV3,
}

impl CryptMethod {
    fn from_cfm(name: &str) -> Result<Self> {
        match name {
            "None" => Ok(CryptMethod::Identity),
            "V2" => Ok(CryptMethod::Rc4),
            "AESV2" => Ok(CryptMethod::AesV2),
            "AESV3" => Ok(CryptMethod::AesV3),
            other => Err(Error::UnsupportedEncryption(format!("crypt filter method /{}", other))),
        }
    }

    pub fn is_aes(self) -> bool {
        matches!(self, CryptMethod::AesV2 | CryptMethod::AesV3)
    }
}

/// Parsed `/Encrypt` dictionary.
#[derive(Debug, Clone)]
pub struct EncryptDict {
    pub filter: String,
    pub sub_filter: Option<String>,
    /// `/V`
    pub version: u32,
    /// `/R`
    pub revision: u32,
    /// Key length in bytes
    pub key_length: usize,
    pub owner_key: Vec<u8>,
    pub user_key: Vec<u8>,
    pub owner_encrypted: Vec<u8>,
    pub user_encrypted: Vec<u8>,
    pub permissions: i32,
    pub encrypt_metadata: bool,
    pub string_method: CryptMethod,
    pub stream_method: CryptMethod,
}

fn invalid(msg: impl Into<String>) -> Error {
    Error::InvalidEncryptionDict(msg.into())
}

fn string_entry(dict: &Dictionary, key: &str) -> Option<Vec<u8>> {
    dict.get(key).and_then(Object::as_string).map(|s| s.as_bytes().to_vec())
}

impl EncryptDict {
    pub fn from_dict(dict: &Dictionary) -> Result<Self> {
        let filter = dict
            .get_name("Filter")
            .ok_or_else(|| invalid("missing /Filter"))?
            .to_string();
        if filter != "Standard" {
            return Err(Error::UnsupportedEncryption(format!("security handler /{}", filter)));
        }

        let version = dict
            .get_integer("V")
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(0);
        let revision = dict
            .get_integer("R")
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| invalid("missing /R"))?;
        if !(2..=6).contains(&revision) {
            return Err(Error::UnsupportedEncryption(format!("revision {}", revision)));
        }

        let owner_key = string_entry(dict, "O").ok_or_else(|| invalid("missing /O"))?;
        let user_key = string_entry(dict, "U").ok_or_else(|| invalid("missing /U"))?;
        let min_len = if revision >= 5 { 48 } else { 32 };
        if owner_key.len() < min_len || user_key.len() < min_len {
            return Err(invalid(format!("/O or /U shorter than {} bytes", min_len)));
        }
        // /P is a 32-bit pattern, often written unsigned
        let permissions = dict
            .get_integer("P")
            .ok_or_else(|| invalid("missing /P"))? as i32;
        let encrypt_metadata = dict
            .get("EncryptMetadata")
            .and_then(Object::as_bool)
            .unwrap_or(true);

        let (key_length, string_method, stream_method) = match version {
            1 => (5, CryptMethod::Rc4, CryptMethod::Rc4),
            2 | 3 => {
                let bits = dict.get_integer("Length").unwrap_or(40);
                if bits % 8 != 0 || !(40..=128).contains(&bits) {
                    return Err(invalid(format!("/Length {}", bits)));
                }
                ((bits / 8) as usize, CryptMethod::Rc4, CryptMethod::Rc4)
            },
            4 | 5 => {
                let strings = crypt_filter_method(dict, "StrF")?;
                let streams = crypt_filter_method(dict, "StmF")?;
                let key_length = if version == 5 { 32 } else { 16 };
                (key_length, strings, streams)
            },
            other => return Err(Error::UnsupportedEncryption(format!("/V {}", other))),
        };

        let (owner_encrypted, user_encrypted) = if revision >= 5 {
            (
                string_entry(dict, "OE").ok_or_else(|| invalid("missing /OE"))?,
                string_entry(dict, "UE").ok_or_else(|| invalid("missing /UE"))?,
            )
        } else {
            (Vec::new(), Vec::new())
        };

        Ok(EncryptDict {
            filter,
            sub_filter: dict.get_name("SubFilter").map(str::to_string),
            version,
            revision,
            key_length,
            owner_key,
            user_key,
            owner_encrypted,
            user_encrypted,
            permissions,
            encrypt_metadata,
            string_method,
            stream_method,
        })
    }

    pub fn permissions(&self) -> Permissions {
        Permissions::from_bits(self.permissions)
    }
}

/// Resolve `/StrF` or `/StmF` through `/CF`. Missing means `/Identity`.
fn crypt_filter_method(dict: &Dictionary, key: &str) -> Result<CryptMethod> {
    let name = match dict.get_name(key) {
        None | Some("Identity") => return Ok(CryptMethod::Identity),
        Some(name) => name,
    };
    let filter = dict
        .get("CF")
        .and_then(Object::as_dict)
        .and_then(|cf| cf.get(name))
        .and_then(Object::as_dict)
        .ok_or_else(|| invalid(format!("crypt filter /{} not defined in /CF", name)))?;
    match filter.get_name("CFM") {
        None => Ok(CryptMethod::Identity),
        Some(cfm) => CryptMethod::from_cfm(cfm),
    }
}

/// User access permissions (`/P`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Permissions {
    bits: i32,
}

impl Permissions {
    pub fn from_bits(bits: i32) -> Self {
        Self { bits }
    }

    pub fn bits(&self) -> i32 {
        self.bits
    }

    fn has(&self, bit: u32) -> bool {
        self.bits & (1 << (bit - 1)) != 0
    }

    pub fn can_print(&self) -> bool {
        self.has(3)
    }

    pub fn can_modify(&self) -> bool {
        self.has(4)
    }

    pub fn can_copy(&self) -> bool {
        self.has(5)
    }

    pub fn can_annotate(&self) -> bool {
        self.has(6)
    }

    pub fn can_fill_forms(&self) -> bool {
        self.has(9)
    }

    pub fn can_assemble(&self) -> bool {
        self.has(11)
    }

    pub fn can_print_high_quality(&self) -> bool {
        self.has(12)
    }
}
