//! AES-CBC for the standard security handler.
//!
//! Encrypted strings and streams carry a 16-byte IV followed by PKCS#7
//! padded ciphertext. Revision 6 key derivation additionally needs
//! unpadded AES-128-CBC encryption and AES-256-CBC with a zero IV.

use aes::cipher::block_padding::NoPadding;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use aes::{Aes128, Aes256};

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;
type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

const BLOCK: usize = 16;

fn check_blocks(data: &[u8]) -> Result<(), &'static str> {
    if data.len() % BLOCK != 0 {
        return Err("ciphertext length is not a multiple of 16");
    }
    Ok(())
}

/// Strip PKCS#7 padding. Malformed padding leaves the data untouched.
fn strip_padding(mut data: Vec<u8>) -> Vec<u8> {
    if let Some(&last) = data.last() {
        let pad = last as usize;
        if (1..=BLOCK).contains(&pad)
            && pad <= data.len()
            && data[data.len() - pad..].iter().all(|&b| b == last)
        {
            data.truncate(data.len() - pad);
        } else {
            log::debug!("AES payload has malformed padding, kept as is");
        }
    }
    data
}

/// Decrypt `IV || ciphertext` with a 16- or 32-byte key.
pub(crate) fn decrypt_with_iv(key: &[u8], data: &[u8]) -> Result<Vec<u8>, &'static str> {
    if data.is_empty() {
        return Ok(Vec::new());
    }
    if data.len() < BLOCK {
        return Err("AES payload shorter than its IV");
    }
    let (iv, ciphertext) = data.split_at(BLOCK);
    check_blocks(ciphertext)?;
    let mut buffer = ciphertext.to_vec();
    let plain_len = match key.len() {
        16 => Aes128CbcDec::new_from_slices(key, iv)
            .map_err(|_| "invalid AES-128 key or IV")?
            .decrypt_padded_mut::<NoPadding>(&mut buffer)
            .map_err(|_| "AES-128 decryption failed")?
            .len(),
        32 => Aes256CbcDec::new_from_slices(key, iv)
            .map_err(|_| "invalid AES-256 key or IV")?
            .decrypt_padded_mut::<NoPadding>(&mut buffer)
            .map_err(|_| "AES-256 decryption failed")?
            .len(),
        _ => return Err("AES key must be 16 or 32 bytes"),
    };
    buffer.truncate(plain_len);
    Ok(strip_padding(buffer))
}

/// Unpadded AES-128-CBC encryption (Algorithm 2.B, step e).
pub(crate) fn aes128_cbc_encrypt_no_padding(key: &[u8], iv: &[u8], data: &[u8]) -> Result<Vec<u8>, &'static str> {
    check_blocks(data)?;
    let mut buffer = data.to_vec();
    let len = buffer.len();
    Aes128CbcEnc::new_from_slices(key, iv)
        .map_err(|_| "invalid AES-128 key or IV")?
        .encrypt_padded_mut::<NoPadding>(&mut buffer, len)
        .map_err(|_| "AES-128 encryption failed")?;
    Ok(buffer)
}

/// Unwrap `/UE` or `/OE` (AES-256-CBC, zero IV, no padding).
pub(crate) fn aes256_cbc_decrypt_zero_iv(key: &[u8], data: &[u8]) -> Result<Vec<u8>, &'static str> {
    check_blocks(data)?;
    let mut buffer = data.to_vec();
    let len = Aes256CbcDec::new_from_slices(key, &[0u8; BLOCK])
        .map_err(|_| "invalid AES-256 key")?
        .decrypt_padded_mut::<NoPadding>(&mut buffer)
        .map_err(|_| "AES-256 decryption failed")?
        .len();
    buffer.truncate(len);
    Ok(buffer)
}

#[cfg(test)]
pub(crate) fn aes256_cbc_encrypt_zero_iv(key: &[u8], data: &[u8]) -> Result<Vec<u8>, &'static str> {
    check_blocks(data)?;
    let mut buffer = data.to_vec();
    let len = buffer.len();
    Aes256CbcEnc::new_from_slices(key, &[0u8; BLOCK])
        .map_err(|_| "invalid AES-256 key")?
        .encrypt_padded_mut::<NoPadding>(&mut buffer, len)
        .map_err(|_| "AES-256 encryption failed")?;
    Ok(buffer)
}

/// `IV || AES-CBC(PKCS#7(data))`, used to build fixtures.
#[cfg(test)]
pub(crate) fn encrypt_with_iv(key: &[u8], iv: &[u8; 16], data: &[u8]) -> Vec<u8> {
    let pad = BLOCK - data.len() % BLOCK;
    let mut buffer = data.to_vec();
    buffer.extend(std::iter::repeat(pad as u8).take(pad));
    let len = buffer.len();
    match key.len() {
        16 => {
            Aes128CbcEnc::new_from_slices(key, iv)
                .unwrap()
                .encrypt_padded_mut::<NoPadding>(&mut buffer, len)
                .unwrap();
        },
        _ => {
            Aes256CbcEnc::new_from_slices(key, iv)
                .unwrap()
                .encrypt_padded_mut::<NoPadding>(&mut buffer, len)
                .unwrap();
        },
    }
    let mut out = iv.to_vec();
    out.extend_from_slice(&buffer);
    out
}
