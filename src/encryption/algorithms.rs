//! Standard security handler key derivation (ISO 32000-2, 7.6.4).
//!
//! Revisions 2-4 derive an RC4/AES-128 file key from MD5 over the padded
//! password (Algorithm 2) and check it against `/U` (Algorithms 4/5). The
//! owner password recovers the user password from `/O` (Algorithm 7).
//! Revisions 5/6 hash the password with SHA-256 (R5) or Algorithm 2.B (R6)
//! and unwrap the file key from `/UE` or `/OE`.

use super::aes;
use super::rc4::rc4_crypt;
use md5::{Digest, Md5};
use sha2::{Sha256, Sha384, Sha512};

/// Password padding string (Algorithm 2, step a).
pub(crate) const PADDING: &[u8; 32] = b"\x28\xBF\x4E\x5E\x4E\x75\x8A\x41\
                                          \x64\x00\x4E\x56\xFF\xFA\x01\x08\
                                          \x2E\x2E\x00\xB6\xD0\x68\x3E\x80\
                                          \x2F\x0C\xA9\xFE\x64\x53\x69\x7A";

/// `/O`, `/U`, `/P` and friends needed by the MD5-based revisions.
#[derive(Debug, Clone, Copy)]
pub(crate) struct KeyInputs<'a> {
    pub owner_key: &'a [u8],
    pub user_key: &'a [u8],
    pub permissions: i32,
    pub file_id: &'a [u8],
    pub revision: u32,
    pub key_length: usize,
    pub encrypt_metadata: bool,
}

/// Truncate or pad a password to 32 bytes.
pub(crate) fn pad_password(password: &[u8]) -> [u8; 32] {
    let mut padded = [0u8; 32];
    let len = password.len().min(32);
    padded[..len].copy_from_slice(&password[..len]);
    padded[len..].copy_from_slice(&PADDING[..32 - len]);
    padded
}

fn xor_key(key: &[u8], i: u8) -> Vec<u8> {
    key.iter().map(|b| b ^ i).collect()
}

/// Algorithm 2: file key from a user password.
pub(crate) fn compute_file_key(password: &[u8], inputs: &KeyInputs<'_>) -> Vec<u8> {
    let key_length = inputs.key_length.clamp(5, 16);
    let mut hasher = Md5::new();
    hasher.update(pad_password(password));
    hasher.update(inputs.owner_key);
    hasher.update(inputs.permissions.to_le_bytes());
    hasher.update(inputs.file_id);
    if inputs.revision >= 4 && !inputs.encrypt_metadata {
        hasher.update([0xFF, 0xFF, 0xFF, 0xFF]);
    }
    let mut hash = hasher.finalize().to_vec();

    if inputs.revision >= 3 {
        for _ in 0..50 {
            hash = Md5::digest(&hash[..key_length]).to_vec();
        }
    }
    hash.truncate(if inputs.revision == 2 { 5 } else { key_length });
    hash
}

/// Algorithms 4/5: expected `/U` for a file key. Only the first 16 bytes
/// are meaningful for revision 3 and later.
pub(crate) fn compute_user_key(file_key: &[u8], file_id: &[u8], revision: u32) -> Vec<u8> {
    if revision == 2 {
        return rc4_crypt(file_key, PADDING);
    }
    let mut hasher = Md5::new();
    hasher.update(PADDING);
    hasher.update(file_id);
    let mut hash = hasher.finalize().to_vec();
    for i in 0..20u8 {
        hash = rc4_crypt(&xor_key(file_key, i), &hash);
    }
    hash.resize(32, 0);
    hash
}

/// Algorithm 6: check a user password; returns the file key on success.
pub(crate) fn authenticate_user_password(password: &[u8], inputs: &KeyInputs<'_>) -> Option<Vec<u8>> {
    let key = compute_file_key(password, inputs);
    let expected = compute_user_key(&key, inputs.file_id, inputs.revision);
    let compared = if inputs.revision == 2 { 32 } else { 16 };
    if inputs.user_key.len() < compared {
        return None;
    }
    constant_time_compare(&inputs.user_key[..compared], &expected[..compared]).then_some(key)
}

/// RC4 key derived from the owner password (Algorithm 3, steps a-d).
fn owner_rc4_key(owner_password: &[u8], revision: u32, key_length: usize) -> Vec<u8> {
    let key_length = if revision == 2 { 5 } else { key_length.clamp(5, 16) };
    let mut hash = Md5::digest(pad_password(owner_password)).to_vec();
    if revision >= 3 {
        for _ in 0..50 {
            hash = Md5::digest(&hash).to_vec();
        }
    }
    hash.truncate(key_length);
    hash
}

/// Algorithm 3: `/O` for an owner and user password.
pub(crate) fn compute_owner_key(owner_password: &[u8], user_password: &[u8], revision: u32, key_length: usize) -> Vec<u8> {
    let owner = if owner_password.is_empty() { user_password } else { owner_password };
    let key = owner_rc4_key(owner, revision, key_length);
    let mut result = rc4_crypt(&key, &pad_password(user_password));
    if revision >= 3 {
        for i in 1..=19u8 {
            result = rc4_crypt(&xor_key(&key, i), &result);
        }
    }
    result
}

/// Algorithm 7: check an owner password; returns the file key on success.
pub(crate) fn authenticate_owner_password(password: &[u8], inputs: &KeyInputs<'_>) -> Option<Vec<u8>> {
    let key = owner_rc4_key(password, inputs.revision, inputs.key_length);
    let mut user_password = inputs.owner_key.get(..32)?.to_vec();
    if inputs.revision == 2 {
        user_password = rc4_crypt(&key, &user_password);
    } else {
        for i in (0..20u8).rev() {
            user_password = rc4_crypt(&xor_key(&key, i), &user_password);
        }
    }
    authenticate_user_password(&user_password, inputs)
}

/// Password hash for revisions 5 and 6 (Algorithm 2.B for R6).
pub(crate) fn hash_r6(password: &[u8], salt: &[u8], udata: &[u8], revision: u32) -> Option<[u8; 32]> {
    let mut k: Vec<u8> = {
        let mut h = Sha256::new();
        h.update(password);
        h.update(salt);
        h.update(udata);
        h.finalize().to_vec()
    };
    if revision == 5 {
        return k.try_into().ok();
    }

    let mut round: usize = 0;
    loop {
        let mut k1 = Vec::with_capacity(64 * (password.len() + k.len() + udata.len()));
        for _ in 0..64 {
            k1.extend_from_slice(password);
            k1.extend_from_slice(&k);
            k1.extend_from_slice(udata);
        }
        let e = aes::aes128_cbc_encrypt_no_padding(&k[..16], &k[16..32], &k1).ok()?;
        let selector: u32 = e[..16].iter().map(|&b| b as u32).sum::<u32>() % 3;
        k = match selector {
            0 => Sha256::digest(&e).to_vec(),
            1 => Sha384::digest(&e).to_vec(),
            _ => Sha512::digest(&e).to_vec(),
        };
        let last = *e.last()? as usize;
        if round >= 63 && last <= round - 31 {
            break;
        }
        round += 1;
    }
    k[..32].try_into().ok()
}

/// Algorithm 2.A: file key for revisions 5/6, trying the owner password first.
pub(crate) fn authenticate_r6(
    password: &[u8],
    owner_key: &[u8],
    user_key: &[u8],
    owner_encrypted: &[u8],
    user_encrypted: &[u8],
    revision: u32,
) -> Option<Vec<u8>> {
    let password = &password[..password.len().min(127)];
    if owner_key.len() < 48 || user_key.len() < 48 {
        return None;
    }
    let udata = &user_key[..48];

    let owner_hash = hash_r6(password, &owner_key[32..40], udata, revision)?;
    if constant_time_compare(&owner_hash, &owner_key[..32]) {
        let key = hash_r6(password, &owner_key[40..48], udata, revision)?;
        return aes::aes256_cbc_decrypt_zero_iv(&key, owner_encrypted.get(..32)?).ok();
    }

    let user_hash = hash_r6(password, &user_key[32..40], &[], revision)?;
    if constant_time_compare(&user_hash, &user_key[..32]) {
        let key = hash_r6(password, &user_key[40..48], &[], revision)?;
        return aes::aes256_cbc_decrypt_zero_iv(&key, user_encrypted.get(..32)?).ok();
    }
    None
}

fn constant_time_compare(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs<'a>(owner_key: &'a [u8], user_key: &'a [u8], revision: u32, key_length: usize) -> KeyInputs<'a> {
        KeyInputs {
            owner_key,
            user_key,
            permissions: -44,
            file_id: b"0123456789abcdef",
            revision,
            key_length,
            encrypt_metadata: true,
        }
    }

    #[test]
    fn test_pad_password() {
        assert_eq!(&pad_password(b"")[..], &PADDING[..]);
        let padded = pad_password(b"abc");
        assert_eq!(&padded[..3], b"abc");
        assert_eq!(&padded[3..], &PADDING[..29]);
    }

    #[test]
    fn test_user_and_owner_passwords_r2() {
        let owner_key = compute_owner_key(b"owner", b"user", 2, 5);
        let probe = inputs(&owner_key, &[], 2, 5);
        let file_key = compute_file_key(b"user", &probe);
        assert_eq!(file_key.len(), 5);
        let user_key = compute_user_key(&file_key, probe.file_id, 2);

        let full = inputs(&owner_key, &user_key, 2, 5);
        assert_eq!(authenticate_user_password(b"user", &full), Some(file_key.clone()));
        assert_eq!(authenticate_user_password(b"wrong", &full), None);
        assert_eq!(authenticate_owner_password(b"owner", &full), Some(file_key));
        assert_eq!(authenticate_owner_password(b"nope", &full), None);
    }

    #[test]
    fn test_user_and_owner_passwords_r3() {
        let owner_key = compute_owner_key(b"", b"", 3, 16);
        let probe = inputs(&owner_key, &[], 3, 16);
        let file_key = compute_file_key(b"", &probe);
        assert_eq!(file_key.len(), 16);
        let user_key = compute_user_key(&file_key, probe.file_id, 3);
        assert_eq!(user_key.len(), 32);

        let full = inputs(&owner_key, &user_key, 3, 16);
        assert_eq!(authenticate_user_password(b"", &full), Some(file_key.clone()));
        // Empty owner password means the owner key was built from the user password
        assert_eq!(authenticate_owner_password(b"", &full), Some(file_key));
    }

    #[test]
    fn test_r5_hash_is_plain_sha256() {
        let h = hash_r6(b"pw", b"saltsalt", &[], 5).unwrap();
        let expected: [u8; 32] = Sha256::digest(b"pwsaltsalt").into();
        assert_eq!(h, expected);
    }

    #[test]
    fn test_r6_hash_is_deterministic() {
        let a = hash_r6(b"pw", b"saltsalt", &[], 6).unwrap();
        let b = hash_r6(b"pw", b"saltsalt", &[], 6).unwrap();
        let c = hash_r6(b"px", b"saltsalt", &[], 6).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_r6_round_trip() {
        // Build /U and /UE for a known file key the way a writer would
        let file_key = [7u8; 32];
        let validation_salt = *b"vsaltvsa";
        let key_salt = *b"ksaltksa";
        let mut user_key = hash_r6(b"secret", &validation_salt, &[], 6).unwrap().to_vec();
        user_key.extend_from_slice(&validation_salt);
        user_key.extend_from_slice(&key_salt);
        let wrap_key = hash_r6(b"secret", &key_salt, &[], 6).unwrap();
        let user_encrypted = aes::aes256_cbc_encrypt_zero_iv(&wrap_key, &file_key).unwrap();

        let owner_key = vec![0u8; 48];
        let recovered = authenticate_r6(b"secret", &owner_key, &user_key, &[0u8; 32], &user_encrypted, 6);
        assert_eq!(recovered, Some(file_key.to_vec()));
        assert_eq!(authenticate_r6(b"wrong", &owner_key, &user_key, &[0u8; 32], &user_encrypted, 6), None);
    }
}
