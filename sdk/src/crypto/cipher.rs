use {
    aes::Aes256,
    cbc::cipher::{
        BlockDecryptMut, BlockEncryptMut, KeyIvInit, generic_array::GenericArray,
    },
    pbkdf2::pbkdf2_hmac,
    rand::{Rng, TryRngCore, rngs::OsRng},
    sha1::Sha1,
    sharebucket_protocol::AreaKey,
    std::{cmp::min, io, mem},
    thiserror::Error,
    zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing},
};

pub const SALT_LENGTH: usize = 16;
pub const BLOCK_LENGTH: usize = 16;
pub const KEY_DERIVATION_ROUNDS: u32 = 52_768;

const AES_KEY_LENGTH: usize = 32;
const IV_LENGTH: usize = 16;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

#[derive(Debug, Error)]
pub enum CipherError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("encrypted content is truncated")]
    Truncated,
    #[error("invalid padding (wrong key or corrupted content)")]
    BadPadding,
    #[error("failed to generate random salt: {0}")]
    Random(String),
    #[error("invalid key or IV length")]
    InvalidKeyLength,
}

/// Random value stored at the beginning of every blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Salt([u8; SALT_LENGTH]);

impl Salt {
    #[inline]
    pub fn generate() -> Result<Self, CipherError> {
        let mut salt = [0u8; SALT_LENGTH];
        OsRng
            .try_fill_bytes(&mut salt)
            .map_err(|err| CipherError::Random(err.to_string()))?;
        Ok(Self(salt))
    }

    #[must_use]
    #[inline]
    pub fn from_bytes(bytes: [u8; SALT_LENGTH]) -> Self {
        Self(bytes)
    }

    #[must_use]
    #[inline]
    pub fn as_bytes(&self) -> &[u8; SALT_LENGTH] {
        &self.0
    }
}

/// AES key and IV of a single blob.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct BlobKey {
    key: [u8; AES_KEY_LENGTH],
    iv: [u8; IV_LENGTH],
}

impl BlobKey {
    /// Runs PBKDF2 over the area key. This is slow on purpose; call it off the async
    /// executor (see `maybe_block_in_place`).
    #[must_use]
    #[inline]
    pub fn derive(area_key: &AreaKey, salt: &Salt) -> Self {
        let mut material = Zeroizing::new([0u8; AES_KEY_LENGTH + IV_LENGTH]);
        pbkdf2_hmac::<Sha1>(
            area_key.get(),
            salt.as_bytes(),
            KEY_DERIVATION_ROUNDS,
            &mut *material,
        );
        let mut blob_key = Self {
            key: [0; AES_KEY_LENGTH],
            iv: [0; IV_LENGTH],
        };
        let (key, iv) = material.split_at(AES_KEY_LENGTH);
        blob_key.key.copy_from_slice(key);
        blob_key.iv.copy_from_slice(iv);
        blob_key
    }
}

/// Incremental AES-256-CBC encryption with ISO 10126 padding.
pub struct Encryptor {
    inner: Aes256CbcEnc,
    // Plaintext that doesn't fill a whole block yet.
    pending: Vec<u8>,
}

impl Encryptor {
    #[inline]
    pub fn new(key: &BlobKey) -> Result<Self, CipherError> {
        let inner = Aes256CbcEnc::new_from_slices(&key.key, &key.iv)
            .map_err(|_| CipherError::InvalidKeyLength)?;
        Ok(Self {
            inner,
            pending: Vec::with_capacity(BLOCK_LENGTH),
        })
    }

    /// Encrypts every complete block of `pending + input` and appends it to `output`.
    #[inline]
    pub fn update(&mut self, mut input: &[u8], output: &mut Vec<u8>) {
        let start = output.len();
        if !self.pending.is_empty() {
            let missing = BLOCK_LENGTH.saturating_sub(self.pending.len());
            let (head, rest) = input.split_at(min(missing, input.len()));
            self.pending.extend_from_slice(head);
            input = rest;
            if self.pending.len() < BLOCK_LENGTH {
                return;
            }
            output.append(&mut self.pending);
        }
        let aligned = input.len().saturating_sub(input.len() % BLOCK_LENGTH);
        let (blocks, tail) = input.split_at(aligned);
        output.extend_from_slice(blocks);
        self.pending.extend_from_slice(tail);
        let (_, fresh) = output.split_at_mut(start);
        for block in fresh.chunks_exact_mut(BLOCK_LENGTH) {
            self.inner
                .encrypt_block_mut(GenericArray::from_mut_slice(block));
        }
    }

    /// Pads and encrypts the last block.
    #[inline]
    pub fn finish(mut self, output: &mut Vec<u8>) {
        let mut block = [0u8; BLOCK_LENGTH];
        let (data, padding) = block.split_at_mut(self.pending.len());
        data.copy_from_slice(&self.pending);
        self.pending.zeroize();
        let mut rng = rand::rng();
        for byte in &mut *padding {
            *byte = rng.random_range(1..=u8::MAX);
        }
        #[expect(
            clippy::as_conversions,
            clippy::cast_possible_truncation,
            reason = "padding is 1 to 16 bytes long"
        )]
        let padding_len = padding.len() as u8;
        if let Some(last) = padding.last_mut() {
            *last = padding_len;
        }
        self.inner
            .encrypt_block_mut(GenericArray::from_mut_slice(&mut block));
        output.extend_from_slice(&block);
    }
}

/// Incremental AES-256-CBC decryption with ISO 10126 padding.
pub struct Decryptor {
    inner: Aes256CbcDec,
    // Ciphertext that is not decrypted yet. The last complete block is always kept here
    // because it carries the padding.
    pending: Vec<u8>,
}

impl Decryptor {
    #[inline]
    pub fn new(key: &BlobKey) -> Result<Self, CipherError> {
        let inner = Aes256CbcDec::new_from_slices(&key.key, &key.iv)
            .map_err(|_| CipherError::InvalidKeyLength)?;
        Ok(Self {
            inner,
            pending: Vec::new(),
        })
    }

    #[inline]
    pub fn update(&mut self, input: &[u8], output: &mut Vec<u8>) {
        self.pending.extend_from_slice(input);
        let held_back = match self.pending.len() % BLOCK_LENGTH {
            0 => BLOCK_LENGTH,
            partial => partial,
        };
        let ready = self.pending.len().saturating_sub(held_back);
        if ready == 0 {
            return;
        }
        let start = output.len();
        output.extend(self.pending.drain(..ready));
        let (_, fresh) = output.split_at_mut(start);
        for block in fresh.chunks_exact_mut(BLOCK_LENGTH) {
            self.inner
                .decrypt_block_mut(GenericArray::from_mut_slice(block));
        }
    }

    /// Decrypts the last block and strips the padding.
    #[inline]
    pub fn finish(mut self, output: &mut Vec<u8>) -> Result<(), CipherError> {
        let pending = mem::take(&mut self.pending);
        let mut block: [u8; BLOCK_LENGTH] = pending
            .as_slice()
            .try_into()
            .map_err(|_| CipherError::Truncated)?;
        self.inner
            .decrypt_block_mut(GenericArray::from_mut_slice(&mut block));
        let padding_len = usize::from(block.last().copied().unwrap_or_default());
        let data_len = BLOCK_LENGTH
            .checked_sub(padding_len)
            .filter(|_| padding_len > 0)
            .ok_or(CipherError::BadPadding)?;
        let (data, _) = block.split_at(data_len);
        output.extend_from_slice(data);
        block.zeroize();
        Ok(())
    }
}

#[cfg(test)]
#[expect(
    clippy::default_numeric_fallback,
    clippy::indexing_slicing,
    reason = "test"
)]
mod tests {
    use super::*;

    fn key() -> BlobKey {
        BlobKey::derive(&AreaKey::from_bytes([7; 32]), &Salt::from_bytes([3; 16]))
    }

    fn encrypt(plaintext: &[u8], piece: usize) -> Vec<u8> {
        let mut encryptor = Encryptor::new(&key()).unwrap();
        let mut output = Vec::new();
        for chunk in plaintext.chunks(piece) {
            encryptor.update(chunk, &mut output);
        }
        encryptor.finish(&mut output);
        output
    }

    fn decrypt(ciphertext: &[u8], piece: usize) -> Result<Vec<u8>, CipherError> {
        let mut decryptor = Decryptor::new(&key()).unwrap();
        let mut output = Vec::new();
        for chunk in ciphertext.chunks(piece) {
            decryptor.update(chunk, &mut output);
        }
        decryptor.finish(&mut output)?;
        Ok(output)
    }

    #[test]
    fn padded_length() {
        for (len, expected) in [(0, 16), (1, 16), (15, 16), (16, 32), (17, 32), (100, 112)] {
            assert_eq!(encrypt(&vec![1; len], 7).len(), expected, "len {len}");
        }
    }

    #[test]
    fn roundtrip_with_uneven_pieces() {
        let plaintext: Vec<u8> = (0..1000).map(|_| rand::random::<u8>()).collect();
        for piece in [1, 5, 16, 33, 1000] {
            let ciphertext = encrypt(&plaintext, piece);
            assert_ne!(&ciphertext[..16], &plaintext[..16]);
            for decrypt_piece in [1, 16, 17, 2000] {
                assert_eq!(decrypt(&ciphertext, decrypt_piece).unwrap(), plaintext);
            }
        }
        assert_eq!(decrypt(&encrypt(&[], 1), 1).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn chunking_does_not_change_ciphertext_prefix() {
        // Padding is random, so only complete blocks are deterministic.
        let plaintext = vec![42u8; 64];
        let a = encrypt(&plaintext, 3);
        let b = encrypt(&plaintext, 64);
        assert_eq!(a[..64], b[..64]);
    }

    #[test]
    fn derivation_depends_on_salt_and_key() {
        let area_key = AreaKey::from_bytes([7; 32]);
        let a = BlobKey::derive(&area_key, &Salt::from_bytes([1; 16]));
        let b = BlobKey::derive(&area_key, &Salt::from_bytes([2; 16]));
        let c = BlobKey::derive(&AreaKey::from_bytes([8; 32]), &Salt::from_bytes([1; 16]));
        assert_ne!(a.key, b.key);
        assert_ne!(a.iv, b.iv);
        assert_ne!(a.key, c.key);
        let again = BlobKey::derive(&area_key, &Salt::from_bytes([1; 16]));
        assert_eq!(a.key, again.key);
        assert_eq!(a.iv, again.iv);
    }

    #[test]
    fn truncated_ciphertext() {
        assert!(matches!(decrypt(&[], 1), Err(CipherError::Truncated)));
        let ciphertext = encrypt(b"hello", 5);
        assert!(matches!(
            decrypt(&ciphertext[..15], 4),
            Err(CipherError::Truncated)
        ));
        let mut longer = encrypt(&[5; 40], 40);
        longer.push(0);
        assert!(matches!(decrypt(&longer, 8), Err(CipherError::Truncated)));
    }

    #[test]
    fn salts_are_random() {
        assert_ne!(Salt::generate().unwrap(), Salt::generate().unwrap());
    }
}
