//! All blob encryption uses AES-256 in CBC mode.
//!
//! Every storage area has a 32-byte area key. The area key is never used to encrypt data
//! directly. Instead, every blob gets a fresh random 16-byte salt, and the AES key and IV
//! for that blob are derived with PBKDF2-HMAC-SHA1 (52,768 rounds) using the area key as
//! the password. The first 32 bytes of the derived material are the AES key, and the next
//! 16 bytes are the IV.
//!
//! An encrypted blob has the following layout:
//!
//! - salt (128 bits)
//! - AES-256-CBC ciphertext of the whole file content
//!
//! The last block is padded according to ISO 10126: the padding consists of random
//! non-zero bytes, and its last byte holds the padding length (1 to 16). A block-aligned
//! plaintext therefore gains a whole block of padding, and the ciphertext of an empty
//! file is exactly one block long.
//!
//! Content is processed in 1 MiB chunks, so files of any size can be streamed through
//! the cipher with constant memory. The format carries no authentication tag: a wrong key
//! or a corrupted blob is only detected if the padding turns out invalid.

mod cipher;
mod io;

pub use {
    cipher::{
        BLOCK_LENGTH, BlobKey, CipherError, Decryptor, Encryptor, KEY_DERIVATION_ROUNDS,
        SALT_LENGTH, Salt,
    },
    io::{CHUNK_LENGTH, StreamCipher, read_salt},
};
