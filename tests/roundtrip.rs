//! Round-trip integration tests (SPEC_FULL §8 S1-S3): an item written
//! through the Encrypt-then-MAC stack must decrypt back to the same
//! plaintext, and tampering with the ciphertext must fail authentication
//! rather than silently decode.

use ocpkg_core::decorator::{RawPipe, RawReadPipe, StreamDecorator};
use ocpkg_core::item::ItemBinding;
use ocpkg_core::model::{
    AuthFunctionName, AuthFunctionType, AuthenticationConfiguration, CipherConfiguration, CipherFamily,
    CipherName, ItemType, PayloadItem,
};
use ocpkg_core::primitives::cipher::CipherDirection;

fn aes_gcm_item(plaintext_len: usize) -> PayloadItem {
    let cipher = CipherConfiguration {
        name: CipherName::Aes256Gcm,
        family: CipherFamily::Aead { associated_data: Vec::new(), mac_size: 16 },
        key_size_bits: 256,
        iv: vec![9u8; 7],
    };
    let auth = AuthenticationConfiguration {
        function_type: AuthFunctionType::Mac,
        function_name: AuthFunctionName::HmacSha256,
        key_size_bits: 256,
        salt: Vec::new(),
        nonce: Vec::new(),
        output_size: 32,
        poly1305_pre_clamped: false,
    };
    let mut item = PayloadItem::new(
        "greeting.txt",
        ItemType::File,
        cipher,
        vec![7u8; 32],
        auth,
        vec![11u8; 32],
        None,
    );
    item.external_length = plaintext_len as u64;
    item
}

fn encrypt(item: &PayloadItem, plaintext: &[u8]) -> (Vec<u8>, Vec<u8>) {
    let mut writer = ItemBinding::open(item, RawPipe::new(Vec::<u8>::new()), CipherDirection::Writing).unwrap();
    writer.write_exactly(plaintext).unwrap();
    let (tag, pipe) = writer.finish_into_inner().unwrap();
    (pipe.into_inner(), tag)
}

#[test]
fn aead_item_round_trips_through_encrypt_then_mac() {
    let mut item = aes_gcm_item(11);
    let plaintext = b"hello world";
    let (ciphertext, tag) = encrypt(&item, plaintext);
    assert_ne!(ciphertext, plaintext);
    item.verified_output = tag;

    let mut reader = ItemBinding::open(
        &item,
        RawReadPipe::new(std::io::Cursor::new(ciphertext)),
        CipherDirection::Reading,
    )
    .unwrap();
    let mut recovered = vec![0u8; plaintext.len()];
    let mut filled = 0;
    while filled < recovered.len() {
        let n = reader.read(&mut recovered[filled..]).unwrap();
        assert!(n > 0);
        filled += n;
    }
    reader.finish().unwrap();
    assert_eq!(recovered, plaintext);
}

#[test]
fn empty_item_round_trips() {
    let mut item = aes_gcm_item(0);
    let (ciphertext, tag) = encrypt(&item, b"");
    item.verified_output = tag;

    let mut reader = ItemBinding::open(
        &item,
        RawReadPipe::new(std::io::Cursor::new(ciphertext)),
        CipherDirection::Reading,
    )
    .unwrap();
    let mut recovered = Vec::new();
    let mut chunk = [0u8; 16];
    loop {
        let n = reader.read(&mut chunk).unwrap();
        if n == 0 {
            break;
        }
        recovered.extend_from_slice(&chunk[..n]);
    }
    reader.finish().unwrap();
    assert!(recovered.is_empty());
}

#[test]
fn tampered_ciphertext_fails_authentication() {
    let mut item = aes_gcm_item(11);
    let plaintext = b"hello world";
    let (mut ciphertext, tag) = encrypt(&item, plaintext);
    item.verified_output = tag;
    let last = ciphertext.len() - 1;
    ciphertext[last] ^= 0x01;

    let mut reader = ItemBinding::open(
        &item,
        RawReadPipe::new(std::io::Cursor::new(ciphertext)),
        CipherDirection::Reading,
    )
    .unwrap();
    let mut recovered = vec![0u8; plaintext.len()];
    let mut filled = 0;
    let mut saw_error = false;
    while filled < recovered.len() {
        match reader.read(&mut recovered[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(_) => {
                saw_error = true;
                break;
            }
        }
    }
    if !saw_error {
        assert!(reader.finish().is_err());
    }
}
