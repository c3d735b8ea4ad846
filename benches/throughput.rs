use std::io::Cursor;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use ocpkg_core::decorator::{RawPipe, RawReadPipe, StreamDecorator};
use ocpkg_core::entropy::MuxEntropy;
use ocpkg_core::item::ItemBinding;
use ocpkg_core::model::{
    AuthFunctionName, AuthFunctionType, AuthenticationConfiguration, CipherConfiguration, CipherFamily,
    CipherName, CsprngCipherName, CsprngConfiguration, ItemType, PayloadItem,
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
        "bench.bin",
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

fn bench_item_encryption(c: &mut Criterion) {
    let mut group = c.benchmark_group("item_encrypt_then_mac");
    for size in [1024usize, 64 * 1024, 1024 * 1024] {
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let item = aes_gcm_item(size);
            let plaintext = vec![0x42u8; size];
            b.iter(|| {
                let mut writer =
                    ItemBinding::open(&item, RawPipe::new(Vec::<u8>::new()), CipherDirection::Writing).unwrap();
                writer.write_exactly(&plaintext).unwrap();
                writer.finish_into_inner().unwrap()
            });
        });
    }
    group.finish();
}

fn bench_item_decryption(c: &mut Criterion) {
    let mut group = c.benchmark_group("item_decrypt_then_verify");
    for size in [1024usize, 64 * 1024, 1024 * 1024] {
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let item = aes_gcm_item(size);
            let plaintext = vec![0x42u8; size];
            let mut writer =
                ItemBinding::open(&item, RawPipe::new(Vec::<u8>::new()), CipherDirection::Writing).unwrap();
            writer.write_exactly(&plaintext).unwrap();
            let (tag, pipe) = writer.finish_into_inner().unwrap();
            let ciphertext = pipe.into_inner();
            let mut item = item;
            item.verified_output = tag;

            b.iter(|| {
                let mut reader = ItemBinding::open(
                    &item,
                    RawReadPipe::new(Cursor::new(ciphertext.clone())),
                    CipherDirection::Reading,
                )
                .unwrap();
                let mut recovered = vec![0u8; plaintext.len()];
                reader.read_exactly(&mut recovered).unwrap();
                reader.finish().unwrap();
                recovered
            });
        });
    }
    group.finish();
}

fn bench_mux_entropy_draws(c: &mut Criterion) {
    c.bench_function("mux_entropy_next_stripe_length", |b| {
        let cfg = CsprngConfiguration {
            cipher: CsprngCipherName::Salsa20,
            key: vec![3u8; 32],
            nonce: vec![4u8; 8],
        };
        let mut entropy = MuxEntropy::new(&cfg).unwrap();
        b.iter(|| entropy.next(8, 32_768).unwrap());
    });
}

criterion_group!(benches, bench_item_encryption, bench_item_decryption, bench_mux_entropy_draws);
criterion_main!(benches);
