// SPDX-FileCopyrightText: 2024-2025 deltapply contributors
// SPDX-License-Identifier: GPL-3.0-only

//! End-to-end scenarios for the streaming delta performer: payloads are
//! assembled in memory, applied to temp-file partitions, and the resulting
//! partition contents and durable progress state are checked byte for byte.

use std::{fs, io::Write, os::unix::fs::PermissionsExt, path::Path};

use assert_matches::assert_matches;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bzip2::{write::BzEncoder, Compression};
use rsa::{pkcs8::EncodePublicKey, Pkcs1v15Sign, RsaPrivateKey};
use sha2::Sha256;

use deltapply::{
    hasher::{self, HashCalculator},
    performer::{DeltaPerformer, Error},
    prefs::{
        MemPrefs, Prefs, MANIFEST_METADATA_SIZE, UPDATE_CHECK_RESPONSE_HASH,
        UPDATE_STATE_NEXT_DATA_OFFSET, UPDATE_STATE_NEXT_OPERATION,
    },
    protobuf::delta_update::{
        mod_InstallOperation::Type, mod_Signatures::Signature, DeltaArchiveManifest, Extent,
        InstallOperation, Signatures,
    },
    terminator::Terminator,
    util,
};

const SPARSE_HOLE: u64 = u64::MAX;

fn extent(start_block: u64, num_blocks: u64) -> Extent {
    Extent {
        start_block: Some(start_block),
        num_blocks: Some(num_blocks),
    }
}

fn extents(raw: &[(u64, u64)]) -> Vec<Extent> {
    raw.iter().map(|&(s, n)| extent(s, n)).collect()
}

fn replace_op(dst: &[(u64, u64)], data: &[u8]) -> (InstallOperation, Vec<u8>) {
    let op = InstallOperation {
        type_pb: Type::REPLACE,
        dst_extents: extents(dst),
        dst_length: Some(data.len() as u64),
        ..Default::default()
    };

    (op, data.to_vec())
}

fn replace_bz_op(dst: &[(u64, u64)], plain: &[u8], dst_length: u64) -> (InstallOperation, Vec<u8>) {
    let mut encoder = BzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(plain).unwrap();
    let compressed = encoder.finish().unwrap();

    let op = InstallOperation {
        type_pb: Type::REPLACE_BZ,
        dst_extents: extents(dst),
        dst_length: Some(dst_length),
        ..Default::default()
    };

    (op, compressed)
}

fn move_op(src: &[(u64, u64)], dst: &[(u64, u64)]) -> (InstallOperation, Vec<u8>) {
    let op = InstallOperation {
        type_pb: Type::MOVE,
        src_extents: extents(src),
        dst_extents: extents(dst),
        ..Default::default()
    };

    (op, Vec::new())
}

fn bsdiff_op(
    src: &[(u64, u64)],
    src_length: u64,
    dst: &[(u64, u64)],
    dst_length: u64,
    patch: &[u8],
) -> (InstallOperation, Vec<u8>) {
    let op = InstallOperation {
        type_pb: Type::BSDIFF,
        src_extents: extents(src),
        src_length: Some(src_length),
        dst_extents: extents(dst),
        dst_length: Some(dst_length),
        ..Default::default()
    };

    (op, patch.to_vec())
}

fn sign_digest_blob(key: &RsaPrivateKey, digest: &[u8]) -> Vec<u8> {
    let data = key.sign(Pkcs1v15Sign::new::<Sha256>(), digest).unwrap();

    let signatures = Signatures {
        signatures: vec![Signature {
            version: Some(1),
            data: Some(data),
        }],
    };

    util::write_protobuf(&signatures).unwrap()
}

/// Assemble a payload: data blobs are densely packed in operation order,
/// rootfs list first. With a signing key, a trailing REPLACE operation
/// carrying the signature blob is appended to the kernel list, targeting a
/// sparse-hole scratch extent.
fn build_payload(
    block_size: u32,
    rootfs_ops: Vec<(InstallOperation, Vec<u8>)>,
    kernel_ops: Vec<(InstallOperation, Vec<u8>)>,
    signing_key: Option<&RsaPrivateKey>,
) -> Vec<u8> {
    let mut manifest = DeltaArchiveManifest {
        block_size,
        ..Default::default()
    };
    let mut blobs = Vec::new();
    let mut offset = 0u64;

    for (ops, out) in [
        (rootfs_ops, &mut manifest.install_operations),
        (kernel_ops, &mut manifest.kernel_install_operations),
    ] {
        for (mut op, blob) in ops {
            if op.type_pb != Type::MOVE {
                op.data_offset = Some(offset);
                op.data_length = Some(blob.len() as u64);
                blobs.extend_from_slice(&blob);
                offset += blob.len() as u64;
            }
            out.push(op);
        }
    }

    if let Some(key) = signing_key {
        let signatures_size = sign_digest_blob(key, &[0u8; 32]).len() as u64;
        let num_blocks = signatures_size.div_ceil(u64::from(block_size));

        manifest.signatures_offset = Some(offset);
        manifest.signatures_size = Some(signatures_size);
        manifest.kernel_install_operations.push(InstallOperation {
            type_pb: Type::REPLACE,
            data_offset: Some(offset),
            data_length: Some(signatures_size),
            dst_extents: vec![extent(SPARSE_HOLE, num_blocks)],
            dst_length: Some(signatures_size),
            ..Default::default()
        });
    }

    let manifest_raw = util::write_protobuf(&manifest).unwrap();

    let mut payload = Vec::new();
    payload.extend_from_slice(b"CrAU");
    payload.extend_from_slice(&1u64.to_be_bytes());
    payload.extend_from_slice(&(manifest_raw.len() as u64).to_be_bytes());
    payload.extend_from_slice(&manifest_raw);
    payload.extend_from_slice(&blobs);

    if let Some(key) = signing_key {
        // The signed digest covers everything before the signature bytes.
        let signed_digest = hasher::sha256(&payload);
        let blob = sign_digest_blob(key, &signed_digest);
        assert_eq!(Some(blob.len() as u64), manifest.signatures_size);
        payload.extend_from_slice(&blob);
    }

    payload
}

fn partition_file(contents: &[u8]) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents).unwrap();
    file.flush().unwrap();
    file
}

fn read_partition(path: &Path) -> Vec<u8> {
    fs::read(path).unwrap()
}

/// Feed the whole payload in chunks of `chunk_size` and close. Returns the
/// finalized payload digest.
fn apply_payload(
    payload: &[u8],
    rootfs: &Path,
    kernel: &Path,
    prefs: &MemPrefs,
    chunk_size: usize,
) -> [u8; 32] {
    let terminator = Terminator::new();
    let mut performer = DeltaPerformer::new(prefs, &terminator);
    performer.open_rootfs(rootfs).unwrap();
    performer.open_kernel(kernel).unwrap();

    for chunk in payload.chunks(chunk_size) {
        assert_eq!(performer.write(chunk).unwrap(), chunk.len());
    }

    performer.close().unwrap();
    *performer.digest().unwrap()
}

#[test]
fn replace_full_block() {
    let payload = build_payload(4, vec![replace_op(&[(0, 1)], b"ABCD")], vec![], None);

    let rootfs = partition_file(b"ZZZZZZZZ");
    let kernel = partition_file(b"ZZZZ");
    let prefs = MemPrefs::new();

    apply_payload(&payload, rootfs.path(), kernel.path(), &prefs, payload.len());

    assert_eq!(read_partition(rootfs.path()), b"ABCDZZZZ");
    assert_eq!(read_partition(kernel.path()), b"ZZZZ");
}

#[test]
fn replace_with_tail_zero_pad() {
    let payload = build_payload(4, vec![replace_op(&[(0, 2)], b"HELLO")], vec![], None);

    let rootfs = partition_file(b"ZZZZZZZZ");
    let kernel = partition_file(b"ZZZZ");
    let prefs = MemPrefs::new();

    apply_payload(&payload, rootfs.path(), kernel.path(), &prefs, payload.len());

    assert_eq!(read_partition(rootfs.path()), b"HELLO\0\0\0");
}

#[test]
fn replace_bz_decompresses() {
    let payload = build_payload(4, vec![replace_bz_op(&[(3, 1)], b"XYZ", 3)], vec![], None);

    let rootfs = partition_file(&[b'Z'; 16]);
    let kernel = partition_file(b"ZZZZ");
    let prefs = MemPrefs::new();

    apply_payload(&payload, rootfs.path(), kernel.path(), &prefs, payload.len());

    let contents = read_partition(rootfs.path());
    assert_eq!(&contents[..12], &[b'Z'; 12]);
    assert_eq!(&contents[12..], b"XYZ\0");
}

#[test]
fn move_non_overlapping() {
    let payload = build_payload(4, vec![move_op(&[(0, 1)], &[(1, 1)])], vec![], None);

    let rootfs = partition_file(b"AAAABBBB");
    let kernel = partition_file(b"ZZZZ");
    let prefs = MemPrefs::new();

    apply_payload(&payload, rootfs.path(), kernel.path(), &prefs, payload.len());

    assert_eq!(read_partition(rootfs.path()), b"AAAAAAAA");
}

/// Stub patch executable: writes 5 bytes at the start of the target and
/// records the positions it was called with.
fn stub_bspatch(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("stub_bspatch.sh");

    fs::write(
        &path,
        "#!/bin/sh\n\
         printf 'HELLO' | dd of=\"$2\" bs=1 conv=notrunc 2>/dev/null\n\
         printf '%s\\n%s\\n' \"$4\" \"$5\" > \"$2.positions\"\n",
    )
    .unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();

    path
}

#[test]
fn bsdiff_zeroes_tail_of_final_block() {
    let dir = tempfile::tempdir().unwrap();
    let bspatch_path = stub_bspatch(dir.path());

    let payload = build_payload(
        4,
        vec![bsdiff_op(&[(0, 1)], 4, &[(0, 2)], 5, b"PATCH")],
        vec![],
        None,
    );

    let rootfs = partition_file(b"QQQQQQQQ");
    let kernel = partition_file(b"ZZZZ");
    let prefs = MemPrefs::new();

    let terminator = Terminator::new();
    let mut performer = DeltaPerformer::new(&prefs, &terminator);
    performer.set_bspatch_path(&bspatch_path);
    performer.open_rootfs(rootfs.path()).unwrap();
    performer.open_kernel(kernel.path()).unwrap();
    performer.write(&payload).unwrap();
    performer.close().unwrap();

    // The stub wrote 5 bytes; the performer must zero the rest of the final
    // destination block.
    assert_eq!(read_partition(rootfs.path()), b"HELLO\0\0\0");

    let positions = fs::read_to_string(format!("{}.positions", rootfs.path().display())).unwrap();
    assert_eq!(positions, "0:4\n0:5\n");
}

#[test]
fn bsdiff_failure_is_fatal() {
    let payload = build_payload(
        4,
        vec![bsdiff_op(&[(0, 1)], 4, &[(0, 1)], 4, b"PATCH")],
        vec![],
        None,
    );

    let rootfs = partition_file(b"QQQQ");
    let kernel = partition_file(b"ZZZZ");
    let prefs = MemPrefs::new();

    let terminator = Terminator::new();
    let mut performer = DeltaPerformer::new(&prefs, &terminator);
    performer.set_bspatch_path(Path::new("false"));
    performer.open_rootfs(rootfs.path()).unwrap();
    performer.open_kernel(kernel.path()).unwrap();

    assert_matches!(performer.write(&payload), Err(Error::Patch(_)));
}

fn sample_payload() -> (Vec<u8>, &'static [u8], &'static [u8]) {
    let rootfs_initial: &[u8] = b"ZZZZZZZZZZZZ";
    let kernel_initial: &[u8] = b"MMMMNNNN";

    let payload = build_payload(
        4,
        vec![
            replace_op(&[(0, 1)], b"ABCD"),
            replace_bz_op(&[(1, 2)], b"WXYZWXYZ", 8),
        ],
        vec![
            move_op(&[(0, 1)], &[(1, 1)]),
            replace_op(&[(0, 1)], b"KERN"),
        ],
        None,
    );

    (payload, rootfs_initial, kernel_initial)
}

const SAMPLE_ROOTFS_FINAL: &[u8] = b"ABCDWXYZWXYZ";
const SAMPLE_KERNEL_FINAL: &[u8] = b"KERNMMMM";

#[test]
fn split_delivery_is_equivalent_to_single_call() {
    let (payload, rootfs_initial, kernel_initial) = sample_payload();

    let rootfs_a = partition_file(rootfs_initial);
    let kernel_a = partition_file(kernel_initial);
    let prefs_a = MemPrefs::new();
    let digest_a = apply_payload(&payload, rootfs_a.path(), kernel_a.path(), &prefs_a, payload.len());

    // Byte-at-a-time delivery must produce identical partitions and state.
    let rootfs_b = partition_file(rootfs_initial);
    let kernel_b = partition_file(kernel_initial);
    let prefs_b = MemPrefs::new();
    let digest_b = apply_payload(&payload, rootfs_b.path(), kernel_b.path(), &prefs_b, 1);

    assert_eq!(digest_a, digest_b);
    assert_eq!(read_partition(rootfs_a.path()), SAMPLE_ROOTFS_FINAL);
    assert_eq!(read_partition(rootfs_b.path()), SAMPLE_ROOTFS_FINAL);
    assert_eq!(read_partition(kernel_a.path()), SAMPLE_KERNEL_FINAL);
    assert_eq!(read_partition(kernel_b.path()), SAMPLE_KERNEL_FINAL);

    for key in [
        UPDATE_STATE_NEXT_OPERATION,
        UPDATE_STATE_NEXT_DATA_OFFSET,
        MANIFEST_METADATA_SIZE,
        // The stored context reflects the last checkpoint, which is the same
        // in both runs.
        deltapply::prefs::UPDATE_STATE_SHA256_CONTEXT,
    ] {
        assert_eq!(
            prefs_a.get_string(key).unwrap(),
            prefs_b.get_string(key).unwrap(),
            "prefs key {key}",
        );
    }
}

#[test]
fn checkpoint_state_matches_consumed_prefix() {
    let (payload, rootfs_initial, kernel_initial) = sample_payload();

    let rootfs = partition_file(rootfs_initial);
    let kernel = partition_file(kernel_initial);
    let prefs = MemPrefs::new();

    apply_payload(&payload, rootfs.path(), kernel.path(), &prefs, payload.len());

    assert_eq!(prefs.get_i64(UPDATE_STATE_NEXT_OPERATION).unwrap(), Some(4));

    let metadata_size = prefs.get_i64(MANIFEST_METADATA_SIZE).unwrap().unwrap() as usize;
    let next_data_offset = prefs
        .get_i64(UPDATE_STATE_NEXT_DATA_OFFSET)
        .unwrap()
        .unwrap() as usize;
    assert_eq!(metadata_size + next_data_offset, payload.len());

    // The stored context must decode to the hash of the consumed prefix.
    let context = prefs
        .get_string(deltapply::prefs::UPDATE_STATE_SHA256_CONTEXT)
        .unwrap()
        .unwrap();
    let mut calculator = HashCalculator::new();
    calculator.set_context(&context).unwrap();
    calculator.finalize().unwrap();
    assert_eq!(
        calculator.digest().unwrap(),
        &hasher::sha256(&payload[..metadata_size + next_data_offset]),
    );
}

#[test]
fn resume_across_interruption() {
    let (payload, rootfs_initial, kernel_initial) = sample_payload();
    let expected_digest = hasher::sha256(&payload);

    // Uninterrupted reference run.
    let rootfs_ref = partition_file(rootfs_initial);
    let kernel_ref = partition_file(kernel_initial);
    let prefs_ref = MemPrefs::new();
    let digest_ref = apply_payload(
        &payload,
        rootfs_ref.path(),
        kernel_ref.path(),
        &prefs_ref,
        payload.len(),
    );
    assert_eq!(digest_ref, expected_digest);

    let rootfs = partition_file(rootfs_initial);
    let kernel = partition_file(kernel_initial);
    let prefs = MemPrefs::new();
    prefs
        .set_string(UPDATE_CHECK_RESPONSE_HASH, &STANDARD.encode(expected_digest))
        .unwrap();

    let metadata_size = prefs_ref.get_i64(MANIFEST_METADATA_SIZE).unwrap().unwrap() as usize;

    // Deliver two chunks: through the middle of the manifest, then through
    // the first blob plus part of the second. Only operation 0 can complete.
    let terminator = Terminator::new();
    let mut performer = DeltaPerformer::new(&prefs, &terminator);
    performer.open_rootfs(rootfs.path()).unwrap();
    performer.open_kernel(kernel.path()).unwrap();
    performer.write(&payload[..metadata_size - 5]).unwrap();
    performer
        .write(&payload[metadata_size - 5..metadata_size + 6])
        .unwrap();
    assert_eq!(performer.next_operation_num(), 1);

    // Crash: the performer (and its buffered bytes) are gone.
    drop(performer);

    assert!(DeltaPerformer::can_resume_update(&prefs, &expected_digest));

    // Reconstruct from the store and re-deliver from byte 0; the performer
    // skips what was already consumed and hashed.
    let terminator = Terminator::new();
    let mut performer = DeltaPerformer::new(&prefs, &terminator);
    performer.open_rootfs(rootfs.path()).unwrap();
    performer.open_kernel(kernel.path()).unwrap();
    performer.prime_update_state().unwrap();

    for chunk in payload.chunks(7) {
        performer.write(chunk).unwrap();
    }
    performer.close().unwrap();

    assert_eq!(performer.digest().unwrap(), &expected_digest);
    assert_eq!(read_partition(rootfs.path()), SAMPLE_ROOTFS_FINAL);
    assert_eq!(read_partition(kernel.path()), SAMPLE_KERNEL_FINAL);
    assert_eq!(prefs.get_i64(UPDATE_STATE_NEXT_OPERATION).unwrap(), Some(4));
}

#[test]
fn verify_payload_checks_hash_size_and_signature() {
    let mut rng = rand::thread_rng();
    let key = RsaPrivateKey::new(&mut rng, 2048).unwrap();

    let payload = build_payload(
        4,
        vec![replace_op(&[(0, 1)], b"ABCD")],
        vec![],
        Some(&key),
    );
    let expected_digest = hasher::sha256(&payload);

    let pem = key
        .to_public_key()
        .to_public_key_pem(rsa::pkcs8::LineEnding::LF)
        .unwrap();
    let mut key_file = tempfile::NamedTempFile::new().unwrap();
    key_file.write_all(pem.as_bytes()).unwrap();
    key_file.flush().unwrap();

    let rootfs = partition_file(b"ZZZZZZZZ");
    let kernel = partition_file(b"ZZZZ");
    let prefs = MemPrefs::new();

    let terminator = Terminator::new();
    let mut performer = DeltaPerformer::new(&prefs, &terminator);
    performer.open_rootfs(rootfs.path()).unwrap();
    performer.open_kernel(kernel.path()).unwrap();
    performer.write(&payload).unwrap();
    performer.close().unwrap();

    performer
        .verify_payload(
            Some(key_file.path()),
            &expected_digest,
            payload.len() as u64,
        )
        .unwrap();

    // The signed hash context was persisted when the signature was extracted.
    assert!(prefs
        .get_string(deltapply::prefs::UPDATE_STATE_SIGNED_SHA256_CONTEXT)
        .unwrap()
        .is_some());

    assert_matches!(
        performer.verify_payload(Some(key_file.path()), &[0u8; 32], payload.len() as u64),
        Err(Error::DownloadHashMismatch { .. })
    );
    assert_matches!(
        performer.verify_payload(
            Some(key_file.path()),
            &expected_digest,
            payload.len() as u64 + 1,
        ),
        Err(Error::DownloadSizeMismatch { .. })
    );

    // A payload signed with a different key must not verify.
    let other_key = RsaPrivateKey::new(&mut rng, 2048).unwrap();
    let other_pem = other_key
        .to_public_key()
        .to_public_key_pem(rsa::pkcs8::LineEnding::LF)
        .unwrap();
    let mut other_file = tempfile::NamedTempFile::new().unwrap();
    other_file.write_all(other_pem.as_bytes()).unwrap();
    other_file.flush().unwrap();
    assert_matches!(
        performer.verify_payload(
            Some(other_file.path()),
            &expected_digest,
            payload.len() as u64,
        ),
        Err(Error::Crypto(_))
    );

    // Missing key file downgrades the signature check to a warning.
    performer
        .verify_payload(
            Some(Path::new("/nonexistent/key.pub.pem")),
            &expected_digest,
            payload.len() as u64,
        )
        .unwrap();
}

#[test]
fn signature_bytes_are_written_to_their_extents() {
    let mut rng = rand::thread_rng();
    let key = RsaPrivateKey::new(&mut rng, 2048).unwrap();

    // Give the signature operation real destination extents instead of a
    // scratch hole and check the on-partition copy.
    let (mut op, blob) = replace_op(&[(0, 1)], b"ABCD");
    op.data_offset = Some(0);
    op.data_length = Some(blob.len() as u64);

    let signatures_size = sign_digest_blob(&key, &[0u8; 32]).len() as u64;
    let num_blocks = signatures_size.div_ceil(4);

    let manifest = DeltaArchiveManifest {
        block_size: 4,
        install_operations: vec![
            op,
            InstallOperation {
                type_pb: Type::REPLACE,
                data_offset: Some(blob.len() as u64),
                data_length: Some(signatures_size),
                dst_extents: vec![extent(1, num_blocks)],
                dst_length: Some(signatures_size),
                ..Default::default()
            },
        ],
        signatures_offset: Some(blob.len() as u64),
        signatures_size: Some(signatures_size),
        ..Default::default()
    };

    let manifest_raw = util::write_protobuf(&manifest).unwrap();
    let mut payload = Vec::new();
    payload.extend_from_slice(b"CrAU");
    payload.extend_from_slice(&1u64.to_be_bytes());
    payload.extend_from_slice(&(manifest_raw.len() as u64).to_be_bytes());
    payload.extend_from_slice(&manifest_raw);
    payload.extend_from_slice(&blob);

    let signed_digest = hasher::sha256(&payload);
    let signature_blob = sign_digest_blob(&key, &signed_digest);
    assert_eq!(signature_blob.len() as u64, signatures_size);
    payload.extend_from_slice(&signature_blob);

    let rootfs = partition_file(&vec![b'Z'; (1 + num_blocks as usize) * 4]);
    let kernel = partition_file(b"ZZZZ");
    let prefs = MemPrefs::new();

    let digest = apply_payload(&payload, rootfs.path(), kernel.path(), &prefs, payload.len());
    assert_eq!(digest, hasher::sha256(&payload));

    // The signature blob is the payload tail; it must appear on the
    // partition starting at block 1.
    let contents = read_partition(rootfs.path());
    let sig_len = signatures_size as usize;
    let sig_bytes = &payload[payload.len() - sig_len..];
    assert_eq!(&contents[..4], b"ABCD");
    assert_eq!(&contents[4..4 + sig_len], sig_bytes);
}

#[test]
fn close_with_pending_bytes_fails() {
    let payload = build_payload(4, vec![replace_op(&[(0, 1)], b"ABCD")], vec![], None);

    let rootfs = partition_file(b"ZZZZZZZZ");
    let kernel = partition_file(b"ZZZZ");
    let prefs = MemPrefs::new();

    let terminator = Terminator::new();
    let mut performer = DeltaPerformer::new(&prefs, &terminator);
    performer.open_rootfs(rootfs.path()).unwrap();
    performer.open_kernel(kernel.path()).unwrap();

    // Deliver a truncated payload plus garbage that never completes the
    // declared blob.
    performer.write(&payload[..payload.len() - 2]).unwrap();
    performer.write(b"!").unwrap();

    assert_matches!(performer.close(), Err(Error::PendingBuffer(_)));
}

#[test]
fn data_below_buffer_offset_is_fatal() {
    // Two operations whose blobs both claim offset 0: after the first
    // consumes it, the second needs already-discarded bytes.
    let (op_a, blob_a) = replace_op(&[(0, 1)], b"ABCD");
    let (op_b, _) = replace_op(&[(1, 1)], b"EFGH");

    let mut manifest = DeltaArchiveManifest {
        block_size: 4,
        ..Default::default()
    };
    let mut op_a = op_a;
    op_a.data_offset = Some(0);
    op_a.data_length = Some(4);
    let mut op_b = op_b;
    op_b.data_offset = Some(0);
    op_b.data_length = Some(4);
    manifest.install_operations = vec![op_a, op_b];

    let manifest_raw = util::write_protobuf(&manifest).unwrap();
    let mut payload = Vec::new();
    payload.extend_from_slice(b"CrAU");
    payload.extend_from_slice(&1u64.to_be_bytes());
    payload.extend_from_slice(&(manifest_raw.len() as u64).to_be_bytes());
    payload.extend_from_slice(&manifest_raw);
    payload.extend_from_slice(&blob_a);

    let rootfs = partition_file(b"ZZZZZZZZ");
    let kernel = partition_file(b"ZZZZ");
    let prefs = MemPrefs::new();

    let terminator = Terminator::new();
    let mut performer = DeltaPerformer::new(&prefs, &terminator);
    performer.open_rootfs(rootfs.path()).unwrap();
    performer.open_kernel(kernel.path()).unwrap();

    assert_matches!(
        performer.write(&payload),
        Err(Error::DataAlreadyConsumed { index: 1, .. })
    );
}

#[test]
fn bad_magic_rejected_early() {
    let rootfs = partition_file(b"ZZZZ");
    let kernel = partition_file(b"ZZZZ");
    let prefs = MemPrefs::new();

    let terminator = Terminator::new();
    let mut performer = DeltaPerformer::new(&prefs, &terminator);
    performer.open_rootfs(rootfs.path()).unwrap();
    performer.open_kernel(kernel.path()).unwrap();

    let mut payload = Vec::new();
    payload.extend_from_slice(b"NOPE");
    payload.extend_from_slice(&1u64.to_be_bytes());
    payload.extend_from_slice(&0u64.to_be_bytes());

    assert_matches!(performer.write(&payload), Err(Error::Format(_)));
}
