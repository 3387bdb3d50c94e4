//! Obfuscator tests: round-trip identity across all ciphers, tamper
//! rejection, buffer arithmetic.

use bytes::Bytes;
use velumstream::frame::{ClosingFlag, Frame};
use velumstream::obfs::{ObfsMethod, Obfuscator, PREFIX_LEN};
use velumstream::{tls, MuxError};
use velumtrust::SessionKey;

const ALL_METHODS: [ObfsMethod; 3] = [
    ObfsMethod::Plain,
    ObfsMethod::AesGcm,
    ObfsMethod::ChaCha20Poly1305,
];

const AEAD_METHODS: [ObfsMethod; 2] = [ObfsMethod::AesGcm, ObfsMethod::ChaCha20Poly1305];

fn obfuscator(method: ObfsMethod) -> Obfuscator {
    Obfuscator::generate(method, SessionKey::new([0x42u8; 32]), false).unwrap()
}

fn obfuscate(obfs: &Obfuscator, frame: &Frame) -> Vec<u8> {
    let mut buf = vec![0u8; obfs.overhead() + frame.payload.len()];
    let n = obfs.obfuscate(frame, &mut buf).unwrap();
    assert_eq!(n, buf.len());
    buf
}

#[test]
fn roundtrip_identity_for_all_ciphers() {
    let frame = Frame::data(3, 7, Bytes::from_static(b"some payload bytes"));
    for method in ALL_METHODS {
        let obfs = obfuscator(method);
        let record = obfuscate(&obfs, &frame);
        let decoded = obfs.deobfuscate(&record).unwrap();
        assert_eq!(decoded, frame, "cipher {method:?}");
    }
}

#[test]
fn roundtrip_closing_frame_for_all_ciphers() {
    let frame = Frame::closing(9, 4);
    for method in ALL_METHODS {
        let obfs = obfuscator(method);
        let decoded = obfs.deobfuscate(&obfuscate(&obfs, &frame)).unwrap();
        assert_eq!(decoded.closing, ClosingFlag::Stream);
        assert!(decoded.payload.is_empty());
    }
}

#[test]
fn records_never_repeat() {
    // Same frame, fresh random prefix every time: distinct records.
    let frame = Frame::data(1, 0, Bytes::from_static(b"identical plaintext"));
    for method in ALL_METHODS {
        let obfs = obfuscator(method);
        let a = obfuscate(&obfs, &frame);
        let b = obfuscate(&obfs, &frame);
        assert_ne!(a[..PREFIX_LEN], b[..PREFIX_LEN]);
        if method != ObfsMethod::Plain {
            assert_ne!(a[PREFIX_LEN..], b[PREFIX_LEN..]);
        }
    }
}

#[test]
fn any_bit_flip_fails_auth() {
    let frame = Frame::data(5, 2, Bytes::from_static(b"tamper target"));
    for method in AEAD_METHODS {
        let obfs = obfuscator(method);
        let record = obfuscate(&obfs, &frame);
        for i in 0..record.len() {
            let mut corrupted = record.clone();
            corrupted[i] ^= 0x01;
            assert!(
                matches!(obfs.deobfuscate(&corrupted), Err(MuxError::AuthFailure)),
                "cipher {method:?}, flipped byte {i}"
            );
        }
    }
}

#[test]
fn wrong_key_fails_auth() {
    let frame = Frame::data(1, 0, Bytes::from_static(b"secret"));
    for method in AEAD_METHODS {
        let sealer = Obfuscator::generate(method, SessionKey::new([0x11u8; 32]), false).unwrap();
        let opener = Obfuscator::generate(method, SessionKey::new([0x22u8; 32]), false).unwrap();
        let record = obfuscate(&sealer, &frame);
        assert!(matches!(
            opener.deobfuscate(&record),
            Err(MuxError::AuthFailure)
        ));
    }
}

#[test]
fn truncated_records_rejected() {
    let frame = Frame::data(1, 0, Bytes::from_static(b"x"));
    for method in ALL_METHODS {
        let obfs = obfuscator(method);
        let short = vec![0u8; obfs.overhead() - 1];
        assert!(
            matches!(
                obfs.deobfuscate(&short),
                Err(MuxError::Truncated { .. })
            ),
            "cipher {method:?}"
        );
        // Sanity: the untruncated record still parses.
        let record = obfuscate(&obfs, &frame);
        obfs.deobfuscate(&record).unwrap();
    }
}

#[test]
fn tls_outer_record_parses_back() {
    let frame = Frame::data(2, 0, Bytes::from_static(b"through the record layer"));
    for method in ALL_METHODS {
        let obfs =
            Obfuscator::generate(method, SessionKey::new([0x42u8; 32]), true).unwrap();
        let mut wire = vec![0u8; obfs.overhead() + frame.payload.len()];
        let n = obfs.obfuscate(&frame, &mut wire).unwrap();
        assert_eq!(n, wire.len());

        let body = tls::read_record(&mut wire.as_slice()).unwrap();
        let decoded = obfs.deobfuscate(&body).unwrap();
        assert_eq!(decoded, frame);
    }
}

#[test]
fn overhead_is_buffer_floor() {
    let frame = Frame::data(1, 0, Bytes::from_static(b"abcdef"));
    for method in ALL_METHODS {
        let obfs = obfuscator(method);
        let mut exact = vec![0u8; obfs.overhead() + frame.payload.len()];
        obfs.obfuscate(&frame, &mut exact).unwrap();

        let mut short = vec![0u8; obfs.overhead() + frame.payload.len() - 1];
        assert!(matches!(
            obfs.obfuscate(&frame, &mut short),
            Err(MuxError::BufferTooSmall { .. })
        ));
    }
}
