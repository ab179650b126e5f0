//! Drives `TlsEngine` against a real `rustls::ClientConnection` entirely
//! in memory (no socket, no worker thread) to exercise the handshake and
//! application-data record loop — the TLS counterpart to
//! `runtime::connection`'s socketpair unit tests.
//!
//! Cert/key generation uses `rcgen::generate_simple_self_signed` for a
//! self-signed "localhost" cert, trusted directly by the client's
//! `RootCertStore` (no CA chain involved).

use std::io::{Read, Write};
use std::sync::Arc;

use echo_iocp::runtime::tls_engine::{AcceptStepStatus, DecryptStatus, TlsEngine};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::{ClientConfig, ClientConnection, RootCertStore, ServerConfig};

fn make_configs() -> (Arc<ServerConfig>, ClientConnection) {
    let certified_key = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let cert_der = CertificateDer::from(certified_key.cert.der().to_vec());
    let key_der = PrivateKeyDer::try_from(certified_key.key_pair.serialize_der()).unwrap();

    let server_config = ServerConfig::builder_with_protocol_versions(&[&rustls::version::TLS12])
        .with_no_client_auth()
        .with_single_cert(vec![cert_der.clone()], key_der)
        .unwrap();

    let mut roots = RootCertStore::empty();
    roots.add(cert_der).unwrap();
    let client_config = ClientConfig::builder_with_protocol_versions(&[&rustls::version::TLS12])
        .with_root_certificates(roots)
        .with_no_client_auth();

    let server_name = ServerName::try_from("localhost".to_string()).unwrap();
    let client = ClientConnection::new(Arc::new(client_config), server_name).unwrap();

    (Arc::new(server_config), client)
}

/// Runs the handshake to completion, feeding the client's output through
/// `engine.accept_step` and the engine's output back into the client,
/// bounded to a generous round-trip count so a protocol regression fails
/// the test instead of hanging.
fn run_handshake(engine: &mut TlsEngine, client: &mut ClientConnection) {
    for _ in 0..10 {
        let mut client_to_server = Vec::new();
        while client.wants_write() {
            match client.write_tls(&mut client_to_server).unwrap() {
                0 => break,
                _ => {}
            }
        }
        if client_to_server.is_empty() {
            break;
        }

        let (status, server_to_client) = engine.accept_step(&client_to_server).unwrap();
        assert!(!matches!(status, AcceptStepStatus::Error), "handshake step failed");

        if !server_to_client.is_empty() {
            let mut cursor = &server_to_client[..];
            client.read_tls(&mut cursor).unwrap();
            client.process_new_packets().unwrap();
        }

        if !client.is_handshaking() {
            break;
        }
    }
    assert!(!client.is_handshaking(), "handshake did not complete");
}

#[test]
fn handshake_completes_and_application_data_round_trips() {
    let (server_config, mut client) = make_configs();
    let mut engine = TlsEngine::new(server_config).unwrap();

    run_handshake(&mut engine, &mut client);

    // Client -> server application data.
    client.writer().write_all(b"hello").unwrap();
    let mut client_to_server = Vec::new();
    while client.wants_write() {
        if client.write_tls(&mut client_to_server).unwrap() == 0 {
            break;
        }
    }
    let mut user_out = vec![0u8; 4096];
    match engine.decrypt_record(&client_to_server, &mut user_out).unwrap() {
        DecryptStatus::Ok { plaintext_len, .. } => assert_eq!(&user_out[..plaintext_len], b"hello"),
        other => panic!("expected Ok, got {other:?}"),
    }

    // Server -> client application data.
    let wire = engine.encrypt_record(b"world").unwrap();
    let mut cursor = &wire[..];
    client.read_tls(&mut cursor).unwrap();
    client.process_new_packets().unwrap();
    let mut buf = [0u8; 4096];
    let n = client.reader().read(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"world");
}

#[test]
fn multiple_application_records_round_trip_in_sequence() {
    let (server_config, mut client) = make_configs();
    let mut engine = TlsEngine::new(server_config).unwrap();
    run_handshake(&mut engine, &mut client);

    for message in [b"first".as_slice(), b"second-message".as_slice(), b"3".as_slice()] {
        let mut wire = Vec::new();
        client.writer().write_all(message).unwrap();
        while client.wants_write() {
            if client.write_tls(&mut wire).unwrap() == 0 {
                break;
            }
        }
        let mut user_out = vec![0u8; 4096];
        match engine.decrypt_record(&wire, &mut user_out).unwrap() {
            DecryptStatus::Ok { plaintext_len, .. } => assert_eq!(&user_out[..plaintext_len], message),
            other => panic!("expected Ok, got {other:?}"),
        }

        let wire_back = engine.encrypt_record(message).unwrap();
        let mut cursor = &wire_back[..];
        client.read_tls(&mut cursor).unwrap();
        client.process_new_packets().unwrap();
        let mut buf = vec![0u8; 4096];
        let n = client.reader().read(&mut buf).unwrap();
        assert_eq!(&buf[..n], message);
    }
}

/// A peer-initiated `close_notify` must surface as `ContextExpired`, not as
/// a zero-length `Ok` application record — `rustls` treats the alert as
/// non-fatal post-handshake and only the plaintext reader's `Ok(0)`
/// distinguishes "peer closed" from "no data decoded yet".
#[test]
fn peer_close_notify_surfaces_as_context_expired() {
    let (server_config, mut client) = make_configs();
    let mut engine = TlsEngine::new(server_config).unwrap();
    run_handshake(&mut engine, &mut client);

    client.send_close_notify();
    let mut wire = Vec::new();
    while client.wants_write() {
        if client.write_tls(&mut wire).unwrap() == 0 {
            break;
        }
    }

    let mut user_out = vec![0u8; 4096];
    match engine.decrypt_record(&wire, &mut user_out).unwrap() {
        DecryptStatus::ContextExpired => {}
        other => panic!("expected ContextExpired, got {other:?}"),
    }
}

/// Two records pipelined into the same TCP segment must not lose or
/// reorder bytes: whatever `decrypt_record` doesn't hand back on the first
/// call, `read_additional_plaintext` must drain before the engine reports
/// nothing left, regardless of whether `rustls` coalesced both records'
/// plaintext into one `reader().read()` call or kept them apart.
#[test]
fn pipelined_records_drain_via_read_additional_plaintext() {
    let (server_config, mut client) = make_configs();
    let mut engine = TlsEngine::new(server_config).unwrap();
    run_handshake(&mut engine, &mut client);

    client.writer().write_all(b"first").unwrap();
    client.writer().write_all(b"second").unwrap();
    let mut wire = Vec::new();
    while client.wants_write() {
        if client.write_tls(&mut wire).unwrap() == 0 {
            break;
        }
    }

    let mut user_out = vec![0u8; 4096];
    let first_len = match engine.decrypt_record(&wire, &mut user_out).unwrap() {
        DecryptStatus::Ok { plaintext_len, .. } => plaintext_len,
        other => panic!("expected Ok, got {other:?}"),
    };
    let mut combined = user_out[..first_len].to_vec();

    let mut more = vec![0u8; 4096];
    while let Some(n) = engine.read_additional_plaintext(&mut more).unwrap() {
        combined.extend_from_slice(&more[..n]);
    }

    assert_eq!(combined, b"firstsecond");
}
