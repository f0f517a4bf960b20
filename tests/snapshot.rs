//! Suspend/resume coverage: a party written to snapshot bytes and restored
//! at any step boundary must continue the exchange exactly where it stopped.

mod common;

use common::{as_encryption, new_initiator, new_responder, run_handshake, Party};
use link_session::handshake::{
    AuthenticationProtocolInitiator, AuthenticationProtocolResponder,
};
use link_session::{CertificateCheckMode, Error, ProtocolMode, Result, Session};

fn reload_initiator(
    instance: AuthenticationProtocolInitiator,
) -> Result<AuthenticationProtocolInitiator> {
    AuthenticationProtocolInitiator::restore(&instance.snapshot()?)
}

fn reload_responder(
    instance: AuthenticationProtocolResponder,
) -> Result<AuthenticationProtocolResponder> {
    AuthenticationProtocolResponder::restore(&instance.snapshot()?)
}

#[test]
fn handshake_survives_reload_at_every_boundary() -> Result<()> {
    let initiator_party = Party::generate();
    let responder_party = Party::generate();
    let modes = [ProtocolMode::AuthenticatedEncryption];
    let mut initiator = new_initiator("resumable", &modes);
    let mut responder = new_responder("resumable");

    initiator = reload_initiator(initiator)?;
    responder = reload_responder(responder)?;

    let initiator_hello = initiator.generate_initiator_hello()?;
    initiator = reload_initiator(initiator)?;
    responder.receive_initiator_hello(&initiator_hello)?;
    responder = reload_responder(responder)?;
    let responder_hello = responder.generate_responder_hello()?;
    responder = reload_responder(responder)?;
    initiator.receive_responder_hello(&responder_hello)?;
    initiator = reload_initiator(initiator)?;

    initiator.generate_handshake_secrets()?;
    initiator = reload_initiator(initiator)?;
    responder.generate_handshake_secrets()?;
    responder = reload_responder(responder)?;

    let initiator_handshake = initiator.generate_our_handshake_message(
        &initiator_party.identity,
        None,
        initiator_party.sign(),
    )?;
    initiator = reload_initiator(initiator)?;
    responder
        .validate_peer_handshake_message(&initiator_handshake, &[initiator_party.identity.clone()])?;
    responder = reload_responder(responder)?;
    responder.validate_encrypted_extensions(&CertificateCheckMode::NoCertificate, &modes, None)?;
    // Same step before and after extension validation; both shapes must
    // survive the reload.
    responder = reload_responder(responder)?;
    let responder_handshake = responder.generate_our_handshake_message(
        &responder_party.identity,
        None,
        responder_party.sign(),
    )?;
    responder = reload_responder(responder)?;
    initiator.validate_peer_handshake_message(
        &responder_handshake,
        None,
        &[responder_party.identity.clone()],
    )?;
    initiator = reload_initiator(initiator)?;

    let mut initiator_session = as_encryption(initiator.get_session()?);
    let mut responder_session = as_encryption(responder.get_session()?);
    let message = initiator_session.encrypt_data(b"resumed fine")?;
    assert_eq!(responder_session.decrypt_data(&message)?, b"resumed fine");
    let reply = responder_session.encrypt_data(b"ack")?;
    assert_eq!(initiator_session.decrypt_data(&reply)?, b"ack");
    Ok(())
}

#[test]
fn a_taken_session_stays_taken_across_reload() -> Result<()> {
    let initiator_party = Party::generate();
    let responder_party = Party::generate();
    let mut initiator = new_initiator("taken", &[ProtocolMode::AuthenticatedEncryption]);
    let mut responder = new_responder("taken");
    run_handshake(
        &mut initiator,
        &mut responder,
        &initiator_party,
        &responder_party,
        &[ProtocolMode::AuthenticatedEncryption],
    )?;

    let _session = initiator.get_session()?;
    let mut initiator = reload_initiator(initiator)?;
    assert!(matches!(
        initiator.get_session(),
        Err(Error::SessionAlreadyTaken)
    ));
    Ok(())
}

#[test]
fn sessions_resume_mid_stream_without_reusing_sequences() -> Result<()> {
    let initiator_party = Party::generate();
    let responder_party = Party::generate();
    let mut initiator = new_initiator("stream", &[ProtocolMode::AuthenticatedEncryption]);
    let mut responder = new_responder("stream");
    run_handshake(
        &mut initiator,
        &mut responder,
        &initiator_party,
        &responder_party,
        &[ProtocolMode::AuthenticatedEncryption],
    )?;

    let mut sender = as_encryption(initiator.get_session()?);
    let mut receiver = as_encryption(responder.get_session()?);

    let first = sender.encrypt_data(b"entry 1")?;
    let bytes = Session::AuthenticatedEncryption(sender).snapshot()?;
    let mut sender = as_encryption(Session::restore(&bytes)?);
    let second = sender.encrypt_data(b"entry 2")?;

    assert_eq!(first.header.sequence, 0);
    assert_eq!(second.header.sequence, 1);
    assert_eq!(receiver.decrypt_data(&first)?, b"entry 1");
    assert_eq!(receiver.decrypt_data(&second)?, b"entry 2");

    let reply = receiver.encrypt_data(b"seen both")?;
    assert_eq!(sender.decrypt_data(&reply)?, b"seen both");
    Ok(())
}

#[test]
fn snapshot_bytes_only_restore_into_their_own_type() -> Result<()> {
    let mut initiator = new_initiator("typed", &[ProtocolMode::AuthenticatedEncryption]);
    initiator.generate_initiator_hello()?;
    let initiator_bytes = initiator.snapshot()?;

    assert!(matches!(
        AuthenticationProtocolResponder::restore(&initiator_bytes),
        Err(Error::MalformedSnapshot("not a responder record"))
    ));
    assert!(matches!(
        Session::restore(&initiator_bytes),
        Err(Error::MalformedSnapshot("not a session record"))
    ));

    let responder_bytes = new_responder("typed").snapshot()?;
    assert!(matches!(
        AuthenticationProtocolInitiator::restore(&responder_bytes),
        Err(Error::MalformedSnapshot("not an initiator record"))
    ));
    Ok(())
}

#[test]
fn garbage_bytes_do_not_restore() {
    assert!(AuthenticationProtocolInitiator::restore(b"not a snapshot").is_err());
    assert!(AuthenticationProtocolResponder::restore(&[]).is_err());
    assert!(Session::restore(&[0x0f; 64]).is_err());
}
