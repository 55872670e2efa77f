//! End-to-end provisioning flow tests
//!
//! Exercises the security core the way the wireless transport and network
//! orchestrator consume it: sessions created on connection, payloads routed
//! through encrypt/decrypt, rotation sweeps racing live traffic, and
//! cross-domain calls going through the coordinator.

use std::sync::Arc;
use std::time::Duration;

use provisiond_core::config::SecurityConfig;
use provisiond_core::coordination::{AsyncSyncBridge, ThreadCoordinator};
use provisiond_core::security::SecurityService;

fn service() -> Arc<SecurityService> {
    Arc::new(
        SecurityService::new(SecurityConfig::default(), Arc::new(ThreadCoordinator::new()))
            .expect("service"),
    )
}

#[test]
fn concurrent_roundtrips_do_not_cross_contaminate() {
    let service = service();

    let handles: Vec<_> = (0..20)
        .map(|i| {
            let service = service.clone();
            std::thread::spawn(move || {
                let input = format!("telemetry frame {} from worker", i);
                // Half the workers bind to their own session, half use the
                // master key, mirroring mixed transport traffic.
                let key_id = if i % 2 == 0 {
                    Some(service.create_session(&format!("client-{}", i)).unwrap())
                } else {
                    None
                };

                for _ in 0..5 {
                    let bytes = service.encrypt_data(&input, key_id.as_deref()).unwrap();
                    let output = service.decrypt_data(&bytes, None).unwrap();
                    assert_eq!(output, input, "worker {} got foreign plaintext", i);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
}

#[test]
fn rotation_invalidates_previous_ciphertext() {
    let service = service();
    let session_id = service.create_session("device-42").unwrap();

    let bytes = service
        .encrypt_data("topsecret-ssid-pass", Some(&session_id))
        .unwrap();

    assert!(service.rotate_session_key(&session_id).unwrap());

    // No prior key generations are retained.
    let err = service.decrypt_data(&bytes, None).unwrap_err();
    assert_eq!(err.code(), "ENCRYPTION_FAILED");
}

#[test]
fn ciphertext_never_decrypts_under_another_key() {
    let service = service();
    let session_a = service.create_session("companion-a").unwrap();
    let session_b = service.create_session("companion-b").unwrap();

    let bytes = service
        .encrypt_data("bound to session a", Some(&session_a))
        .unwrap();

    let err = service.decrypt_data(&bytes, Some(&session_b)).unwrap_err();
    assert_eq!(err.code(), "ENCRYPTION_FAILED");

    let err = service.decrypt_data(&bytes, Some("master")).unwrap_err();
    assert_eq!(err.code(), "ENCRYPTION_FAILED");

    assert_eq!(
        service.decrypt_data(&bytes, Some(&session_a)).unwrap(),
        "bound to session a"
    );
}

#[test]
fn rotation_races_live_traffic_on_the_same_session() {
    let service = service();
    let session_id = service.create_session("busy-client").unwrap();

    let rotator = {
        let service = service.clone();
        let session_id = session_id.clone();
        std::thread::spawn(move || {
            for _ in 0..50 {
                service.rotate_session_key(&session_id).unwrap();
            }
        })
    };

    // Each iteration round-trips against whatever key generation it lands
    // on; encrypt and decrypt serialize with rotation through the session
    // lock, so decryption with an explicit reference may race a rotation in
    // between and fail the tag check, but must never yield wrong plaintext.
    let service_reader = service.clone();
    let sid = session_id.clone();
    let reader = std::thread::spawn(move || {
        for i in 0..50 {
            let input = format!("frame {}", i);
            let bytes = service_reader.encrypt_data(&input, Some(&sid)).unwrap();
            match service_reader.decrypt_data(&bytes, None) {
                Ok(output) => assert_eq!(output, input),
                Err(e) => assert_eq!(e.code(), "ENCRYPTION_FAILED"),
            }
        }
    });

    rotator.join().unwrap();
    reader.join().unwrap();
}

#[tokio::test]
async fn full_provisioning_flow_across_domains() {
    let coordinator = Arc::new(ThreadCoordinator::new());
    coordinator.register_runtime(tokio::runtime::Handle::current());
    let service = Arc::new(
        SecurityService::new(SecurityConfig::default(), coordinator.clone()).expect("service"),
    );
    let bridge = AsyncSyncBridge::new(coordinator.clone());

    // Companion app connects: the transport asks for a session.
    let session_id = service.create_session("companion-app").unwrap();

    // Orchestration validates the credentials the companion is about to send.
    assert!(service.validate_credentials("HomeNet", "hunter2!!").unwrap());

    // The orchestration loop prepares an acknowledgement for the client.
    let ack = service
        .encrypt_data("provisioning accepted", Some(&session_id))
        .unwrap();

    // A wireless callback thread decrypts it and calls back into the
    // cooperative layer through the bridge, never touching the loop directly.
    let handled = {
        let service = service.clone();
        let bridge = bridge.clone();
        tokio::task::spawn_blocking(move || {
            std::thread::spawn(move || {
                let plaintext = service.decrypt_data(&ack, None).unwrap();
                assert_eq!(plaintext, "provisioning accepted");

                bridge.blocking_call("notify-orchestrator", async move {
                    format!("ack relayed for {}", plaintext.len())
                })
            })
            .join()
            .unwrap()
        })
        .await
        .unwrap()
        .unwrap()
    };
    assert_eq!(handled, "ack relayed for 21");

    // A sweep keeps the fresh session healthy rather than expiring it.
    let report = service.monitor().sweep(chrono::Utc::now()).unwrap();
    assert_eq!(report.expired, 0);
    assert!(report.rotated.contains(&session_id));

    // Shutdown drains cleanly with nothing left in flight.
    assert!(coordinator.graceful_shutdown(Duration::from_secs(2)).await);
}
