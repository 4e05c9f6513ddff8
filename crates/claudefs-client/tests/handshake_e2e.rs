//! End-to-end handshake scenarios against an in-memory server.

mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use claudefs_client::program::{HandshakeProc, DUMP_PROGRAM, HANDSHAKE_PROGRAM};
use claudefs_client::{FdContext, HandshakePhase, ParentEvent, RpcProgram};
use common::{harness, settle};

#[tokio::test]
async fn test_connect_negotiate_setvolume_child_up() {
    let h = harness(42, 2);

    assert!(h.client.handshake().is_some());
    settle().await;

    assert_eq!(h.client.negotiated().fops, Some(RpcProgram::new("data", 330, 1)));
    assert!(h.client.is_connected());
    assert!(!h.client.is_connecting());
    for parent in &h.parents {
        assert_eq!(*parent.events.lock(), vec![ParentEvent::ChildUp]);
    }
    assert_eq!(h.reopener.total(), 0, "no saved fds, nothing to reopen");

    let frames = h.client.frame_stats();
    assert_eq!(frames.created, 2);
    assert_eq!(frames.destroyed, 2);
    assert_eq!(
        h.server.release.released(),
        h.server.replies.load(Ordering::SeqCst) as u64,
        "every reply buffer went back to the transport"
    );
    assert_eq!(h.client.stats().handshakes_completed, 1);
}

#[tokio::test]
async fn test_stale_volfile_notifies_once_and_stays_down() {
    let h = harness(42, 2);
    h.server.reject_setvolume(libc::ESTALE, Some("volfile checksum mismatch"));
    h.client.config().save_fd(FdContext::file(1, "/a", 0));

    h.client.handshake();
    settle().await;

    for parent in &h.parents {
        assert_eq!(parent.count(ParentEvent::VolfileModified), 1);
        assert_eq!(parent.count(ParentEvent::ChildConnecting), 0);
        assert_eq!(parent.count(ParentEvent::ChildUp), 0);
    }
    assert!(!h.client.is_connected());
    assert!(!h.client.is_connecting());
    assert_eq!(h.client.phase(), HandshakePhase::StaleConfig);
    assert_eq!(h.reopener.total(), 0, "failure never runs recovery");
    assert_eq!(h.client.stats().stale_rejections, 1);
    assert_eq!(h.client.frame_stats().in_flight, 0);
}

#[tokio::test]
async fn test_other_rejection_moves_to_connecting() {
    let h = harness(42, 1);
    h.server.reject_setvolume(libc::EACCES, Some("authentication failed"));

    h.client.handshake();
    settle().await;

    let parent = &h.parents[0];
    assert_eq!(parent.count(ParentEvent::ChildConnecting), 1);
    assert_eq!(parent.count(ParentEvent::VolfileModified), 0);
    assert!(h.client.is_connecting());
    assert!(!h.client.is_connected());
    assert_eq!(h.client.phase(), HandshakePhase::Connecting);
    assert_eq!(h.client.frame_stats().in_flight, 0);
}

#[tokio::test]
async fn test_stale_after_earlier_rejection_is_not_connecting() {
    let h = harness(42, 1);
    h.server.reject_setvolume(libc::EACCES, Some("authentication failed"));
    h.client.handshake();
    settle().await;
    assert!(h.client.is_connecting());

    h.client.handle_disconnect();
    h.server.reject_setvolume(libc::ESTALE, Some("volfile checksum mismatch"));
    h.client.handshake();
    settle().await;

    assert_eq!(h.client.phase(), HandshakePhase::StaleConfig);
    assert!(!h.client.is_connecting());
    assert!(!h.client.is_connected());
    let parent = &h.parents[0];
    assert_eq!(parent.count(ParentEvent::ChildConnecting), 1);
    assert_eq!(parent.count(ParentEvent::VolfileModified), 1);
}

#[tokio::test]
async fn test_no_common_program_stops_before_setvolume() {
    let h = harness(42, 1);
    *h.server.programs.lock() = vec![
        claudefs_client::ProgDetail::new("data", 330, 2),
        claudefs_client::ProgDetail::new("other", 999, 1),
    ];

    h.client.handshake();
    settle().await;

    assert_eq!(h.client.phase(), HandshakePhase::Failed);
    assert_eq!(h.server.setvolume_calls(), 0);
    assert!(h.parents[0].events.lock().is_empty());
    assert!(h.client.negotiated().is_empty());
    assert_eq!(h.client.stats().handshakes_failed, 1);
    assert_eq!(h.client.frame_stats().in_flight, 0);
}

#[tokio::test]
async fn test_transport_failure_on_probe_aborts_attempt() {
    let h = harness(42, 1);
    h.server.fail_all.store(true, Ordering::SeqCst);

    h.client.handshake();
    settle().await;

    assert_eq!(h.client.phase(), HandshakePhase::Failed);
    assert_eq!(h.server.setvolume_calls(), 0);
    let frames = h.client.frame_stats();
    assert_eq!(frames.created, 1);
    assert_eq!(frames.destroyed, 1);
}

#[tokio::test]
async fn test_transport_failure_on_setvolume_is_connecting() {
    let h = harness(42, 1);
    h.server.fail_setvolume.store(true, Ordering::SeqCst);

    h.client.handshake();
    settle().await;

    assert_eq!(h.client.phase(), HandshakePhase::Connecting);
    assert!(h.client.is_connecting());
    assert_eq!(h.parents[0].count(ParentEvent::ChildConnecting), 1);
    assert_eq!(h.server.setvolume_calls(), 1);
    let frames = h.client.frame_stats();
    assert_eq!(frames.created, 2);
    assert_eq!(frames.destroyed, 2);
}

#[tokio::test]
async fn test_reconnect_reopens_only_invalidated_fds() {
    let h = harness(0, 1);
    h.client.handshake();
    settle().await;
    assert!(h.client.is_connected());

    let config = h.client.config();
    config.save_fd(FdContext::file(1, "/a", libc::O_RDWR).with_remote(10));
    config.save_fd(FdContext::dir(2, "/d").with_remote(11));
    config.save_fd(FdContext::file(3, "/b", 0).with_remote(12));

    h.client.handle_disconnect();
    assert!(config.lock().saved_fds.iter().all(FdContext::needs_reopen));

    // fd 3 got its handle back through some other path before recovery.
    config.set_remote_fd(3, 99);

    h.client.handshake();
    settle().await;

    assert!(h.client.is_connected());
    assert_eq!(*h.reopener.files.lock(), vec![1]);
    assert_eq!(*h.reopener.dirs.lock(), vec![2]);
    assert_eq!(config.lock().saved_fds.len(), 3);
    assert_eq!(config.lock().saved_fds.get(3).unwrap().remote_fd, Some(99));
    assert_eq!(h.parents[0].count(ParentEvent::ChildUp), 2);
    assert_eq!(h.client.stats().fds_reopened, 2);
}

#[tokio::test(start_paused = true)]
async fn test_replies_of_superseded_attempt_are_dropped() {
    let h = harness(0, 1);
    *h.server.dump_delay.lock() = Some(Duration::from_secs(1));

    let first = h.client.handshake().unwrap();
    let second = h.client.handshake().unwrap();
    assert_eq!(second, first + 1);

    tokio::time::sleep(Duration::from_secs(2)).await;
    settle().await;

    assert!(h.client.is_connected());
    assert_eq!(h.parents[0].count(ParentEvent::ChildUp), 1);
    assert_eq!(h.server.setvolume_calls(), 1);
    assert!(h.client.stats().stale_replies_dropped >= 1);
    assert_eq!(h.client.frame_stats().in_flight, 0);
}

#[tokio::test]
async fn test_late_setvolume_after_disconnect_is_noop() {
    let h = harness(0, 1);
    *h.server.dump_delay.lock() = Some(Duration::from_millis(20));

    h.client.handshake();
    h.client.handle_disconnect();
    tokio::time::sleep(Duration::from_millis(50)).await;
    settle().await;

    assert!(!h.client.is_connected());
    assert_eq!(h.client.phase(), HandshakePhase::Disconnected);
    assert!(h.parents[0].events.lock().is_empty());
    assert_eq!(h.client.frame_stats().in_flight, 0);
}

#[tokio::test]
async fn test_get_spec_after_handshake() {
    let h = harness(0, 0);
    h.client.handshake();
    settle().await;

    let spec = h.client.get_spec("testvol", 0).await.unwrap();
    assert_eq!(&spec[..], b"volume testvol\nend-volume\n");
    let released_before = h.server.release.released();
    drop(spec);
    assert_eq!(h.server.release.released(), released_before + 1);
    assert_eq!(
        h.server
            .count_calls(HANDSHAKE_PROGRAM, HandshakeProc::GetSpec.number()),
        1
    );
}

#[tokio::test]
async fn test_get_spec_transport_failure_is_einval() {
    let h = harness(0, 0);
    h.server.fail_all.store(true, Ordering::SeqCst);
    let err = h.client.get_spec("testvol", 0).await.unwrap_err();
    assert_eq!(err.errno(), libc::EINVAL);
    assert_eq!(h.client.frame_stats().in_flight, 0);
}

#[tokio::test]
async fn test_probe_uses_dump_program() {
    let h = harness(0, 0);
    h.client.handshake();
    settle().await;
    let calls = h.server.calls.lock().clone();
    assert_eq!(calls[0], (DUMP_PROGRAM, 1));
    assert_eq!(calls[1], (HANDSHAKE_PROGRAM, HandshakeProc::SetVolume.number()));
}
