//! Periodic background tasks (C12): profile re-broadcast and housekeeping.
//!
//! Neither task gates correctness — both may run late or be skipped under
//! load without the protocol breaking, so each gets its own sleeping thread
//! rather than a shared scheduler.

use crate::controller::Controller;
use std::time::Duration;

pub const REBROADCAST_INTERVAL: Duration = Duration::from_secs(300);
pub const HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(3600);
pub const TRANSFER_RETENTION: Duration = Duration::from_secs(24 * 3600);
pub const AVATAR_RETENTION: Duration = Duration::from_secs(30 * 24 * 3600);

fn now_unix() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Spawns the 300 s PROFILE re-broadcast thread. Skips a tick while no
/// peers are known, since broadcasting into an empty subnet view is wasted
/// work.
pub fn spawn_rebroadcast(ctrl: Controller) {
    std::thread::spawn(move || loop {
        std::thread::sleep(REBROADCAST_INTERVAL);
        if ctrl.peer_count() == 0 {
            continue;
        }
        ctrl.broadcast_profile(ctrl.local_username.as_ref());
    });
}

/// Spawns the hourly housekeeping thread: evicts finished transfers older
/// than 24 h and expires cached peer avatars older than 30 days.
pub fn spawn_housekeeping(ctrl: Controller) {
    std::thread::spawn(move || loop {
        std::thread::sleep(HOUSEKEEPING_INTERVAL);
        run_housekeeping(&ctrl);
    });
}

fn run_housekeeping(ctrl: &Controller) {
    let now = now_unix();
    let transfer_cutoff = now.saturating_sub(TRANSFER_RETENTION.as_secs());

    {
        let mut incoming = ctrl.incoming_transfers().lock().unwrap();
        incoming.retain(|_, t| {
            let finished = matches!(
                t.state,
                crate::filetransfer::FileTransferState::Completed
                    | crate::filetransfer::FileTransferState::Failed
                    | crate::filetransfer::FileTransferState::Cancelled
            );
            !(finished && t.created_at < transfer_cutoff)
        });
    }
    {
        let mut outgoing = ctrl.outgoing_transfers().lock().unwrap();
        outgoing.retain(|_, t| {
            let finished = matches!(
                t.state,
                crate::filetransfer::FileTransferState::Completed
                    | crate::filetransfer::FileTransferState::Failed
                    | crate::filetransfer::FileTransferState::Cancelled
            );
            !(finished && t.created_at < transfer_cutoff)
        });
    }

    let avatar_cutoff = now.saturating_sub(AVATAR_RETENTION.as_secs());
    let mut peers = ctrl.peers().lock().unwrap();
    for peer in peers.iter_mut() {
        if peer.avatar_data.is_some() && peer.last_seen < avatar_cutoff {
            peer.avatar_data = None;
            peer.avatar_type = None;
        }
    }
    ctrl.logger().info("housekeeping pass complete");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LsnpConfig;
    use crate::transport::UdpTransport;
    use logging::{LogLevel, Logger};
    use std::net::{Ipv4Addr, SocketAddr};
    use tempfile::tempdir;

    fn test_controller() -> Controller {
        let dir = tempdir().unwrap();
        let logger = Logger::new(dir.path().join("test.log"), LogLevel::Debug).unwrap();
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let transport = UdpTransport::new(addr, logger.clone()).unwrap();
        Controller::new("alice", Ipv4Addr::new(127, 0, 0, 1), 0, transport, LsnpConfig::default(), logger)
    }

    #[test]
    fn housekeeping_evicts_stale_finished_transfers_only() {
        let ctrl = test_controller();
        let old_cutoff = now_unix().saturating_sub(TRANSFER_RETENTION.as_secs() + 10);

        let mut stale = crate::filetransfer::OutgoingTransfer::new(
            "f1".to_string(),
            "bob@10.0.0.3".to_string(),
            std::path::PathBuf::from("/tmp/f1"),
            "application/octet-stream".to_string(),
            10,
            old_cutoff,
        );
        stale.state = crate::filetransfer::FileTransferState::Completed;
        ctrl.outgoing_transfers().lock().unwrap().insert("f1".to_string(), stale);

        let fresh = crate::filetransfer::OutgoingTransfer::new(
            "f2".to_string(),
            "bob@10.0.0.3".to_string(),
            std::path::PathBuf::from("/tmp/f2"),
            "application/octet-stream".to_string(),
            10,
            now_unix(),
        );
        ctrl.outgoing_transfers().lock().unwrap().insert("f2".to_string(), fresh);

        run_housekeeping(&ctrl);

        let remaining = ctrl.outgoing_transfers().lock().unwrap();
        assert!(!remaining.contains_key("f1"));
        assert!(remaining.contains_key("f2"));
    }

    #[test]
    fn housekeeping_expires_stale_avatars() {
        let ctrl = test_controller();
        ctrl.peers().lock().unwrap().upsert("bob@10.0.0.3", "Bob", Ipv4Addr::new(10, 0, 0, 3), 50999);
        ctrl.peers()
            .lock()
            .unwrap()
            .set_avatar("bob@10.0.0.3", "image/png".to_string(), vec![1, 2, 3]);
        {
            let mut peers = ctrl.peers().lock().unwrap();
            let record = peers.get_mut("bob@10.0.0.3").unwrap();
            record.last_seen = now_unix().saturating_sub(AVATAR_RETENTION.as_secs() + 10);
        }

        run_housekeeping(&ctrl);

        let peers = ctrl.peers().lock().unwrap();
        assert!(peers.get("bob@10.0.0.3").unwrap().avatar_data.is_none());
    }
}
