//! End-to-end scenarios over real loopback UDP sockets, one `Controller`
//! per simulated peer, each driven by its own receive-loop thread — the
//! same shape `lsnp-node`'s `main` wires up, minus the REPL.

use lsnp_core::codec::Frame;
use lsnp_core::config::LsnpConfig;
use lsnp_core::controller::Controller;
use lsnp_core::dispatch;
use lsnp_core::game::Symbol;
use lsnp_core::token::Scope;
use lsnp_core::transport::UdpTransport;
use logging::{LogLevel, Logger};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

struct Node {
    ctrl: Controller,
    stop: Arc<AtomicBool>,
}

impl Drop for Node {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

fn spin_node(username: &str, log_dir: &std::path::Path) -> Node {
    let logger = Logger::new(log_dir.join(format!("{username}.log")), LogLevel::Debug).unwrap();
    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let transport = UdpTransport::new(addr, logger.clone()).unwrap();
    let port = transport.local_addr().unwrap().port();

    let ctrl = Controller::new(username, Ipv4Addr::LOCALHOST, port, transport, LsnpConfig::default(), logger);

    let stop = Arc::new(AtomicBool::new(false));
    let loop_ctrl = ctrl.clone();
    let loop_stop = stop.clone();
    std::thread::spawn(move || {
        while !loop_stop.load(Ordering::SeqCst) {
            match loop_ctrl.poll_incoming() {
                Some((frame, addr)) => dispatch::dispatch(&loop_ctrl, frame, addr),
                None => std::thread::sleep(Duration::from_millis(10)),
            }
        }
    });

    Node { ctrl, stop }
}

fn introduce(a: &Node, b: &Node) {
    let b_addr = b.ctrl.local_addr().unwrap();
    a.ctrl
        .peers()
        .lock()
        .unwrap()
        .upsert(&b.ctrl.local_user_id, &b.ctrl.local_username, b_addr.ip().to_string().parse().unwrap(), b_addr.port());
}

fn wait_until<F: Fn() -> bool>(timeout: Duration, check: F) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    check()
}

#[test]
fn scenario_1_dm_is_delivered_and_acked() {
    let dir = tempfile::tempdir().unwrap();
    let alice = spin_node("alice", dir.path());
    let bob = spin_node("bob", dir.path());
    introduce(&alice, &bob);

    let delivered = alice.ctrl.send_dm("bob", "hello there").unwrap();
    assert!(delivered);

    assert!(wait_until(Duration::from_secs(2), || !bob.ctrl.inbox().lock().unwrap().is_empty()));
    let inbox = bob.ctrl.inbox().lock().unwrap();
    assert!(inbox[0].contains("hello there"));
}

#[test]
fn scenario_2_file_transfer_reassembles_byte_exactly_out_of_order() {
    let dir = tempfile::tempdir().unwrap();
    let alice = spin_node("alice", dir.path());
    let bob = spin_node("bob", dir.path());
    introduce(&alice, &bob);
    introduce(&bob, &alice);

    let payload: Vec<u8> = (0..3000u32).map(|i| (i % 256) as u8).collect();
    let file_path = dir.path().join("payload.bin");
    std::fs::write(&file_path, &payload).unwrap();

    let downloads = dir.path().join("downloads");
    std::fs::create_dir_all(&downloads).unwrap();

    let bob_ctrl = bob.ctrl.clone();
    let downloads_clone = downloads.clone();
    let acceptor = std::thread::spawn(move || {
        assert!(wait_until(Duration::from_secs(2), || !bob_ctrl.pending_offers().lock().unwrap().is_empty()));
        let file_id = bob_ctrl.pending_offers().lock().unwrap().keys().next().unwrap().clone();
        bob_ctrl.accept_file(&file_id, &downloads_clone).unwrap()
    });

    let accepted = alice.ctrl.offer_file("bob", file_path, "a test payload").unwrap();
    assert!(accepted);
    let save_path = acceptor.join().unwrap();

    assert!(wait_until(Duration::from_secs(5), || save_path.exists() && std::fs::metadata(&save_path).map(|m| m.len()).unwrap_or(0) == 3000));

    let received = std::fs::read(&save_path).unwrap();
    assert_eq!(received, payload);
}

#[test]
fn scenario_3_like_toggle_round_trips_through_the_wire() {
    let dir = tempfile::tempdir().unwrap();
    let alice = spin_node("alice", dir.path());
    let bob = spin_node("bob", dir.path());
    introduce(&alice, &bob);

    let post_timestamp = "1730000000";
    let liked = alice.ctrl.toggle_like("bob", post_timestamp).unwrap();
    assert!(liked);

    assert!(wait_until(Duration::from_secs(2), || bob
        .ctrl
        .inbox()
        .lock()
        .unwrap()
        .iter()
        .any(|l| l.contains("liked"))));

    let unliked = alice.ctrl.toggle_like("bob", post_timestamp).unwrap();
    assert!(unliked);
    assert!(wait_until(Duration::from_secs(2), || bob
        .ctrl
        .inbox()
        .lock()
        .unwrap()
        .iter()
        .any(|l| l.contains("unliked"))));
}

#[test]
fn scenario_4_group_add_distributes_the_full_member_list() {
    let dir = tempfile::tempdir().unwrap();
    let alice = spin_node("alice", dir.path());
    let bob = spin_node("bob", dir.path());
    let carol = spin_node("carol", dir.path());
    let dave = spin_node("dave", dir.path());

    introduce(&alice, &bob);
    introduce(&alice, &carol);
    introduce(&alice, &dave);
    introduce(&bob, &alice);
    introduce(&carol, &alice);
    introduce(&dave, &alice);

    let group_id = alice
        .ctrl
        .group_create("team", &["bob".to_string(), "carol".to_string()])
        .unwrap();

    assert!(wait_until(Duration::from_secs(2), || bob.ctrl.groups().lock().unwrap().get(&group_id).is_some()));
    assert!(wait_until(Duration::from_secs(2), || carol.ctrl.groups().lock().unwrap().get(&group_id).is_some()));

    alice.ctrl.group_add(&group_id, &["dave".to_string()]).unwrap();

    assert!(wait_until(Duration::from_secs(2), || bob
        .ctrl
        .groups()
        .lock()
        .unwrap()
        .get(&group_id)
        .map(|g| g.is_member(&dave.ctrl.local_user_id))
        .unwrap_or(false)));

    let bob_groups = bob.ctrl.groups().lock().unwrap();
    let group = bob_groups.get(&group_id).unwrap();
    assert!(group.is_member(&alice.ctrl.local_user_id));
    assert!(group.is_member(&carol.ctrl.local_user_id));
    assert!(group.is_member(&dave.ctrl.local_user_id));
}

#[test]
fn scenario_5_tictactoe_diagonal_win_is_mirrored_as_a_loss() {
    let dir = tempfile::tempdir().unwrap();
    let alice = spin_node("alice", dir.path());
    let bob = spin_node("bob", dir.path());
    introduce(&alice, &bob);
    introduce(&bob, &alice);

    let game_id = alice.ctrl.tictactoe_invite("bob", Symbol::X).unwrap();
    assert!(wait_until(Duration::from_secs(2), || bob.ctrl.games().lock().unwrap().contains_key(&game_id)));

    // A -> 0, B -> 1, A -> 4, B -> 2, A -> 8 (diagonal 0,4,8)
    assert_eq!(alice.ctrl.tictactoe_move(&game_id, 0).unwrap(), None);
    assert!(wait_until(Duration::from_secs(2), || bob.ctrl.games().lock().unwrap().get(&game_id).unwrap().board()[0] == 'X'));

    assert_eq!(bob.ctrl.tictactoe_move(&game_id, 1).unwrap(), None);
    assert!(wait_until(Duration::from_secs(2), || alice.ctrl.games().lock().unwrap().get(&game_id).unwrap().board()[1] == 'O'));

    assert_eq!(alice.ctrl.tictactoe_move(&game_id, 4).unwrap(), None);
    assert!(wait_until(Duration::from_secs(2), || bob.ctrl.games().lock().unwrap().get(&game_id).unwrap().board()[4] == 'X'));

    assert_eq!(bob.ctrl.tictactoe_move(&game_id, 2).unwrap(), None);
    assert!(wait_until(Duration::from_secs(2), || alice.ctrl.games().lock().unwrap().get(&game_id).unwrap().board()[2] == 'O'));

    let result = alice.ctrl.tictactoe_move(&game_id, 8).unwrap();
    assert_eq!(result, Some(lsnp_core::game::GameResult::Win));

    assert!(wait_until(Duration::from_secs(2), || !bob.ctrl.games().lock().unwrap().get(&game_id).unwrap().active));
    assert!(wait_until(Duration::from_secs(2), || bob
        .ctrl
        .inbox()
        .lock()
        .unwrap()
        .iter()
        .any(|l| l.contains("LOSS"))));
}

#[test]
fn scenario_6_wrong_scope_token_is_rejected_with_no_ack_and_no_inbox_append() {
    let dir = tempfile::tempdir().unwrap();
    let bob = spin_node("bob", dir.path());
    let bob_addr = bob.ctrl.local_addr().unwrap();

    let raw_socket = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    let forged_from = format!("alice@{}", raw_socket.local_addr().unwrap().ip());
    let wrong_scope_token = lsnp_core::token::issue(&forged_from, Scope::Post, 600);

    let mut frame = Frame::new("DM");
    frame
        .set("FROM", forged_from.as_str())
        .set("TO", bob.ctrl.local_user_id.as_ref())
        .set("CONTENT", "this should never arrive")
        .set("MESSAGE_ID", "forged-1")
        .set("TIMESTAMP", "0")
        .set("TOKEN", wrong_scope_token);

    raw_socket.send_to(&frame.encode(), bob_addr).unwrap();

    std::thread::sleep(Duration::from_millis(300));
    assert!(bob.ctrl.inbox().lock().unwrap().is_empty());

    let mut ack_buf = [0u8; 256];
    raw_socket.set_read_timeout(Some(Duration::from_millis(200))).unwrap();
    assert!(raw_socket.recv_from(&mut ack_buf).is_err());
}
