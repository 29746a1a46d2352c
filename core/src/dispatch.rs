//! Dispatcher (C6): per-message-type routing, sender-IP binding, and the
//! token-scope check table from spec §6.
//!
//! Everything here runs on the receive task. Per §7's propagation policy,
//! nothing in this module panics or propagates an error out of `dispatch` —
//! every failure path is logged and the loop continues.

use crate::controller::Controller;
use crate::filetransfer::{validate_avatar, IncomingTransfer};
use crate::game::Symbol;
use crate::groups::{parse_csv, Group};
use crate::token::Scope;
use base64::Engine;
use std::net::{IpAddr, SocketAddr};

/// Extracts the IP suffix of a `user@ip` string.
fn ip_suffix(user_id: &str) -> Option<std::net::Ipv4Addr> {
    user_id.split('@').nth(1)?.parse().ok()
}

/// Sender-IP binding: the datagram's source IP must equal the IP suffix of
/// a message's identifying field (`FROM` for most types, `USER_ID` for
/// PROFILE/PING). Returns `false` (drop) on mismatch.
fn ip_binding_ok(claimed_id: &str, src: SocketAddr) -> bool {
    match ip_suffix(claimed_id) {
        Some(claimed_ip) => IpAddr::V4(claimed_ip) == src.ip(),
        None => false,
    }
}

pub fn dispatch(ctrl: &Controller, frame: crate::codec::Frame, src: SocketAddr) {
    let msg_type = frame.type_field().to_string();
    match msg_type.as_str() {
        "PROFILE" => handle_profile(ctrl, &frame, src),
        "PING" => handle_ping(ctrl, &frame, src),
        "DM" => handle_dm(ctrl, &frame, src),
        "ACK" => handle_ack(ctrl, &frame),
        "FOLLOW" => handle_follow(ctrl, &frame, src, true),
        "UNFOLLOW" => handle_follow(ctrl, &frame, src, false),
        "POST" => handle_post(ctrl, &frame, src),
        "LIKE" => handle_like(ctrl, &frame, src),
        "FILE_OFFER" => handle_file_offer(ctrl, &frame, src),
        "FILE_ACCEPT" => handle_file_response(ctrl, &frame, src, true),
        "FILE_REJECT" => handle_file_response(ctrl, &frame, src, false),
        "FILE_CHUNK" => handle_file_chunk(ctrl, &frame, src),
        "FILE_RECEIVED" => handle_file_received(ctrl, &frame),
        "GROUP_CREATE" => handle_group_create(ctrl, &frame, src),
        "GROUP_ADD" => handle_group_add(ctrl, &frame, src),
        "GROUP_REMOVE" => handle_group_remove(ctrl, &frame, src),
        "GROUP_MESSAGE" => handle_group_message(ctrl, &frame, src),
        "TICTACTOE_INVITE" => handle_tictactoe_invite(ctrl, &frame, src),
        "TICTACTOE_MOVE" => handle_tictactoe_move(ctrl, &frame, src),
        "TICTACTOE_RESULT" => handle_tictactoe_result(ctrl, &frame, src),
        "REVOKE" => handle_revoke(ctrl, &frame),
        other => {
            ctrl.logger().warn(&format!("dropping unknown TYPE '{}'", other));
        }
    }
}

fn require_unicast(ctrl: &Controller, frame: &crate::codec::Frame) -> bool {
    let to = frame.get("TO");
    if to.is_empty() {
        return true;
    }
    if to != ctrl.local_user_id.as_ref() {
        if ctrl.is_verbose() {
            ctrl.logger().info(&format!("dropping frame addressed to {}", to));
        }
        return false;
    }
    true
}

fn require_binding(ctrl: &Controller, claimed_field: &str, src: SocketAddr, frame_type: &str) -> bool {
    if !ip_binding_ok(claimed_field, src) {
        ctrl.logger().warn(&format!(
            "{}: sender-IP mismatch for {} from {}",
            frame_type, claimed_field, src
        ));
        return false;
    }
    true
}

fn require_token(ctrl: &Controller, frame: &crate::codec::Frame, scope: Scope, frame_type: &str) -> bool {
    let token = frame.get("TOKEN");
    match ctrl.revocation().validate(token, scope) {
        Ok(_) => true,
        Err(e) => {
            ctrl.logger().warn(&format!("{}: token rejected ({})", frame_type, e));
            false
        }
    }
}

fn handle_profile(ctrl: &Controller, frame: &crate::codec::Frame, src: SocketAddr) {
    let user_id = frame.get("USER_ID");
    if user_id.is_empty() || !require_binding(ctrl, user_id, src, "PROFILE") {
        return;
    }
    let display_name = frame.get("DISPLAY_NAME");
    let ip = match ip_suffix(user_id) {
        Some(ip) => ip,
        None => return,
    };

    ctrl.peers().lock().unwrap().upsert(user_id, display_name, ip, src.port());

    let avatar_type = frame.get("AVATAR_TYPE");
    let avatar_data = frame.get("AVATAR_DATA");
    if !avatar_type.is_empty() && !avatar_data.is_empty() {
        match base64::engine::general_purpose::STANDARD.decode(avatar_data) {
            Ok(bytes) => match validate_avatar(avatar_type, &bytes) {
                Ok(()) => ctrl.peers().lock().unwrap().set_avatar(user_id, avatar_type.to_string(), bytes),
                Err(e) => ctrl.logger().warn(&format!("PROFILE: avatar rejected: {}", e)),
            },
            Err(_) => ctrl.logger().warn("PROFILE: avatar base64 decode failed"),
        }
    }
}

fn handle_ping(ctrl: &Controller, frame: &crate::codec::Frame, src: SocketAddr) {
    let user_id = frame.get("USER_ID");
    if let Some(ip) = ip_suffix(user_id) {
        let username = user_id.split('@').next().unwrap_or_default();
        ctrl.peers().lock().unwrap().upsert(user_id, username, ip, src.port());
    }
}

fn handle_dm(ctrl: &Controller, frame: &crate::codec::Frame, src: SocketAddr) {
    if !require_unicast(ctrl, frame) {
        return;
    }
    let from = frame.get("FROM");
    if !require_binding(ctrl, from, src, "DM") {
        return;
    }
    if !require_token(ctrl, frame, Scope::Chat, "DM") {
        return;
    }

    let content = frame.get("CONTENT");
    ctrl.inbox().lock().unwrap().push(format!("{}: {}", from, content));
    ctrl.send_ack(src, frame.get("MESSAGE_ID"));
}

fn handle_ack(ctrl: &Controller, frame: &crate::codec::Frame) {
    let message_id = frame.get("MESSAGE_ID");
    if !ctrl.ack_waiters().signal(message_id, frame.get("STATUS").to_string()) {
        ctrl.logger().warn(&format!("ACK: no waiter for MESSAGE_ID {}", message_id));
    }
}

fn handle_follow(ctrl: &Controller, frame: &crate::codec::Frame, src: SocketAddr, follow: bool) {
    if !require_unicast(ctrl, frame) {
        return;
    }
    let from = frame.get("FROM");
    let frame_type = if follow { "FOLLOW" } else { "UNFOLLOW" };
    if !require_binding(ctrl, from, src, frame_type) {
        return;
    }
    let scope = if follow { Scope::Follow } else { Scope::Unfollow };
    if !require_token(ctrl, frame, scope, frame_type) {
        return;
    }

    let mut social = ctrl.social().lock().unwrap();
    if follow {
        social.add_follower(&ctrl.local_user_id, from);
    } else {
        social.remove_follower(from);
    }
    drop(social);
    ctrl.inbox().lock().unwrap().push(format!("{} {} you", from, if follow { "followed" } else { "unfollowed" }));
    ctrl.send_ack(src, frame.get("MESSAGE_ID"));
}

fn handle_post(ctrl: &Controller, frame: &crate::codec::Frame, src: SocketAddr) {
    let user_id = frame.get("USER_ID");
    if !require_binding(ctrl, user_id, src, "POST") {
        return;
    }
    if !require_token(ctrl, frame, Scope::Post, "POST") {
        return;
    }
    let content = frame.get("CONTENT");
    ctrl.inbox().lock().unwrap().push(format!("{} posted: {}", user_id, content));
    ctrl.send_ack(src, frame.get("MESSAGE_ID"));
}

fn handle_like(ctrl: &Controller, frame: &crate::codec::Frame, src: SocketAddr) {
    if !require_unicast(ctrl, frame) {
        return;
    }
    let from = frame.get("FROM");
    if !require_binding(ctrl, from, src, "LIKE") {
        return;
    }
    if !require_token(ctrl, frame, Scope::Like, "LIKE") {
        return;
    }
    let action = frame.get("ACTION");
    let post_ts = frame.get("POST_TIMESTAMP");
    ctrl.inbox()
        .lock()
        .unwrap()
        .push(format!("{} {} your post {}", from, action.to_lowercase(), post_ts));

    let ack_message_id = format!("{}|{}|{}", from, post_ts, action);
    ctrl.send_ack(src, &ack_message_id);
}

fn handle_file_offer(ctrl: &Controller, frame: &crate::codec::Frame, src: SocketAddr) {
    if !require_unicast(ctrl, frame) {
        return;
    }
    let from = frame.get("FROM");
    if !require_binding(ctrl, from, src, "FILE_OFFER") {
        return;
    }
    if !require_token(ctrl, frame, Scope::File, "FILE_OFFER") {
        return;
    }

    let file_id = frame.get("FILEID").to_string();
    let filesize: u64 = match frame.get("FILESIZE").parse() {
        Ok(v) => v,
        Err(_) => return,
    };

    ctrl.pending_offers().lock().unwrap().insert(
        file_id.clone(),
        crate::controller::PendingOffer {
            remote_user: from.to_string(),
            filename: frame.get("FILENAME").to_string(),
            filesize,
            filetype: frame.get("FILETYPE").to_string(),
            description: frame.get("DESCRIPTION").to_string(),
        },
    );
    ctrl.inbox().lock().unwrap().push(format!(
        "{} offered file {} ({} bytes), FILEID={}",
        from,
        frame.get("FILENAME"),
        filesize,
        file_id
    ));
}

fn handle_file_response(ctrl: &Controller, frame: &crate::codec::Frame, src: SocketAddr, accept: bool) {
    if !require_unicast(ctrl, frame) {
        return;
    }
    let from = frame.get("FROM");
    let frame_type = if accept { "FILE_ACCEPT" } else { "FILE_REJECT" };
    if !require_binding(ctrl, from, src, frame_type) {
        return;
    }
    if !require_token(ctrl, frame, Scope::File, frame_type) {
        return;
    }
    let file_id = frame.get("FILEID");
    let status = if accept { "ACCEPT" } else { "REJECT" };
    ctrl.file_waiters().signal(file_id, status.to_string());
}

fn handle_file_chunk(ctrl: &Controller, frame: &crate::codec::Frame, src: SocketAddr) {
    if !require_unicast(ctrl, frame) {
        return;
    }
    let from = frame.get("FROM");
    if !require_binding(ctrl, from, src, "FILE_CHUNK") {
        return;
    }
    if !require_token(ctrl, frame, Scope::File, "FILE_CHUNK") {
        return;
    }

    let file_id = frame.get("FILEID");
    let index: u32 = match frame.get("CHUNK_INDEX").parse() {
        Ok(v) => v,
        Err(_) => {
            ctrl.logger().warn("FILE_CHUNK: malformed CHUNK_INDEX");
            return;
        }
    };
    let data = match base64::engine::general_purpose::STANDARD.decode(frame.get("DATA")) {
        Ok(d) => d,
        Err(_) => {
            mark_failed(ctrl, file_id);
            ctrl.logger().warn("FILE_CHUNK: base64 decode failed");
            return;
        }
    };

    let complete = {
        let mut transfers = ctrl.incoming_transfers().lock().unwrap();
        match transfers.get_mut(file_id) {
            Some(t) => t.receive_chunk(index, data),
            None => {
                ctrl.logger().warn(&format!("FILE_CHUNK: no active transfer for {}", file_id));
                return;
            }
        }
    };

    if complete {
        finalize_transfer(ctrl, file_id, from, src);
    }
}

fn mark_failed(ctrl: &Controller, file_id: &str) {
    if let Some(t) = ctrl.incoming_transfers().lock().unwrap().get_mut(file_id) {
        t.state = crate::filetransfer::FileTransferState::Failed;
    }
}

fn finalize_transfer(ctrl: &Controller, file_id: &str, from: &str, src: SocketAddr) {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();

    let result = {
        let mut transfers = ctrl.incoming_transfers().lock().unwrap();
        transfers.get_mut(file_id).map(|t: &mut IncomingTransfer| t.finalize(now))
    };

    let mut frame = crate::codec::Frame::new("FILE_RECEIVED");
    let status = match result {
        Some(Ok(_path)) => "COMPLETE",
        Some(Err(e)) => {
            ctrl.logger().error(&format!("FILE_CHUNK: finalize failed for {}: {}", file_id, e));
            "FAILED"
        }
        None => "FAILED",
    };
    frame
        .set("FROM", ctrl.local_user_id.as_ref())
        .set("TO", from)
        .set("FILEID", file_id)
        .set("STATUS", status)
        .set("TIMESTAMP", now.to_string());
    ctrl.send_frame(&frame, src);

    ctrl.incoming_transfers().lock().unwrap().remove(file_id);
}

fn handle_file_received(ctrl: &Controller, frame: &crate::codec::Frame) {
    ctrl.logger().info(&format!(
        "FILE_RECEIVED: {} reports {} for {}",
        frame.get("FROM"),
        frame.get("STATUS"),
        frame.get("FILEID")
    ));
}

fn handle_group_create(ctrl: &Controller, frame: &crate::codec::Frame, src: SocketAddr) {
    let from = frame.get("FROM");
    if !require_binding(ctrl, from, src, "GROUP_CREATE") {
        return;
    }
    if !require_token(ctrl, frame, Scope::Group, "GROUP_CREATE") {
        return;
    }
    let group_id = frame.get("GROUP_ID").to_string();
    let members = parse_csv(frame.get("MEMBERS"));
    ctrl.groups().lock().unwrap().insert(Group::new(
        group_id,
        frame.get("GROUP_NAME").to_string(),
        from.to_string(),
        members,
    ));
}

fn handle_group_add(ctrl: &Controller, frame: &crate::codec::Frame, src: SocketAddr) {
    let from = frame.get("FROM");
    if !require_binding(ctrl, from, src, "GROUP_ADD") {
        return;
    }
    if !require_token(ctrl, frame, Scope::Group, "GROUP_ADD") {
        return;
    }
    let group_id = frame.get("GROUP_ID");
    let members = parse_csv(frame.get("MEMBERS"));

    let mut groups = ctrl.groups().lock().unwrap();
    match groups.get_mut(group_id) {
        Some(group) if group.owner == from => {
            group.members = members;
        }
        Some(_) => {
            ctrl.logger().warn(&format!("GROUP_ADD: {} is not the owner of {}", from, group_id));
        }
        None => {
            groups.insert(Group::new(
                group_id.to_string(),
                frame.get("GROUP_NAME").to_string(),
                from.to_string(),
                members,
            ));
        }
    }
}

fn handle_group_remove(ctrl: &Controller, frame: &crate::codec::Frame, src: SocketAddr) {
    let from = frame.get("FROM");
    if !require_binding(ctrl, from, src, "GROUP_REMOVE") {
        return;
    }
    if !require_token(ctrl, frame, Scope::Group, "GROUP_REMOVE") {
        return;
    }
    let group_id = frame.get("GROUP_ID");
    let removed = parse_csv(frame.get("REMOVE"));

    let mut groups = ctrl.groups().lock().unwrap();
    if let Some(group) = groups.get_mut(group_id) {
        if group.owner == from {
            group.remove_members(&removed);
        } else {
            ctrl.logger().warn(&format!("GROUP_REMOVE: {} is not the owner of {}", from, group_id));
        }
    }
}

fn handle_group_message(ctrl: &Controller, frame: &crate::codec::Frame, src: SocketAddr) {
    let from = frame.get("FROM");
    if !require_binding(ctrl, from, src, "GROUP_MESSAGE") {
        return;
    }
    if !require_token(ctrl, frame, Scope::Group, "GROUP_MESSAGE") {
        return;
    }
    let group_id = frame.get("GROUP_ID");
    if ctrl.groups().lock().unwrap().get(group_id).is_none() {
        ctrl.logger().warn(&format!("GROUP_MESSAGE: unknown group {}", group_id));
        return;
    }
    ctrl.inbox()
        .lock()
        .unwrap()
        .push(format!("[{}] {}: {}", group_id, from, frame.get("CONTENT")));
    ctrl.send_ack(src, frame.get("MESSAGE_ID"));
}

fn handle_tictactoe_invite(ctrl: &Controller, frame: &crate::codec::Frame, src: SocketAddr) {
    if !require_unicast(ctrl, frame) {
        return;
    }
    let from = frame.get("FROM");
    if !require_binding(ctrl, from, src, "TICTACTOE_INVITE") {
        return;
    }
    if !require_token(ctrl, frame, Scope::Game, "TICTACTOE_INVITE") {
        return;
    }
    let their_symbol = match Symbol::parse(frame.get("SYMBOL")) {
        Some(s) => s,
        None => return,
    };
    let game_id = frame.get("GAMEID").to_string();
    let local_symbol = their_symbol.opponent();
    ctrl.games()
        .lock()
        .unwrap()
        .insert(game_id.clone(), crate::game::Game::new(game_id, from.to_string(), local_symbol));
    ctrl.inbox().lock().unwrap().push(format!("{} invited you to Tic-Tac-Toe", from));
}

fn handle_tictactoe_move(ctrl: &Controller, frame: &crate::codec::Frame, src: SocketAddr) {
    if !require_unicast(ctrl, frame) {
        return;
    }
    let from = frame.get("FROM");
    if !require_binding(ctrl, from, src, "TICTACTOE_MOVE") {
        return;
    }
    if !require_token(ctrl, frame, Scope::Game, "TICTACTOE_MOVE") {
        return;
    }
    let game_id = frame.get("GAMEID");
    let position: usize = match frame.get("POSITION").parse() {
        Ok(p) => p,
        Err(_) => return,
    };
    let symbol = match Symbol::parse(frame.get("SYMBOL")) {
        Some(s) => s,
        None => return,
    };

    let mut games = ctrl.games().lock().unwrap();
    if let Some(game) = games.get_mut(game_id) {
        if let Err(e) = game.place(position, symbol) {
            ctrl.logger().warn(&format!("TICTACTOE_MOVE: {}", e));
        }
    }
}

/// The sender's `RESULT` describes their own outcome; the recipient's is the
/// mirror image (A's WIN is B's LOSS), per the authoritative-each-side design.
fn mirror_result(sender_result: &str) -> &str {
    match sender_result {
        "WIN" => "LOSS",
        "LOSS" => "WIN",
        other => other,
    }
}

fn handle_tictactoe_result(ctrl: &Controller, frame: &crate::codec::Frame, src: SocketAddr) {
    if !require_unicast(ctrl, frame) {
        return;
    }
    let from = frame.get("FROM");
    if !require_binding(ctrl, from, src, "TICTACTOE_RESULT") {
        return;
    }
    if !require_token(ctrl, frame, Scope::Game, "TICTACTOE_RESULT") {
        return;
    }
    let game_id = frame.get("GAMEID");
    let mirrored = mirror_result(frame.get("RESULT"));
    if let Some(game) = ctrl.games().lock().unwrap().get_mut(game_id) {
        game.mark_finished();
    }
    ctrl.inbox()
        .lock()
        .unwrap()
        .push(format!("Game {} against {}: {}", game_id, from, mirrored));
}

fn handle_revoke(ctrl: &Controller, frame: &crate::codec::Frame) {
    ctrl.revoke_token(frame.get("TOKEN"));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ip_suffix_parses_the_address_after_at() {
        assert_eq!(ip_suffix("alice@10.0.0.2"), Some("10.0.0.2".parse().unwrap()));
        assert_eq!(ip_suffix("malformed"), None);
    }

    #[test]
    fn ip_binding_rejects_mismatched_source() {
        let src: SocketAddr = "10.0.0.9:50999".parse().unwrap();
        assert!(!ip_binding_ok("alice@10.0.0.2", src));
    }

    #[test]
    fn ip_binding_accepts_matching_source() {
        let src: SocketAddr = "10.0.0.2:50999".parse().unwrap();
        assert!(ip_binding_ok("alice@10.0.0.2", src));
    }
}
