//! Controller facade (C13): owns every piece of shared mutable state and
//! exposes one method per user-facing operation.
//!
//! Mirrors `Storage`'s shape — a `Clone`-able handle wrapping `Arc<Mutex<_>>`
//! collections, partitioned by cohesion rather than one coarse lock, so the
//! receive task and the REPL task never contend on unrelated state.

use crate::config::LsnpConfig;
use crate::error::{LsnpError, Result};
use crate::filetransfer::{
    total_chunks_for, validate_avatar, IncomingTransfer, OutgoingTransfer, CHUNK_SIZE,
};
use crate::game::{Game, GameResult, Symbol};
use crate::groups::{Group, GroupTable};
use crate::peer::{HandleResolveError, PeerTable};
use crate::reliability::{send_with_retry, WaiterRegistry, FILE_RESPONSE_TIMEOUT};
use crate::social::{LikeAction, SocialState};
use crate::token::{RevocationSet, Scope};
use crate::transport::UdpTransport;

use base64::Engine;
use logging::Logger;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn random_id(nibbles: usize) -> String {
    let mut s = String::with_capacity(nibbles);
    for _ in 0..nibbles {
        let n: u8 = rand::random::<u8>() % 16;
        s.push(std::char::from_digit(n as u32, 16).unwrap());
    }
    s
}

/// An inbound file offer the local user hasn't yet accepted or rejected.
pub struct PendingOffer {
    pub remote_user: String,
    pub filename: String,
    pub filesize: u64,
    pub filetype: String,
    pub description: String,
}

#[derive(Clone)]
pub struct Controller {
    pub local_user_id: Arc<str>,
    pub local_username: Arc<str>,
    pub local_ip: Ipv4Addr,
    pub port: u16,
    config: Arc<LsnpConfig>,
    logger: Logger,

    transport: Arc<Mutex<UdpTransport>>,

    peers: Arc<Mutex<PeerTable>>,
    social: Arc<Mutex<SocialState>>,
    inbox: Arc<Mutex<Vec<String>>>,
    groups: Arc<Mutex<GroupTable>>,
    games: Arc<Mutex<HashMap<String, Game>>>,

    pending_offers: Arc<Mutex<HashMap<String, PendingOffer>>>,
    incoming_transfers: Arc<Mutex<HashMap<String, IncomingTransfer>>>,
    outgoing_transfers: Arc<Mutex<HashMap<String, OutgoingTransfer>>>,

    ack_waiters: Arc<WaiterRegistry<String>>,
    file_waiters: Arc<WaiterRegistry<String>>,

    revocation: Arc<RevocationSet>,
    verbose: Arc<Mutex<bool>>,
    post_ttl_seconds: Arc<Mutex<u64>>,
}

impl Controller {
    pub fn new(
        local_username: &str,
        local_ip: Ipv4Addr,
        port: u16,
        transport: UdpTransport,
        config: LsnpConfig,
        logger: Logger,
    ) -> Self {
        let local_user_id = format!("{}@{}", local_username, local_ip);
        let post_ttl = config.post_ttl_seconds;

        Controller {
            local_user_id: Arc::from(local_user_id.as_str()),
            local_username: Arc::from(local_username),
            local_ip,
            port,
            config: Arc::new(config),
            logger,
            transport: Arc::new(Mutex::new(transport)),
            peers: Arc::new(Mutex::new(PeerTable::new())),
            social: Arc::new(Mutex::new(SocialState::new())),
            inbox: Arc::new(Mutex::new(Vec::new())),
            groups: Arc::new(Mutex::new(GroupTable::new())),
            games: Arc::new(Mutex::new(HashMap::new())),
            pending_offers: Arc::new(Mutex::new(HashMap::new())),
            incoming_transfers: Arc::new(Mutex::new(HashMap::new())),
            outgoing_transfers: Arc::new(Mutex::new(HashMap::new())),
            ack_waiters: Arc::new(WaiterRegistry::new()),
            file_waiters: Arc::new(WaiterRegistry::new()),
            revocation: Arc::new(RevocationSet::new()),
            verbose: Arc::new(Mutex::new(false)),
            post_ttl_seconds: Arc::new(Mutex::new(post_ttl)),
        }
    }

    pub fn config(&self) -> &LsnpConfig {
        &self.config
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    pub fn set_verbose(&self, verbose: bool) {
        *self.verbose.lock().unwrap() = verbose;
    }

    pub fn is_verbose(&self) -> bool {
        *self.verbose.lock().unwrap()
    }

    pub fn set_post_ttl(&self, ttl_seconds: u64) {
        *self.post_ttl_seconds.lock().unwrap() = ttl_seconds;
    }

    pub fn post_ttl(&self) -> u64 {
        *self.post_ttl_seconds.lock().unwrap()
    }

    fn token_ttl(&self) -> u64 {
        self.config.token_ttl_seconds
    }

    fn retry_count(&self) -> u32 {
        self.config.retry_count
    }

    fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.config.retry_interval_ms)
    }

    pub fn ack_waiters(&self) -> &WaiterRegistry<String> {
        &self.ack_waiters
    }

    pub fn file_waiters(&self) -> &WaiterRegistry<String> {
        &self.file_waiters
    }

    pub fn revocation(&self) -> &RevocationSet {
        &self.revocation
    }

    pub fn peers(&self) -> &Mutex<PeerTable> {
        &self.peers
    }

    pub fn social(&self) -> &Mutex<SocialState> {
        &self.social
    }

    pub fn inbox(&self) -> &Mutex<Vec<String>> {
        &self.inbox
    }

    pub fn groups(&self) -> &Mutex<GroupTable> {
        &self.groups
    }

    pub fn games(&self) -> &Mutex<HashMap<String, Game>> {
        &self.games
    }

    pub fn pending_offers(&self) -> &Mutex<HashMap<String, PendingOffer>> {
        &self.pending_offers
    }

    pub fn incoming_transfers(&self) -> &Mutex<HashMap<String, IncomingTransfer>> {
        &self.incoming_transfers
    }

    pub fn outgoing_transfers(&self) -> &Mutex<HashMap<String, OutgoingTransfer>> {
        &self.outgoing_transfers
    }

    fn resolve(&self, handle: &str) -> Result<String> {
        self.peers.lock().unwrap().resolve(handle).map_err(|e| match e {
            HandleResolveError::Unknown(h) => LsnpError::UnknownPeer(h),
            HandleResolveError::Ambiguous(h, _) => LsnpError::AmbiguousHandle(h),
        })
    }

    fn peer_addr(&self, user_id: &str) -> Result<SocketAddr> {
        let peers = self.peers.lock().unwrap();
        let record = peers
            .get(user_id)
            .ok_or_else(|| LsnpError::UnknownPeer(user_id.to_string()))?;
        Ok(SocketAddr::new(IpAddr::V4(record.ip), record.port))
    }

    pub(crate) fn send_frame(&self, frame: &crate::codec::Frame, addr: SocketAddr) {
        let bytes = frame.encode();
        if let Err(e) = self.transport.lock().unwrap().send_to(&bytes, addr) {
            self.logger.error(&format!("send to {} failed: {}", addr, e));
        }
    }

    pub(crate) fn send_ack(&self, addr: SocketAddr, message_id: &str) {
        let mut frame = crate::codec::Frame::new("ACK");
        frame.set("MESSAGE_ID", message_id).set("STATUS", "RECEIVED");
        self.send_frame(&frame, addr);
    }

    pub(crate) fn resolve_full(&self, handle: &str) -> Result<String> {
        self.resolve(handle)
    }

    /// Polls the socket for one datagram and decodes it. Malformed frames
    /// are logged and skipped rather than surfaced, matching §7's
    /// "decode failure: log, drop" rule. Drives the receive loop in
    /// `lsnp-node`'s `main`.
    pub fn poll_incoming(&self) -> Option<(crate::codec::Frame, SocketAddr)> {
        let received = match self.transport.lock().unwrap().receive() {
            Ok(received) => received,
            Err(e) => {
                self.logger.error(&format!("receive failed: {}", e));
                return None;
            }
        };
        let (data, addr) = received?;
        match crate::codec::Frame::decode(&data) {
            Ok(frame) => Some((frame, addr)),
            Err(e) => {
                self.logger.warn(&format!("dropping malformed frame from {}: {}", addr, e));
                None
            }
        }
    }

    // ---- Outbound operations ----

    /// Sends a chat DM and blocks for up to `retry_count * retry_interval_ms`
    /// (config) for the ACK.
    pub fn send_dm(&self, handle: &str, content: &str) -> Result<bool> {
        let to = self.resolve(handle)?;
        let addr = self.peer_addr(&to)?;
        let message_id = random_id(16);
        let token = crate::token::issue(&self.local_user_id, Scope::Chat, self.token_ttl());

        let mut frame = crate::codec::Frame::new("DM");
        frame
            .set("FROM", self.local_user_id.as_ref())
            .set("TO", to.as_str())
            .set("CONTENT", content)
            .set("TIMESTAMP", now_unix().to_string())
            .set("MESSAGE_ID", message_id.clone())
            .set("TOKEN", token);

        let ok = send_with_retry(&self.ack_waiters, &message_id, self.retry_count(), self.retry_interval(), || {
            self.send_frame(&frame, addr);
        });
        Ok(ok)
    }

    pub fn follow(&self, handle: &str) -> Result<bool> {
        self.follow_or_unfollow(handle, true)
    }

    pub fn unfollow(&self, handle: &str) -> Result<bool> {
        self.follow_or_unfollow(handle, false)
    }

    fn follow_or_unfollow(&self, handle: &str, follow: bool) -> Result<bool> {
        let to = self.resolve(handle)?;
        let addr = self.peer_addr(&to)?;
        let message_id = random_id(16);
        let (scope, type_name) = if follow {
            (Scope::Follow, "FOLLOW")
        } else {
            (Scope::Unfollow, "UNFOLLOW")
        };
        let token = crate::token::issue(&self.local_user_id, scope, self.token_ttl());

        let mut frame = crate::codec::Frame::new(type_name);
        frame
            .set("FROM", self.local_user_id.as_ref())
            .set("TO", to.as_str())
            .set("MESSAGE_ID", message_id.clone())
            .set("TIMESTAMP", now_unix().to_string())
            .set("TOKEN", token);

        let ok = send_with_retry(&self.ack_waiters, &message_id, self.retry_count(), self.retry_interval(), || {
            self.send_frame(&frame, addr);
        });
        if ok {
            let mut social = self.social.lock().unwrap();
            if follow {
                social.follow(&self.local_user_id, &to);
            } else {
                social.unfollow(&to);
            }
        }
        Ok(ok)
    }

    /// Batched reliability per §4.7: every follower gets an independent
    /// MessageID, but delivery is one send pass across all of them followed
    /// by a single aggregate retry pass over whoever is still unacknowledged
    /// — not a full per-follower retry loop, which would block the caller for
    /// `retry_count * retry_interval` per unreachable follower in sequence.
    pub fn send_post(&self, content: &str) -> usize {
        let followers: Vec<String> = self.social.lock().unwrap().followers().cloned().collect();
        let ttl = self.post_ttl();

        let mut outstanding: Vec<(String, SocketAddr, crate::codec::Frame)> = Vec::new();
        for follower in &followers {
            let addr = match self.peer_addr(follower) {
                Ok(addr) => addr,
                Err(_) => continue,
            };
            let message_id = random_id(16);
            let token = crate::token::issue(&self.local_user_id, Scope::Post, self.token_ttl());

            let mut frame = crate::codec::Frame::new("POST");
            frame
                .set("USER_ID", self.local_user_id.as_ref())
                .set("CONTENT", content)
                .set("TTL", ttl.to_string())
                .set("MESSAGE_ID", message_id.clone())
                .set("TIMESTAMP", now_unix().to_string())
                .set("TOKEN", token);

            self.ack_waiters.register(&message_id);
            self.send_frame(&frame, addr);
            outstanding.push((message_id, addr, frame));
        }

        let retry_interval = self.retry_interval();
        let mut success = 0;
        let mut unacked = Vec::new();
        for (message_id, addr, frame) in outstanding {
            match self.ack_waiters.wait(&message_id, retry_interval) {
                crate::reliability::WaiterOutcome::Signaled(_) => success += 1,
                crate::reliability::WaiterOutcome::TimedOut => unacked.push((message_id, addr, frame)),
            }
        }

        for (message_id, addr, frame) in &unacked {
            self.ack_waiters.register(message_id);
            self.send_frame(frame, *addr);
        }
        for (message_id, _, _) in &unacked {
            if let crate::reliability::WaiterOutcome::Signaled(_) = self.ack_waiters.wait(message_id, retry_interval) {
                success += 1;
            }
        }
        success
    }

    pub fn toggle_like(&self, owner_handle: &str, post_timestamp: &str) -> Result<bool> {
        let owner = self.resolve(owner_handle)?;
        let addr = self.peer_addr(&owner)?;
        let action = self.social.lock().unwrap().next_like_action(&owner, post_timestamp);
        // LIKE carries no MESSAGE_ID (§6); the receiver ACKs under this derived
        // key instead, so the waiter must be registered under the same key.
        let message_id = format!("{}|{}|{}", self.local_user_id, post_timestamp, action.as_str());
        let token = crate::token::issue(&self.local_user_id, Scope::Like, self.token_ttl());

        let mut frame = crate::codec::Frame::new("LIKE");
        frame
            .set("FROM", self.local_user_id.as_ref())
            .set("TO", owner.as_str())
            .set("POST_TIMESTAMP", post_timestamp)
            .set("ACTION", action.as_str())
            .set("TIMESTAMP", now_unix().to_string())
            .set("TOKEN", token);

        let ok = send_with_retry(&self.ack_waiters, &message_id, self.retry_count(), self.retry_interval(), || {
            self.send_frame(&frame, addr);
        });
        if ok {
            self.social.lock().unwrap().apply_like_toggle(&owner, post_timestamp, action);
        }
        Ok(ok)
    }

    /// Sends `FILE_OFFER` and blocks up to 60 s for `FILE_ACCEPT`/`FILE_REJECT`.
    pub fn offer_file(&self, handle: &str, path: PathBuf, description: &str) -> Result<bool> {
        let to = self.resolve(handle)?;
        let addr = self.peer_addr(&to)?;

        let metadata = std::fs::metadata(&path).map_err(|e| LsnpError::InvalidInput(e.to_string()))?;
        let filesize = metadata.len();
        let filename = path
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "file".to_string());
        let filetype = mime_guess_from_extension(&filename);

        let file_id = random_id(8);
        let token = crate::token::issue(&self.local_user_id, Scope::File, self.token_ttl());

        let mut frame = crate::codec::Frame::new("FILE_OFFER");
        frame
            .set("FROM", self.local_user_id.as_ref())
            .set("TO", to.as_str())
            .set("FILENAME", filename)
            .set("FILESIZE", filesize.to_string())
            .set("FILETYPE", filetype)
            .set("FILEID", file_id.clone())
            .set("DESCRIPTION", description)
            .set("TIMESTAMP", now_unix().to_string())
            .set("TOKEN", token.clone());

        self.outgoing_transfers.lock().unwrap().insert(
            file_id.clone(),
            OutgoingTransfer::new(
                file_id.clone(),
                to.clone(),
                path,
                frame.get("FILETYPE").to_string(),
                filesize,
                now_unix(),
            ),
        );

        self.file_waiters.register(&file_id);
        self.send_frame(&frame, addr);
        let outcome = self.file_waiters.wait(&file_id, FILE_RESPONSE_TIMEOUT);

        match outcome {
            crate::reliability::WaiterOutcome::Signaled(status) if status == "ACCEPT" => {
                self.start_sending_chunks(&file_id, &to, addr);
                Ok(true)
            }
            _ => {
                self.outgoing_transfers.lock().unwrap().remove(&file_id);
                Ok(false)
            }
        }
    }

    /// Iterates every chunk for `file_id` and sends it with a ~100 ms pacing
    /// delay. Runs synchronously on the calling (REPL) task, matching the
    /// spec's description of the sender-side chunk loop.
    fn start_sending_chunks(&self, file_id: &str, to: &str, addr: SocketAddr) {
        let total_chunks = {
            let transfers = self.outgoing_transfers.lock().unwrap();
            match transfers.get(file_id) {
                Some(t) => {
                    total_chunks_for(t.total_size)
                }
                None => return,
            }
        };

        {
            let mut transfers = self.outgoing_transfers.lock().unwrap();
            if let Some(t) = transfers.get_mut(file_id) {
                t.accept();
            }
        }

        for index in 0..total_chunks {
            let chunk = {
                let mut transfers = self.outgoing_transfers.lock().unwrap();
                match transfers.get_mut(file_id) {
                    Some(t) => t.read_chunk(index),
                    None => return,
                }
            };
            let data = match chunk {
                Ok(data) => data,
                Err(e) => {
                    self.logger.error(&format!("chunk read failed for {}: {}", file_id, e));
                    return;
                }
            };

            let token = crate::token::issue(&self.local_user_id, Scope::File, self.token_ttl());
            let mut frame = crate::codec::Frame::new("FILE_CHUNK");
            frame
                .set("FROM", self.local_user_id.as_ref())
                .set("TO", to)
                .set("FILEID", file_id)
                .set("CHUNK_INDEX", index.to_string())
                .set("TOTAL_CHUNKS", total_chunks.to_string())
                .set("CHUNK_SIZE", data.len().to_string())
                .set("TOKEN", token)
                .set("DATA", base64::engine::general_purpose::STANDARD.encode(&data));

            self.send_frame(&frame, addr);
            std::thread::sleep(std::time::Duration::from_millis(100));
        }

        self.outgoing_transfers.lock().unwrap().remove(file_id);
    }

    pub fn accept_file(&self, file_id: &str, downloads_dir: &std::path::Path) -> Result<PathBuf> {
        let offer = self
            .pending_offers
            .lock()
            .unwrap()
            .remove(file_id)
            .ok_or_else(|| LsnpError::InvalidInput(format!("no pending offer for {}", file_id)))?;

        let addr = self.peer_addr(&offer.remote_user)?;
        let total_chunks = total_chunks_for(offer.filesize);

        let mut transfer = IncomingTransfer::new(
            file_id.to_string(),
            offer.remote_user.clone(),
            offer.filename.clone(),
            offer.filetype.clone(),
            offer.description.clone(),
            offer.filesize,
            total_chunks,
            now_unix(),
        );
        let path = transfer.accept(downloads_dir);
        self.incoming_transfers.lock().unwrap().insert(file_id.to_string(), transfer);

        let token = crate::token::issue(&self.local_user_id, Scope::File, self.token_ttl());
        let mut frame = crate::codec::Frame::new("FILE_ACCEPT");
        frame
            .set("FROM", self.local_user_id.as_ref())
            .set("TO", offer.remote_user.as_str())
            .set("FILEID", file_id)
            .set("TOKEN", token)
            .set("TIMESTAMP", now_unix().to_string());
        self.send_frame(&frame, addr);

        Ok(path)
    }

    pub fn reject_file(&self, file_id: &str) -> Result<()> {
        let offer = self
            .pending_offers
            .lock()
            .unwrap()
            .remove(file_id)
            .ok_or_else(|| LsnpError::InvalidInput(format!("no pending offer for {}", file_id)))?;
        let addr = self.peer_addr(&offer.remote_user)?;

        let token = crate::token::issue(&self.local_user_id, Scope::File, self.token_ttl());
        let mut frame = crate::codec::Frame::new("FILE_REJECT");
        frame
            .set("FROM", self.local_user_id.as_ref())
            .set("TO", offer.remote_user.as_str())
            .set("FILEID", file_id)
            .set("TOKEN", token)
            .set("TIMESTAMP", now_unix().to_string());
        self.send_frame(&frame, addr);
        Ok(())
    }

    pub fn group_create(&self, name: &str, member_handles: &[String]) -> Result<String> {
        let group_id = random_id(8);
        let mut members = vec![self.local_user_id.to_string()];
        for handle in member_handles {
            members.push(self.resolve(handle)?);
        }

        let group = Group::new(group_id.clone(), name.to_string(), self.local_user_id.to_string(), members.clone());
        self.groups.lock().unwrap().insert(group);

        for member in &members {
            if member.as_str() == self.local_user_id.as_ref() {
                continue;
            }
            if let Ok(addr) = self.peer_addr(member) {
                let token = crate::token::issue(&self.local_user_id, Scope::Group, self.token_ttl());
                let mut frame = crate::codec::Frame::new("GROUP_CREATE");
                frame
                    .set("FROM", self.local_user_id.as_ref())
                    .set("GROUP_ID", group_id.clone())
                    .set("GROUP_NAME", name)
                    .set("MEMBERS", members.join(","))
                    .set("TIMESTAMP", now_unix().to_string())
                    .set("TOKEN", token);
                self.send_frame(&frame, addr);
            }
        }
        Ok(group_id)
    }

    pub fn group_add(&self, group_id: &str, member_handles: &[String]) -> Result<()> {
        let added: Vec<String> = member_handles.iter().map(|h| self.resolve(h)).collect::<Result<_>>()?;
        self.groups
            .lock()
            .unwrap()
            .add(group_id, &self.local_user_id, &added)
            .map_err(|e| LsnpError::InvalidInput(e.to_string()))?;

        let members = self.groups.lock().unwrap().get(group_id).unwrap().members.clone();
        let name = self.groups.lock().unwrap().get(group_id).unwrap().group_name.clone();

        for member in &members {
            if member.as_str() == self.local_user_id.as_ref() {
                continue;
            }
            if let Ok(addr) = self.peer_addr(member) {
                let token = crate::token::issue(&self.local_user_id, Scope::Group, self.token_ttl());
                let mut frame = crate::codec::Frame::new("GROUP_ADD");
                frame
                    .set("FROM", self.local_user_id.as_ref())
                    .set("GROUP_ID", group_id)
                    .set("GROUP_NAME", name.as_str())
                    .set("ADD", added.join(","))
                    .set("MEMBERS", members.join(","))
                    .set("TIMESTAMP", now_unix().to_string())
                    .set("TOKEN", token);
                self.send_frame(&frame, addr);
            }
        }
        Ok(())
    }

    pub fn group_remove(&self, group_id: &str, member_handles: &[String]) -> Result<()> {
        let removed: Vec<String> = member_handles.iter().map(|h| self.resolve(h)).collect::<Result<_>>()?;
        let notify: Vec<String> = {
            let groups = self.groups.lock().unwrap();
            let group = groups.get(group_id).ok_or_else(|| LsnpError::InvalidInput(group_id.to_string()))?;
            let mut set: Vec<String> = group.members.clone();
            for r in &removed {
                if !set.contains(r) {
                    set.push(r.clone());
                }
            }
            set
        };

        self.groups
            .lock()
            .unwrap()
            .remove(group_id, &self.local_user_id, &removed)
            .map_err(|e| LsnpError::InvalidInput(e.to_string()))?;

        for member in &notify {
            if member.as_str() == self.local_user_id.as_ref() {
                continue;
            }
            if let Ok(addr) = self.peer_addr(member) {
                let token = crate::token::issue(&self.local_user_id, Scope::Group, self.token_ttl());
                let mut frame = crate::codec::Frame::new("GROUP_REMOVE");
                frame
                    .set("FROM", self.local_user_id.as_ref())
                    .set("GROUP_ID", group_id)
                    .set("REMOVE", removed.join(","))
                    .set("TIMESTAMP", now_unix().to_string())
                    .set("TOKEN", token);
                self.send_frame(&frame, addr);
            }
        }
        Ok(())
    }

    pub fn group_message(&self, group_id: &str, content: &str) -> Result<usize> {
        let members = {
            let groups = self.groups.lock().unwrap();
            let group = groups.get(group_id).ok_or_else(|| LsnpError::InvalidInput(group_id.to_string()))?;
            group.members.clone()
        };

        let mut success = 0;
        for member in &members {
            if member.as_str() == self.local_user_id.as_ref() {
                continue;
            }
            let addr = match self.peer_addr(member) {
                Ok(addr) => addr,
                Err(_) => continue,
            };
            let message_id = random_id(16);
            let token = crate::token::issue(&self.local_user_id, Scope::Group, self.token_ttl());

            let mut frame = crate::codec::Frame::new("GROUP_MESSAGE");
            frame
                .set("FROM", self.local_user_id.as_ref())
                .set("GROUP_ID", group_id)
                .set("MESSAGE_ID", message_id.clone())
                .set("CONTENT", content)
                .set("TIMESTAMP", now_unix().to_string())
                .set("TOKEN", token);

            if send_with_retry(&self.ack_waiters, &message_id, self.retry_count(), self.retry_interval(), || {
                self.send_frame(&frame, addr);
            }) {
                success += 1;
            }
        }
        Ok(success)
    }

    pub fn tictactoe_invite(&self, handle: &str, local_symbol: Symbol) -> Result<String> {
        let to = self.resolve(handle)?;
        let addr = self.peer_addr(&to)?;
        let game_id = random_id(8);
        let message_id = random_id(16);
        let token = crate::token::issue(&self.local_user_id, Scope::Game, self.token_ttl());

        let mut frame = crate::codec::Frame::new("TICTACTOE_INVITE");
        frame
            .set("FROM", self.local_user_id.as_ref())
            .set("TO", to.as_str())
            .set("GAMEID", game_id.clone())
            .set("MESSAGE_ID", message_id.clone())
            .set("SYMBOL", local_symbol.as_str())
            .set("TIMESTAMP", now_unix().to_string())
            .set("TOKEN", token);

        self.games.lock().unwrap().insert(game_id.clone(), Game::new(game_id.clone(), to, local_symbol));
        self.send_frame(&frame, addr);
        Ok(game_id)
    }

    pub fn tictactoe_move(&self, game_id: &str, position: usize) -> Result<Option<GameResult>> {
        let (to, symbol, turn) = {
            let mut games = self.games.lock().unwrap();
            let game = games
                .get_mut(game_id)
                .ok_or_else(|| LsnpError::InvalidInput(format!("unknown game {}", game_id)))?;
            game.place(position, game.local_symbol).map_err(|e| LsnpError::InvalidInput(e.to_string()))?;
            (game.opponent.clone(), game.local_symbol, game.turn)
        };
        let addr = self.peer_addr(&to)?;
        let message_id = random_id(16);
        let token = crate::token::issue(&self.local_user_id, Scope::Game, self.token_ttl());

        let mut frame = crate::codec::Frame::new("TICTACTOE_MOVE");
        frame
            .set("FROM", self.local_user_id.as_ref())
            .set("TO", to.as_str())
            .set("GAMEID", game_id)
            .set("MESSAGE_ID", message_id)
            .set("POSITION", position.to_string())
            .set("SYMBOL", symbol.as_str())
            .set("TURN", turn.to_string())
            .set("TIMESTAMP", now_unix().to_string())
            .set("TOKEN", token);
        self.send_frame(&frame, addr);

        let winning_line = {
            let games = self.games.lock().unwrap();
            games.get(game_id).and_then(|g| g.check_winner(symbol))
        };

        if let Some(line) = winning_line {
            self.send_game_result(game_id, &to, GameResult::Win, symbol, Some(line))?;
            if let Some(game) = self.games.lock().unwrap().get_mut(game_id) {
                game.mark_finished();
            }
            return Ok(Some(GameResult::Win));
        }

        let drawn = self.games.lock().unwrap().get(game_id).map(|g| g.is_board_full()).unwrap_or(false);
        if drawn {
            self.send_game_result(game_id, &to, GameResult::Draw, symbol, None)?;
            if let Some(game) = self.games.lock().unwrap().get_mut(game_id) {
                game.mark_finished();
            }
            return Ok(Some(GameResult::Draw));
        }

        Ok(None)
    }

    fn send_game_result(
        &self,
        game_id: &str,
        to: &str,
        result: GameResult,
        symbol: Symbol,
        winning_line: Option<[usize; 3]>,
    ) -> Result<()> {
        let addr = self.peer_addr(to)?;
        let message_id = random_id(16);
        let token = crate::token::issue(&self.local_user_id, Scope::Game, self.token_ttl());

        let mut frame = crate::codec::Frame::new("TICTACTOE_RESULT");
        frame
            .set("FROM", self.local_user_id.as_ref())
            .set("TO", to)
            .set("GAMEID", game_id)
            .set("MESSAGE_ID", message_id)
            .set("RESULT", result.as_str())
            .set("SYMBOL", symbol.as_str())
            .set(
                "WINNING_LINE",
                winning_line.map(crate::game::format_winning_line).unwrap_or_default(),
            )
            .set("TIMESTAMP", now_unix().to_string());
        self.send_frame(&frame, addr);
        Ok(())
    }

    pub fn forfeit_game(&self, game_id: &str) -> Result<()> {
        let to = {
            let mut games = self.games.lock().unwrap();
            let game = games
                .get_mut(game_id)
                .ok_or_else(|| LsnpError::InvalidInput(format!("unknown game {}", game_id)))?;
            game.forfeit();
            game.opponent.clone()
        };
        let symbol = self.games.lock().unwrap().get(game_id).map(|g| g.local_symbol).unwrap_or(Symbol::X);
        self.send_game_result(game_id, &to, GameResult::Loss, symbol, None)
    }

    pub fn broadcast_profile(&self, display_name: &str) {
        let message_id = random_id(16);
        let mut frame = crate::codec::Frame::new("PROFILE");
        frame
            .set("USER_ID", self.local_user_id.as_ref())
            .set("DISPLAY_NAME", display_name)
            .set("TIMESTAMP", now_unix().to_string())
            .set("MESSAGE_ID", message_id);

        if !self.config.avatar_path.is_empty() {
            if let Ok(bytes) = std::fs::read(&self.config.avatar_path) {
                let mime = mime_guess_from_extension(&self.config.avatar_path);
                if validate_avatar(&mime, &bytes).is_ok() {
                    frame
                        .set("AVATAR_TYPE", mime)
                        .set("AVATAR_ENCODING", "base64")
                        .set("AVATAR_DATA", base64::engine::general_purpose::STANDARD.encode(&bytes));
                }
            }
        }

        let octets = self.local_ip.octets();
        let prefix = Ipv4Addr::new(octets[0], octets[1], octets[2], 0);
        if let Err(e) = self.transport.lock().unwrap().broadcast(&frame.encode(), prefix, self.port) {
            self.logger.error(&format!("profile broadcast failed: {}", e));
        }
    }

    pub fn ping(&self) {
        let mut frame = crate::codec::Frame::new("PING");
        frame.set("USER_ID", self.local_user_id.as_ref());
        let octets = self.local_ip.octets();
        let prefix = Ipv4Addr::new(octets[0], octets[1], octets[2], 0);
        let _ = self.transport.lock().unwrap().broadcast(&frame.encode(), prefix, self.port);
    }

    pub fn revoke_token(&self, token: &str) {
        self.revocation.revoke(token);
    }

    pub fn peer_count(&self) -> usize {
        self.peers.lock().unwrap().len()
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.transport.lock().unwrap().local_addr()?)
    }
}

fn mime_guess_from_extension(filename: &str) -> String {
    let lower = filename.to_lowercase();
    if lower.ends_with(".png") {
        "image/png".to_string()
    } else if lower.ends_with(".jpg") || lower.ends_with(".jpeg") {
        "image/jpeg".to_string()
    } else if lower.ends_with(".gif") {
        "image/gif".to_string()
    } else if lower.ends_with(".bmp") {
        "image/bmp".to_string()
    } else if lower.ends_with(".webp") {
        "image/webp".to_string()
    } else {
        "application/octet-stream".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logging::LogLevel;
    use tempfile::tempdir;

    fn test_controller(username: &str) -> Controller {
        let dir = tempdir().unwrap();
        let log_path = dir.path().join("test.log");
        let logger = Logger::new(log_path, LogLevel::Debug).unwrap();
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let transport = UdpTransport::new(addr, logger.clone()).unwrap();
        Controller::new(username, Ipv4Addr::new(127, 0, 0, 1), 0, transport, LsnpConfig::default(), logger)
    }

    #[test]
    fn unknown_peer_is_surfaced_as_an_error() {
        let ctrl = test_controller("alice");
        let result = ctrl.send_dm("bob", "hi");
        assert!(matches!(result, Err(LsnpError::UnknownPeer(_))));
    }

    #[test]
    fn self_follow_never_mutates_social_state() {
        let ctrl = test_controller("alice");
        ctrl.peers.lock().unwrap().upsert(&ctrl.local_user_id.to_string(), "Alice", ctrl.local_ip, 1);
        let _ = ctrl.follow(&ctrl.local_username.to_string());
        assert!(ctrl.social.lock().unwrap().upholds_no_self_invariant(&ctrl.local_user_id));
    }

    #[test]
    fn group_create_registers_local_group() {
        let ctrl = test_controller("alice");
        let group_id = ctrl.group_create("team", &[]).unwrap();
        assert!(ctrl.groups.lock().unwrap().get(&group_id).is_some());
    }
}
