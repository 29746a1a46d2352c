//! LSNP REPL entry point.
//!
//! Wires a `Controller` to a UDP socket and an mDNS `Discovery` instance,
//! spawns the receive and periodic-task threads, and reads commands from
//! stdin until `quit`.

use lsnp_core::config::LsnpConfig;
use lsnp_core::controller::Controller;
use lsnp_core::discovery::Discovery;
use lsnp_core::game::Symbol;
use lsnp_core::transport::UdpTransport;
use lsnp_core::{dispatch, periodic};
use std::io::{self, BufRead, Write};
use std::net::{Ipv4Addr, SocketAddr};

fn main() {
    println!("LSNP Node - Starting...");

    let config = load_config();
    let logger = initialize_logger(&config);
    logger.info("LSNP node starting...");

    let local_ip = detect_local_ipv4().unwrap_or_else(|| {
        logger.warn("could not determine LAN IP, falling back to 127.0.0.1");
        Ipv4Addr::new(127, 0, 0, 1)
    });

    let username = std::env::args().nth(2).unwrap_or_else(|| {
        std::env::var("USER").unwrap_or_else(|_| "anon".to_string())
    });

    let bind_addr: SocketAddr = format!("0.0.0.0:{}", config.port)
        .parse()
        .expect("bind address is always valid");

    let transport = match UdpTransport::new(bind_addr, logger.clone()) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("failed to bind UDP socket: {}", e);
            std::process::exit(1);
        }
    };
    let port = config.port as u16;

    std::fs::create_dir_all(&config.files_dir).ok();
    std::fs::create_dir_all(&config.downloads_dir).ok();

    let ctrl = Controller::new(&username, local_ip, port, transport, config.clone(), logger.clone());

    if let Ok(discovery) = Discovery::new(logger.for_component("Discovery").unwrap_or_else(|_| logger.clone())) {
        let _ = discovery.register(&ctrl.local_user_id, &username, &config.display_name, local_ip, port);
        let peers_ctrl = ctrl.clone();
        let _ = discovery.browse(move |user_id, display_name, ip, port| {
            peers_ctrl.peers().lock().unwrap().upsert(&user_id, &display_name, ip, port);
        });
    } else {
        logger.warn("mDNS discovery unavailable; relying on PROFILE broadcasts only");
    }

    spawn_receive_loop(ctrl.clone());
    periodic::spawn_rebroadcast(ctrl.clone());
    periodic::spawn_housekeeping(ctrl.clone());

    ctrl.broadcast_profile(&config.display_name);
    println!("Listening as {} on port {}", ctrl.local_user_id, port);

    run_repl(&ctrl, &config);
}

fn spawn_receive_loop(ctrl: Controller) {
    std::thread::spawn(move || loop {
        match ctrl.poll_incoming() {
            Some((frame, addr)) => dispatch::dispatch(&ctrl, frame, addr),
            None => std::thread::sleep(std::time::Duration::from_millis(20)),
        }
    });
}

fn initialize_logger(config: &LsnpConfig) -> logging::Logger {
    let log_level = config.log_level.parse().unwrap_or(logging::LogLevel::Info);
    let log_path = config.log_file_path.clone().into();

    match logging::Logger::with_component(log_path, log_level, "Main".to_string(), config.enable_console) {
        Ok(logger) => logger,
        Err(e) => {
            eprintln!("Failed to create logger: {}", e);
            eprintln!("Cannot continue without logging system.");
            std::process::exit(1);
        }
    }
}

/// Resolution order: `LSNP_CONFIG` env var, then the first CLI argument,
/// then `lsnp_config.json`, then defaults.
fn load_config() -> LsnpConfig {
    let path_arg = std::env::args().nth(1);
    LsnpConfig::resolve(path_arg.as_deref())
}

fn detect_local_ipv4() -> Option<Ipv4Addr> {
    let socket = std::net::UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    match socket.local_addr().ok()?.ip() {
        std::net::IpAddr::V4(ip) => Some(ip),
        std::net::IpAddr::V6(_) => None,
    }
}

fn run_repl(ctrl: &Controller, config: &LsnpConfig) {
    let stdin = io::stdin();
    print!("> ");
    io::stdout().flush().ok();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(_) => break,
        };
        let parts: Vec<&str> = line.trim().split_whitespace().collect();
        if parts.is_empty() {
            print!("> ");
            io::stdout().flush().ok();
            continue;
        }

        if !dispatch_command(ctrl, config, &parts) {
            break;
        }

        print!("> ");
        io::stdout().flush().ok();
    }
}

/// Returns `false` on `quit`.
fn dispatch_command(ctrl: &Controller, config: &LsnpConfig, parts: &[&str]) -> bool {
    match parts[0] {
        "quit" => return false,
        "peers" => {
            for peer in ctrl.peers().lock().unwrap().iter() {
                println!("{} ({})", peer.user_id, peer.display_name);
            }
        }
        "dms" => {
            for line in ctrl.inbox().lock().unwrap().iter() {
                println!("{}", line);
            }
        }
        "dm" if parts.len() >= 3 => {
            let content = parts[2..].join(" ");
            match ctrl.send_dm(parts[1], &content) {
                Ok(true) => println!("delivered"),
                Ok(false) => println!("no ACK received"),
                Err(e) => println!("error: {}", e),
            }
        }
        "follow" if parts.len() == 2 => report(ctrl.follow(parts[1])),
        "unfollow" if parts.len() == 2 => report(ctrl.unfollow(parts[1])),
        "post" if parts.len() >= 2 => {
            let content = parts[1..].join(" ");
            println!("delivered to {} followers", ctrl.send_post(&content));
        }
        "like" if parts.len() == 3 => report(ctrl.toggle_like(parts[2], parts[1])),
        "ttl" if parts.len() == 2 => match parts[1].parse() {
            Ok(secs) => ctrl.set_post_ttl(secs),
            Err(_) => println!("usage: ttl <seconds>"),
        },
        "sendfile" if parts.len() >= 3 => {
            let description = parts.get(3..).map(|p| p.join(" ")).unwrap_or_default();
            match ctrl.offer_file(parts[1], parts[2].into(), &description) {
                Ok(true) => println!("accepted and sent"),
                Ok(false) => println!("offer rejected or timed out"),
                Err(e) => println!("error: {}", e),
            }
        }
        "acceptfile" if parts.len() == 2 => {
            match ctrl.accept_file(parts[1], std::path::Path::new(&config.downloads_dir)) {
                Ok(path) => println!("saving to {}", path.display()),
                Err(e) => println!("error: {}", e),
            }
        }
        "rejectfile" if parts.len() == 2 => {
            if let Err(e) = ctrl.reject_file(parts[1]) {
                println!("error: {}", e);
            }
        }
        "pendingfiles" => {
            for (file_id, offer) in ctrl.pending_offers().lock().unwrap().iter() {
                println!("{}: {} from {} ({} bytes)", file_id, offer.filename, offer.remote_user, offer.filesize);
            }
        }
        "transfers" => {
            for (file_id, t) in ctrl.incoming_transfers().lock().unwrap().iter() {
                println!("in {}: {:?} ({}/{} bytes)", file_id, t.state, t.received_bytes, t.total_size);
            }
            for (file_id, t) in ctrl.outgoing_transfers().lock().unwrap().iter() {
                println!("out {}: {:?} ({}/{} bytes)", file_id, t.state, t.bytes_sent, t.total_size);
            }
        }
        "broadcast" => ctrl.broadcast_profile(&config.display_name),
        "ping" => ctrl.ping(),
        "verbose" => {
            ctrl.set_verbose(!ctrl.is_verbose());
            println!("verbose = {}", ctrl.is_verbose());
        }
        "ipstats" => println!("known peers: {}", ctrl.peer_count()),
        "revoke" if parts.len() == 2 => ctrl.revoke_token(parts[1]),
        "group" if parts.len() >= 2 => handle_group_command(ctrl, &parts[1..]),
        "game" if parts.len() >= 2 => handle_game_command(ctrl, &parts[1..]),
        _ => println!("unrecognized command: {}", parts.join(" ")),
    }
    true
}

fn report(result: lsnp_core::Result<bool>) {
    match result {
        Ok(true) => println!("ok"),
        Ok(false) => println!("no ACK received"),
        Err(e) => println!("error: {}", e),
    }
}

fn handle_group_command(ctrl: &Controller, parts: &[&str]) {
    match parts.first().copied() {
        Some("list") => {
            for group in ctrl.groups().lock().unwrap().iter() {
                println!("{}: {} ({})", group.group_id, group.group_name, group.members_csv());
            }
        }
        Some("create") if parts.len() >= 2 => {
            let members: Vec<String> = parts[2..].iter().map(|s| s.to_string()).collect();
            match ctrl.group_create(parts[1], &members) {
                Ok(id) => println!("created group {}", id),
                Err(e) => println!("error: {}", e),
            }
        }
        Some("add") if parts.len() >= 3 => {
            let members: Vec<String> = parts[2..].iter().map(|s| s.to_string()).collect();
            if let Err(e) = ctrl.group_add(parts[1], &members) {
                println!("error: {}", e);
            }
        }
        Some("remove") if parts.len() >= 3 => {
            let members: Vec<String> = parts[2..].iter().map(|s| s.to_string()).collect();
            if let Err(e) = ctrl.group_remove(parts[1], &members) {
                println!("error: {}", e);
            }
        }
        Some("message") if parts.len() >= 3 => {
            let content = parts[2..].join(" ");
            match ctrl.group_message(parts[1], &content) {
                Ok(n) => println!("delivered to {} members", n),
                Err(e) => println!("error: {}", e),
            }
        }
        _ => println!("usage: group {{list|create|add|remove|message}} ..."),
    }
}

fn handle_game_command(ctrl: &Controller, parts: &[&str]) {
    match parts.first().copied() {
        Some("list") => {
            for (game_id, game) in ctrl.games().lock().unwrap().iter() {
                println!("{}: vs {} (active={})", game_id, game.opponent, game.active);
            }
        }
        Some("invite") if parts.len() == 3 => {
            let symbol = match Symbol::parse(&parts[2].to_uppercase()) {
                Some(s) => s,
                None => {
                    println!("symbol must be X or O");
                    return;
                }
            };
            match ctrl.tictactoe_invite(parts[1], symbol) {
                Ok(id) => println!("invited, game id {}", id),
                Err(e) => println!("error: {}", e),
            }
        }
        Some("move") if parts.len() == 3 => {
            let position: usize = match parts[2].parse() {
                Ok(p) => p,
                Err(_) => {
                    println!("position must be 0..8");
                    return;
                }
            };
            match ctrl.tictactoe_move(parts[1], position) {
                Ok(Some(result)) => println!("{:?}", result),
                Ok(None) => println!("move recorded"),
                Err(e) => println!("error: {}", e),
            }
        }
        Some("forfeit") if parts.len() == 2 => {
            if let Err(e) = ctrl.forfeit_game(parts[1]) {
                println!("error: {}", e);
            }
        }
        _ => println!("usage: game {{list|invite|move|forfeit}} ..."),
    }
}
