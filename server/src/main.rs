use std::env;
use std::fs;
use std::io::ErrorKind;
use std::net::UdpSocket;
use std::path::Path;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use anyhow::Context;

use tandem_core::constants::MAX_DATAGRAM;
use tandem_core::frame;

use server::dispatch;
use server::ledger::SessionStore;
use server::settings::ServerSettings;
use server::snapshot;

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().collect();
    let settings = match args.get(1) {
        Some(path) => match ServerSettings::load(Path::new(path)) {
            Ok(settings) => settings,
            Err(e) => {
                eprintln!("{e}");
                process::exit(1);
            }
        },
        None => ServerSettings::default(),
    };

    if let Err(e) = tandem_core::init_logging("tandem-server.log", settings.debug) {
        eprintln!("{e}");
        process::exit(1);
    }

    log::info!("Starting tandem server");
    log::info!("Process PID: {}", process::id());

    let quit = Arc::new(AtomicBool::new(false));
    {
        let quit = quit.clone();
        ctrlc::set_handler(move || {
            if quit.swap(true, Ordering::SeqCst) {
                log::info!("Alright, alright, I'm already terminating!");
            } else {
                log::info!("Got signal to terminate. Shutdown initiated...");
            }
        })
        .context("installing the shutdown handler")?;
    }

    fs::create_dir_all(&settings.backup_directory).with_context(|| {
        format!(
            "creating backup directory {}",
            settings.backup_directory.display()
        )
    })?;

    let mut store = snapshot::load_latest(&settings.backup_directory)?
        .unwrap_or_else(|| {
            log::info!("no snapshot found, starting empty");
            SessionStore::new()
        });

    let socket = UdpSocket::bind((settings.bind_address.as_str(), settings.port))
        .with_context(|| format!("binding {}:{}", settings.bind_address, settings.port))?;
    socket
        .set_read_timeout(Some(settings.poll_interval))
        .context("setting the receive timeout")?;
    log::info!("Listening on {}:{}", settings.bind_address, settings.port);

    let mut last_backup = Instant::now();
    let mut buf = [0u8; MAX_DATAGRAM];

    while !quit.load(Ordering::SeqCst) {
        match socket.recv_from(&mut buf) {
            Ok((received, sender)) => match frame::decode(&buf[..received]) {
                Ok(text) => {
                    log::debug!("{sender}: {text}");
                    for outgoing in dispatch::handle(&mut store, sender, &text, unix_now()) {
                        send_frame(&socket, &outgoing);
                    }
                }
                Err(e) => log::warn!("{sender}: dropping datagram: {e}"),
            },
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                // Idle tick: collect expired dedup entries.
                let dropped =
                    store.gc_processed_logs(unix_now(), settings.log_retention.as_secs());
                if dropped > 0 {
                    log::debug!("dropped {dropped} expired log identifier(s)");
                }
            }
            Err(e) => log::error!("receive failed: {e}"),
        }

        if last_backup.elapsed() >= settings.backup_interval {
            write_snapshot(&store, &settings);
            last_backup = Instant::now();
        }
    }

    log::info!("Shutdown signal received, writing final snapshot...");
    write_snapshot(&store, &settings);
    log::info!("Server shutdown complete.");
    Ok(())
}

fn send_frame(socket: &UdpSocket, outgoing: &dispatch::Outgoing) {
    match frame::encode(&outgoing.payload) {
        Ok(datagram) => {
            if let Err(e) = socket.send_to(&datagram, outgoing.to) {
                log::warn!("send to {} failed: {e}", outgoing.to);
            }
        }
        Err(e) => log::warn!("could not frame reply for {}: {e}", outgoing.to),
    }
}

fn write_snapshot(store: &SessionStore, settings: &ServerSettings) {
    match snapshot::save(store, &settings.backup_directory) {
        Ok(path) => log::info!("state snapshot written to {}", path.display()),
        Err(e) => log::error!("snapshot failed: {e}"),
    }
}
