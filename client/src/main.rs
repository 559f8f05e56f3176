mod chests;
mod combat;
mod committer;
mod emulator;
mod reconcile;
mod sampler;
mod selftest;
mod session;
mod settings;
mod status;

use std::env;
use std::path::PathBuf;
use std::process;
use std::thread;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use anyhow::Context;

use tandem_core::error::SyncError;
use tandem_core::protocol::{ClientMessage, Directive};
use tandem_core::throttle::LogThrottle;

use crate::combat::CombatView;
use crate::committer::CommitContext;
use crate::emulator::RetroArchPort;
use crate::reconcile::Reconciler;
use crate::sampler::RamSample;
use crate::session::ServerLink;
use crate::settings::Settings;
use crate::status::PartyStatus;

/// Everything that survives from one tick to the next.
struct ClientState {
    reconciler: Reconciler,
    previous_status: Option<PartyStatus>,
    /// The chest mask as last observed (and therefore last sent).
    last_chest_mask: Option<Vec<u8>>,
    last_gp: Option<u32>,
    force_sync: bool,
    throttle: LogThrottle,
}

struct SessionChoice {
    create: bool,
    name: String,
}

fn usage() -> ! {
    eprintln!("usage: tandem-client [<config.ini>] [new|join <session>]");
    eprintln!("       (or set JOIN_SESSION_NAME in the config file)");
    process::exit(2);
}

fn parse_args(args: &[String]) -> (PathBuf, Option<SessionChoice>) {
    let mut config = PathBuf::from("tandem.ini");
    let mut rest = &args[1..];

    if let Some(first) = rest.first() {
        if first.ends_with(".ini") {
            config = PathBuf::from(first);
            rest = &rest[1..];
        }
    }

    let choice = match rest {
        [] => None,
        [mode, name] => {
            let create = match mode.as_str() {
                "new" => true,
                "join" => false,
                _ => usage(),
            };
            Some(SessionChoice { create, name: name.clone() })
        }
        _ => usage(),
    };

    (config, choice)
}

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().collect();
    let (config_path, cli_choice) = parse_args(&args);

    let settings = match Settings::load(&config_path) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("{e}");
            process::exit(1);
        }
    };

    if let Err(e) = tandem_core::init_logging("tandem-client.log", settings.debug) {
        eprintln!("{e}");
        process::exit(1);
    }

    log::info!("Starting tandem client");
    log::info!("Config: {}", config_path.display());

    let choice = cli_choice
        .or_else(|| {
            settings.join_session_name.clone().map(|name| SessionChoice {
                create: false,
                name,
            })
        })
        .unwrap_or_else(|| usage());

    let series = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("system clock is before the epoch")?
        .as_secs();

    let mut port = RetroArchPort::connect(settings.retroarch_port, settings.poll_interval / 5)
        .context("opening the emulator command port")?;

    match selftest::run(&mut port, settings.button_map_address, settings.pause_delay_interval) {
        Ok(_) => {}
        Err(e) => log::warn!("startup self-test could not run: {e}"),
    }

    let mut link = ServerLink::connect(
        &settings.server_hostname,
        settings.server_port,
        series,
        settings.poll_interval,
        settings.sync_interval,
        settings.test_latency,
    )?;
    link.bootstrap(choice.create, &choice.name)?;

    let mut state = ClientState {
        reconciler: Reconciler::new(settings.min_sane_inventory),
        previous_status: None,
        last_chest_mask: None,
        last_gp: None,
        force_sync: false,
        throttle: LogThrottle::default(),
    };

    let mut previous_tick = Instant::now() - settings.poll_interval;
    loop {
        // A tick that overruns the interval starts the next one immediately.
        let elapsed = previous_tick.elapsed();
        if elapsed < settings.poll_interval {
            thread::sleep(settings.poll_interval - elapsed);
        }
        previous_tick = Instant::now();

        let forced = state.force_sync || state.reconciler.poisoned();
        if let Err(e) = link.maybe_request_sync(forced) {
            if state.throttle.admit(&e.to_string()) {
                log::warn!("sync request failed: {e}");
            }
        }

        match tick(&mut state, &mut port, &mut link, &settings) {
            Ok(()) => {}
            Err(e) => {
                let line = format!("tick failed: {e}");
                if state.throttle.admit(&line) {
                    log::warn!("{line}");
                }
                if e.wants_resync() {
                    state.force_sync = true;
                }
            }
        }
    }
}

fn tick(
    state: &mut ClientState,
    bus: &mut RetroArchPort,
    link: &mut ServerLink,
    settings: &Settings,
) -> Result<(), SyncError> {
    // One receive attempt before touching RAM. An undecodable datagram is
    // logged and dropped, not retried.
    let directive = match link.receive_directive() {
        Ok(directive) => directive,
        Err(SyncError::PeerProtocolError(text)) => {
            log::warn!("discarding peer message: {text}");
            None
        }
        Err(e) => return Err(e),
    };
    link.note_tick(directive.is_some());

    let sample = RamSample::capture(bus, settings)?;
    let field = sample.field_slots()?;
    let battle = sample.battle_slots()?;
    let view = combat::classify(&field, &battle, settings.similarity_threshold);

    // Keep the field region trailing the battle so a combat exit cannot
    // lose items.
    if view.in_battle && view.similarity < 1.0 {
        combat::copy_battle_to_field(bus, settings.field_item_address, &view.table)?;
    }

    // Below the minimum played time no save is loaded; observing the zeroed
    // RAM would only churn the baseline.
    let in_save = sample.played_time >= settings.minimum_played_time;

    if settings.sync_inventory && in_save {
        state.reconciler.observe(&view.table, sample.played_time);
    }

    let party = status::assemble(&sample.presence, &sample.status_low, &sample.status_high);
    if settings.sync_status && view.in_battle {
        if let Some(previous) = &state.previous_status {
            for entry in status::diff_entries(previous, &party) {
                state.reconciler.push_entry(entry);
            }
        }
    }
    state.previous_status = Some(party);

    if settings.sync_chests && state.last_chest_mask.as_deref() != Some(&sample.chest_mask[..]) {
        link.send_message(&ClientMessage::Chest {
            series: link.series(),
            mask: sample.chest_mask.clone(),
        })?;
        state.last_chest_mask = Some(sample.chest_mask.clone());
    }

    if settings.sync_gp && state.last_gp != Some(sample.gp) {
        link.send_message(&ClientMessage::Gp { series: link.series(), amount: sample.gp })?;
        state.last_gp = Some(sample.gp);
    }

    let mut synced = None;
    match directive {
        Some(Directive::Sync(payload)) => {
            state.force_sync = false;
            synced = Some(payload);
        }
        Some(Directive::Report) => {
            link.send_message(&ClientMessage::Report {
                series: link.series(),
                items: view.table.nonzero_items(),
            })?;
        }
        Some(Directive::LogAck(indices)) => state.reconciler.trim_acked(&indices),
        Some(Directive::Status { on, who, bits }) => {
            if settings.sync_status && view.in_battle {
                status::apply_directive(
                    bus,
                    settings.status_1_address,
                    settings.status_2_address,
                    &party,
                    on,
                    who,
                    bits,
                )?;
            }
        }
        Some(Directive::Chest(mask)) => {
            if settings.sync_chests {
                let merged = chests::merge(&sample.chest_mask, &mask);
                if merged != sample.chest_mask {
                    chests::write_mask(bus, settings.chest_address, &merged)?;
                }
                state.last_chest_mask = Some(merged);
            }
        }
        Some(Directive::Success) => {}
        Some(Directive::Error(text)) => log::warn!("server error: {text}"),
        None => {}
    }

    if !state.reconciler.queue().is_empty() {
        link.send_change_queue(state.reconciler.queue())?;
        state.reconciler.purge_status_entries();
    }

    if let Some(payload) = synced {
        if settings.sync_inventory && in_save {
            let target = state.reconciler.merge_sync(&payload, sample.played_time);
            let snapshot: &[u8] = if view.in_battle {
                &sample.battle_raw
            } else {
                &sample.field_raw
            };
            let ctx = CommitContext {
                field_address: settings.field_item_address,
                battle_address: settings.battle_item_address,
                in_battle: view.in_battle,
                snapshot,
                pause_delay: settings.pause_delay_interval,
                debug_verify: settings.debug,
            };
            let written = committer::commit(bus, &ctx, &view.table, &target)?;
            log_commit(&view, &written);
            state.reconciler.committed(written);
        }
    }

    Ok(())
}

fn log_commit(view: &CombatView, written: &tandem_core::inventory::ItemTable) {
    if view.table.same_counts(written) {
        log::debug!("inventory already in sync");
    } else {
        log::info!(
            "committed merged inventory ({} items, {})",
            written.distinct_items(),
            if view.in_battle { "battle" } else { "field" }
        );
    }
}
