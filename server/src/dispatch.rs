//! Routes one decoded datagram through the session store and says what to
//! send back, and to whom. Socket I/O stays in the main loop.

use std::net::SocketAddr;

use tandem_core::protocol::{ChangeEntry, ClientMessage, Directive};

use crate::ledger::{self, SessionStore, SyncReply};

/// One datagram the dispatcher wants on the wire.
#[derive(Debug, PartialEq)]
pub struct Outgoing {
    pub to: SocketAddr,
    pub payload: String,
}

impl Outgoing {
    fn reply(to: SocketAddr, directive: Directive) -> Outgoing {
        Outgoing { to, payload: directive.emit() }
    }
}

/// Handle one message. Errors of any kind become an `ERROR:` reply to the
/// sender; everything else is processed in arrival order.
pub fn handle(store: &mut SessionStore, sender: SocketAddr, text: &str, now: u64) -> Vec<Outgoing> {
    match route(store, sender, text, now) {
        Ok(outgoing) => outgoing,
        Err(reason) => {
            log::warn!("{sender}: {reason} (message: {text})");
            vec![Outgoing { to: sender, payload: format!("ERROR: {reason}") }]
        }
    }
}

fn route(
    store: &mut SessionStore,
    sender: SocketAddr,
    text: &str,
    now: u64,
) -> Result<Vec<Outgoing>, String> {
    let message = ClientMessage::parse(text).map_err(|e| e.to_string())?;

    match message {
        ClientMessage::New { session, series } => {
            let member = ledger::member_name(&sender, series);
            store.create_session(&session, member.clone(), sender)?;
            log::info!("{member} created session {session:?}");
            // The creator owes us a REPORT before the session is usable.
            Ok(vec![
                Outgoing::reply(sender, Directive::Success),
                Outgoing::reply(sender, Directive::Report),
            ])
        }

        ClientMessage::Join { session, series } => {
            let member = ledger::member_name(&sender, series);
            let chest_mask = store.join_session(&session, member.clone(), sender)?;
            log::info!("{member} joined session {session:?}");

            let mut outgoing = vec![Outgoing::reply(sender, Directive::Success)];
            // A late joiner should learn which chests are already open.
            if let Some(mask) = chest_mask {
                outgoing.push(Outgoing::reply(sender, Directive::Chest(mask)));
            }
            Ok(outgoing)
        }

        ClientMessage::Report { series, items } => {
            let member = ledger::member_name(&sender, series);
            store.touch(&member, sender);
            if store.seed_report(&member, &items)? {
                log::info!("{member} seeded the session ledger ({} items)", items.len());
            }
            Ok(Vec::new())
        }

        ClientMessage::Log { series, entries } => {
            let member = ledger::member_name(&sender, series);
            store.touch(&member, sender);
            let outcome = store.apply_log(&member, &entries, now)?;

            if outcome.applied > 0 {
                log::info!("{member}: applied {} inventory change(s)", outcome.applied);
            }

            let mut outgoing = vec![Outgoing::reply(sender, Directive::LogAck(outcome.acked))];

            // Status changes are pushed straight to the peers' last-seen
            // addresses; they are only meaningful while the battle is live.
            for entry in outcome.fanout {
                let ChangeEntry::Status { on, who, bits } = entry else {
                    continue;
                };
                for (_, peer_addr) in store.peers(&member) {
                    outgoing.push(Outgoing::reply(
                        peer_addr,
                        Directive::Status { on, who, bits },
                    ));
                }
            }
            Ok(outgoing)
        }

        ClientMessage::SyncRequest { series, forced } => {
            let member = ledger::member_name(&sender, series);
            store.touch(&member, sender);
            match store.sync_reply(&member, forced)? {
                SyncReply::Seed => Ok(vec![Outgoing::reply(sender, Directive::Report)]),
                SyncReply::Payload(items) => {
                    Ok(vec![Outgoing::reply(sender, Directive::Sync(items))])
                }
                SyncReply::Quiet => Ok(Vec::new()),
            }
        }

        ClientMessage::Chest { series, mask } => {
            let member = ledger::member_name(&sender, series);
            store.touch(&member, sender);
            let Some(merged) = store.merge_chests(&member, &mask)? else {
                return Ok(Vec::new());
            };
            log::info!("{member}: chest mask grew, fanning out");
            Ok(store
                .peers(&member)
                .into_iter()
                .map(|(_, peer_addr)| Outgoing::reply(peer_addr, Directive::Chest(merged.clone())))
                .collect())
        }

        ClientMessage::Gp { series, amount } => {
            let member = ledger::member_name(&sender, series);
            store.touch(&member, sender);
            store.record_gp(&member, amount)?;
            log::debug!("{member}: GP now {amount}");
            Ok(Vec::new())
        }
    }
}
