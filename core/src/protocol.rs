//! The peer protocol: ASCII, space-delimited, JSON payloads.
//!
//! Wire JSON keeps string keys; everything in memory uses integer keys, so
//! the conversion happens exactly once, here.

use std::collections::BTreeMap;

use serde_json::{json, Value};

use crate::constants::CHEST_MASK_LEN;
use crate::error::SyncError;

/// Server-held per-session inventory, and the shape SYNC/REPORT payloads
/// deserialize into. serde_json parses the wire's string keys back into
/// integers when the map key type is `u8`.
pub type ItemMap = BTreeMap<u8, i64>;

pub const STATUS_ON_TAG: &str = "STATUS_ON";
pub const STATUS_OFF_TAG: &str = "STATUS_OFF";

/// One entry in a client's outgoing change log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEntry {
    /// Inventory delta: client-monotone index, item id, signed count change.
    Item { index: u64, item: u8, delta: i64 },
    /// Status bits switched on or off for one battle character.
    Status { on: bool, who: u8, bits: u32 },
}

impl ChangeEntry {
    fn to_value(&self) -> Value {
        match self {
            ChangeEntry::Item { index, item, delta } => json!([index, item, delta]),
            ChangeEntry::Status { on, who, bits } => {
                let tag = if *on { STATUS_ON_TAG } else { STATUS_OFF_TAG };
                json!([tag, who, format!("{bits:08X}")])
            }
        }
    }

    fn from_value(value: &Value) -> Result<ChangeEntry, SyncError> {
        let parts = value
            .as_array()
            .filter(|parts| parts.len() == 3)
            .ok_or_else(|| protocol_error("change entry is not a 3-element array", value))?;

        match &parts[0] {
            Value::Number(_) => {
                let index = parts[0]
                    .as_u64()
                    .ok_or_else(|| protocol_error("bad change index", value))?;
                let item = parts[1]
                    .as_u64()
                    .and_then(|item| u8::try_from(item).ok())
                    .ok_or_else(|| protocol_error("bad item id", value))?;
                let delta = parts[2]
                    .as_i64()
                    .ok_or_else(|| protocol_error("bad item delta", value))?;
                Ok(ChangeEntry::Item { index, item, delta })
            }
            Value::String(tag) => {
                let on = match tag.as_str() {
                    STATUS_ON_TAG => true,
                    STATUS_OFF_TAG => false,
                    _ => return Err(protocol_error("unknown change tag", value)),
                };
                let who = parts[1]
                    .as_u64()
                    .and_then(|who| u8::try_from(who).ok())
                    .ok_or_else(|| protocol_error("bad character index", value))?;
                let bits = parts[2]
                    .as_str()
                    .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                    .ok_or_else(|| protocol_error("bad status bits", value))?;
                Ok(ChangeEntry::Status { on, who, bits })
            }
            _ => Err(protocol_error("unrecognized change entry", value)),
        }
    }
}

/// Messages a client sends to the server.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    New { session: String, series: u64 },
    Join { session: String, series: u64 },
    Report { series: u64, items: ItemMap },
    Log { series: u64, entries: Vec<ChangeEntry> },
    SyncRequest { series: u64, forced: bool },
    Chest { series: u64, mask: Vec<u8> },
    Gp { series: u64, amount: u32 },
}

impl ClientMessage {
    pub fn emit(&self) -> String {
        match self {
            ClientMessage::New { session, series } => format!("NEW {session} {series}"),
            ClientMessage::Join { session, series } => format!("JOIN {session} {series}"),
            ClientMessage::Report { series, items } => {
                format!("REPORT {series} {}", item_map_to_json(items))
            }
            ClientMessage::Log { series, entries } => {
                let entries: Vec<Value> = entries.iter().map(ChangeEntry::to_value).collect();
                format!("LOG {series} {}", Value::Array(entries))
            }
            ClientMessage::SyncRequest { series, forced: false } => format!("SYNC {series}"),
            ClientMessage::SyncRequest { series, forced: true } => format!("SYNC {series} !"),
            ClientMessage::Chest { series, mask } => {
                format!("CHEST {series} \"{}\"", mask_to_hex(mask))
            }
            ClientMessage::Gp { series, amount } => format!("GP {series} {amount}"),
        }
    }

    pub fn parse(text: &str) -> Result<ClientMessage, SyncError> {
        let (head, rest) = split_head(text);
        match head {
            "NEW" | "JOIN" => {
                let mut fields = rest.split_ascii_whitespace();
                let session = fields
                    .next()
                    .ok_or_else(|| protocol_error("missing session name", text))?
                    .to_string();
                let series = parse_series(fields.next(), text)?;
                if fields.next().is_some() {
                    return Err(protocol_error("trailing fields", text));
                }
                if head == "NEW" {
                    Ok(ClientMessage::New { session, series })
                } else {
                    Ok(ClientMessage::Join { session, series })
                }
            }
            "REPORT" => {
                let (series, payload) = split_series(rest, text)?;
                let items: ItemMap = serde_json::from_str(payload)
                    .map_err(|e| protocol_error(&format!("bad REPORT payload: {e}"), text))?;
                Ok(ClientMessage::Report { series, items })
            }
            "LOG" => {
                let (series, payload) = split_series(rest, text)?;
                let values: Vec<Value> = serde_json::from_str(payload)
                    .map_err(|e| protocol_error(&format!("bad LOG payload: {e}"), text))?;
                let entries = values
                    .iter()
                    .map(ChangeEntry::from_value)
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(ClientMessage::Log { series, entries })
            }
            "SYNC" => {
                let mut fields = rest.split_ascii_whitespace();
                let series = parse_series(fields.next(), text)?;
                let forced = match fields.next() {
                    None => false,
                    Some("!") => true,
                    Some(_) => return Err(protocol_error("trailing fields", text)),
                };
                Ok(ClientMessage::SyncRequest { series, forced })
            }
            "CHEST" => {
                let (series, payload) = split_series(rest, text)?;
                let hex: String = serde_json::from_str(payload)
                    .map_err(|e| protocol_error(&format!("bad CHEST payload: {e}"), text))?;
                Ok(ClientMessage::Chest { series, mask: hex_to_mask(&hex)? })
            }
            "GP" => {
                let (series, payload) = split_series(rest, text)?;
                let amount = payload
                    .trim()
                    .parse::<u32>()
                    .map_err(|_| protocol_error("bad GP amount", text))?;
                Ok(ClientMessage::Gp { series, amount })
            }
            _ => Err(protocol_error("unknown message", text)),
        }
    }
}

/// Directives the server sends to a client.
#[derive(Debug, Clone, PartialEq)]
pub enum Directive {
    Success,
    Error(String),
    /// Ask the client to seed the session ledger with its inventory.
    Report,
    /// The merged session inventory, stripped of non-positive counts.
    Sync(ItemMap),
    /// Acknowledged change-log indices.
    LogAck(Vec<u64>),
    Status { on: bool, who: u8, bits: u32 },
    Chest(Vec<u8>),
}

impl Directive {
    pub fn emit(&self) -> String {
        match self {
            Directive::Success => "Success".to_string(),
            Directive::Error(text) => format!("ERROR: {text}"),
            Directive::Report => "REPORT {}".to_string(),
            Directive::Sync(items) => format!("SYNC {}", item_map_to_json(items)),
            Directive::LogAck(indices) => format!("LOG {}", json!(indices)),
            Directive::Status { on, who, bits } => {
                let tag = if *on { STATUS_ON_TAG } else { STATUS_OFF_TAG };
                format!("{tag} {}", json!([who, format!("{bits:08X}")]))
            }
            Directive::Chest(mask) => format!("CHEST \"{}\"", mask_to_hex(mask)),
        }
    }

    pub fn parse(text: &str) -> Result<Directive, SyncError> {
        if text == "Success" {
            return Ok(Directive::Success);
        }
        if let Some(rest) = text.strip_prefix("ERROR") {
            return Ok(Directive::Error(
                rest.trim_start_matches(':').trim().to_string(),
            ));
        }

        let (head, rest) = split_head(text);
        match head {
            "REPORT" => Ok(Directive::Report),
            "SYNC" => {
                let items: ItemMap = serde_json::from_str(rest)
                    .map_err(|e| protocol_error(&format!("bad SYNC payload: {e}"), text))?;
                Ok(Directive::Sync(items))
            }
            "LOG" => {
                let indices: Vec<u64> = serde_json::from_str(rest)
                    .map_err(|e| protocol_error(&format!("bad LOG ack: {e}"), text))?;
                Ok(Directive::LogAck(indices))
            }
            STATUS_ON_TAG | STATUS_OFF_TAG => {
                let (who, hex): (u8, String) = serde_json::from_str(rest)
                    .map_err(|e| protocol_error(&format!("bad status payload: {e}"), text))?;
                let bits = u32::from_str_radix(&hex, 16)
                    .map_err(|_| protocol_error("bad status bits", text))?;
                Ok(Directive::Status { on: head == STATUS_ON_TAG, who, bits })
            }
            "CHEST" => {
                let hex: String = serde_json::from_str(rest)
                    .map_err(|e| protocol_error(&format!("bad CHEST payload: {e}"), text))?;
                Ok(Directive::Chest(hex_to_mask(&hex)?))
            }
            _ => Err(protocol_error("unknown directive", text)),
        }
    }
}

pub fn mask_to_hex(mask: &[u8]) -> String {
    let mut out = String::with_capacity(mask.len() * 2);
    for byte in mask {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

pub fn hex_to_mask(hex: &str) -> Result<Vec<u8>, SyncError> {
    if hex.len() != CHEST_MASK_LEN * 2 {
        return Err(protocol_error("chest mask has the wrong length", hex));
    }
    (0..CHEST_MASK_LEN)
        .map(|i| {
            u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16)
                .map_err(|_| protocol_error("chest mask is not hex", hex))
        })
        .collect()
}

fn item_map_to_json(items: &ItemMap) -> String {
    // BTreeMap<u8, _> serializes with stringified keys, which is exactly the
    // wire format.
    serde_json::to_string(items).unwrap_or_else(|_| "{}".to_string())
}

fn split_head(text: &str) -> (&str, &str) {
    match text.split_once(' ') {
        Some((head, rest)) => (head, rest),
        None => (text, ""),
    }
}

fn split_series<'a>(rest: &'a str, full: &str) -> Result<(u64, &'a str), SyncError> {
    let (series, payload) = rest
        .split_once(' ')
        .ok_or_else(|| protocol_error("missing payload", full))?;
    Ok((parse_series(Some(series), full)?, payload))
}

fn parse_series(field: Option<&str>, full: &str) -> Result<u64, SyncError> {
    field
        .and_then(|series| series.parse::<u64>().ok())
        .ok_or_else(|| protocol_error("bad series number", full))
}

fn protocol_error(reason: &str, offending: impl std::fmt::Display) -> SyncError {
    SyncError::PeerProtocolError(format!("{reason}: {offending}"))
}
