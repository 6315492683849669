//! Binary update script that programs a controller with a graph.
//!
//! Layout, little-endian:
//!
//! | field | size |
//! |---|---|
//! | magic `SGUS` | 4 |
//! | record count | u32 |
//! | records | ... |
//!
//! Each record is `[length u32][type u8 = 2][3 padding][address u8][rpc id u16][payload]`
//! where `length` counts the whole record.

use crate::error::{Result, SensorGraphError};
use crate::graph::known_constants::CONTROLLER_ADDRESS;
use crate::graph::{MetadataValue, SensorGraph};

pub const SCRIPT_MAGIC: &[u8; 4] = b"SGUS";

const RECORD_TYPE_RPC: u8 = 2;
const RECORD_HEADER_SIZE: usize = 11;
const CONFIG_CHUNK_SIZE: usize = 20;
const MAX_APP_TAG: u64 = 1 << 20;

const RPC_SET_CONSTANT: u16 = 0x2000;
const RPC_ADD_NODE: u16 = 0x2003;
const RPC_SET_ONLINE: u16 = 0x2005;
const RPC_ADD_STREAMER: u16 = 0x2007;
const RPC_CLEAR: u16 = 0x200c;
const RPC_RESET: u16 = 0x200d;
const RPC_PERSIST: u16 = 0x200e;
const RPC_BEGIN_CONFIG: u16 = 0x2a07;
const RPC_PUSH_CONFIG: u16 = 0x2a08;
const RPC_END_CONFIG: u16 = 0x2a09;
const RPC_SET_DEVICE_TAG: u16 = 0x100b;

/// One RPC sent to a tile while applying a script
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptRecord {
    pub address: u8,
    pub rpc_id: u16,
    pub payload: Vec<u8>,
}

impl ScriptRecord {
    fn controller(rpc_id: u16, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            address: CONTROLLER_ADDRESS,
            rpc_id,
            payload: payload.into(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let length = u32::try_from(RECORD_HEADER_SIZE + self.payload.len()).map_err(|_| {
            SensorGraphError::Data(format!("rpc 0x{:04x} payload is too large", self.rpc_id))
        })?;

        let mut out = Vec::with_capacity(length as usize);
        out.extend_from_slice(&length.to_le_bytes());
        out.push(RECORD_TYPE_RPC);
        out.extend_from_slice(&[0; 3]);
        out.push(self.address);
        out.extend_from_slice(&self.rpc_id.to_le_bytes());
        out.extend_from_slice(&self.payload);
        Ok(out)
    }

    /// Decode every record of a script produced by [`format_script`]
    pub fn decode_script(data: &[u8]) -> Result<Vec<ScriptRecord>> {
        let truncated = || SensorGraphError::Data("truncated update script".to_string());

        if data.len() < 8 || &data[0..4] != SCRIPT_MAGIC {
            return Err(SensorGraphError::Data("not an update script".to_string()));
        }
        let count = u32::from_le_bytes([data[4], data[5], data[6], data[7]]) as usize;

        let mut records = Vec::with_capacity(count);
        let mut rest = &data[8..];
        for _ in 0..count {
            if rest.len() < RECORD_HEADER_SIZE {
                return Err(truncated());
            }
            let length = u32::from_le_bytes([rest[0], rest[1], rest[2], rest[3]]) as usize;
            if length < RECORD_HEADER_SIZE || length > rest.len() {
                return Err(truncated());
            }
            if rest[4] != RECORD_TYPE_RPC {
                return Err(SensorGraphError::Data(format!(
                    "unsupported script record type {}",
                    rest[4]
                )));
            }
            records.push(ScriptRecord {
                address: rest[8],
                rpc_id: u16::from_le_bytes([rest[9], rest[10]]),
                payload: rest[RECORD_HEADER_SIZE..length].to_vec(),
            });
            rest = &rest[length..];
        }

        if !rest.is_empty() {
            return Err(SensorGraphError::Data(format!(
                "{} trailing bytes after update script",
                rest.len()
            )));
        }
        Ok(records)
    }
}

/// The RPCs that load `graph` onto a controller, in order
pub fn script_records(graph: &SensorGraph) -> Result<Vec<ScriptRecord>> {
    let mut records = vec![
        ScriptRecord::controller(RPC_SET_ONLINE, 0u16.to_le_bytes()),
        ScriptRecord::controller(RPC_CLEAR, Vec::new()),
        ScriptRecord::controller(RPC_RESET, Vec::new()),
    ];

    for node in graph.nodes() {
        records.push(ScriptRecord::controller(RPC_ADD_NODE, node.descriptor.to_binary()));
    }
    for (index, streamer) in graph.streamers().iter().enumerate() {
        let binary = streamer
            .to_binary()
            .map_err(|e| e.with_context(format!("encoding streamer {}", index)))?;
        records.push(ScriptRecord::controller(RPC_ADD_STREAMER, binary));
    }

    let mut constants: Vec<(u16, i32)> = graph
        .constants()
        .iter()
        .map(|(stream, value)| (stream.encode(), *value))
        .collect();
    constants.sort_unstable();
    for (stream, value) in constants {
        let mut payload = value.to_le_bytes().to_vec();
        payload.extend_from_slice(&stream.to_le_bytes());
        records.push(ScriptRecord::controller(RPC_SET_CONSTANT, payload));
    }
    records.push(ScriptRecord::controller(RPC_PERSIST, Vec::new()));

    for ((slot, config_id), value) in graph.config() {
        let mut begin = config_id.to_le_bytes().to_vec();
        begin.extend_from_slice(&slot.encode());
        records.push(ScriptRecord::controller(RPC_BEGIN_CONFIG, begin));
        for chunk in value.to_bytes().chunks(CONFIG_CHUNK_SIZE) {
            records.push(ScriptRecord::controller(RPC_PUSH_CONFIG, chunk));
        }
        records.push(ScriptRecord::controller(RPC_END_CONFIG, Vec::new()));
    }

    if let Some(tag) = device_tag(graph)? {
        records.push(tag);
    }
    Ok(records)
}

/// Encode `graph` as a binary update script
pub fn format_script(graph: &SensorGraph) -> Result<Vec<u8>> {
    let records = script_records(graph)?;
    let count = u32::try_from(records.len())
        .map_err(|_| SensorGraphError::Data("too many records in update script".to_string()))?;

    let mut out = SCRIPT_MAGIC.to_vec();
    out.extend_from_slice(&count.to_le_bytes());
    for record in &records {
        out.extend_from_slice(&record.encode()?);
    }
    tracing::debug!("Update script: {} records, {} bytes", records.len(), out.len());
    Ok(out)
}

/// Record tagging the device with the program's `app_tag` and `app_version`
fn device_tag(graph: &SensorGraph) -> Result<Option<ScriptRecord>> {
    let tag = match graph.metadata().get("app_tag") {
        None => return Ok(None),
        Some(MetadataValue::Integer(tag)) => u64::try_from(*tag).ok().filter(|t| *t < MAX_APP_TAG),
        Some(MetadataValue::String(_)) => None,
    }
    .ok_or_else(|| {
        SensorGraphError::Data(format!("app_tag must be an integer below {}", MAX_APP_TAG))
    })?;

    let (major, minor) = match graph.metadata().get("app_version") {
        None => (0, 0),
        Some(MetadataValue::String(version)) => parse_version(version)?,
        Some(other) => {
            return Err(SensorGraphError::Data(format!(
                "app_version must be a \"X.Y\" string, got {}",
                other
            )))
        }
    };

    let app_info = (tag as u32) | (minor << 20) | (major << 26);
    let mut payload = 0u32.to_le_bytes().to_vec();
    payload.extend_from_slice(&app_info.to_le_bytes());
    payload.extend_from_slice(&[0, 1]);
    Ok(Some(ScriptRecord::controller(RPC_SET_DEVICE_TAG, payload)))
}

fn parse_version(version: &str) -> Result<(u32, u32)> {
    let invalid = || SensorGraphError::Data(format!("invalid app_version '{}'", version));
    let (major, minor) = version.split_once('.').ok_or_else(invalid)?;
    let major: u32 = major.trim().parse().map_err(|_| invalid())?;
    let minor: u32 = minor.trim().parse().map_err(|_| invalid())?;
    if major >= 64 || minor >= 64 {
        return Err(invalid());
    }
    Ok((major, minor))
}
