//! Out-of-band commands carried in the output stream
//!
//! Two OSC channels are interpreted:
//!
//! - **9283** `setmeta;[id;]{json}`: merge a JSON object into the metadata
//!   of the session itself, or of the object an opaque id resolves to
//! - **7** `[file://authority]/path`: working directory report, stored
//!   under `cmd:cwd`
//!
//! Decoding is pure ([`decode`]); applying the resulting [`OscEffect`]
//! talks to the backend and never fails loudly.

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use super::term::OscCommand;
use crate::backend::{Backend, MetaPatch, ORef};

pub const OSC_CWD: u16 = 7;
pub const OSC_SETMETA: u16 = 9283;

/// Metadata key for the reported working directory
pub const CWD_META_KEY: &str = "cmd:cwd";

const SETMETA_COMMAND: &str = "setmeta";
const FILE_SCHEME: &str = "file://";

#[derive(Error, Debug)]
pub enum OscError {
    #[error("empty payload")]
    Empty,

    #[error("unknown command {0:?}")]
    UnknownCommand(String),

    #[error("missing JSON segment")]
    MissingPayload,

    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("JSON payload is not an object")]
    NotAnObject,

    #[error("file URL without a path: {0:?}")]
    BadPath(String),
}

/// Whose metadata a patch applies to
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MetaTarget {
    /// The session's own block
    Session,
    /// An opaque id to resolve through the backend first
    Opaque(String),
}

#[derive(Clone, Debug, PartialEq)]
pub struct OscEffect {
    pub target: MetaTarget,
    pub patch: MetaPatch,
}

/// Decode one OSC command. Foreign codes and malformed payloads yield
/// `None`; the latter are logged.
pub fn decode(code: u16, payload: &str) -> Option<OscEffect> {
    let result = match code {
        OSC_SETMETA => decode_setmeta(payload),
        OSC_CWD => decode_cwd(payload),
        _ => return None,
    };
    match result {
        Ok(effect) => Some(effect),
        Err(e) => {
            warn!(code, ?payload, "ignoring malformed OSC command: {}", e);
            None
        }
    }
}

fn decode_setmeta(payload: &str) -> Result<OscEffect, OscError> {
    if payload.is_empty() {
        return Err(OscError::Empty);
    }
    let (command, rest) = match payload.split_once(';') {
        Some((command, rest)) => (command, Some(rest)),
        None => (payload, None),
    };
    if command != SETMETA_COMMAND {
        return Err(OscError::UnknownCommand(command.to_string()));
    }
    let rest = rest.ok_or(OscError::MissingPayload)?;

    // A JSON object may itself contain ';', so only split off an id when
    // the segment does not already start the object
    let (id, json) = if rest.trim_start().starts_with('{') {
        (None, rest)
    } else {
        let (id, json) = rest.split_once(';').ok_or(OscError::MissingPayload)?;
        (Some(id), json)
    };

    let patch = match serde_json::from_str::<Value>(json)? {
        Value::Object(map) => map,
        _ => return Err(OscError::NotAnObject),
    };

    let target = match id {
        Some(id) if !id.is_empty() => MetaTarget::Opaque(id.to_string()),
        _ => MetaTarget::Session,
    };
    Ok(OscEffect { target, patch })
}

fn decode_cwd(payload: &str) -> Result<OscEffect, OscError> {
    if payload.is_empty() {
        return Err(OscError::Empty);
    }
    let path = match payload.strip_prefix(FILE_SCHEME) {
        Some(rest) => {
            let start = rest
                .find('/')
                .ok_or_else(|| OscError::BadPath(payload.to_string()))?;
            &rest[start..]
        }
        None => payload,
    };

    let mut patch = MetaPatch::new();
    patch.insert(CWD_META_KEY.to_string(), Value::String(path.to_string()));
    Ok(OscEffect {
        target: MetaTarget::Session,
        patch,
    })
}

/// Decodes OSC commands for one session and applies their effects
pub struct EscapeSequenceRouter {
    session_id: String,
}

impl EscapeSequenceRouter {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
        }
    }

    /// Effects are only produced once the session is loaded: commands in
    /// replayed history already took effect when they were live.
    pub fn route(&self, command: &OscCommand, loaded: bool) -> Option<OscEffect> {
        if !loaded {
            return None;
        }
        decode(command.code, &command.payload)
    }

    /// Route and apply the commands rendered by one chunk, in order.
    /// Returns how many effects were applied.
    pub fn dispatch(&self, commands: &[OscCommand], loaded: bool, backend: &dyn Backend) -> usize {
        let mut applied = 0;
        for command in commands {
            if let Some(effect) = self.route(command, loaded) {
                self.apply(&effect, backend);
                applied += 1;
            }
        }
        applied
    }

    /// Fire-and-forget: failures are logged, never retried
    pub fn apply(&self, effect: &OscEffect, backend: &dyn Backend) {
        let session = self.session_id.as_str();
        let oref = match &effect.target {
            MetaTarget::Session => ORef::block(session),
            MetaTarget::Opaque(id) => match backend.resolve_ids(session, std::slice::from_ref(id)) {
                Ok(mut resolved) => match resolved.remove(id) {
                    Some(oref) => oref,
                    None => {
                        warn!(session, id = id.as_str(), "could not resolve id, patch skipped");
                        return;
                    }
                },
                Err(e) => {
                    warn!(session, id = id.as_str(), "error resolving id, patch skipped: {}", e);
                    return;
                }
            },
        };

        match backend.update_object_meta(&oref, &effect.patch) {
            Ok(()) => debug!(session, %oref, "applied metadata patch"),
            Err(e) => warn!(session, %oref, "metadata patch failed: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::backend::memory::Operation;
    use crate::backend::MemoryBackend;

    fn patch(value: Value) -> MetaPatch {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_setmeta_for_session() {
        let effect = decode(OSC_SETMETA, r#"setmeta;{"term:fontsize":14}"#).unwrap();
        assert_eq!(effect.target, MetaTarget::Session);
        assert_eq!(effect.patch, patch(json!({"term:fontsize": 14})));
    }

    #[test]
    fn test_setmeta_with_id() {
        let effect = decode(OSC_SETMETA, r#"setmeta;tab-1;{"title":"a;b"}"#).unwrap();
        assert_eq!(effect.target, MetaTarget::Opaque("tab-1".to_string()));
        assert_eq!(effect.patch, patch(json!({"title": "a;b"})));
    }

    #[test]
    fn test_setmeta_json_with_semicolon_and_no_id() {
        let effect = decode(OSC_SETMETA, r#"setmeta;{"cmd":"a; b"}"#).unwrap();
        assert_eq!(effect.target, MetaTarget::Session);
        assert_eq!(effect.patch, patch(json!({"cmd": "a; b"})));
    }

    #[test]
    fn test_malformed_setmeta_is_ignored() {
        assert_eq!(decode(OSC_SETMETA, "setmeta"), None);
        assert_eq!(decode(OSC_SETMETA, ""), None);
        assert_eq!(decode(OSC_SETMETA, "getmeta;{}"), None);
        assert_eq!(decode(OSC_SETMETA, "setmeta;{not json"), None);
        assert_eq!(decode(OSC_SETMETA, "setmeta;id;[1,2]"), None);
        assert_eq!(decode(OSC_SETMETA, "setmeta;justid"), None);
    }

    #[test]
    fn test_cwd_plain_and_file_url() {
        let expected = patch(json!({"cmd:cwd": "/home/user/src"}));
        assert_eq!(decode(OSC_CWD, "/home/user/src").unwrap().patch, expected);
        assert_eq!(decode(OSC_CWD, "file://laptop/home/user/src").unwrap().patch, expected);
        assert_eq!(decode(OSC_CWD, "file:///home/user/src").unwrap().patch, expected);
    }

    #[test]
    fn test_cwd_without_path_is_ignored() {
        assert_eq!(decode(OSC_CWD, "file://laptop"), None);
        assert_eq!(decode(OSC_CWD, ""), None);
    }

    #[test]
    fn test_foreign_codes_are_not_ours() {
        assert_eq!(decode(8, ";https://example.com"), None);
    }

    #[test]
    fn test_route_waits_for_load() {
        let router = EscapeSequenceRouter::new("b1");
        let cmd = OscCommand {
            code: OSC_CWD,
            payload: "/tmp".to_string(),
        };
        assert_eq!(router.route(&cmd, false), None);
        assert!(router.route(&cmd, true).is_some());
    }

    #[test]
    fn test_apply_to_session_and_resolved_id() {
        let backend = MemoryBackend::new();
        backend.register_id("tab-1", ORef::new("tab", "t-uuid"));
        let router = EscapeSequenceRouter::new("b1");

        router.apply(&decode(OSC_CWD, "/tmp").unwrap(), &backend);
        router.apply(&decode(OSC_SETMETA, r#"setmeta;tab-1;{"x":1}"#).unwrap(), &backend);

        let updates = backend.meta_updates();
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].0, ORef::block("b1"));
        assert_eq!(updates[1].0, ORef::new("tab", "t-uuid"));
        assert_eq!(updates[1].1, patch(json!({"x": 1})));
    }

    #[test]
    fn test_apply_skips_unresolvable_id_and_survives_failures() {
        let backend = MemoryBackend::new();
        let router = EscapeSequenceRouter::new("b1");

        router.apply(&decode(OSC_SETMETA, r#"setmeta;nope;{"x":1}"#).unwrap(), &backend);
        assert!(backend.meta_updates().is_empty());

        backend.fail(Operation::ResolveIds);
        backend.register_id("tab-1", ORef::new("tab", "t"));
        router.apply(&decode(OSC_SETMETA, r#"setmeta;tab-1;{"x":1}"#).unwrap(), &backend);
        assert!(backend.meta_updates().is_empty());

        backend.fail(Operation::UpdateMeta);
        router.apply(&decode(OSC_CWD, "/tmp").unwrap(), &backend);
        assert!(backend.meta_updates().is_empty());
    }
}
