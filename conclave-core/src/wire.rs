//! Wire codec for the eight control verbs.
//!
//! Every logical message is one UTF-8 JSON object whose keys are verbs;
//! framing is the transport's job, this codec only sees already
//! delimited byte payloads. A message carrying several verbs is decoded
//! into one [`Request`] per verb, in canonical verb order.

use bytes::Bytes;
use serde_json::{json, Map, Value as Json};
use tracing::warn;

use crate::error::{ConclaveError, Result};
use crate::path::Path;

/// Canonical processing order for verbs sharing one message object.
const VERB_ORDER: [&str; 8] = ["GET", "SET", "CALL", "SUB", "UNSUB", "REP", "MOD", "SIG"];

/// A decoded control request.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    /// Request named subtrees; `None` asks for the whole tree.
    Get(Option<Vec<Path>>),
    /// Merge a partial tree into the receiver.
    Set(Json),
    /// Invoke a named handler on the receiver.
    Call { method: String, args: Json },
    /// Register a subscription on the receiver (source, sink).
    Sub { source: Path, sink: Path },
    /// Remove a subscription.
    Unsub { source: Path, sink: Path },
    /// Reply to a prior GET.
    Rep(Json),
    /// Unsolicited notification that the sender's tree changed.
    Mod(Json),
    /// Signal fire: new value for `source`, fanned to `sinks`.
    Sig {
        source: Path,
        value: Json,
        sinks: Vec<Path>,
    },
}

impl Request {
    /// The wire verb for this request.
    #[must_use]
    pub const fn verb(&self) -> &'static str {
        match self {
            Self::Get(_) => "GET",
            Self::Set(_) => "SET",
            Self::Call { .. } => "CALL",
            Self::Sub { .. } => "SUB",
            Self::Unsub { .. } => "UNSUB",
            Self::Rep(_) => "REP",
            Self::Mod(_) => "MOD",
            Self::Sig { .. } => "SIG",
        }
    }

    fn payload(&self) -> Json {
        match self {
            Self::Get(None) => Json::Null,
            Self::Get(Some(paths)) => {
                Json::Array(paths.iter().map(Path::to_json).collect())
            }
            Self::Set(data) | Self::Rep(data) | Self::Mod(data) => data.clone(),
            Self::Call { method, args } => json!([method, args]),
            Self::Sub { source, sink } | Self::Unsub { source, sink } => {
                json!([source.to_json(), sink.to_json()])
            }
            Self::Sig {
                source,
                value,
                sinks,
            } => json!([
                source.to_json(),
                value,
                Json::Array(sinks.iter().map(Path::to_json).collect())
            ]),
        }
    }

    /// Encode as a single-frame wire payload.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut msg = Map::new();
        msg.insert(self.verb().to_owned(), self.payload());
        Bytes::from(Json::Object(msg).to_string())
    }

    /// Decode a wire payload into its requests, canonical verb order.
    ///
    /// # Errors
    ///
    /// Non-JSON input, a non-object message, malformed verb payloads,
    /// and messages carrying no recognized verb are decode errors. A
    /// message that mixes known and unknown verbs yields the known ones
    /// and logs the rest.
    pub fn decode(payload: &[u8]) -> Result<Vec<Self>> {
        let msg: Json = serde_json::from_slice(payload)?;
        let obj = match msg {
            Json::Object(obj) => obj,
            _ => return Err(ConclaveError::malformed("message", "not a JSON object")),
        };
        let mut requests = Vec::new();
        for verb in VERB_ORDER {
            if let Some(data) = obj.get(verb) {
                requests.push(Self::decode_verb(verb, data)?);
            }
        }
        let unknown: Vec<&str> = obj
            .keys()
            .map(String::as_str)
            .filter(|k| !VERB_ORDER.contains(k))
            .collect();
        if !unknown.is_empty() {
            if requests.is_empty() {
                return Err(ConclaveError::UnknownVerb(unknown.join(",")));
            }
            warn!(verbs = %unknown.join(","), "ignoring unknown verbs in message");
        }
        if requests.is_empty() {
            return Err(ConclaveError::malformed("message", "no verb present"));
        }
        Ok(requests)
    }

    fn decode_verb(verb: &'static str, data: &Json) -> Result<Self> {
        match verb {
            "GET" => match data {
                Json::Null => Ok(Self::Get(None)),
                Json::Array(items) => {
                    let mut paths = Vec::with_capacity(items.len());
                    for item in items {
                        paths.push(Path::from_json(item).ok_or_else(|| {
                            ConclaveError::malformed("GET", format!("bad path: {item}"))
                        })?);
                    }
                    Ok(Self::Get(Some(paths)))
                }
                _ => Err(ConclaveError::malformed("GET", "expected null or a key list")),
            },
            "SET" | "REP" | "MOD" => {
                if !data.is_object() {
                    return Err(ConclaveError::malformed(verb, "expected an object"));
                }
                Ok(match verb {
                    "SET" => Self::Set(data.clone()),
                    "REP" => Self::Rep(data.clone()),
                    _ => Self::Mod(data.clone()),
                })
            }
            "CALL" => {
                let items = as_tuple(verb, data, 2)?;
                let method = items[0]
                    .as_str()
                    .ok_or_else(|| ConclaveError::malformed("CALL", "method must be a string"))?;
                Ok(Self::Call {
                    method: method.to_owned(),
                    args: items[1].clone(),
                })
            }
            "SUB" | "UNSUB" => {
                let items = as_tuple(verb, data, 2)?;
                let source = decode_path(verb, &items[0])?;
                let sink = decode_path(verb, &items[1])?;
                Ok(if verb == "SUB" {
                    Self::Sub { source, sink }
                } else {
                    Self::Unsub { source, sink }
                })
            }
            "SIG" => {
                let items = as_tuple(verb, data, 3)?;
                let source = decode_path(verb, &items[0])?;
                let sinks = items[2]
                    .as_array()
                    .ok_or_else(|| ConclaveError::malformed("SIG", "sinks must be a list"))?;
                let mut sink_paths = Vec::with_capacity(sinks.len());
                for sink in sinks {
                    sink_paths.push(decode_path(verb, sink)?);
                }
                Ok(Self::Sig {
                    source,
                    value: items[1].clone(),
                    sinks: sink_paths,
                })
            }
            _ => Err(ConclaveError::UnknownVerb(verb.to_owned())),
        }
    }
}

fn as_tuple<'a>(verb: &'static str, data: &'a Json, arity: usize) -> Result<&'a [Json]> {
    let items = data
        .as_array()
        .ok_or_else(|| ConclaveError::malformed(verb, "expected a list"))?;
    if items.len() != arity {
        return Err(ConclaveError::malformed(
            verb,
            format!("expected {arity} elements, got {}", items.len()),
        ));
    }
    Ok(items)
}

fn decode_path(verb: &'static str, data: &Json) -> Result<Path> {
    Path::from_json(data)
        .ok_or_else(|| ConclaveError::malformed(verb, format!("bad path: {data}")))
}
