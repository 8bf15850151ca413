//! Decoding of beanstalkd YAML documents.
//!
//! `list-tubes` returns a YAML sequence of names; `stats-tube` returns a
//! YAML mapping with a few dozen counters of which only two matter here.

use serde::Deserialize;

use crate::error::{QueueError, QueueResult};

/// Backlog snapshot for a single tube, taken once per tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TubeStats {
    /// Tube name as reported by `list-tubes`.
    pub name: String,
    /// Jobs waiting to be reserved (`current-jobs-ready`).
    pub ready: u64,
    /// Consumers currently watching the tube (`current-watching`).
    pub watching: u64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawStats {
    // A null counter reads as zero, like a missing one.
    #[serde(rename = "current-jobs-ready")]
    ready: Option<u64>,
    #[serde(rename = "current-watching")]
    watching: Option<u64>,
}

impl TubeStats {
    /// Decode a `stats-tube` body.
    ///
    /// Unknown keys are ignored and missing or null counters default to
    /// zero. A counter with the wrong type (negative, textual) is a decode
    /// error.
    pub fn decode(name: &str, document: &[u8]) -> QueueResult<Self> {
        let raw: RawStats = if is_blank(document) {
            RawStats::default()
        } else {
            serde_yaml::from_slice(document)
                .map_err(|e| QueueError::Decode(format!("tube `{name}`: {e}")))?
        };

        Ok(Self {
            name: name.to_string(),
            ready: raw.ready.unwrap_or(0),
            watching: raw.watching.unwrap_or(0),
        })
    }
}

/// Decode a `list-tubes` body into tube names.
///
/// The body must be a sequence of strings; anything else is rejected.
pub fn decode_tube_list(document: &[u8]) -> QueueResult<Vec<String>> {
    if is_blank(document) {
        return Ok(Vec::new());
    }
    serde_yaml::from_slice(document)
        .map_err(|e| QueueError::Decode(format!("tube list: {e}")))
}

fn is_blank(document: &[u8]) -> bool {
    document.iter().all(u8::is_ascii_whitespace)
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATS_EMAILS: &str = "---\n\
name: emails\n\
current-jobs-urgent: 0\n\
current-jobs-ready: 34\n\
current-jobs-reserved: 1\n\
current-jobs-delayed: 0\n\
current-jobs-buried: 0\n\
total-jobs: 120\n\
current-using: 2\n\
current-waiting: 0\n\
current-watching: 1\n\
pause: 0\n\
cmd-delete: 85\n\
cmd-pause-tube: 0\n\
pause-time-left: 0\n";

    #[test]
    fn decodes_ready_and_watching() {
        let stats = TubeStats::decode("emails", STATS_EMAILS.as_bytes()).unwrap();
        assert_eq!(
            stats,
            TubeStats {
                name: "emails".to_string(),
                ready: 34,
                watching: 1,
            }
        );
    }

    #[test]
    fn missing_counters_default_to_zero() {
        let stats = TubeStats::decode("idle", b"---\nname: idle\npause: 0\n").unwrap();
        assert_eq!(stats.ready, 0);
        assert_eq!(stats.watching, 0);
    }

    #[test]
    fn null_counters_read_as_zero() {
        let doc = b"current-jobs-ready: ~\ncurrent-watching:\n";
        let stats = TubeStats::decode("idle", doc).unwrap();
        assert_eq!(stats.ready, 0);
        assert_eq!(stats.watching, 0);
    }

    #[test]
    fn blank_document_is_zero_stats() {
        let stats = TubeStats::decode("idle", b"  \n").unwrap();
        assert_eq!(stats.ready, 0);
        assert_eq!(stats.watching, 0);
    }

    #[test]
    fn negative_counter_is_decode_error() {
        let err = TubeStats::decode("bad", b"current-jobs-ready: -4\n").unwrap_err();
        assert!(matches!(err, QueueError::Decode(msg) if msg.contains("bad")));
    }

    #[test]
    fn textual_counter_is_decode_error() {
        let err = TubeStats::decode("bad", b"current-watching: lots\n").unwrap_err();
        assert!(matches!(err, QueueError::Decode(_)));
    }

    #[test]
    fn decodes_tube_list() {
        let tubes = decode_tube_list(b"---\n- default\n- emails\n- thumbnails\n").unwrap();
        assert_eq!(tubes, vec!["default", "emails", "thumbnails"]);
    }

    #[test]
    fn tube_list_rejects_mapping() {
        let err = decode_tube_list(b"---\ndefault: 1\n").unwrap_err();
        assert!(matches!(err, QueueError::Decode(_)));
    }

    #[test]
    fn empty_tube_list() {
        assert!(decode_tube_list(b"").unwrap().is_empty());
    }
}
