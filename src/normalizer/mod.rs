//! Event normalization
//!
//! Converts raw external records (message header lists, meeting attendee
//! lists) into deduplicated `CommunicationEvent`s. Payload bodies are never
//! retained: only participants, timestamps, and weight hints survive the
//! boundary. Malformed records are skipped with a diagnostic, not fatal.

use crate::config::EngineConfig;
use crate::graph::{CommunicationEvent, SourceKind};
use ahash::AHashSet;
use chrono::{DateTime, Duration, Timelike, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Malformed source record; the record is skipped, the batch continues
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NormalizationError {
    /// Message record without a parsable sender
    #[error("Message has no parsable sender: {value:?}")]
    MissingSender { value: String },

    /// Message record where no recipient could be parsed
    #[error("Message has no parsable recipients")]
    NoRecipients,

    /// Meeting record with fewer than two distinct attendees
    #[error("Meeting has {found} distinct attendees, need at least 2")]
    NotEnoughAttendees { found: usize },

    /// Weight hints must be non-negative
    #[error("Negative weight hint: {hint}")]
    NegativeWeight { hint: f64 },
}

/// Raw record from an external source, tagged by source type
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "sourceType", rename_all = "lowercase")]
pub enum RawSourceRecord {
    #[serde(rename_all = "camelCase")]
    Message {
        /// Sender header, `Name <addr@host>` or bare address
        from: String,
        to: Vec<String>,
        #[serde(default)]
        cc: Vec<String>,
        timestamp: DateTime<Utc>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        weight_hint: Option<f64>,
    },
    #[serde(rename_all = "camelCase")]
    Meeting {
        attendees: Vec<String>,
        start: DateTime<Utc>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        weight_hint: Option<f64>,
    },
}

/// A record the normalizer skipped, with its batch position
#[derive(Debug, Clone)]
pub struct SkippedRecord {
    pub index: usize,
    pub error: NormalizationError,
}

/// Result of normalizing a batch: surviving events plus skip diagnostics
#[derive(Debug, Clone, Default)]
pub struct NormalizedBatch {
    pub events: Vec<CommunicationEvent>,
    pub skipped: Vec<SkippedRecord>,
    /// Records dropped because they fell outside the retention window
    pub expired: usize,
    /// Records dropped as duplicates of an earlier record in the batch
    pub duplicates: usize,
}

/// Normalizes raw source records into communication events
pub struct Normalizer {
    retention: Duration,
    message_weight: f64,
    meeting_weight: f64,
    cc_weight_factor: f64,
    /// Extracts an address from `Name <addr>` or a bare `addr@host` token
    address_re: Regex,
}

impl Normalizer {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            retention: Duration::days(config.retention_days as i64),
            message_weight: config.message_weight,
            meeting_weight: config.meeting_weight,
            cc_weight_factor: config.cc_weight_factor,
            address_re: Regex::new(r"<([^>]+)>|([^\s]+@[^\s]+)").expect("static regex"),
        }
    }

    /// Normalize a batch of raw records against the reference time `now`.
    ///
    /// Returns surviving events in input order. Malformed records are
    /// reported in `skipped`; expired and duplicate records are counted
    /// but carry no diagnostics.
    pub fn normalize_batch(
        &self,
        records: &[RawSourceRecord],
        now: DateTime<Utc>,
    ) -> NormalizedBatch {
        let cutoff = now - self.retention;
        let mut batch = NormalizedBatch::default();
        let mut seen: AHashSet<DedupKey> = AHashSet::new();

        for (index, record) in records.iter().enumerate() {
            if record.timestamp() < cutoff {
                batch.expired += 1;
                continue;
            }

            match self.normalize_record(record) {
                Ok(events) => {
                    for event in events {
                        if seen.insert(DedupKey::of(&event)) {
                            batch.events.push(event);
                        } else {
                            batch.duplicates += 1;
                        }
                    }
                }
                Err(error) => {
                    tracing::debug!("Skipping record {}: {}", index, error);
                    batch.skipped.push(SkippedRecord { index, error });
                }
            }
        }

        if !batch.skipped.is_empty() || batch.expired > 0 {
            tracing::info!(
                "Normalized {} events ({} skipped, {} expired, {} duplicates)",
                batch.events.len(),
                batch.skipped.len(),
                batch.expired,
                batch.duplicates
            );
        }

        batch
    }

    /// Normalize one record into zero or more events.
    ///
    /// A message with CC recipients yields a sibling event at the
    /// configured CC weight factor.
    pub fn normalize_record(
        &self,
        record: &RawSourceRecord,
    ) -> Result<Vec<CommunicationEvent>, NormalizationError> {
        match record {
            RawSourceRecord::Message {
                from,
                to,
                cc,
                timestamp,
                weight_hint,
            } => {
                let hint = weight_hint.unwrap_or(self.message_weight);
                if hint < 0.0 {
                    return Err(NormalizationError::NegativeWeight { hint });
                }

                let sender = self
                    .parse_participant(from)
                    .ok_or_else(|| NormalizationError::MissingSender {
                        value: from.clone(),
                    })?;

                let recipients = self.parse_recipients(to, &sender);
                if recipients.is_empty() {
                    return Err(NormalizationError::NoRecipients);
                }

                let mut events = Vec::with_capacity(2);
                let mut participants = vec![sender.clone()];
                participants.extend(recipients);
                events.push(CommunicationEvent {
                    source: SourceKind::Message,
                    participants,
                    timestamp: *timestamp,
                    weight_hint: hint,
                });

                // CC recipients count as a weaker connection
                let cc_recipients = self.parse_recipients(cc, &sender);
                if !cc_recipients.is_empty() {
                    let mut participants = vec![sender];
                    participants.extend(cc_recipients);
                    events.push(CommunicationEvent {
                        source: SourceKind::Message,
                        participants,
                        timestamp: *timestamp,
                        weight_hint: hint * self.cc_weight_factor,
                    });
                }

                Ok(events)
            }
            RawSourceRecord::Meeting {
                attendees,
                start,
                weight_hint,
            } => {
                let hint = weight_hint.unwrap_or(self.meeting_weight);
                if hint < 0.0 {
                    return Err(NormalizationError::NegativeWeight { hint });
                }

                let mut participants: Vec<String> = Vec::new();
                for raw in attendees {
                    if let Some(handle) = self.parse_participant(raw) {
                        if !participants.contains(&handle) {
                            participants.push(handle);
                        }
                    }
                }
                if participants.len() < 2 {
                    return Err(NormalizationError::NotEnoughAttendees {
                        found: participants.len(),
                    });
                }

                Ok(vec![CommunicationEvent {
                    source: SourceKind::Meeting,
                    participants,
                    timestamp: *start,
                    weight_hint: hint,
                }])
            }
        }
    }

    /// Extract a canonical handle from a raw participant string.
    ///
    /// Prefers the address in angle brackets, then a bare address token,
    /// then falls back to the whole trimmed string as an opaque handle.
    fn parse_participant(&self, raw: &str) -> Option<String> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }

        if let Some(caps) = self.address_re.captures(trimmed) {
            let addr = caps.get(1).or_else(|| caps.get(2))?;
            let handle = addr.as_str().trim().to_lowercase();
            if !handle.is_empty() {
                return Some(handle);
            }
        }

        Some(trimmed.to_lowercase())
    }

    fn parse_recipients(&self, raw: &[String], sender: &str) -> Vec<String> {
        let mut recipients = Vec::with_capacity(raw.len());
        for value in raw {
            if let Some(handle) = self.parse_participant(value) {
                // Self-addressed copies carry no relationship signal
                if handle != sender && !recipients.contains(&handle) {
                    recipients.push(handle);
                }
            }
        }
        recipients
    }
}

impl RawSourceRecord {
    /// Timestamp used for retention checks
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            RawSourceRecord::Message { timestamp, .. } => *timestamp,
            RawSourceRecord::Meeting { start, .. } => *start,
        }
    }
}

/// Deduplication key: source kind, sorted participants, rounded timestamp.
/// Messages keep the exact second; meetings round to the start minute.
#[derive(Debug, PartialEq, Eq, Hash)]
struct DedupKey {
    source: SourceKind,
    participants: Vec<String>,
    rounded_ts: i64,
}

impl DedupKey {
    fn of(event: &CommunicationEvent) -> Self {
        let mut participants = event.participants.clone();
        participants.sort();
        let ts = event.timestamp.with_nanosecond(0).unwrap_or(event.timestamp);
        let rounded_ts = match event.source {
            SourceKind::Message => ts.timestamp(),
            SourceKind::Meeting => ts.timestamp() - ts.timestamp().rem_euclid(60),
        };
        Self {
            source: event.source,
            participants,
            rounded_ts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn normalizer() -> Normalizer {
        Normalizer::new(&EngineConfig::default())
    }

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn message(from: &str, to: &[&str], cc: &[&str], at: DateTime<Utc>) -> RawSourceRecord {
        RawSourceRecord::Message {
            from: from.to_string(),
            to: to.iter().map(|s| s.to_string()).collect(),
            cc: cc.iter().map(|s| s.to_string()).collect(),
            timestamp: at,
            weight_hint: None,
        }
    }

    #[test]
    fn test_header_address_extraction() {
        let n = normalizer();
        assert_eq!(
            n.parse_participant("Alice Smith <Alice@Corp.Example>"),
            Some("alice@corp.example".to_string())
        );
        assert_eq!(
            n.parse_participant("bob@corp.example"),
            Some("bob@corp.example".to_string())
        );
        // Opaque handle fallback for manual references
        assert_eq!(n.parse_participant("  Casey  "), Some("casey".to_string()));
        assert_eq!(n.parse_participant(""), None);
    }

    #[test]
    fn test_message_normalization() {
        let n = normalizer();
        let events = n
            .normalize_record(&message(
                "alice@corp.example",
                &["Bob <bob@corp.example>"],
                &[],
                ts(0),
            ))
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].source, SourceKind::Message);
        assert_eq!(
            events[0].participants,
            vec!["alice@corp.example", "bob@corp.example"]
        );
        assert_eq!(events[0].weight_hint, 1.0);
    }

    #[test]
    fn test_cc_gets_half_weight() {
        let n = normalizer();
        let events = n
            .normalize_record(&message(
                "alice@corp.example",
                &["bob@corp.example"],
                &["carol@corp.example"],
                ts(0),
            ))
            .unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].weight_hint, 1.0);
        assert_eq!(events[1].weight_hint, 0.5);
        assert_eq!(
            events[1].participants,
            vec!["alice@corp.example", "carol@corp.example"]
        );
    }

    #[test]
    fn test_meeting_normalization() {
        let n = normalizer();
        let events = n
            .normalize_record(&RawSourceRecord::Meeting {
                attendees: vec![
                    "alice@corp.example".to_string(),
                    "bob@corp.example".to_string(),
                    "alice@corp.example".to_string(),
                ],
                start: ts(0),
                weight_hint: None,
            })
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].participants.len(), 2);
        assert_eq!(events[0].weight_hint, 2.0);
    }

    #[test]
    fn test_malformed_records_rejected() {
        let n = normalizer();
        assert!(matches!(
            n.normalize_record(&message("", &["bob@corp.example"], &[], ts(0))),
            Err(NormalizationError::MissingSender { .. })
        ));
        assert!(matches!(
            n.normalize_record(&message("alice@corp.example", &[], &[], ts(0))),
            Err(NormalizationError::NoRecipients)
        ));
        assert!(matches!(
            n.normalize_record(&RawSourceRecord::Meeting {
                attendees: vec!["solo@corp.example".to_string()],
                start: ts(0),
                weight_hint: None,
            }),
            Err(NormalizationError::NotEnoughAttendees { found: 1 })
        ));
    }

    #[test]
    fn test_batch_partial_success() {
        let n = normalizer();
        let now = ts(3600);
        let records = vec![
            message("alice@corp.example", &["bob@corp.example"], &[], ts(0)),
            message("", &["bob@corp.example"], &[], ts(1)),
            message("alice@corp.example", &["carol@corp.example"], &[], ts(2)),
        ];

        let batch = n.normalize_batch(&records, now);
        assert_eq!(batch.events.len(), 2);
        assert_eq!(batch.skipped.len(), 1);
        assert_eq!(batch.skipped[0].index, 1);
    }

    #[test]
    fn test_duplicate_records_are_idempotent() {
        let n = normalizer();
        let now = ts(3600);
        let record = message("alice@corp.example", &["bob@corp.example"], &[], ts(0));
        let records = vec![record.clone(), record];

        let batch = n.normalize_batch(&records, now);
        assert_eq!(batch.events.len(), 1);
        assert_eq!(batch.duplicates, 1);
    }

    #[test]
    fn test_meeting_dedup_rounds_to_minute() {
        let n = normalizer();
        let now = ts(3600);
        let records = vec![
            RawSourceRecord::Meeting {
                attendees: vec!["a@x".to_string(), "b@x".to_string()],
                start: ts(0),
                weight_hint: None,
            },
            RawSourceRecord::Meeting {
                attendees: vec!["b@x".to_string(), "a@x".to_string()],
                start: ts(30),
                weight_hint: None,
            },
        ];

        let batch = n.normalize_batch(&records, now);
        assert_eq!(batch.events.len(), 1);
        assert_eq!(batch.duplicates, 1);
    }

    #[test]
    fn test_retention_window_drops_old_records() {
        let n = normalizer();
        let now = ts(0);
        let old = now - Duration::days(91);
        let records = vec![
            message("alice@corp.example", &["bob@corp.example"], &[], old),
            message("alice@corp.example", &["bob@corp.example"], &[], now),
        ];

        let batch = n.normalize_batch(&records, now);
        assert_eq!(batch.events.len(), 1);
        assert_eq!(batch.expired, 1);
    }
}
