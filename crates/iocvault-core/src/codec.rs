//! Broker payload codec.
//!
//! Records travel over the broker as JSON documents with the field names
//! `id`, `source`, `first_seen`, `last_seen`, `type`, `value`, `tags` and
//! `additional_data`. Missing or `null` timestamps decode to `None`.

use crate::error::{Error, Result};
use crate::record::IndicatorRecord;

/// Stateless JSON codec for a single [`IndicatorRecord`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordCodec;

impl RecordCodec {
    pub fn decode(payload: &[u8]) -> Result<IndicatorRecord> {
        serde_json::from_slice(payload).map_err(Error::Decode)
    }

    pub fn encode(record: &IndicatorRecord) -> Result<Vec<u8>> {
        serde_json::to_vec(record).map_err(Error::Encode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_absent_timestamps_round_trip_as_absent() {
        let record = IndicatorRecord::new("1", "otx", "ip", "10.0.0.1");
        let bytes = RecordCodec::encode(&record).unwrap();
        let decoded = RecordCodec::decode(&bytes).unwrap();

        assert_eq!(decoded.first_seen, None);
        assert_eq!(decoded.last_seen, None);
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_present_timestamps_round_trip() {
        let first = Utc.with_ymd_and_hms(2023, 11, 5, 8, 30, 0).unwrap();
        let record = IndicatorRecord::new("2", "otx", "domain", "bad.example")
            .with_seen(Some(first), None)
            .with_tags(["malware"]);
        let decoded = RecordCodec::decode(&RecordCodec::encode(&record).unwrap()).unwrap();

        assert_eq!(decoded.first_seen, Some(first));
        assert_eq!(decoded.last_seen, None);
        assert_eq!(decoded.tags, vec!["malware"]);
    }

    #[test]
    fn test_decode_producer_document() {
        let payload = br#"{
            "id": "5b6f",
            "source": "abuse.ch",
            "first_seen": "2024-01-02T03:04:05Z",
            "last_seen": null,
            "type": "url",
            "value": "http://x.example/a",
            "tags": null,
            "additional_data": {"confidence": "80"}
        }"#;
        let record = RecordCodec::decode(payload).unwrap();

        assert_eq!(record.ioc_type, "url");
        assert!(record.first_seen.is_some());
        assert!(record.last_seen.is_none());
        assert!(record.tags.is_empty());
        assert_eq!(record.additional_data["confidence"], "80");
    }

    #[test]
    fn test_decode_missing_optional_fields() {
        let payload = br#"{"id":"1","source":"s","type":"ip","value":"1.1.1.1"}"#;
        let record = RecordCodec::decode(payload).unwrap();
        assert!(record.first_seen.is_none());
        assert!(record.additional_data.is_empty());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let err = RecordCodec::decode(b"not json").unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }

    #[test]
    fn test_decode_rejects_missing_value() {
        let err = RecordCodec::decode(br#"{"id":"1","source":"s","type":"ip"}"#).unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }
}
