//! Conversions between wire messages and core types.
//!
//! An unset `google.protobuf.Timestamp` maps to `None` and back; it is never
//! turned into the Unix epoch.

use chrono::{DateTime, Utc};
use iocvault_core::{Error, IndicatorRecord, LoadRequest, Result, TypesBySource};
use prost_types::Timestamp;

use crate::pb;

pub fn to_timestamp(value: DateTime<Utc>) -> Timestamp {
    Timestamp {
        seconds: value.timestamp(),
        nanos: value.timestamp_subsec_nanos() as i32,
    }
}

pub fn from_timestamp(ts: &Timestamp) -> Result<DateTime<Utc>> {
    let invalid = || Error::InvalidTimestamp {
        seconds: ts.seconds,
        nanos: ts.nanos,
    };
    let nanos = u32::try_from(ts.nanos).map_err(|_| invalid())?;
    DateTime::from_timestamp(ts.seconds, nanos).ok_or_else(invalid)
}

impl From<IndicatorRecord> for pb::IoCDto {
    fn from(record: IndicatorRecord) -> Self {
        pb::IoCDto {
            id: record.id,
            source: record.source,
            first_seen: record.first_seen.map(to_timestamp),
            last_seen: record.last_seen.map(to_timestamp),
            r#type: record.ioc_type,
            value: record.value,
            tags: record.tags,
            additional_data: record.additional_data,
        }
    }
}

impl TryFrom<pb::IoCDto> for IndicatorRecord {
    type Error = Error;

    fn try_from(dto: pb::IoCDto) -> Result<Self> {
        Ok(IndicatorRecord {
            first_seen: dto.first_seen.as_ref().map(from_timestamp).transpose()?,
            last_seen: dto.last_seen.as_ref().map(from_timestamp).transpose()?,
            id: dto.id,
            source: dto.source,
            ioc_type: dto.r#type,
            value: dto.value,
            tags: dto.tags,
            additional_data: dto.additional_data,
        })
    }
}

impl TryFrom<pb::StreamStoreRequest> for IndicatorRecord {
    type Error = Error;

    fn try_from(request: pb::StreamStoreRequest) -> Result<Self> {
        request
            .ioc
            .ok_or(Error::MissingField("ioc"))?
            .try_into()
    }
}

impl From<IndicatorRecord> for pb::StreamLoadResponse {
    fn from(record: IndicatorRecord) -> Self {
        pb::StreamLoadResponse {
            ioc: Some(record.into()),
        }
    }
}

impl From<pb::LoadRequest> for LoadRequest {
    fn from(request: pb::LoadRequest) -> Self {
        LoadRequest::new(request.limit, request.offset).with_filter(request.filter)
    }
}

impl From<LoadRequest> for pb::LoadRequest {
    fn from(request: LoadRequest) -> Self {
        pb::LoadRequest {
            limit: request.limit,
            offset: request.offset,
            filter: request.filter.unwrap_or_default(),
        }
    }
}

/// Convert every record of a `Store`/`Load` payload, failing on the first bad one.
pub fn records_from_dtos(dtos: Vec<pb::IoCDto>) -> Result<Vec<IndicatorRecord>> {
    dtos.into_iter().map(IndicatorRecord::try_from).collect()
}

pub fn dtos_from_records(records: Vec<IndicatorRecord>) -> Vec<pb::IoCDto> {
    records.into_iter().map(Into::into).collect()
}

impl From<TypesBySource> for pb::CountTypesBySourceResponse {
    fn from(nested: TypesBySource) -> Self {
        pb::CountTypesBySourceResponse {
            sources: nested
                .into_iter()
                .map(|(source, counts)| (source, pb::TypeCounts { counts }))
                .collect(),
        }
    }
}
