//! Entity ⇄ record conversion.
//!
//! Children are not part of a parent's `to_record` output: the save
//! orchestrator attaches reference lists built from the children that were
//! actually saved. Decoding a parent likewise yields an entity without
//! children; the referenced keys stay readable on the record.

use crate::entity::{
    AssetRef, Day, DayStorage, Exercise, ProgressPhoto, SetEntry, Split, UserProfile, WeightPoint,
};
use crate::error::{ModelError, ModelResult};
use crate::key::{EntityKey, RecordId, RecordType};
use crate::record::Record;

/// Reference list on a split record naming its days.
pub const DAYS_REF: &str = "days";
/// Reference list on a day record naming its exercises.
pub const EXERCISES_REF: &str = "exercises";
/// Byte field carrying an image payload.
pub const IMAGE_FIELD: &str = "image";

/// Conversion between an entity and its remote record.
pub trait RecordCodec: Sized {
    /// Remote record type.
    const RECORD_TYPE: RecordType;

    /// Entity key.
    fn key(&self) -> &EntityKey;

    /// Remote address of this entity.
    fn record_id(&self) -> RecordId {
        RecordId::new(Self::RECORD_TYPE, self.key().clone())
    }

    /// Builds the record carrying this entity's scalar fields.
    fn to_record(&self) -> ModelResult<Record>;

    /// Decodes an entity from a record. Children are left empty.
    fn from_record(record: &Record) -> ModelResult<Self>;
}

fn expect_type(record: &Record, expected: RecordType) -> ModelResult<()> {
    if record.record_type() == expected {
        Ok(())
    } else {
        Err(ModelError::TypeMismatch {
            expected,
            actual: record.record_type(),
        })
    }
}

/// Encodes a set list as CBOR for embedding in an exercise record.
pub fn encode_sets(sets: &[SetEntry]) -> ModelResult<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(sets, &mut buf).map_err(|e| ModelError::EmbeddedSets(e.to_string()))?;
    Ok(buf)
}

/// Decodes a set list embedded in an exercise record.
pub fn decode_sets(bytes: &[u8]) -> ModelResult<Vec<SetEntry>> {
    ciborium::from_reader(bytes).map_err(|e| ModelError::EmbeddedSets(e.to_string()))
}

impl RecordCodec for Split {
    const RECORD_TYPE: RecordType = RecordType::Split;

    fn key(&self) -> &EntityKey {
        &self.key
    }

    fn to_record(&self) -> ModelResult<Record> {
        Ok(Record::new(self.record_id())
            .with("name", self.name.as_str())
            .with("isActive", self.is_active)
            .with("startDate", self.start_date)
            .with("updatedAt", self.updated_at))
    }

    fn from_record(record: &Record) -> ModelResult<Self> {
        expect_type(record, Self::RECORD_TYPE)?;
        Ok(Self {
            key: record.key().clone(),
            name: record.text("name")?,
            is_active: record.flag("isActive")?,
            start_date: record.timestamp_opt("startDate")?,
            updated_at: record.timestamp("updatedAt")?,
            days: Vec::new(),
        })
    }
}

impl RecordCodec for Day {
    const RECORD_TYPE: RecordType = RecordType::Day;

    fn key(&self) -> &EntityKey {
        &self.key
    }

    fn to_record(&self) -> ModelResult<Record> {
        Ok(Record::new(self.record_id())
            .with("name", self.name.as_str())
            .with("orderIndex", self.order_index)
            .with("calendarLabel", self.calendar_label.as_str())
            .with("updatedAt", self.updated_at))
    }

    fn from_record(record: &Record) -> ModelResult<Self> {
        expect_type(record, Self::RECORD_TYPE)?;
        Ok(Self {
            key: record.key().clone(),
            name: record.text("name")?,
            order_index: record.integer("orderIndex")?,
            calendar_label: record.text_or_default("calendarLabel")?,
            updated_at: record.timestamp("updatedAt")?,
            exercises: Vec::new(),
        })
    }
}

impl RecordCodec for Exercise {
    const RECORD_TYPE: RecordType = RecordType::Exercise;

    fn key(&self) -> &EntityKey {
        &self.key
    }

    fn to_record(&self) -> ModelResult<Record> {
        Ok(Record::new(self.record_id())
            .with("name", self.name.as_str())
            .with("targetSpec", self.target_spec.as_str())
            .with("orderIndex", self.order_index)
            .with("completedAt", self.completed_at)
            .with("done", self.done)
            .with("updatedAt", self.updated_at)
            .with("sets", encode_sets(&self.sets)?))
    }

    fn from_record(record: &Record) -> ModelResult<Self> {
        expect_type(record, Self::RECORD_TYPE)?;
        let sets = match record.bytes_opt("sets")? {
            Some(bytes) => decode_sets(bytes)?,
            None => Vec::new(),
        };
        Ok(Self {
            key: record.key().clone(),
            name: record.text("name")?,
            target_spec: record.text_or_default("targetSpec")?,
            order_index: record.integer("orderIndex")?,
            completed_at: record.timestamp_opt("completedAt")?,
            done: record.flag("done")?,
            updated_at: record.timestamp("updatedAt")?,
            sets,
        })
    }
}

impl RecordCodec for DayStorage {
    const RECORD_TYPE: RecordType = RecordType::DayStorage;

    fn key(&self) -> &EntityKey {
        &self.key
    }

    fn to_record(&self) -> ModelResult<Record> {
        Ok(Record::new(self.record_id())
            .with("date", self.date.as_str())
            .with("dayKey", self.day_key.as_str())
            .with("dayName", self.day_name.as_str())
            .with("splitName", self.split_name.as_str())
            .with("recordedAt", self.recorded_at))
    }

    fn from_record(record: &Record) -> ModelResult<Self> {
        expect_type(record, Self::RECORD_TYPE)?;
        Ok(Self {
            key: record.key().clone(),
            date: record.text("date")?,
            day_key: EntityKey::from(record.text("dayKey")?),
            day_name: record.text_or_default("dayName")?,
            split_name: record.text_or_default("splitName")?,
            recorded_at: record.timestamp("recordedAt")?,
        })
    }
}

impl RecordCodec for WeightPoint {
    const RECORD_TYPE: RecordType = RecordType::WeightPoint;

    fn key(&self) -> &EntityKey {
        &self.key
    }

    fn to_record(&self) -> ModelResult<Record> {
        Ok(Record::new(self.record_id())
            .with("recordedAt", self.recorded_at)
            .with("value", self.value))
    }

    fn from_record(record: &Record) -> ModelResult<Self> {
        expect_type(record, Self::RECORD_TYPE)?;
        Ok(Self {
            key: record.key().clone(),
            recorded_at: record.timestamp("recordedAt")?,
            value: record.float("value")?,
        })
    }
}

impl UserProfile {
    /// Remote address of the profile record.
    pub fn record_id() -> RecordId {
        RecordId::new(RecordType::UserProfile, Self::key())
    }

    /// Builds the profile record, embedding the image payload if given.
    pub fn to_record(&self, image: Option<Vec<u8>>) -> Record {
        Record::new(Self::record_id())
            .with("displayName", self.display_name.as_str())
            .with("heightCm", self.height_cm)
            .with("weightUnit", self.weight_unit.as_str())
            .with("updatedAt", self.updated_at)
            .with(IMAGE_FIELD, image)
    }

    /// Decodes a profile whose image payload was already materialized as `image`.
    pub fn from_record(record: &Record, image: Option<AssetRef>) -> ModelResult<Self> {
        expect_type(record, RecordType::UserProfile)?;
        Ok(Self {
            display_name: record.text_or_default("displayName")?,
            height_cm: record.float_opt("heightCm")?,
            weight_unit: record.text_or_default("weightUnit")?,
            image,
            updated_at: record.timestamp("updatedAt")?,
        })
    }
}

impl ProgressPhoto {
    /// Remote address of this photo.
    pub fn record_id(&self) -> RecordId {
        RecordId::new(RecordType::ProgressPhoto, self.key.clone())
    }

    /// Builds the photo record carrying the image payload.
    pub fn to_record(&self, image: Vec<u8>) -> Record {
        Record::new(self.record_id())
            .with("takenAt", self.taken_at)
            .with("note", self.note.as_str())
            .with(IMAGE_FIELD, image)
    }

    /// Decodes a photo whose payload was materialized as `asset`.
    pub fn from_record(record: &Record, asset: AssetRef) -> ModelResult<Self> {
        expect_type(record, RecordType::ProgressPhoto)?;
        Ok(Self {
            key: record.key().clone(),
            taken_at: record.timestamp("takenAt")?,
            asset,
            note: record.text_or_default("note")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn exercise_embeds_sets() {
        let exercise = Exercise::new("Bench Press", "3x8", 0)
            .with_set(SetEntry::new(80.0, 8))
            .with_set(SetEntry {
                failure: true,
                note: "grindy".into(),
                ..SetEntry::new(80.0, 6)
            });

        let record = exercise.to_record().unwrap();
        assert!(record.bytes("sets").is_ok());
        assert!(record.references.is_empty());

        let decoded = Exercise::from_record(&record).unwrap();
        assert_eq!(decoded, exercise);
    }

    #[test]
    fn parent_records_carry_no_children() {
        let split = Split::new("PPL").with_day(Day::new("Push", 0));
        let record = split.to_record().unwrap();
        assert!(record.references(DAYS_REF).is_empty());

        let decoded = Split::from_record(&record).unwrap();
        assert!(decoded.days.is_empty());
        assert_eq!(decoded.name, "PPL");
        assert_eq!(decoded.updated_at, split.updated_at);
    }

    #[test]
    fn decoding_checks_record_type() {
        let day = Day::new("Pull", 1);
        let record = day.to_record().unwrap();
        assert!(matches!(
            Split::from_record(&record),
            Err(ModelError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn missing_clock_is_invalid() {
        let mut record = Split::new("PPL").to_record().unwrap();
        record.fields.remove("updatedAt");
        assert!(matches!(
            Split::from_record(&record),
            Err(ModelError::MissingField { .. })
        ));
    }

    #[test]
    fn corrupt_sets_are_reported() {
        let mut record = Exercise::new("Curl", "3x12", 2).to_record().unwrap();
        record.set("sets", vec![0xff, 0x00]);
        assert!(matches!(
            Exercise::from_record(&record),
            Err(ModelError::EmbeddedSets(_))
        ));
    }

    #[test]
    fn profile_image_travels_as_bytes() {
        let profile = UserProfile {
            display_name: "Sam".into(),
            height_cm: Some(180.0),
            weight_unit: "kg".into(),
            image: Some(AssetRef("local://a".into())),
            updated_at: Utc::now(),
        };
        let record = profile.to_record(Some(vec![1, 2, 3]));
        assert_eq!(record.bytes(IMAGE_FIELD).unwrap(), &[1, 2, 3]);
        assert_eq!(record.key().as_str(), crate::entity::PROFILE_KEY);

        let decoded = UserProfile::from_record(&record, Some(AssetRef("local://b".into()))).unwrap();
        assert_eq!(decoded.display_name, "Sam");
        assert_eq!(decoded.image, Some(AssetRef("local://b".into())));
    }
}
