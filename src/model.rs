//! Domain model for inspection records and users.
//!
//! Multi-valued fields (`defect_locations`, `photo_references`) are
//! ordered `Vec<String>` here; the delimited text representation exists
//! only at the persistence boundary, via the codecs in this module.
//! `recorded_at` is a plain calendar date; the stored text is
//! `dd-mm-YYYY 00:00:00` with the time fixed to midnight, and range
//! filtering derives a `YYYYMMDD` key from it instead of trusting the
//! text's lexical order.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::Row;

use crate::AppError;

pub const RECORD_DECODE: &str = "RECORD/DECODE";
pub const VALIDATION_VEHICLE_TYPE: &str = "VALIDATION/VEHICLE_TYPE";
pub const VALIDATION_SUB_GROUP: &str = "VALIDATION/SUB_GROUP";
pub const VALIDATION_DEFECT_LOCATION: &str = "VALIDATION/DEFECT_LOCATION";

/// Tags are joined with this separator on write and split on `,` + trim
/// on read. Tag values are validated against [`DEFECT_LOCATIONS`], so the
/// separator can never occur inside a tag.
const TAG_SEPARATOR: &str = ", ";
const PHOTO_SEPARATOR: char = ',';

const DATE_FORMAT: &str = "%d-%m-%Y";
const MIDNIGHT_SUFFIX: &str = " 00:00:00";

/// Vehicle component where a defect was found; multi-select per record.
pub const DEFECT_LOCATIONS: &[&str] = &[
    "Lighting",
    "Partition Wall",
    "Mirror",
    "Paint",
    "Glass",
    "Moulding",
    "Defroster",
    "Label",
    "Cover",
    "Door",
    "Cladding",
    "Hose Clip",
    "Air Conditioning",
    "Seat",
    "Bellows",
    "Lamp",
    "Assembly",
    "Engine",
    "Kitchen",
    "Parcel Shelf",
    "Wiper",
    "Sun Visor",
    "Spare Wheel",
    "Driver Berth",
    "Plug",
    "Telephone",
    "Glovebox",
    "Lettering",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VehicleType {
    Tourismo,
    Connecto,
    Travego,
}

impl VehicleType {
    pub const ALL: &'static [VehicleType] =
        &[VehicleType::Tourismo, VehicleType::Connecto, VehicleType::Travego];

    pub fn as_str(&self) -> &'static str {
        match self {
            VehicleType::Tourismo => "Tourismo",
            VehicleType::Connecto => "Connecto",
            VehicleType::Travego => "Travego",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, AppError> {
        Self::ALL
            .iter()
            .copied()
            .find(|v| v.as_str() == raw)
            .ok_or_else(|| {
                AppError::new(VALIDATION_VEHICLE_TYPE, "Unknown vehicle type")
                    .with_context("value", raw.to_string())
            })
    }
}

/// Coarse defect category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubGroup {
    Paint,
    Trim,
    Mechanical,
    Electrical,
}

impl SubGroup {
    pub const ALL: &'static [SubGroup] = &[
        SubGroup::Paint,
        SubGroup::Trim,
        SubGroup::Mechanical,
        SubGroup::Electrical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SubGroup::Paint => "Paint",
            SubGroup::Trim => "Trim",
            SubGroup::Mechanical => "Mechanical",
            SubGroup::Electrical => "Electrical",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, AppError> {
        Self::ALL
            .iter()
            .copied()
            .find(|v| v.as_str() == raw)
            .ok_or_else(|| {
                AppError::new(VALIDATION_SUB_GROUP, "Unknown sub-group")
                    .with_context("value", raw.to_string())
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Viewer,
    Admin,
}

impl Role {
    /// The `users.role` column stores admin=1, viewer=0.
    pub fn from_flag(flag: i32) -> Self {
        if flag == 1 {
            Role::Admin
        } else {
            Role::Viewer
        }
    }

    pub fn as_flag(&self) -> i32 {
        match self {
            Role::Admin => 1,
            Role::Viewer => 0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Viewer => "viewer",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InspectionRecord {
    pub id: i64,
    pub bb_number: String,
    pub chassis_number: String,
    pub vehicle_type: String,
    pub work_order_number: String,
    pub sub_group: String,
    pub findings: String,
    pub defect_locations: Vec<String>,
    pub photo_references: Vec<String>,
    pub recorded_at: NaiveDate,
    /// Username of the creator; never altered after creation.
    pub recorded_by: String,
}

impl TryFrom<&PgRow> for InspectionRecord {
    type Error = AppError;

    fn try_from(row: &PgRow) -> Result<Self, Self::Error> {
        let recorded_at_raw: String = row.try_get("recorded_at").map_err(AppError::from)?;
        Ok(Self {
            id: row.try_get("id").map_err(AppError::from)?,
            bb_number: row.try_get("bb_number").map_err(AppError::from)?,
            chassis_number: row.try_get("chassis_number").map_err(AppError::from)?,
            vehicle_type: row.try_get("vehicle_type").map_err(AppError::from)?,
            work_order_number: row.try_get("work_order_number").map_err(AppError::from)?,
            sub_group: row.try_get("sub_group").map_err(AppError::from)?,
            findings: row.try_get("findings").map_err(AppError::from)?,
            defect_locations: split_tags(
                row.try_get::<String, _>("defect_locations")
                    .map_err(AppError::from)?
                    .as_str(),
            ),
            photo_references: split_photo_references(
                row.try_get::<String, _>("photo_references")
                    .map_err(AppError::from)?
                    .as_str(),
            ),
            recorded_at: decode_recorded_at(&recorded_at_raw)?,
            recorded_by: row.try_get("recorded_by").map_err(AppError::from)?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub username: String,
    pub role: Role,
    pub description: String,
}

impl TryFrom<&PgRow> for User {
    type Error = AppError;

    fn try_from(row: &PgRow) -> Result<Self, Self::Error> {
        Ok(Self {
            username: row.try_get("username").map_err(AppError::from)?,
            role: Role::from_flag(row.try_get::<i32, _>("role").map_err(AppError::from)?),
            description: row.try_get("description").map_err(AppError::from)?,
        })
    }
}

/// Reject tags that are not members of the fixed enumeration. Keeps the
/// joined column unambiguous: a validated tag cannot contain the
/// separator.
pub fn validate_defect_locations(tags: &[String]) -> Result<(), AppError> {
    for tag in tags {
        if !DEFECT_LOCATIONS.contains(&tag.as_str()) {
            return Err(
                AppError::new(VALIDATION_DEFECT_LOCATION, "Unknown defect location")
                    .with_context("value", tag.clone()),
            );
        }
    }
    Ok(())
}

pub fn join_tags(tags: &[String]) -> String {
    tags.join(TAG_SEPARATOR)
}

pub fn split_tags(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn join_photo_references(uris: &[String]) -> String {
    uris.join(&PHOTO_SEPARATOR.to_string())
}

pub fn split_photo_references(raw: &str) -> Vec<String> {
    raw.split(PHOTO_SEPARATOR)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// `dd-mm-YYYY 00:00:00`: day-month-year text with the time pinned to
/// midnight.
pub fn encode_recorded_at(date: NaiveDate) -> String {
    format!("{}{MIDNIGHT_SUFFIX}", date.format(DATE_FORMAT))
}

pub fn decode_recorded_at(raw: &str) -> Result<NaiveDate, AppError> {
    let date_part = raw.split_whitespace().next().unwrap_or(raw);
    NaiveDate::parse_from_str(date_part, DATE_FORMAT).map_err(|e| {
        AppError::new(RECORD_DECODE, "Invalid recorded_at text")
            .with_context("value", raw.to_string())
            .with_context("parse_error", e.to_string())
    })
}

/// Chronologically ordered key for a calendar date. Matches the SQL-side
/// derivation from the stored text: year, month, day at fixed offsets.
pub fn date_sort_key(date: NaiveDate) -> String {
    date.format("%Y%m%d").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn recorded_at_round_trips_through_text() {
        let date = d(2025, 1, 5);
        let encoded = encode_recorded_at(date);
        assert_eq!(encoded, "05-01-2025 00:00:00");
        assert_eq!(decode_recorded_at(&encoded).unwrap(), date);
    }

    #[test]
    fn decode_accepts_bare_date_text() {
        assert_eq!(decode_recorded_at("20-12-2024").unwrap(), d(2024, 12, 20));
    }

    #[test]
    fn decode_rejects_garbage() {
        let err = decode_recorded_at("yesterday").unwrap_err();
        assert_eq!(err.code(), RECORD_DECODE);
    }

    #[test]
    fn sort_key_orders_chronologically_where_text_does_not() {
        // Lexically "05-01-2025" < "20-12-2024", chronologically the reverse.
        let newer = d(2025, 1, 5);
        let older = d(2024, 12, 20);
        assert!(encode_recorded_at(newer) < encode_recorded_at(older));
        assert!(date_sort_key(newer) > date_sort_key(older));
    }

    #[test]
    fn tags_round_trip_through_joined_text() {
        let tags = vec!["Paint".to_string(), "Seat".to_string(), "Door".to_string()];
        let joined = join_tags(&tags);
        assert_eq!(joined, "Paint, Seat, Door");
        assert_eq!(split_tags(&joined), tags);
    }

    #[test]
    fn split_tags_tolerates_ragged_input() {
        assert_eq!(
            split_tags(" Paint ,, Door ,"),
            vec!["Paint".to_string(), "Door".to_string()]
        );
        assert!(split_tags("").is_empty());
    }

    #[test]
    fn photo_references_round_trip() {
        let uris = vec![
            "https://cdn.example/a.jpg".to_string(),
            "https://cdn.example/b.jpg".to_string(),
        ];
        let joined = join_photo_references(&uris);
        assert_eq!(split_photo_references(&joined), uris);
        assert!(split_photo_references("").is_empty());
    }

    #[test]
    fn defect_location_validation_rejects_unknown_tags() {
        let ok = vec!["Paint".to_string(), "Glovebox".to_string()];
        assert!(validate_defect_locations(&ok).is_ok());

        let bad = vec!["Paint, Door".to_string()];
        let err = validate_defect_locations(&bad).unwrap_err();
        assert_eq!(err.code(), VALIDATION_DEFECT_LOCATION);
    }

    #[test]
    fn enumeration_has_no_embedded_separators() {
        for loc in DEFECT_LOCATIONS {
            assert!(!loc.contains(','), "separator inside {loc}");
        }
        assert_eq!(DEFECT_LOCATIONS.len(), 28);
    }

    #[test]
    fn vehicle_type_parses_exact_names_only() {
        assert_eq!(VehicleType::parse("Travego").unwrap(), VehicleType::Travego);
        assert_eq!(
            VehicleType::parse("travego").unwrap_err().code(),
            VALIDATION_VEHICLE_TYPE
        );
    }

    #[test]
    fn sub_group_parses_exact_names_only() {
        assert_eq!(SubGroup::parse("Trim").unwrap(), SubGroup::Trim);
        assert!(SubGroup::parse("Bodywork").is_err());
    }

    #[test]
    fn role_flag_round_trips() {
        assert_eq!(Role::from_flag(1), Role::Admin);
        assert_eq!(Role::from_flag(0), Role::Viewer);
        // Anything unexpected demotes to viewer.
        assert_eq!(Role::from_flag(7), Role::Viewer);
        assert_eq!(Role::Admin.as_flag(), 1);
    }
}
