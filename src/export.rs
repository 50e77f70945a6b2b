//! Excel export of a filtered record list.
//!
//! Pure function of its input: the caller runs the list query and hands
//! the rows over; nothing here touches the database.

use rust_xlsxwriter::{Color, Format, FormatAlign, Workbook, XlsxError};

use crate::model::{encode_recorded_at, join_tags, InspectionRecord};
use crate::{AppError, AppResult};

pub const EXPORT_FILE_NAME: &str = "pdi_records.xlsx";

/// Fixed column order of the exported sheet.
pub const EXPORT_COLUMNS: &[&str] = &[
    "BB No",
    "Chassis No",
    "Vehicle Type",
    "Work Order No",
    "Inspection Date",
    "Findings",
    "Defect Location",
    "Sub-Group",
];

const HEADER_FILL: u32 = 0x3F4C5C;

fn xlsx_err(error: XlsxError) -> AppError {
    AppError::new("EXPORT/XLSX", error.to_string())
}

/// Serialize the records into an XLSX workbook with a single "PDI" sheet
/// and a styled header row (bold white on slate, centered).
pub fn export_xlsx(records: &[InspectionRecord]) -> AppResult<Vec<u8>> {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet.set_name("PDI").map_err(xlsx_err)?;

    let header = Format::new()
        .set_bold()
        .set_font_color(Color::White)
        .set_background_color(Color::RGB(HEADER_FILL))
        .set_align(FormatAlign::Center)
        .set_align(FormatAlign::VerticalCenter);

    for (col, title) in EXPORT_COLUMNS.iter().enumerate() {
        sheet
            .write_with_format(0, col as u16, *title, &header)
            .map_err(xlsx_err)?;
    }

    for (i, record) in records.iter().enumerate() {
        let row = (i + 1) as u32;
        let cells: [String; 8] = [
            record.bb_number.clone(),
            record.chassis_number.clone(),
            record.vehicle_type.clone(),
            record.work_order_number.clone(),
            encode_recorded_at(record.recorded_at),
            record.findings.clone(),
            join_tags(&record.defect_locations),
            record.sub_group.clone(),
        ];
        for (col, value) in cells.iter().enumerate() {
            sheet.write(row, col as u16, value.as_str()).map_err(xlsx_err)?;
        }
    }

    workbook.save_to_buffer().map_err(xlsx_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn sample() -> InspectionRecord {
        InspectionRecord {
            id: 7,
            bb_number: "BB-100".into(),
            chassis_number: "WDB123".into(),
            vehicle_type: "Travego".into(),
            work_order_number: "WO-9".into(),
            sub_group: "Paint".into(),
            findings: "Scratch on rear panel".into(),
            defect_locations: vec!["Paint".into(), "Door".into()],
            photo_references: vec![],
            recorded_at: NaiveDate::from_ymd_opt(2025, 1, 5).unwrap(),
            recorded_by: "inspector".into(),
        }
    }

    #[test]
    fn export_produces_a_zip_container() {
        let bytes = export_xlsx(&[sample()]).unwrap();
        // XLSX is a zip archive; the local-file-header magic is "PK".
        assert_eq!(&bytes[..2], b"PK");
    }

    #[test]
    fn empty_list_still_exports_the_header_sheet() {
        let bytes = export_xlsx(&[]).unwrap();
        assert!(!bytes.is_empty());
    }

    #[test]
    fn column_order_is_fixed() {
        assert_eq!(EXPORT_COLUMNS.len(), 8);
        assert_eq!(EXPORT_COLUMNS[0], "BB No");
        assert_eq!(EXPORT_COLUMNS[4], "Inspection Date");
        assert_eq!(EXPORT_COLUMNS[7], "Sub-Group");
    }
}
