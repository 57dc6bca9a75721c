//! Built-in profile catalogue.

use std::collections::BTreeMap;

use sluice_db::ColumnType;

use super::{
    Category, Classification, ConflictPolicy, HeaderMode, KeySemantics, NaturalKey, RowTransform,
    SchemaProfile,
};

const GLASSREPORT_HEADERS: &[&str] = &[
    "order_date", "list_date", "sealed_unit_id", "ot", "window_type", "line1", "line2", "line3",
    "grills", "spacer", "dealer", "glass_comment", "tag", "zones", "u_value", "solar_heat_gain",
    "visual_trasmittance", "energy_rating", "glass_type", "order", "width", "height", "qty",
    "description", "note1", "note2", "rack_id", "complete", "shipping",
];

const CASING_HEADERS: &[&str] = &[
    "SIZE", "H AND W", "BIN", "LINE NUMBER", "PROFILE TYPE", "LABEL", "ORDER NUMBER",
    "WINDOW_TYPE", "WINDOW SIZE", "WINDOW LINE", "OT", "COLOUR IN", "COLOUR OUT",
    "RUBBER COLOUR", "COMPANY NAME", "CUSTOMER PO", "CASING_ID", "DATE", "TIME",
];

const CASINGCUTTING_HEADERS: &[&str] = &[
    "H_W", "BIN", "ORDER_LINE", "MATERIAL", "LABEL", "ORDER", "WINDOW", "WINDOWS_SIZE",
    "ROSSETTE", "CASING LINE", "COMPANY", "PO", "DATE", "TIME", "USER",
];

const OPTLABEL_HEADERS: &[&str] = &[
    "PRINT SEQUENCE", "STRING NUMBER", "OT", "SPACER", "WINDOW TYPE", "BARCODE",
    "COMPNAY NAME", "PICE ID", "WIDTH", "HEIGHT", "GLASS TYPE", "NRC", "CHAMBERS", "MODEL",
    "U FACTOR", "SHGC", "VT", "ER", "GRILL TYPE", "ENERGY STAR", "MODEL2", "DATE", "TIME",
];

const WORKORDER2_HEADERS: &[&str] = &[
    "ORDER #", "PO", "TAG", "DEALER", "ORDER DATE", "DUE DATE", "WINDOW DESCRIPTION",
    "DESCRIPTION", "OPTIONS", "QTY", "LINE #1", "NOTE",
];

const ORDERSUMMARY_HEADERS: &[&str] = &[
    "ORDER#", "CUST PO", "COMPANY", "ORDER DATE", "DUE DATE", "LIVE_TEST", "AW-V", "CAW-V",
    "CCS-L", "CCS-R", "CECS-L", "CECS-R", "CS-L", "CS-R", "CSHAPE", "CV-F", "DES", "DESLO",
    "DWIND", "SDWIND", "SHO", "SLO", "SU", "SU1", "SUSHP", "V-A", "V-AO", "V-B", "V-BLO", "V-C",
    "V-F", "V-LCS", "V-SF", "V-SH", "V-SHO", "V-SLO", "V-SLOO", "V-SLOS", "V-SSO", "V-SS",
    "V-SLOR", "V-SS-R", "V-SSOR", "VSLOSR", "DES4", "DESLO4", "SH", "SS", "SS-R", "SSO",
    "SLO-R", "SSO-R", "SLOO", "SLOS", "SLOSR", "DH", "SHP-SH", "SHAPE", "CV-SF", "WINDOW1",
    "WINDOW2", "WINDOW3", "WINDOW4", "WINDOW5", "WINDOW6", "WINDOW7", "WINDOW8", "BRICKMOULD",
    "EXT", "CASING", "ROSETTE", "GRILL", "SDL", "COLOUR IN", "COLOUR OUT", "RUBBER COLOUR",
    "BAY", "BOW", "PATIO DOOR", "PATIO DOOR OPTIONS", "EX_COL1", "EX_COL2", "EX_COL3",
    "EX_COL4", "EX_COL5", "CORNER_DR", "USER NAME", "LIST DATE", "COMPLETE", "STATUS",
    "P_BOTTERO", "P_URBAN", "P_CASING", "P_SCREEN", "P_GLASSTOP", "P_SLCOVERS", "P_EXTENSION",
    "NOTE", "BOOKING_DATE", "COLOUR_BATCH_NO", "COLOUR_CUT_DATE",
];

const WINDOWSENTRY_HEADERS: &[&str] = &[
    "ORDER_NUMBER", "QUOTATION_NUMBER", "WINDOWS_QTY", "LINE_QTY", "OPENING_QTY", "USER_NAME",
    "ORDER_DATE", "SYSTEM", "OUTPUT_DATE", "DEALER NAME",
];

const PRODUCTIONREPORT_HEADERS: &[&str] = &[
    "PRODUCTION DATE", "LIST DATE", "ORDER", "CASEMENT", "SLIDER", "SHAPE", "SEALED UNIT",
    "P.DOOR", "TOTAL", "CUSTOMER NAME", "DESCRIPTIONS", "NOTE",
];

/// Spreadsheet-style column letters `A` through `last`.
fn letters(last: char) -> Vec<String> {
    ('A'..=last).map(|c| c.to_string()).collect()
}

fn names(headers: &[&str]) -> Vec<String> {
    headers.iter().map(|h| h.to_string()).collect()
}

fn types(pairs: &[(&str, ColumnType)]) -> BTreeMap<String, ColumnType> {
    pairs.iter().map(|(c, t)| (c.to_string(), *t)).collect()
}

fn single(on_match: Classification) -> KeySemantics {
    KeySemantics::Single { on_match }
}

/// Shorthand with the defaults most profiles share.
fn profile(code: &str, headers: Vec<String>, key: NaturalKey, category: Category) -> SchemaProfile {
    SchemaProfile {
        code: code.to_string(),
        table: code.to_lowercase(),
        headers,
        key,
        key_semantics: KeySemantics::default(),
        policy: ConflictPolicy::Append,
        date_column: None,
        column_types: BTreeMap::new(),
        transforms: vec![RowTransform::Trim],
        header_mode: HeaderMode::Canonical,
        atomic: true,
        alerts: Vec::new(),
        category,
    }
}

/// Every profile shipped with the loader.
pub fn builtin_profiles() -> Vec<SchemaProfile> {
    use Classification::{Duplicate, Resend};

    vec![
        SchemaProfile {
            key_semantics: KeySemantics::Composite,
            date_column: Some("list_date".into()),
            column_types: types(&[
                ("order_date", ColumnType::Date),
                ("list_date", ColumnType::Date),
                ("width", ColumnType::Decimal),
                ("height", ColumnType::Decimal),
                ("qty", ColumnType::Decimal),
            ]),
            header_mode: HeaderMode::DetectNumeric,
            atomic: false,
            alerts: vec![Duplicate, Resend],
            ..profile(
                "GLASSREPORT",
                names(GLASSREPORT_HEADERS),
                NaturalKey::composite("order", "sealed_unit_id"),
                Category::Glass,
            )
        },
        SchemaProfile {
            key_semantics: KeySemantics::Inverted,
            policy: ConflictPolicy::SkipExisting,
            date_column: Some("U".into()),
            column_types: types(&[
                ("F", ColumnType::VarcharUnique),
                ("J", ColumnType::VarcharUnique),
            ]),
            atomic: false,
            alerts: vec![Duplicate, Resend],
            ..profile(
                "FRAMESCUTTING",
                letters('Z'),
                NaturalKey::composite("J", "F"),
                Category::Frame,
            )
        },
        SchemaProfile {
            date_column: Some("A".into()),
            alerts: vec![Duplicate],
            ..profile(
                "URBANCUTTING",
                letters('O'),
                NaturalKey::single("O"),
                Category::Frame,
            )
        },
        SchemaProfile {
            key_semantics: KeySemantics::Occurrences { limit: 2 },
            date_column: Some("DATE".into()),
            alerts: vec![Duplicate],
            ..profile(
                "CASING",
                names(CASING_HEADERS),
                NaturalKey::single("CASING_ID"),
                Category::Casing,
            )
        },
        SchemaProfile {
            key_semantics: single(Resend),
            date_column: Some("DATE".into()),
            alerts: vec![Resend],
            ..profile(
                "CASINGCUTTING",
                names(CASINGCUTTING_HEADERS),
                NaturalKey::single("ORDER"),
                Category::Casing,
            )
        },
        SchemaProfile {
            date_column: Some("DATE".into()),
            alerts: vec![Duplicate],
            ..profile(
                "OPTLABEL",
                names(OPTLABEL_HEADERS),
                NaturalKey::single("BARCODE"),
                Category::Label,
            )
        },
        SchemaProfile {
            policy: ConflictPolicy::ReplaceOnConflict,
            date_column: Some("ORDER DATE".into()),
            transforms: vec![
                RowTransform::Trim,
                RowTransform::Combine {
                    target: "DESCRIPTION".into(),
                    sources: vec!["DESCRIPTION".into(), "OPTIONS".into()],
                    separator: "##".into(),
                    drop_sources: true,
                },
            ],
            ..profile(
                "WORKORDER2",
                names(WORKORDER2_HEADERS),
                NaturalKey::single("ORDER #"),
                Category::Order,
            )
        },
        SchemaProfile {
            policy: ConflictPolicy::UpdateIfBlank,
            date_column: Some("ORDER DATE".into()),
            ..profile(
                "ORDERSUMMARY",
                names(ORDERSUMMARY_HEADERS),
                NaturalKey::single("ORDER#"),
                Category::Order,
            )
        },
        SchemaProfile {
            policy: ConflictPolicy::Upsert,
            date_column: Some("ORDER_DATE".into()),
            header_mode: HeaderMode::Require,
            ..profile(
                "WINDOWSENTRY",
                names(WINDOWSENTRY_HEADERS),
                NaturalKey::single("ORDER_NUMBER").with_fallback("QUOTATION_NUMBER"),
                Category::Order,
            )
        },
        SchemaProfile {
            date_column: Some("LIST DATE".into()),
            atomic: false,
            ..profile(
                "PRODUCTIONREPORT",
                names(PRODUCTIONREPORT_HEADERS),
                NaturalKey::single("ORDER"),
                Category::Production,
            )
        },
    ]
}
