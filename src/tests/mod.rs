mod exporter_tests;

use serde_json::{json, Value};

use crate::{Document, MemoryConnection, Row};

pub(crate) const STATIONS_SQL: &str = "SELECT * FROM `vw_export_stations` LIMIT 2";

pub(crate) const STATION_DOCS: [&str; 2] = [
    r#"{"enabled":true,"is_active":true,"is_stationary":true,"name":"Angelo HQ WS","station_type":"weather","time_zone":"PST","utc_offset":"-28800","external_refs":[{"identifier":2,"type":"odm.station.StationID","url":"file://WSHQ_CR1000_AR_HWS.dat"}],"geo":{"coordinates":[-123.652408,39.718186,405.9],"type":"Point"}}"#,
    r#"{"enabled":true,"is_active":true,"is_stationary":true,"name":"Angelo HQ SF Eel Gage","station_type":"weather","time_zone":"PST","utc_offset":"-28800","external_refs":[{"identifier":3,"type":"odm.station.StationID","url":"file://GHQ_CR1000_GHQTable.dat"}],"geo":{"coordinates":[-123.652277,39.718947,394],"type":"Point"}}"#,
];

/// Builds a row from a `json!` object literal.
pub(crate) fn row(value: Value) -> Row {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {}", other),
    }
}

pub(crate) fn to_json(doc: &Document) -> String {
    serde_json::to_string(doc).unwrap()
}

/// Two rows of the station export view, flattened with `$` paths.
pub(crate) fn station_rows() -> Vec<Row> {
    vec![
        row(json!({
            "enabled": "true",
            "is_active": "true",
            "is_stationary": "TRUE",
            "name": "Angelo HQ WS",
            "station_type": "weather",
            "time_zone": "PST",
            "utc_offset": "-28800",
            "external_refs$0$identifier": 2,
            "external_refs$0$type": "odm.station.StationID",
            "external_refs$0$url": "file://WSHQ_CR1000_AR_HWS.dat",
            "geo$coordinates$0": -123.652408,
            "geo$coordinates$1": 39.718186,
            "geo$coordinates$2": 405.9,
            "geo$type": "Point",
            "media$0$type": null
        })),
        row(json!({
            "enabled": "true",
            "is_active": "true",
            "is_stationary": "true",
            "name": "Angelo HQ SF Eel Gage",
            "station_type": "weather",
            "time_zone": "PST",
            "utc_offset": "-28800",
            "external_refs$0$identifier": 3,
            "external_refs$0$type": "odm.station.StationID",
            "external_refs$0$url": "file://GHQ_CR1000_GHQTable.dat",
            "geo$coordinates$0": -123.652277,
            "geo$coordinates$1": 39.718947,
            "geo$coordinates$2": 394,
            "geo$type": "Point",
            "media$0$type": null
        })),
    ]
}

pub(crate) fn station_connection() -> MemoryConnection {
    MemoryConnection::new()
        .with_rows(
            "SELECT geo$coordinates$0, geo$type FROM vw_export_stations LIMIT 1",
            vec![row(json!({"geo$coordinates$0": -123.652408, "geo$type": "Point"}))],
        )
        .with_rows(
            "SELECT media$0$type FROM vw_export_stations LIMIT 1",
            vec![row(json!({"media$0$type": null}))],
        )
        .with_rows(
            "SELECT enabled, name FROM vw_export_stations LIMIT 1",
            vec![row(json!({"enabled": "true", "name": "Angelo HQ WS"}))],
        )
        .with_rows(STATIONS_SQL, station_rows())
}
