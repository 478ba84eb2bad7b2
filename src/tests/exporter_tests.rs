#[cfg(test)]
mod tests {
    use futures::StreamExt;
    use serde_json::json;
    use std::sync::Arc;
    use tokio::time::{timeout, Duration};

    use crate::tests::{row, station_connection, to_json, STATIONS_SQL, STATION_DOCS};
    use crate::{
        ConfigError, Connection, ExportError, ExportEvent, Exporter, ExporterOptions, MemoryConnection, Modifier,
        Row, SourceError, StreamOptions, TransformError,
    };

    /// Runs push mode to completion and renders every event as a string.
    async fn run(exporter: &mut Exporter) -> Vec<String> {
        let events = exporter.start().unwrap();
        events
            .map(|event| match event {
                ExportEvent::Data(doc) => to_json(&doc),
                ExportEvent::Error(e) => format!("error: {}", e),
                ExportEvent::End => "end".to_string(),
            })
            .collect()
            .await
    }

    fn numbered_rows(count: usize) -> Vec<Row> {
        (0..count).map(|i| row(json!({"id": i, "note": null}))).collect()
    }

    #[tokio::test]
    async fn test_export_using_query() {
        let connection = station_connection();
        let query = connection
            .query("SELECT geo$coordinates$0, geo$type FROM vw_export_stations LIMIT 1")
            .unwrap();
        let mut exporter = Exporter::new(Arc::new(connection), ExporterOptions::from_query(query)).unwrap();

        assert_eq!(
            run(&mut exporter).await,
            vec![r#"{"geo$coordinates$0":-123.652408,"geo$type":"Point"}"#, "end"]
        );
    }

    #[tokio::test]
    async fn test_export_using_sql_string() {
        let options = ExporterOptions::from_sql("SELECT geo$coordinates$0, geo$type FROM vw_export_stations LIMIT 1");
        let mut exporter = Exporter::new(Arc::new(station_connection()), options).unwrap();

        assert_eq!(
            run(&mut exporter).await,
            vec![r#"{"geo$coordinates$0":-123.652408,"geo$type":"Point"}"#, "end"]
        );
    }

    #[tokio::test]
    async fn test_export_drops_nulls_by_default() {
        let options = ExporterOptions::from_sql("SELECT media$0$type FROM vw_export_stations LIMIT 1");
        let mut exporter = Exporter::new(Arc::new(station_connection()), options).unwrap();

        assert_eq!(run(&mut exporter).await, vec!["{}", "end"]);
    }

    #[tokio::test]
    async fn test_export_using_keep_nulls() {
        let options = ExporterOptions {
            keep_nulls: true,
            ..ExporterOptions::from_sql("SELECT media$0$type FROM vw_export_stations LIMIT 1")
        };
        let mut exporter = Exporter::new(Arc::new(station_connection()), options).unwrap();

        assert_eq!(run(&mut exporter).await, vec![r#"{"media$0$type":null}"#, "end"]);
    }

    #[tokio::test]
    async fn test_export_using_dot_separator_and_expand() {
        let options = ExporterOptions {
            dot_separator: "$".into(),
            expand: true,
            ..ExporterOptions::from_sql("SELECT enabled, name FROM vw_export_stations LIMIT 1")
        };
        let mut exporter = Exporter::new(Arc::new(station_connection()), options).unwrap();

        assert_eq!(
            run(&mut exporter).await,
            vec![r#"{"enabled":"true","name":"Angelo HQ WS"}"#, "end"]
        );
    }

    #[tokio::test]
    async fn test_export_using_convert_true_false() {
        let options = ExporterOptions {
            convert_true_false: true,
            dot_separator: "$".into(),
            expand: true,
            ..ExporterOptions::from_sql("SELECT enabled, name FROM vw_export_stations LIMIT 1")
        };
        let mut exporter = Exporter::new(Arc::new(station_connection()), options).unwrap();

        assert_eq!(
            run(&mut exporter).await,
            vec![r#"{"enabled":true,"name":"Angelo HQ WS"}"#, "end"]
        );
    }

    #[tokio::test]
    async fn test_export_using_table_name_and_limit() {
        let connection = station_connection();
        let options = ExporterOptions {
            convert_true_false: true,
            dot_separator: "$".into(),
            expand: true,
            ..ExporterOptions::from_table("vw_export_stations", Some(2))
        };
        let mut exporter = Exporter::new(Arc::new(connection.clone()), options).unwrap();

        assert_eq!(connection.issued_queries(), vec![STATIONS_SQL.to_string()]);
        assert_eq!(run(&mut exporter).await, vec![STATION_DOCS[0], STATION_DOCS[1], "end"]);
    }

    #[tokio::test]
    async fn test_empty_sql_string_falls_back_to_table() {
        let connection = MemoryConnection::new().with_rows("SELECT * FROM `t`", vec![row(json!({"a": 1}))]);
        let options = ExporterOptions {
            sql_string: Some(String::new()),
            ..ExporterOptions::from_table("t", None)
        };
        let mut exporter = Exporter::new(Arc::new(connection), options).unwrap();

        assert_eq!(run(&mut exporter).await, vec![r#"{"a":1}"#, "end"]);
    }

    #[tokio::test]
    async fn test_rows_are_emitted_in_source_order() {
        let connection = MemoryConnection::new().with_rows("SELECT * FROM `big`", numbered_rows(100));
        let mut exporter = Exporter::new(Arc::new(connection), ExporterOptions::from_table("big", None)).unwrap();

        let out = run(&mut exporter).await;
        let expected: Vec<String> = (0..100)
            .map(|i| format!(r#"{{"id":{}}}"#, i))
            .chain(std::iter::once("end".to_string()))
            .collect();
        assert_eq!(out, expected);
    }

    #[tokio::test]
    async fn test_resume_follows_every_row_even_on_failure() {
        let reject: Arc<dyn Modifier> = Arc::new(|_row: &mut Row, key: &str| -> Result<bool, TransformError> {
            if key == "bad" {
                return Err(TransformError::modifier(key, "rejected"));
            }
            Ok(false)
        });
        let connection = MemoryConnection::new().with_rows(
            "SELECT * FROM `mixed`",
            vec![row(json!({"a": 1})), row(json!({"bad": 2})), row(json!({"a": 3}))],
        );
        let options = ExporterOptions::from_table("mixed", None).with_modifier(reject);
        let mut exporter = Exporter::new(Arc::new(connection.clone()), options).unwrap();

        let out = run(&mut exporter).await;
        assert_eq!(
            out,
            vec![
                r#"{"a":1}"#.to_string(),
                "error: Modifier failed on `bad`: rejected".to_string(),
                r#"{"a":3}"#.to_string(),
                "end".to_string(),
            ]
        );
        assert_eq!(connection.gate().pause_count(), 3);
        assert_eq!(connection.gate().resume_count(), 3);
        assert!(!connection.gate().is_paused());
    }

    #[tokio::test]
    async fn test_upstream_error_does_not_end_the_run() {
        let connection = MemoryConnection::new().with_items(
            "SELECT * FROM `flaky`",
            vec![
                Ok(row(json!({"a": 1}))),
                Err("connection reset".to_string()),
                Ok(row(json!({"a": 2}))),
                Err("second failure".to_string()),
                Ok(row(json!({"a": 3}))),
            ],
        );
        let mut exporter = Exporter::new(Arc::new(connection.clone()), ExporterOptions::from_table("flaky", None)).unwrap();

        let mut events = exporter.start().unwrap();
        let mut data = Vec::new();
        let mut errors = Vec::new();
        let mut ends = 0;
        while let Some(event) = events.recv().await {
            match event {
                ExportEvent::Data(doc) => data.push(to_json(&doc)),
                ExportEvent::Error(e) => errors.push(e),
                ExportEvent::End => ends += 1,
            }
        }

        assert_eq!(data, vec![r#"{"a":1}"#, r#"{"a":2}"#, r#"{"a":3}"#]);
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            &errors[0],
            ExportError::Source(SourceError::Driver(msg)) if msg == "connection reset"
        ));
        assert_eq!(ends, 1);
        assert_eq!(connection.gate().pause_count(), 3);
    }

    #[tokio::test]
    async fn test_end_is_last_and_unique() {
        let connection = MemoryConnection::new().with_rows("SELECT * FROM `t`", numbered_rows(3));
        let mut exporter = Exporter::new(Arc::new(connection), ExporterOptions::from_table("t", None)).unwrap();

        let mut events = exporter.start().unwrap();
        let mut seen = Vec::new();
        while let Some(event) = events.recv().await {
            seen.push(matches!(event, ExportEvent::End));
        }
        assert_eq!(seen, vec![false, false, false, true]);
    }

    #[tokio::test]
    async fn test_paused_connection_holds_back_rows() {
        let connection = MemoryConnection::new().with_rows("SELECT * FROM `t`", numbered_rows(1));
        let mut exporter = Exporter::new(Arc::new(connection.clone()), ExporterOptions::from_table("t", None)).unwrap();

        connection.pause();
        let mut events = exporter.start().unwrap();
        assert!(timeout(Duration::from_millis(50), events.recv()).await.is_err());

        connection.resume();
        match events.recv().await {
            Some(ExportEvent::Data(doc)) => assert_eq!(to_json(&doc), r#"{"id":0}"#),
            other => panic!("expected data, got {:?}", other),
        }
        assert!(matches!(events.recv().await, Some(ExportEvent::End)));
    }

    #[tokio::test]
    async fn test_missing_source_is_a_config_error() {
        let result = Exporter::new(Arc::new(MemoryConnection::new()), ExporterOptions::default());
        assert!(matches!(result, Err(ConfigError::MissingQuery)));
    }

    #[tokio::test]
    async fn test_failed_query_is_a_config_error() {
        let result = Exporter::new(Arc::new(MemoryConnection::new()), ExporterOptions::from_sql("SELECT 1"));
        assert!(matches!(result, Err(ConfigError::Query(SourceError::Driver(_)))));
    }

    #[tokio::test]
    async fn test_invalid_options_are_rejected() {
        let options = ExporterOptions {
            dot_separator: String::new(),
            ..ExporterOptions::from_table("vw_export_stations", Some(2))
        };
        let result = Exporter::new(Arc::new(station_connection()), options);
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[tokio::test]
    async fn test_query_can_only_be_consumed_once() {
        let mut exporter = Exporter::new(
            Arc::new(station_connection()),
            ExporterOptions::from_table("vw_export_stations", Some(2)),
        )
        .unwrap();

        let _events = exporter.start().unwrap();
        assert!(matches!(exporter.start(), Err(ExportError::QueryConsumed)));
        assert!(matches!(
            exporter.stream(StreamOptions::default()),
            Err(ExportError::QueryConsumed)
        ));
    }

    #[tokio::test]
    async fn test_destroy_releases_everything() {
        let mut exporter = Exporter::new(
            Arc::new(station_connection()),
            ExporterOptions::from_table("vw_export_stations", Some(2)),
        )
        .unwrap();
        assert!(exporter.options().is_some());

        exporter.destroy();

        assert!(exporter.is_destroyed());
        assert!(exporter.options().is_none());
        assert!(matches!(exporter.start(), Err(ExportError::Destroyed)));
        assert!(matches!(
            exporter.stream(StreamOptions::default()),
            Err(ExportError::Destroyed)
        ));
        assert!(matches!(exporter.transform(row(json!({"a": 1}))), Err(ExportError::Destroyed)));
    }

    #[tokio::test]
    async fn test_running_export_outlives_destroy() {
        let mut exporter = Exporter::new(
            Arc::new(station_connection()),
            ExporterOptions::from_table("vw_export_stations", Some(2)),
        )
        .unwrap();

        let events = exporter.start().unwrap();
        exporter.destroy();

        let count = events.filter(|e| futures::future::ready(matches!(e, ExportEvent::Data(_)))).count().await;
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn test_transform_matches_push_output() {
        let options = ExporterOptions {
            convert_true_false: true,
            dot_separator: "$".into(),
            expand: true,
            ..ExporterOptions::from_table("vw_export_stations", Some(2))
        };
        let exporter = Exporter::new(Arc::new(station_connection()), options).unwrap();

        let doc = exporter.transform(crate::tests::station_rows().remove(1)).unwrap();
        assert_eq!(to_json(&doc), STATION_DOCS[1]);
    }

    #[cfg(feature = "metrics")]
    #[tokio::test]
    async fn test_exports_are_counted() {
        let connection = MemoryConnection::new().with_rows("SELECT * FROM `t`", numbered_rows(2));
        let mut exporter = Exporter::new(Arc::new(connection), ExporterOptions::from_table("t", None)).unwrap();
        run(&mut exporter).await;

        let text = crate::gather_metrics();
        assert!(text.contains("exported_documents_total"));
    }
}
