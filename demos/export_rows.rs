use futures::StreamExt;
use prk_row_export::{ExportEvent, Exporter, ExporterOptions, JsonRowQuery, MemoryConnection, StreamOptions};
use serde_json::Value;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::time::{sleep, Duration};

/// Replays a captured result set through both delivery modes.
///
/// Rows arrive in pieces over an in-memory pipe, the way a slow driver would
/// hand them over, and are printed as one JSON document per line.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (mut tx, rx) = tokio::io::duplex(256);
    tokio::spawn(async move {
        let rows = [
            r#"{"enabled": "true", "name": "Angelo HQ WS", "geo$coordinates$0": -123.652408, "geo$coordinates$1": 39.718186, "geo$type": "Point", "media$0$type": null}"#,
            r#"{"enabled": "false", "name": "Angelo HQ SF Eel Gage", "geo$coordinates$0": -123.652277, "geo$coordinates$1": 39.718947, "geo$type": "Point", "media$0$type": null}"#,
        ];
        for row in rows {
            for part in row.as_bytes().chunks(40) {
                if tx.write_all(part).await.is_err() {
                    return;
                }
                sleep(Duration::from_millis(10)).await;
            }
            let _ = tx.write_all(b"\n").await;
        }
    });

    let connection = MemoryConnection::new();
    let query = JsonRowQuery::new(rx).with_gate(connection.gate().clone());
    let options = ExporterOptions {
        convert_true_false: true,
        dot_separator: "$".into(),
        expand: true,
        ..ExporterOptions::from_query(Box::new(query))
    };

    println!("-- events --");
    let mut exporter = Exporter::new(Arc::new(connection.clone()), options)?;
    let mut events = exporter.start()?;
    while let Some(event) = events.recv().await {
        match event {
            ExportEvent::Data(doc) => println!("{}", Value::Object(doc)),
            ExportEvent::Error(e) => eprintln!("error: {}", e),
            ExportEvent::End => break,
        }
    }
    exporter.destroy();

    println!("-- stream --");
    let rows = r#"[{"id": 1, "tags$0": "a", "tags$1": "b"}, {"id": 2, "tags$0": null}]"#;
    let query = JsonRowQuery::new(std::io::Cursor::new(rows.as_bytes().to_vec()));
    let options = ExporterOptions {
        dot_separator: "$".into(),
        expand: true,
        ..ExporterOptions::from_query(Box::new(query))
    };
    let mut exporter = Exporter::new(Arc::new(connection), options)?;
    let mut docs = exporter.stream(StreamOptions::default())?;
    while let Some(doc) = docs.next().await {
        println!("{}", Value::Object(doc?));
    }

    Ok(())
}
