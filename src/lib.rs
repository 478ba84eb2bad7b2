//! # Row Export Library
//!
//! This library turns the rows of a relational query into independent JSON
//! documents. Each row runs through an ordered chain of field modifiers
//! (null removal, `"true"`/`"false"` coercion, or your own rules) and can
//! optionally be expanded from flat keys like `geo.type` into nested objects.
//!
//! Documents are delivered either as push-style events, with the connection
//! paused while each row is transformed and handed off, or as a pull-style
//! stream whose pacing is driven by the consumer.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use prk_row_export::{ExportEvent, Exporter, ExporterOptions, MemoryConnection};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let row = json!({"geo.type": "Point", "enabled": "true", "note": null});
//!     let connection = MemoryConnection::new()
//!         .with_rows("SELECT * FROM `stations` LIMIT 1", vec![row.as_object().cloned().unwrap()]);
//!
//!     let options = ExporterOptions {
//!         convert_true_false: true,
//!         expand: true,
//!         ..ExporterOptions::from_table("stations", Some(1))
//!     };
//!     let mut exporter = Exporter::new(Arc::new(connection), options)?;
//!
//!     let mut events = exporter.start()?;
//!     while let Some(event) = events.recv().await {
//!         match event {
//!             ExportEvent::Data(doc) => println!("{}", serde_json::Value::Object(doc)),
//!             ExportEvent::Error(e) => eprintln!("export error: {}", e),
//!             ExportEvent::End => break,
//!         }
//!     }
//!     Ok(())
//! }
//! ```

#[cfg(test)]
mod tests;

mod source;
pub use source::*;

mod modifiers;
pub use modifiers::*;

mod expand;
pub use expand::*;

mod transformers;
pub use transformers::*;

mod memory;
pub use memory::*;

mod json_rows;
pub use json_rows::*;

mod exporter;
pub use exporter::*;

mod config;
#[cfg(feature = "configs")]
pub use config::configuration::*;

mod metrics;
#[cfg(feature = "metrics")]
pub use metrics::gather_metrics;
