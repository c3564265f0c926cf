//! Synthetic document generation for load runs and the `generate` command.

use std::fmt::Write as _;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use quick_xml::escape::escape;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use siphon_types::record::{DeliveryTag, RawMessage};
use siphon_types::schema::{FieldKind, RecordSchema};

use crate::broker::TopicConsumer;

/// Render one schema-conforming XML document.
pub fn synthetic_document(schema: &RecordSchema, rng: &mut impl Rng, seq: u64) -> String {
    let mut doc = String::with_capacity(32 + schema.field_count() * 24);
    let _ = write!(doc, "<{}>", schema.record_element);
    for field in &schema.fields {
        let _ = write!(doc, "<{}>", field.name);
        match field.kind {
            FieldKind::Text => {
                let _ = write!(doc, "{}", escape(&format!("v{}_{}", seq, rng.gen_range(0..10_000))));
            }
            FieldKind::Integer => {
                let _ = write!(doc, "{}", rng.gen_range(-1_000_000i64..1_000_000));
            }
            FieldKind::Float => {
                let _ = write!(doc, "{:.6}", rng.gen_range(-1000.0f64..1000.0));
            }
            FieldKind::Timestamp => {
                // Spread over 2024 so generated feeds are not all one instant.
                let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single();
                let ts = base
                    .map(|b| b + chrono::Duration::seconds(rng.gen_range(0..31_000_000)))
                    .unwrap_or_else(Utc::now);
                let _ = write!(doc, "{}", ts.to_rfc3339());
            }
        }
        let _ = write!(doc, "</{}>", field.name);
    }
    let _ = write!(doc, "</{}>", schema.record_element);
    doc
}

/// Render a document that fails decoding (truncated mid-element).
pub fn malformed_document(schema: &RecordSchema, seq: u64) -> String {
    format!("<{}><broken_{seq}>", schema.record_element)
}

/// Write a newline-delimited synthetic feed, suitable for replay.
///
/// # Errors
///
/// Returns an IO error if the file cannot be written.
pub fn generate_feed(
    path: &Path,
    schema: &RecordSchema,
    records: u64,
    malformed_every: Option<u64>,
    seed: u64,
) -> std::io::Result<u64> {
    use std::io::Write as _;

    let mut rng = StdRng::seed_from_u64(seed);
    let file = std::fs::File::create(path)?;
    let mut out = std::io::BufWriter::new(file);
    for seq in 1..=records {
        let line = if is_malformed_slot(seq, malformed_every) {
            malformed_document(schema, seq)
        } else {
            synthetic_document(schema, &mut rng, seq)
        };
        out.write_all(line.as_bytes())?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    Ok(records)
}

fn is_malformed_slot(seq: u64, malformed_every: Option<u64>) -> bool {
    malformed_every.is_some_and(|every| every > 0 && seq % every == 0)
}

/// A [`TopicConsumer`] that generates documents on demand.
///
/// Used by `source.kind = synthetic` runs where no broker or feed file is
/// involved at all.
pub struct SyntheticSource {
    schema: Arc<RecordSchema>,
    remaining: u64,
    malformed_every: Option<u64>,
    rng: StdRng,
    seq: u64,
    next_tag: AtomicU64,
}

impl SyntheticSource {
    pub fn new(
        schema: Arc<RecordSchema>,
        records: u64,
        malformed_every: Option<u64>,
        seed: u64,
    ) -> Self {
        Self {
            schema,
            remaining: records,
            malformed_every,
            rng: StdRng::seed_from_u64(seed),
            seq: 0,
            next_tag: AtomicU64::new(1),
        }
    }
}

#[async_trait]
impl TopicConsumer for SyntheticSource {
    async fn recv(&mut self) -> Option<RawMessage> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        self.seq += 1;
        let doc = if is_malformed_slot(self.seq, self.malformed_every) {
            malformed_document(&self.schema, self.seq)
        } else {
            synthetic_document(&self.schema, &mut self.rng, self.seq)
        };
        Some(RawMessage {
            payload: doc.into_bytes(),
            tag: DeliveryTag(self.next_tag.fetch_add(1, Ordering::Relaxed)),
        })
    }
}
