//! DoGet / DoPut streaming pipelines
//!
//! # DoGet
//!
//! ```text
//!  producer task              handoff (unbounded)         writer task
//!  backend.do_get(sink) ──► RecordBatch queue ──► FlightDataEncoder ──► client
//! ```
//!
//! The producer runs until the backend is done, whatever happens on the wire.
//! If the client goes away, the writer logs it once, drops its encoder and
//! drains the rest of the queue without encoding, so production is never
//! blocked. Once the producer returns, the
//! queue closes, the writer is joined, and a backend error (if any) becomes
//! the terminal status of the stream.
//!
//! # DoPut
//!
//! Inbound `FlightData` is decoded chunk by chunk. Each batch goes to
//! `backend.do_put` and is dropped right after; each chunk carrying
//! `app_metadata` is echoed back as a `PutResult`. A cancelled or unavailable
//! transport ends the pipeline quietly, and any other chunk error is logged
//! and skipped.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use arrow_array::RecordBatch;
use arrow_flight::decode::{DecodedFlightData, DecodedPayload, FlightDataDecoder};
use arrow_flight::encode::FlightDataEncoderBuilder;
use arrow_flight::error::FlightError;
use arrow_flight::{FlightData, FlightDescriptor, PutResult};
use arrow_schema::SchemaRef;
use futures::{Stream, StreamExt, TryStreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::{ReceiverStream, UnboundedReceiverStream};
use tonic::{Code, Status};
use tracing::{debug, error, info, warn};

use super::backend::{FlightBackend, Table};
use crate::Error;

/// Leading path segments of every table descriptor
pub const PATH_PREFIX: [&str; 2] = ["cloudquery", "arrowflight"];

/// Outbound messages buffered per call before the writer waits on the client
const OUTBOUND_BUFFER: usize = 16;

type StatusResult<T> = std::result::Result<T, Status>;

/// `cloudquery/arrowflight/<table>`
pub fn table_descriptor(table_name: &str) -> FlightDescriptor {
    FlightDescriptor::new_path(vec![
        PATH_PREFIX[0].to_string(),
        PATH_PREFIX[1].to_string(),
        table_name.to_string(),
    ])
}

/// Cancelled or unavailable: the client hung up rather than sent bad data.
pub fn is_transient(status: &Status) -> bool {
    matches!(status.code(), Code::Cancelled | Code::Unavailable)
}

/// `None` for a transient transport error, which ends a DoPut quietly.
fn classify_chunk_error(err: FlightError) -> Option<Error> {
    match &err {
        FlightError::Tonic(status) if is_transient(status) => None,
        _ => Some(Error::InvalidArgument(format!("malformed DoPut chunk: {err}"))),
    }
}

// =============================================================================
// DOGET
// =============================================================================

/// Stream every batch the backend produces for `table`, framed by its schema
/// and tagged with `descriptor`.
pub fn stream_table<B: FlightBackend>(
    backend: Arc<B>,
    table: Table,
    descriptor: FlightDescriptor,
) -> ReceiverStream<StatusResult<FlightData>> {
    let (out_tx, out_rx) = mpsc::channel(OUTBOUND_BUFFER);

    tokio::spawn(async move {
        let (sink, handoff) = mpsc::unbounded_channel();
        let writer = tokio::spawn(write_batches(
            table.name.clone(),
            table.schema.clone(),
            descriptor,
            handoff,
            out_tx.clone(),
        ));

        // The sink moves into the backend and is dropped when it returns,
        // which closes the handoff queue for the writer.
        let produced = backend.do_get(&table, sink).await;

        match writer.await {
            Ok(summary) => debug!(
                table = %table.name,
                sent = summary.sent,
                encoded = summary.encoded,
                discarded = summary.discarded,
                "DoGet writer finished"
            ),
            Err(e) => error!(table = %table.name, error = %e, "DoGet writer task failed"),
        }

        if let Err(source) = produced {
            let err = Error::Backend {
                operation: "read table",
                source,
            };
            error!(table = %table.name, error = %err, "DoGet production failed");
            let _ = out_tx.send(Err(err.into())).await;
        }
    });

    ReceiverStream::new(out_rx)
}

/// Counters for one DoGet writer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct WriteSummary {
    /// Messages delivered to the client
    sent: usize,
    /// Batches pulled into the encoder
    encoded: usize,
    /// Batches dropped unencoded after the client went away
    discarded: usize,
}

/// Encode the handoff queue onto the wire.
///
/// Batches are forwarded from `handoff` into the encoder one at a time. Once
/// a send to the client fails the encoder is dropped and the rest of the
/// handoff is drained without encoding.
async fn write_batches(
    table_name: String,
    schema: SchemaRef,
    descriptor: FlightDescriptor,
    mut handoff: mpsc::UnboundedReceiver<RecordBatch>,
    out: mpsc::Sender<StatusResult<FlightData>>,
) -> WriteSummary {
    let encoded = Arc::new(AtomicUsize::new(0));
    let (feed_tx, feed_rx) = mpsc::unbounded_channel();

    let counter = Arc::clone(&encoded);
    let mut encoder = FlightDataEncoderBuilder::new()
        .with_schema(schema)
        .with_flight_descriptor(Some(descriptor))
        .build(UnboundedReceiverStream::new(feed_rx).map(move |batch| {
            counter.fetch_add(1, Ordering::Relaxed);
            Ok(batch)
        }));

    let mut feed = Some(feed_tx);
    let mut summary = WriteSummary::default();

    loop {
        tokio::select! {
            biased;

            item = encoder.next() => {
                let Some(item) = item else { break };
                let data = match item {
                    Ok(data) => data,
                    Err(e) => {
                        error!(
                            table = %table_name,
                            error = %e,
                            "failed to write during DoGet"
                        );
                        continue;
                    }
                };
                if out.send(Ok(data)).await.is_err() {
                    warn!(
                        table = %table_name,
                        "client went away during DoGet, discarding remaining batches"
                    );
                    break;
                }
                summary.sent += 1;
            }

            batch = handoff.recv(), if feed.is_some() => match (batch, &feed) {
                (Some(batch), Some(tx)) => {
                    let _ = tx.send(batch);
                }
                // producer finished: close the encoder input
                _ => feed = None,
            },
        }
    }

    drop(encoder);
    summary.encoded = encoded.load(Ordering::Relaxed);
    while handoff.recv().await.is_some() {
        summary.discarded += 1;
    }

    summary
}

// =============================================================================
// DOPUT
// =============================================================================

/// Counters for one DoPut call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PutSummary {
    pub ingested: usize,
    pub failed: usize,
    pub acked: usize,
    pub chunk_errors: usize,
}

/// Feed an inbound FlightData stream to the backend, echoing app metadata.
pub fn ingest_stream<B, S>(backend: Arc<B>, inbound: S) -> ReceiverStream<StatusResult<PutResult>>
where
    B: FlightBackend,
    S: Stream<Item = StatusResult<FlightData>> + Send + 'static,
{
    let (ack_tx, ack_rx) = mpsc::channel(OUTBOUND_BUFFER);

    tokio::spawn(async move {
        let summary = ingest(backend.as_ref(), inbound, &ack_tx).await;
        info!(
            ingested = summary.ingested,
            failed = summary.failed,
            acked = summary.acked,
            chunk_errors = summary.chunk_errors,
            "DoPut finished"
        );
    });

    ReceiverStream::new(ack_rx)
}

async fn ingest<B, S>(
    backend: &B,
    inbound: S,
    acks: &mpsc::Sender<StatusResult<PutResult>>,
) -> PutSummary
where
    B: FlightBackend,
    S: Stream<Item = StatusResult<FlightData>> + Send + 'static,
{
    let mut decoder = FlightDataDecoder::new(inbound.map_err(FlightError::from));
    let mut summary = PutSummary::default();

    while let Some(chunk) = decoder.next().await {
        let DecodedFlightData { inner, payload } = match chunk {
            Ok(decoded) => decoded,
            Err(e) => match classify_chunk_error(e) {
                None => {
                    debug!("DoPut stream closed by client");
                    break;
                }
                Some(err) => {
                    error!(error = %err, "failed to handle chunk");
                    summary.chunk_errors += 1;
                    continue;
                }
            },
        };

        if let DecodedPayload::RecordBatch(batch) = payload {
            match backend.do_put(&batch).await {
                Ok(()) => summary.ingested += 1,
                Err(e) => {
                    error!(rows = batch.num_rows(), error = %e, "failed to do put");
                    summary.failed += 1;
                }
            }
            drop(batch);
        }

        if !inner.app_metadata.is_empty() {
            let ack = PutResult {
                app_metadata: inner.app_metadata,
            };
            match acks.send(Ok(ack)).await {
                Ok(()) => summary.acked += 1,
                Err(_) => debug!("client stopped reading DoPut acks"),
            }
        }
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flight::backend::{BackendError, BatchSink};
    use arrow_array::{ArrayRef, Int64Array};
    use arrow_flight::decode::FlightRecordBatchStream;
    use arrow_flight::utils::batches_to_flight_data;
    use arrow_schema::{DataType, Field, Schema};
    use async_trait::async_trait;
    use bytes::Bytes;
    use futures::stream;
    use parking_lot::Mutex;
    use std::time::Duration;
    use tokio::sync::Notify;

    fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![Field::new("n", DataType::Int64, false)]))
    }

    fn batch(values: &[i64]) -> RecordBatch {
        let column = Arc::new(Int64Array::from(values.to_vec())) as ArrayRef;
        RecordBatch::try_new(schema(), vec![column]).unwrap()
    }

    /// Emits `batches` on DoGet (then fails if `fail_after` is set) and
    /// records every DoPut batch.
    #[derive(Default)]
    struct ScriptedBackend {
        batches: Vec<RecordBatch>,
        fail_after: bool,
        produced: Mutex<usize>,
        finished: Notify,
        ingested: Mutex<Vec<RecordBatch>>,
        reject_puts: bool,
    }

    #[async_trait]
    impl FlightBackend for ScriptedBackend {
        async fn lookup_table(&self, table_name: &str) -> std::result::Result<Table, BackendError> {
            Ok(Table::new(table_name, schema()))
        }

        async fn do_get(
            &self,
            _table: &Table,
            sink: BatchSink,
        ) -> std::result::Result<(), BackendError> {
            for batch in &self.batches {
                let _ = sink.send(batch.clone());
                *self.produced.lock() += 1;
                tokio::task::yield_now().await;
            }
            self.finished.notify_one();
            if self.fail_after {
                return Err("source exhausted".into());
            }
            Ok(())
        }

        async fn do_put(&self, batch: &RecordBatch) -> std::result::Result<(), BackendError> {
            self.ingested.lock().push(batch.clone());
            if self.reject_puts {
                return Err("read only".into());
            }
            Ok(())
        }
    }

    async fn decode_all(data: Vec<FlightData>) -> Vec<RecordBatch> {
        FlightRecordBatchStream::new_from_flight_data(stream::iter(data.into_iter().map(Ok)))
            .try_collect()
            .await
            .unwrap()
    }

    fn put_frames(batches: Vec<RecordBatch>) -> Vec<FlightData> {
        batches_to_flight_data(&schema(), batches).unwrap()
    }

    #[tokio::test]
    async fn test_do_get_streams_batches_in_order() {
        let batches = vec![batch(&[1, 2]), batch(&[3]), batch(&[4, 5, 6])];
        let backend = Arc::new(ScriptedBackend {
            batches: batches.clone(),
            ..Default::default()
        });
        let table = Table::new("events", schema());

        let frames: Vec<FlightData> = stream_table(backend, table, table_descriptor("events"))
            .try_collect()
            .await
            .unwrap();

        let descriptor = frames[0].flight_descriptor.clone().unwrap();
        assert_eq!(descriptor.path, vec!["cloudquery", "arrowflight", "events"]);
        assert_eq!(decode_all(frames).await, batches);
    }

    #[tokio::test]
    async fn test_do_get_empty_table_still_sends_schema() {
        let backend = Arc::new(ScriptedBackend::default());
        let table = Table::new("events", schema());
        let frames: Vec<FlightData> = stream_table(backend, table, table_descriptor("events"))
            .try_collect()
            .await
            .unwrap();

        assert_eq!(frames.len(), 1);
        let mut decoded = FlightRecordBatchStream::new_from_flight_data(stream::iter(
            frames.into_iter().map(Ok),
        ));
        assert!(decoded.next().await.is_none());
        let decoded_schema = decoded.schema().map(|s| s.as_ref().clone());
        assert_eq!(decoded_schema, Some(schema().as_ref().clone()));
    }

    #[tokio::test]
    async fn test_do_get_backend_error_is_terminal() {
        let backend = Arc::new(ScriptedBackend {
            batches: vec![batch(&[1])],
            fail_after: true,
            ..Default::default()
        });
        let table = Table::new("events", schema());
        let items: Vec<StatusResult<FlightData>> =
            stream_table(backend, table, table_descriptor("events")).collect().await;

        let (last, delivered) = items.split_last().unwrap();
        assert!(delivered.iter().all(|item| item.is_ok()));
        let status = last.as_ref().unwrap_err();
        assert_eq!(status.code(), Code::Internal);
        assert!(status.message().contains("read table"));
    }

    #[tokio::test]
    async fn test_do_get_production_survives_client_hangup() {
        let batches: Vec<RecordBatch> = (0..64).map(|i| batch(&[i])).collect();
        let backend = Arc::new(ScriptedBackend {
            batches,
            ..Default::default()
        });

        let table = Table::new("events", schema());
        let stream = stream_table(backend.clone(), table, table_descriptor("events"));
        drop(stream);

        tokio::time::timeout(Duration::from_secs(5), backend.finished.notified())
            .await
            .expect("backend production should run to completion");
        assert_eq!(*backend.produced.lock(), 64);
    }

    #[tokio::test]
    async fn test_writer_encodes_every_batch_for_a_live_client() {
        let (sink, handoff) = mpsc::unbounded_channel();
        for i in 0..3 {
            sink.send(batch(&[i])).unwrap();
        }
        drop(sink);

        let (out, mut out_rx) = mpsc::channel(8);
        let summary = write_batches(
            "events".into(),
            schema(),
            table_descriptor("events"),
            handoff,
            out,
        )
        .await;

        let mut delivered = 0;
        while out_rx.recv().await.is_some() {
            delivered += 1;
        }
        assert_eq!(summary.encoded, 3);
        assert_eq!(summary.discarded, 0);
        assert_eq!(summary.sent, delivered);
        // schema message plus one per batch
        assert_eq!(delivered, 4);
    }

    #[tokio::test]
    async fn test_writer_stops_encoding_after_hangup() {
        let (sink, handoff) = mpsc::unbounded_channel();
        for i in 0..64 {
            sink.send(batch(&[i])).unwrap();
        }
        drop(sink);

        let (out, out_rx) = mpsc::channel(8);
        drop(out_rx);
        let summary = write_batches(
            "events".into(),
            schema(),
            table_descriptor("events"),
            handoff,
            out,
        )
        .await;

        assert_eq!(summary.sent, 0);
        assert!(summary.encoded <= 1, "encoded {} batches after hangup", summary.encoded);
        assert_eq!(summary.encoded + summary.discarded, 64);
    }

    #[tokio::test]
    async fn test_do_put_forwards_batches_and_acks_metadata() {
        let backend = Arc::new(ScriptedBackend::default());
        let batches = vec![batch(&[1]), batch(&[2]), batch(&[3])];
        let mut frames = put_frames(batches.clone());
        let last = frames.len() - 1;
        frames[last].app_metadata = Bytes::from_static(b"chunk3");

        let inbound = stream::iter(frames.into_iter().map(Ok));
        let acks: Vec<PutResult> = ingest_stream(backend.clone(), inbound)
            .try_collect()
            .await
            .unwrap();

        assert_eq!(*backend.ingested.lock(), batches);
        assert_eq!(acks.len(), 1);
        assert_eq!(acks[0].app_metadata.as_ref(), b"chunk3");
    }

    #[tokio::test]
    async fn test_do_put_cancel_ends_quietly() {
        let backend = Arc::new(ScriptedBackend::default());
        let frames = put_frames(vec![batch(&[1]), batch(&[2])]);
        let inbound = vec![
            Ok(frames[0].clone()),
            Ok(frames[1].clone()),
            Err(Status::cancelled("client canceled")),
            Ok(frames[2].clone()),
        ];

        let acks: Vec<StatusResult<PutResult>> =
            ingest_stream(backend.clone(), stream::iter(inbound)).collect().await;

        assert!(acks.is_empty());
        assert_eq!(*backend.ingested.lock(), vec![batch(&[1])]);
    }

    #[tokio::test]
    async fn test_do_put_skips_bad_chunks() {
        let backend = Arc::new(ScriptedBackend::default());
        let frames = put_frames(vec![batch(&[1]), batch(&[2])]);
        let inbound = vec![
            Ok(frames[0].clone()),
            Ok(frames[1].clone()),
            Err(Status::internal("corrupt frame")),
            Ok(frames[2].clone()),
        ];

        let (tx, mut rx) = mpsc::channel(4);
        let summary = ingest(backend.as_ref(), stream::iter(inbound), &tx).await;
        drop(tx);

        assert!(rx.recv().await.is_none());
        assert_eq!(summary.chunk_errors, 1);
        assert_eq!(summary.ingested, 2);
        assert_eq!(*backend.ingested.lock(), vec![batch(&[1]), batch(&[2])]);
    }

    #[tokio::test]
    async fn test_do_put_backend_failure_does_not_stop_stream() {
        let backend = Arc::new(ScriptedBackend {
            reject_puts: true,
            ..Default::default()
        });
        let mut frames = put_frames(vec![batch(&[1]), batch(&[2])]);
        frames[1].app_metadata = Bytes::from_static(b"chunk1");

        let (tx, mut rx) = mpsc::channel(4);
        let inbound = stream::iter(frames.into_iter().map(Ok));
        let summary = ingest(backend.as_ref(), inbound, &tx).await;
        drop(tx);

        let expected = PutSummary {
            ingested: 0,
            failed: 2,
            acked: 1,
            chunk_errors: 0,
        };
        assert_eq!(summary, expected);
        let ack = rx.recv().await.unwrap().unwrap();
        assert_eq!(ack.app_metadata.as_ref(), b"chunk1");
    }

    #[test]
    fn test_chunk_error_classification() {
        assert!(classify_chunk_error(FlightError::Tonic(Status::cancelled("gone"))).is_none());
        assert!(classify_chunk_error(FlightError::Tonic(Status::unavailable("reset"))).is_none());

        let err = classify_chunk_error(FlightError::Tonic(Status::internal("corrupt"))).unwrap();
        assert!(matches!(err, Error::InvalidArgument(_)));

        let err = classify_chunk_error(FlightError::ProtocolError("no schema".into())).unwrap();
        assert!(err.to_string().contains("malformed DoPut chunk"));
        assert_eq!(Status::from(err).code(), Code::InvalidArgument);
    }

    #[test]
    fn test_transient_codes() {
        assert!(is_transient(&Status::cancelled("")));
        assert!(is_transient(&Status::unavailable("")));
        assert!(!is_transient(&Status::internal("")));
        assert!(!is_transient(&Status::invalid_argument("")));
    }
}
