#[cfg(test)]
mod tests {
    use crate::sink_service::SinkServiceImpl;
    use crate::tallystream::{EngineOptions, JobError, ResultSink, Tallystream};
    use async_trait::async_trait;
    use mockall::*;
    use std::io::Write;
    use std::sync::{Arc, Mutex};
    use tallystream_core::aggregation::{GroupKey, Row};
    use tallystream_core::records::{decode_record_batch, FinalRecord};
    use tallystream_core::source::{
        CsvOptions, CsvRecordSource, FieldMapping, RecordSource, SourceError,
    };
    use tallystream_core::storage::{InMemoryBackend, StorageBackend, StorageError};

    type ChunkResult = Result<Option<Vec<Row>>, SourceError>;

    mock! {
        pub Source {}
        impl RecordSource for Source {
            fn next_chunk(&mut self) -> Result<Option<Vec<Row>>, SourceError>;
        }
    }

    mock! {
        pub Sink {}
        #[async_trait]
        impl ResultSink for Sink {
            async fn write_records(
                &self,
                request_id: &str,
                records: Vec<FinalRecord>,
            ) -> Result<usize, StorageError>;
        }
    }

    fn row(first: &str, second: &str, value: f64, category: &str) -> Row {
        Row::new(GroupKey::new(first, second), value, category)
    }

    /// A source that replays the given results, then reports exhaustion.
    fn scripted_source(results: Vec<ChunkResult>) -> MockSource {
        let mut results = results.into_iter();
        let mut source = MockSource::new();
        source
            .expect_next_chunk()
            .returning(move || results.next().unwrap_or(Ok(None)));
        source
    }

    /// A sink that keeps every record it is handed.
    fn capturing_sink(captured: Arc<Mutex<Vec<(String, FinalRecord)>>>) -> MockSink {
        let mut sink = MockSink::new();
        sink.expect_write_records()
            .times(1)
            .returning(move |request_id, records| {
                let count = records.len();
                let mut captured = captured.lock().unwrap();
                captured.extend(records.into_iter().map(|r| (request_id.to_string(), r)));
                Ok(count)
            });
        sink
    }

    fn invalid_numeric() -> SourceError {
        SourceError::InvalidNumeric {
            line: 3,
            field: "Recovery Time".to_string(),
            value: "soon".to_string(),
        }
    }

    /// Many groups and categories spread over many small chunks.
    fn synthetic_chunks(rows: usize, chunk_size: usize) -> Vec<ChunkResult> {
        let all: Vec<Row> = (0..rows)
            .map(|i| {
                row(
                    &format!("H{}", i % 7),
                    &format!("D{}", i % 3),
                    (i % 41) as f64 * 0.5,
                    &format!("Tx{}", (i * 13) % 5),
                )
            })
            .collect();
        all.chunks(chunk_size)
            .map(|chunk| Ok(Some(chunk.to_vec())))
            .collect()
    }

    async fn run_capturing(
        results: Vec<ChunkResult>,
        options: EngineOptions,
    ) -> Vec<FinalRecord> {
        let captured = Arc::new(Mutex::new(Vec::new()));
        let job = Tallystream::with_options(
            Box::new(scripted_source(results)),
            Box::new(capturing_sink(captured.clone())),
            options,
        );
        job.run_job("req-1").await.unwrap();
        let captured = captured.lock().unwrap();
        captured.iter().map(|(_, record)| record.clone()).collect()
    }

    #[tokio::test]
    async fn test_job_merges_chunks_before_writing() {
        let captured = Arc::new(Mutex::new(Vec::new()));
        let source = scripted_source(vec![
            Ok(Some(vec![
                row("H1", "D1", 10.0, "TxA"),
                row("H1", "D1", 20.0, "TxA"),
            ])),
            Ok(Some(vec![row("H1", "D1", 30.0, "TxB")])),
        ]);

        let job = Tallystream::new(Box::new(source), Box::new(capturing_sink(captured.clone())));
        let summary = job.run_job("req-1").await.unwrap();

        assert_eq!(summary.request_id, "req-1");
        assert_eq!(summary.rows_processed, 3);
        assert_eq!(summary.chunks_processed, 2);
        assert_eq!(summary.groups, 1);
        assert_eq!(summary.records_written, 1);

        let captured = captured.lock().unwrap();
        assert_eq!(captured.len(), 1);
        let (request_id, record) = &captured[0];
        assert_eq!(request_id, "req-1");
        assert_eq!(record.group, GroupKey::new("H1", "D1"));
        assert_eq!(record.average_value, 20.0);
        assert_eq!(record.dominant_category, "TxA");
    }

    #[tokio::test]
    async fn test_mode_uses_global_frequencies() {
        // TxA leads the first chunk but TxB wins overall.
        let records = run_capturing(
            vec![
                Ok(Some(vec![
                    row("H1", "D1", 1.0, "TxA"),
                    row("H1", "D1", 1.0, "TxA"),
                    row("H1", "D1", 1.0, "TxA"),
                    row("H1", "D1", 1.0, "TxB"),
                ])),
                Ok(Some(vec![
                    row("H1", "D1", 1.0, "TxB"),
                    row("H1", "D1", 1.0, "TxB"),
                    row("H1", "D1", 1.0, "TxB"),
                    row("H1", "D1", 1.0, "TxC"),
                    row("H1", "D1", 1.0, "TxC"),
                    row("H1", "D1", 1.0, "TxC"),
                ])),
            ],
            EngineOptions::default(),
        )
        .await;

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].dominant_category, "TxB");
    }

    #[tokio::test]
    async fn test_mode_tie_prefers_smallest_category() {
        let records = run_capturing(
            vec![
                Ok(Some(vec![row("H1", "D1", 1.0, "TxZ"), row("H1", "D1", 1.0, "TxM")])),
                Ok(Some(vec![row("H1", "D1", 1.0, "TxM"), row("H1", "D1", 1.0, "TxZ")])),
            ],
            EngineOptions::default(),
        )
        .await;

        assert_eq!(records[0].dominant_category, "TxM");
    }

    #[tokio::test]
    async fn test_empty_source_writes_nothing() {
        let source = scripted_source(Vec::new());
        let mut sink = MockSink::new();
        sink.expect_write_records().never();

        let job = Tallystream::new(Box::new(source), Box::new(sink));
        let summary = job.run_job("req-empty").await.unwrap();

        assert_eq!(summary.rows_processed, 0);
        assert_eq!(summary.chunks_processed, 0);
        assert_eq!(summary.groups, 0);
        assert_eq!(summary.records_written, 0);
    }

    #[tokio::test]
    async fn test_source_error_aborts_without_writing() {
        let source = scripted_source(vec![
            Ok(Some(vec![row("H1", "D1", 10.0, "TxA")])),
            Err(invalid_numeric()),
            Ok(Some(vec![row("H1", "D1", 20.0, "TxA")])),
        ]);
        let mut sink = MockSink::new();
        sink.expect_write_records().never();

        let job = Tallystream::new(Box::new(source), Box::new(sink));
        let result = job.run_job("req-1").await;

        assert!(matches!(
            result,
            Err(JobError::Source(SourceError::InvalidNumeric { line: 3, .. }))
        ));
    }

    #[tokio::test]
    async fn test_sink_error_is_reported() {
        let source = scripted_source(vec![Ok(Some(vec![row("H1", "D1", 10.0, "TxA")]))]);
        let mut sink = MockSink::new();
        sink.expect_write_records()
            .times(1)
            .returning(|_, _| Err(StorageError::Database("table is read-only".to_string())));

        let job = Tallystream::new(Box::new(source), Box::new(sink));
        let result = job.run_job("req-1").await;

        assert!(matches!(result, Err(JobError::Sink(StorageError::Database(_)))));
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("table is read-only"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_pipelined_matches_sequential() {
        let sequential = run_capturing(synthetic_chunks(1_000, 37), EngineOptions::default()).await;
        let pipelined = run_capturing(
            synthetic_chunks(1_000, 37),
            EngineOptions {
                pipelined: true,
                queue_depth: 2,
            },
        )
        .await;

        assert_eq!(sequential.len(), 21);
        assert_eq!(sequential, pipelined);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_pipelined_source_error_aborts() {
        let source = scripted_source(vec![
            Ok(Some(vec![row("H1", "D1", 10.0, "TxA")])),
            Err(invalid_numeric()),
        ]);
        let mut sink = MockSink::new();
        sink.expect_write_records().never();

        let job = Tallystream::with_options(
            Box::new(source),
            Box::new(sink),
            EngineOptions {
                pipelined: true,
                queue_depth: 1,
            },
        );

        assert!(matches!(
            job.run_job("req-1").await,
            Err(JobError::Source(_))
        ));
    }

    #[tokio::test]
    async fn test_csv_to_store() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "Hospital,Diagnosis,Treatment,Recovery Time").unwrap();
        writeln!(file, "H1,D1,TxA,10").unwrap();
        writeln!(file, "H2,D1,TxB,4").unwrap();
        writeln!(file, "H1,D1,TxA,20").unwrap();
        writeln!(file, "H1,D1,TxB,30").unwrap();
        writeln!(file, "H1,D2,TxC,5").unwrap();
        file.flush().unwrap();

        let reader = std::fs::File::open(file.path()).unwrap();
        let source =
            CsvRecordSource::new(reader, FieldMapping::default(), CsvOptions::default(), 2)
                .unwrap();

        let backend = Arc::new(InMemoryBackend::new());
        let sink = SinkServiceImpl::with_backend(backend.clone(), 25);

        let job = Tallystream::new(Box::new(source), Box::new(sink));
        let summary = job.run_job("req-csv").await.unwrap();
        assert_eq!(summary.rows_processed, 5);
        assert_eq!(summary.chunks_processed, 3);
        assert_eq!(summary.records_written, 3);

        let items = decode_record_batch(&backend.query_partition("req-csv").await.unwrap()).unwrap();
        let keys: Vec<&str> = items.iter().map(|item| item.sort_key.as_str()).collect();
        assert_eq!(
            keys,
            vec![
                "#diagnosis#D1#hospital#H1",
                "#diagnosis#D1#hospital#H2",
                "#diagnosis#D2#hospital#H1",
            ]
        );
        assert_eq!(items[0].average_value, 20.0);
        assert_eq!(items[0].dominant_category, "TxA");
        assert_eq!(items[1].average_value, 4.0);
        assert_eq!(items[2].dominant_category, "TxC");
        assert!(items.iter().all(|item| item.partition_key == "req-csv"));
    }
}
