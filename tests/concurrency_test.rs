//! Concurrency scenarios: publish-then-visible, horizon monotonicity,
//! reader agreement.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};

use lodestone::query::{self, Plan, PlaceholderGroup};
use lodestone::schema::{DataType, Schema, SchemaBuilder};
use lodestone::segment::{GrowingSegment, Segment};
use lodestone::{SegmentConfig, Timestamp};

fn pk_vec_schema() -> Arc<Schema> {
    Arc::new(
        SchemaBuilder::new()
            .add_field("pk", DataType::Int64)
            .add_field("vec", DataType::FloatVector { dim: 4 })
            .primary_key("pk")
            .build()
            .unwrap(),
    )
}

fn encode_row(pk: i64, vec: [f32; 4]) -> Vec<u8> {
    let mut blob = vec![0u8; 24];
    LittleEndian::write_i64(&mut blob[0..8], pk);
    LittleEndian::write_f32_into(&vec, &mut blob[8..24]);
    blob
}

#[test]
fn test_published_rows_become_visible() {
    let schema = pk_vec_schema();
    let segment = Arc::new(GrowingSegment::new(
        Arc::clone(&schema),
        SegmentConfig::with_size_per_chunk(64),
    ));

    let writers: Vec<_> = (0..4)
        .map(|w| {
            let segment = Arc::clone(&segment);
            std::thread::spawn(move || {
                for i in 0..50 {
                    let pk = w * 1000 + i;
                    // Interleaved writers; the read below sits above every
                    // timestamp, so barrier arithmetic stays exact.
                    let ts = (pk + 1) as Timestamp;
                    let begin = segment.pre_insert(1).unwrap();
                    segment
                        .insert(begin, &[pk], &[ts], &encode_row(pk, [pk as f32, 0.0, 0.0, 0.0]))
                        .unwrap();
                }
            })
        })
        .collect();

    let stop = Arc::new(AtomicBool::new(false));
    let watcher = {
        let segment = Arc::clone(&segment);
        let stop = Arc::clone(&stop);
        std::thread::spawn(move || {
            let mut last = 0;
            while !stop.load(Ordering::Relaxed) {
                let now = segment.row_count();
                assert!(now >= last, "row count went backwards: {last} -> {now}");
                last = now;
            }
        })
    };

    for writer in writers {
        writer.join().unwrap();
    }
    stop.store(true, Ordering::Relaxed);
    watcher.join().unwrap();

    assert_eq!(segment.row_count(), 200);

    // Every published row is retrievable at a timestamp above all writes.
    let read_ts = 10_000;
    for w in 0..4i64 {
        for i in (0..50).step_by(7) {
            let offsets = segment.lookup_primary_keys(&[w * 1000 + i], read_ts).unwrap();
            assert_ne!(offsets[0], -1, "pk {} not visible", w * 1000 + i);
        }
    }
}

#[test]
fn test_concurrent_readers_agree() {
    let schema = pk_vec_schema();
    let segment = Arc::new(GrowingSegment::new(
        Arc::clone(&schema),
        SegmentConfig::with_size_per_chunk(32),
    ));

    for i in 0..100i64 {
        let begin = segment.pre_insert(1).unwrap();
        segment
            .insert(
                begin,
                &[i],
                &[(i + 1) as Timestamp],
                &encode_row(i, [i as f32, 0.0, 0.0, 0.0]),
            )
            .unwrap();
    }

    let plan = Arc::new(
        Plan::from_dsl(
            Arc::clone(&schema),
            r#"{"vector": {"field": "vec", "metric": "L2", "topk": 7}}"#,
        )
        .unwrap(),
    );

    // A writer keeps appending at higher timestamps while readers query a
    // fixed T_r; their answers must not depend on the concurrent inserts.
    let writer = {
        let segment = Arc::clone(&segment);
        std::thread::spawn(move || {
            for i in 100..300i64 {
                let begin = segment.pre_insert(1).unwrap();
                segment
                    .insert(
                        begin,
                        &[i],
                        &[(i + 1) as Timestamp],
                        &encode_row(i, [0.25, 0.0, 0.0, 0.0]),
                    )
                    .unwrap();
            }
        })
    };

    let read_ts = 101;
    let readers: Vec<_> = (0..4)
        .map(|_| {
            let segment = Arc::clone(&segment);
            let plan = Arc::clone(&plan);
            std::thread::spawn(move || {
                let queries =
                    PlaceholderGroup::from_float_queries(4, &[vec![42.0, 0.0, 0.0, 0.0]])
                        .unwrap();
                (0..20)
                    .map(|_| {
                        let result =
                            query::search(segment.as_ref(), &plan, &queries, read_ts).unwrap();
                        (result.seg_offsets.clone(), result.distances.clone())
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut answers = Vec::new();
    for reader in readers {
        answers.extend(reader.join().unwrap());
    }
    writer.join().unwrap();

    for answer in &answers {
        assert_eq!(answer, &answers[0]);
    }
    assert_eq!(answers[0].0[0], 42);
}

#[test]
fn test_unpublished_reservation_is_invisible() {
    let schema = pk_vec_schema();
    let segment = GrowingSegment::new(Arc::clone(&schema), SegmentConfig::default());

    let begin = segment.pre_insert(2).unwrap();
    segment
        .insert(begin, &[1, 2], &[1, 2], &[encode_row(1, [0.0; 4]), encode_row(2, [0.0; 4])].concat())
        .unwrap();

    // A second reservation that never publishes holds the horizon only
    // for rows after it.
    let _hole = segment.pre_insert(3).unwrap();
    let tail = segment.pre_insert(1).unwrap();
    segment
        .insert(tail, &[9], &[9], &encode_row(9, [0.0; 4]))
        .unwrap();

    // Rows behind the hole stay unpublished.
    assert_eq!(segment.row_count(), 2);
    assert_eq!(segment.visible_row_count(100), 2);
    assert_eq!(segment.lookup_primary_keys(&[9], 100).unwrap(), vec![-1]);
}
