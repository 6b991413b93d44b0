//! Predicate + vector scenarios across both segment kinds, and binary
//! metrics.

use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};

use lodestone::query::{self, Plan, PlaceholderGroup};
use lodestone::schema::{DataType, Schema, SchemaBuilder};
use lodestone::segment::{GrowingSegment, Segment};
use lodestone::{SegmentConfig, Timestamp};

fn tagged_schema() -> Arc<Schema> {
    Arc::new(
        SchemaBuilder::new()
            .add_field("pk", DataType::Int64)
            .add_field("tag", DataType::Int64)
            .add_field("score", DataType::Float)
            .add_field("vec", DataType::FloatVector { dim: 4 })
            .primary_key("pk")
            .build()
            .unwrap(),
    )
}

/// 100 rows: pk = i, tag = i % 2, score = i as f32, vec = [i, 0, 0, 0].
fn tagged_segment(schema: &Arc<Schema>) -> GrowingSegment {
    let segment = GrowingSegment::new(Arc::clone(schema), SegmentConfig::default());
    let count = 100usize;
    let stride = schema.total_sizeof();
    let mut blob = vec![0u8; count * stride];
    let mut uids = Vec::with_capacity(count);
    let mut timestamps: Vec<Timestamp> = Vec::with_capacity(count);
    for i in 0..count {
        let row = &mut blob[i * stride..(i + 1) * stride];
        LittleEndian::write_i64(&mut row[0..8], i as i64);
        LittleEndian::write_i64(&mut row[8..16], (i % 2) as i64);
        LittleEndian::write_f32(&mut row[16..20], i as f32);
        LittleEndian::write_f32_into(&[i as f32, 0.0, 0.0, 0.0], &mut row[20..36]);
        uids.push(i as i64);
        timestamps.push(i as u64 + 1);
    }
    let begin = segment.pre_insert(count as i64).unwrap();
    segment.insert(begin, &uids, &timestamps, &blob).unwrap();
    segment
}

fn query_at(x: f32) -> PlaceholderGroup {
    PlaceholderGroup::from_float_queries(4, &[vec![x, 0.0, 0.0, 0.0]]).unwrap()
}

#[test]
fn test_predicate_and_vector() {
    let schema = tagged_schema();
    let segment = tagged_segment(&schema);

    let plan = Plan::from_dsl(
        Arc::clone(&schema),
        r#"{
            "predicate": {"range": {"field": "tag", "eq": 1}},
            "vector": {"field": "vec", "metric": "L2", "topk": 5}
        }"#,
    )
    .unwrap();

    let result = query::search(&segment, &plan, &query_at(50.0), 1000).unwrap();
    assert!(result.seg_offsets.iter().all(|&o| o >= 0));

    let tag_field = schema.offset_of_name("tag").unwrap();
    let tags = segment
        .bulk_subscript(tag_field, &result.seg_offsets)
        .unwrap();
    assert_eq!(tags.as_int64().unwrap(), &[1, 1, 1, 1, 1]);
    // Nearest odd rows to 50: 49 and 51 tie, then 47/53, best-first.
    assert_eq!(result.seg_offsets[0], 49);
    assert_eq!(result.seg_offsets[1], 51);
}

#[test]
fn test_all_rows_filtered_out() {
    let schema = tagged_schema();
    let segment = tagged_segment(&schema);

    let plan = Plan::from_dsl(
        Arc::clone(&schema),
        r#"{
            "predicate": {"range": {"field": "tag", "eq": 999}},
            "vector": {"field": "vec", "metric": "L2", "topk": 3}
        }"#,
    )
    .unwrap();

    let result = query::search(&segment, &plan, &query_at(0.0), 1000).unwrap();
    assert_eq!(result.seg_offsets, vec![-1, -1, -1]);
    assert!(result.distances.iter().all(|d| *d == f32::INFINITY));
}

#[test]
fn test_predicates_match_on_sealed_via_scalar_index() {
    let schema = tagged_schema();
    let growing = tagged_segment(&schema);
    let sealed = growing.seal().unwrap();

    let dsl = r#"{
        "predicate": {"and": [
            {"range": {"field": "tag", "eq": 0}},
            {"range": {"field": "score", "ge": 10.0, "lt": 30.0}}
        ]},
        "vector": {"field": "vec", "metric": "L2", "topk": 4}
    }"#;
    let plan = Plan::from_dsl(Arc::clone(&schema), dsl).unwrap();

    // The sealed side answers through its scalar indexes, the growing
    // side by scanning; both see rows {10, 12, ..., 28}.
    let from_growing = query::search(&growing, &plan, &query_at(20.0), 1000).unwrap();
    let from_sealed = query::search(&sealed, &plan, &query_at(20.0), 1000).unwrap();
    assert_eq!(from_growing.seg_offsets, vec![20, 18, 22, 16]);
    assert_eq!(from_growing.seg_offsets, from_sealed.seg_offsets);
    assert_eq!(from_growing.distances, from_sealed.distances);
}

#[test]
fn test_term_or_and_not() {
    let schema = tagged_schema();
    let segment = tagged_segment(&schema);

    let plan = Plan::from_dsl(
        Arc::clone(&schema),
        r#"{
            "predicate": {"or": [
                {"term": {"field": "pk", "values": [3, 4]}},
                {"not": {"range": {"field": "pk", "lt": 98}}}
            ]},
            "vector": {"field": "vec", "metric": "L2", "topk": 10}
        }"#,
    )
    .unwrap();

    let result = query::search(&segment, &plan, &query_at(0.0), 1000).unwrap();
    let mut found: Vec<i64> = result.seg_offsets.iter().copied().filter(|&o| o >= 0).collect();
    found.sort_unstable();
    assert_eq!(found, vec![3, 4, 98, 99]);
}

#[test]
fn test_compare_expression() {
    let schema = tagged_schema();
    let segment = tagged_segment(&schema);

    // score < tag only where score = 0 and tag = 1? No: score = i, tag =
    // i % 2, so score < tag only at i = 0? score 0 < tag 0 is false; at
    // i = 1, 1 < 1 false. Use tag < score instead: true for every i >= 2.
    let plan = Plan::from_dsl(
        Arc::clone(&schema),
        r#"{
            "predicate": {"compare": {"left": "tag", "op": "lt", "right": "score"}},
            "vector": {"field": "vec", "metric": "L2", "topk": 2}
        }"#,
    )
    .unwrap();

    let result = query::search(&segment, &plan, &query_at(0.0), 1000).unwrap();
    assert_eq!(result.seg_offsets, vec![2, 3]);
}

#[test]
fn test_round_decimal() {
    let schema = tagged_schema();
    let segment = tagged_segment(&schema);

    let plan = Plan::from_dsl(
        Arc::clone(&schema),
        r#"{"vector": {"field": "vec", "metric": "L2", "topk": 1, "round_decimal": 1}}"#,
    )
    .unwrap();

    let result = query::search(&segment, &plan, &query_at(0.55), 1000).unwrap();
    // Row 1 is nearest at distance 0.45^2 = 0.2025; one decimal place
    // truncates to 0.2.
    assert_eq!(result.seg_offsets[0], 1);
    assert_eq!(result.distances[0], 0.2);
}

#[test]
fn test_ip_metric_prefers_larger() {
    let schema = tagged_schema();
    let segment = tagged_segment(&schema);

    let plan = Plan::from_dsl(
        Arc::clone(&schema),
        r#"{"vector": {"field": "vec", "metric": "IP", "topk": 2}}"#,
    )
    .unwrap();

    let result = query::search(&segment, &plan, &query_at(1.0), 1000).unwrap();
    assert_eq!(result.seg_offsets, vec![99, 98]);
    assert_eq!(result.distances, vec![99.0, 98.0]);
}

#[test]
fn test_binary_vectors_hamming_and_jaccard() {
    let schema = Arc::new(
        SchemaBuilder::new()
            .add_field("pk", DataType::Int64)
            .add_field("bits", DataType::BinaryVector { dim: 16 })
            .primary_key("pk")
            .build()
            .unwrap(),
    );
    let segment = GrowingSegment::new(Arc::clone(&schema), SegmentConfig::default());

    let rows: [[u8; 2]; 3] = [[0xff, 0xff], [0xff, 0x00], [0x00, 0x00]];
    let stride = schema.total_sizeof();
    let mut blob = vec![0u8; rows.len() * stride];
    for (i, bits) in rows.iter().enumerate() {
        let row = &mut blob[i * stride..(i + 1) * stride];
        LittleEndian::write_i64(&mut row[0..8], i as i64);
        row[8..10].copy_from_slice(bits);
    }
    let begin = segment.pre_insert(3).unwrap();
    segment.insert(begin, &[0, 1, 2], &[1, 2, 3], &blob).unwrap();

    let queries = PlaceholderGroup::from_binary_queries(16, &[vec![0xff, 0x0f]]).unwrap();

    let hamming = Plan::from_dsl(
        Arc::clone(&schema),
        r#"{"vector": {"field": "bits", "metric": "HAMMING", "topk": 3}}"#,
    )
    .unwrap();
    let result = query::search(&segment, &hamming, &queries, 10).unwrap();
    assert_eq!(result.seg_offsets, vec![0, 1, 2]);
    assert_eq!(result.distances, vec![4.0, 4.0, 12.0]);

    let jaccard = Plan::from_dsl(
        Arc::clone(&schema),
        r#"{"vector": {"field": "bits", "metric": "JACCARD", "topk": 1}}"#,
    )
    .unwrap();
    let result = query::search(&segment, &jaccard, &queries, 10).unwrap();
    // Query has 12 bits; row 0 has 16: intersection 12, union 16.
    assert_eq!(result.seg_offsets[0], 0);
    assert!((result.distances[0] - 0.25).abs() < 1e-6);
}

#[test]
fn test_placeholder_must_match_plan() {
    let schema = tagged_schema();
    let segment = tagged_segment(&schema);
    let plan = Plan::from_dsl(
        Arc::clone(&schema),
        r#"{"vector": {"field": "vec", "metric": "L2", "topk": 1}}"#,
    )
    .unwrap();

    // Wrong dimension.
    let bad = PlaceholderGroup::from_float_queries(8, &[vec![0.0; 8]]).unwrap();
    assert!(query::search(&segment, &plan, &bad, 1000).is_err());

    // Packed-blob parsing respects the plan's field.
    let mut blob = vec![0u8; 16];
    LittleEndian::write_f32_into(&[9.0, 0.0, 0.0, 0.0], &mut blob);
    let parsed = plan.parse_placeholder_group(&blob).unwrap();
    assert_eq!(parsed.num_queries(), 1);
    assert!(query::search(&segment, &plan, &parsed, 1000).is_ok());
}
