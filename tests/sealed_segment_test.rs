//! Sealed-segment scenarios: column loads, index attachment, drops,
//! readiness checks.

use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};

use lodestone::index::{FlatIndex, IvfIndex};
use lodestone::query::{self, Plan, PlaceholderGroup};
use lodestone::schema::{DataType, FieldId, Schema, SchemaBuilder};
use lodestone::segment::{SealedSegment, Segment};
use lodestone::MetricType;

const DIM: usize = 8;
const ROWS: usize = 1000;

fn pk_vec_schema() -> Arc<Schema> {
    Arc::new(
        SchemaBuilder::new()
            .add_field("pk", DataType::Int64)
            .add_field("vec", DataType::FloatVector { dim: DIM })
            .primary_key("pk")
            .build()
            .unwrap(),
    )
}

fn row_id_blob(count: usize) -> Vec<u8> {
    let ids: Vec<i64> = (0..count as i64).collect();
    let mut blob = vec![0u8; count * 8];
    LittleEndian::write_i64_into(&ids, &mut blob);
    blob
}

/// Deterministic float vectors: row `i` sits at distance `|i - query|`
/// patterns along the first axis.
fn vector_data(count: usize) -> Vec<f32> {
    let mut data = vec![0.0f32; count * DIM];
    for i in 0..count {
        data[i * DIM] = i as f32;
        data[i * DIM + 1] = (i % 7) as f32;
    }
    data
}

fn vector_blob(data: &[f32]) -> Vec<u8> {
    let mut blob = vec![0u8; data.len() * 4];
    LittleEndian::write_f32_into(data, &mut blob);
    blob
}

fn loaded_segment() -> (Arc<Schema>, SealedSegment) {
    let schema = pk_vec_schema();
    let segment = SealedSegment::new(Arc::clone(&schema));
    segment
        .load_field_data(FieldId::ROW_ID, ROWS as i64, &row_id_blob(ROWS))
        .unwrap();
    segment
        .load_field_data(FieldId(100), ROWS as i64, &row_id_blob(ROWS))
        .unwrap();
    segment
        .load_field_data(FieldId(101), ROWS as i64, &vector_blob(&vector_data(ROWS)))
        .unwrap();
    (schema, segment)
}

fn l2_plan(schema: &Arc<Schema>, topk: usize) -> Plan {
    Plan::from_dsl(
        Arc::clone(schema),
        &format!(
            r#"{{"vector": {{"field": "vec", "metric": "L2", "topk": {topk}, "params": {{"nprobe": 16}}}}}}"#
        ),
    )
    .unwrap()
}

fn query_at(x: f32) -> PlaceholderGroup {
    let mut vector = vec![0.0f32; DIM];
    vector[0] = x;
    PlaceholderGroup::from_float_queries(DIM, &[vector]).unwrap()
}

#[test]
fn test_load_and_indexed_search() {
    let (schema, segment) = loaded_segment();
    let index = IvfIndex::train(MetricType::L2, DIM, vector_data(ROWS), 32, 8).unwrap();
    segment
        .load_vector_index(FieldId(101), MetricType::L2, Arc::new(index))
        .unwrap();
    assert!(segment.has_vector_index(FieldId(101)).unwrap());

    let plan = l2_plan(&schema, 10);
    let result = query::search(&segment, &plan, &query_at(500.0), 1).unwrap();
    assert_eq!(result.num_queries, 1);
    assert_eq!(result.topk, 10);
    for &offset in &result.seg_offsets {
        assert!((0..ROWS as i64).contains(&offset));
    }
}

#[test]
fn test_brute_force_fallback_without_index() {
    let (schema, segment) = loaded_segment();
    let plan = l2_plan(&schema, 3);
    let result = query::search(&segment, &plan, &query_at(42.0), 1).unwrap();
    assert_eq!(result.seg_offsets[0], 42);
}

#[test]
fn test_indexed_agrees_with_brute_force() {
    let (schema, segment) = loaded_segment();
    let plan = l2_plan(&schema, 10);
    let exact = query::search(&segment, &plan, &query_at(123.0), 1).unwrap();

    // Probing every list makes IVF exhaustive, so the top-K sets agree.
    let index = IvfIndex::train(MetricType::L2, DIM, vector_data(ROWS), 16, 16).unwrap();
    segment
        .load_vector_index(FieldId(101), MetricType::L2, Arc::new(index))
        .unwrap();
    let approximate = query::search(&segment, &plan, &query_at(123.0), 1).unwrap();

    let mut exact_set = exact.seg_offsets.clone();
    let mut approx_set = approximate.seg_offsets.clone();
    exact_set.sort_unstable();
    approx_set.sort_unstable();
    assert_eq!(exact_set, approx_set);
}

#[test]
fn test_row_count_consistency_asserted() {
    let schema = pk_vec_schema();
    let segment = SealedSegment::new(Arc::clone(&schema));
    segment
        .load_field_data(FieldId(100), 10, &row_id_blob(10))
        .unwrap();

    // A second column with a different row count is rejected.
    let result = segment.load_field_data(FieldId(101), 9, &vector_blob(&vector_data(9)));
    assert!(result.is_err());

    // So is an index whose count disagrees.
    let index = FlatIndex::from_float(MetricType::L2, DIM, vector_data(20)).unwrap();
    assert!(segment
        .load_vector_index(FieldId(101), MetricType::L2, Arc::new(index))
        .is_err());
}

#[test]
fn test_double_load_rejected() {
    let (_, segment) = loaded_segment();
    let result = segment.load_field_data(FieldId(100), ROWS as i64, &row_id_blob(ROWS));
    assert!(result.is_err());
}

#[test]
fn test_field_data_rejected_when_indexed() {
    let schema = pk_vec_schema();
    let segment = SealedSegment::new(Arc::clone(&schema));
    let index = FlatIndex::from_float(MetricType::L2, DIM, vector_data(ROWS)).unwrap();
    segment
        .load_vector_index(FieldId(101), MetricType::L2, Arc::new(index))
        .unwrap();

    let result =
        segment.load_field_data(FieldId(101), ROWS as i64, &vector_blob(&vector_data(ROWS)));
    assert!(result.is_err());
}

#[test]
fn test_check_search_names_missing_field() {
    let schema = pk_vec_schema();
    let segment = SealedSegment::new(Arc::clone(&schema));
    segment
        .load_field_data(FieldId::ROW_ID, ROWS as i64, &row_id_blob(ROWS))
        .unwrap();

    let plan = l2_plan(&schema, 1);
    let error = query::search(&segment, &plan, &query_at(0.0), 1).unwrap_err();
    assert!(error.to_string().contains("vec"), "got: {error}");
}

#[test]
fn test_drop_field_data_and_index() {
    let (schema, segment) = loaded_segment();
    let index = FlatIndex::from_float(MetricType::L2, DIM, vector_data(ROWS)).unwrap();
    segment
        .load_vector_index(FieldId(101), MetricType::L2, Arc::new(index))
        .unwrap();

    segment.drop_vector_index(FieldId(101)).unwrap();
    assert!(!segment.has_vector_index(FieldId(101)).unwrap());

    // Raw data still serves the plan.
    let plan = l2_plan(&schema, 1);
    assert!(query::search(&segment, &plan, &query_at(1.0), 1).is_ok());

    segment.drop_field_data(FieldId(101)).unwrap();
    assert!(!segment.has_field_data(FieldId(101)).unwrap());
    assert!(query::search(&segment, &plan, &query_at(1.0), 1).is_err());
}

#[test]
fn test_load_round_trip() {
    let (schema, segment) = loaded_segment();
    let vec_field = schema.offset_of_name("vec").unwrap();

    let offsets: Vec<i64> = (0..ROWS as i64).collect();
    let column = segment.bulk_subscript(vec_field, &offsets).unwrap();
    assert_eq!(column.to_blob(), vector_blob(&vector_data(ROWS)));
}

#[test]
fn test_deletes_rejected() {
    let (_, segment) = loaded_segment();
    assert!(segment.pre_delete(1).is_err());
    assert!(segment.delete(0, &[1], &[1]).is_err());
}

#[test]
fn test_retrieve_on_sealed() {
    let (schema, segment) = loaded_segment();
    let plan =
        query::RetrievePlan::new(Arc::clone(&schema), vec![5, 4242, 999], &["pk", "vec"]).unwrap();

    let result = query::retrieve(&segment, &plan, 1).unwrap();
    assert_eq!(result.offsets, vec![5, -1, 999]);
    assert_eq!(result.ids, vec![5, -1, 999]);
    assert_eq!(result.columns[0].as_int64().unwrap(), &[5, 0, 999]);
}

#[test]
fn test_zero_timestamp_sees_nothing() {
    let (schema, segment) = loaded_segment();
    let plan = l2_plan(&schema, 2);
    let result = query::search(&segment, &plan, &query_at(0.0), 0).unwrap();
    assert_eq!(result.seg_offsets, vec![-1, -1]);
}

#[test]
fn test_load_meta_bounds_visibility() {
    use lodestone::segment::{LoadFieldMeta, LoadSegmentMeta};

    let (schema, segment) = loaded_segment();
    segment.set_load_meta(&LoadSegmentMeta {
        metas: vec![LoadFieldMeta {
            min_timestamp: 50,
            max_timestamp: 80,
            row_count: ROWS as i64,
        }],
        total_size: (ROWS * schema.total_sizeof()) as i64,
    });

    // A read at or below the minimum insert timestamp predates the data.
    let plan = l2_plan(&schema, 1);
    let result = query::search(&segment, &plan, &query_at(3.0), 50).unwrap();
    assert_eq!(result.seg_offsets, vec![-1]);

    let result = query::search(&segment, &plan, &query_at(3.0), 51).unwrap();
    assert_eq!(result.seg_offsets, vec![3]);
}

#[test]
fn test_memory_usage_scales_with_rows() {
    let (schema, segment) = loaded_segment();
    let per_row = schema.total_sizeof();
    assert!(segment.memory_usage() >= ROWS * per_row);
}
