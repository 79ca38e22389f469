//! Unit tests for ByteSpan

use core_types::ByteSpan;
use std::sync::Arc;

#[test]
fn test_span_whole_buffer() {
    let span = ByteSpan::from(vec![1u8, 2, 3, 4]);
    assert_eq!(span.len(), 4);
    assert!(!span.is_empty());
    assert_eq!(span.as_slice(), &[1, 2, 3, 4]);
}

#[test]
fn test_span_range_ending_at_buffer_end_is_accepted() {
    let data: Arc<[u8]> = Arc::from(vec![0u8; 8]);
    let span = ByteSpan::from_range(Arc::clone(&data), 4..8).unwrap();
    assert_eq!(span.len(), 4);
    assert!(ByteSpan::from_range(data, 4..9).is_none());
}

#[test]
fn test_span_inverted_range_rejected() {
    let span = ByteSpan::from(vec![0u8; 8]);
    #[allow(clippy::reversed_empty_ranges)]
    let inverted = span.slice(5..3);
    assert!(inverted.is_none());
}

#[test]
fn test_span_equality_compares_contents() {
    let a = ByteSpan::from(vec![9u8, 8, 7]);
    let b = ByteSpan::from(vec![0u8, 9, 8, 7]).slice(1..4).unwrap();
    assert_eq!(a, b);
}

#[test]
fn test_empty_span() {
    let span = ByteSpan::empty();
    assert!(span.is_empty());
    assert_eq!(span.len(), 0);
}
