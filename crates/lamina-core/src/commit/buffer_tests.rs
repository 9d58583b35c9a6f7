//! Tests for the `commit` module: buffer encoding, reader decoding, swap.

use super::{Accessor, Buffer, BufferPool, Op};
use crate::bitmap::CHUNK_SIZE;

#[test]
fn test_round_trip_single_chunk() {
    let mut buf = Buffer::new("age");
    buf.push_i64(Op::Put, 3, 40);
    buf.push_i64(Op::Merge, 10, 2);
    buf.push_empty(Op::Delete, 7);

    let mut r = buf.reader(0);
    assert!(r.next());
    assert_eq!(r.op(), Op::Put);
    assert_eq!(r.offset(), 3);
    assert_eq!(r.i64_value(), 40);

    assert!(r.next());
    assert_eq!(r.op(), Op::Merge);
    assert_eq!(r.offset(), 10);
    assert_eq!(r.i64_value(), 2);

    assert!(r.next());
    assert_eq!(r.op(), Op::Delete);
    assert_eq!(r.offset(), 7);
    assert!(r.bytes().is_empty());

    assert!(!r.next());
}

#[test]
fn test_backwards_offsets_encode_as_negative_deltas() {
    let mut buf = Buffer::new("x");
    buf.push_u32(Op::Put, 100, 1);
    buf.push_u32(Op::Put, 5, 2);
    buf.push_u32(Op::Put, 60, 3);

    let mut seen = Vec::new();
    let mut r = buf.reader(0);
    while r.next() {
        seen.push((r.offset(), r.u32_value()));
    }
    assert_eq!(seen, vec![(100, 1), (5, 2), (60, 3)]);
}

#[test]
fn test_sections_split_on_chunk_change() {
    let mut buf = Buffer::new("x");
    buf.push_i64(Op::Put, 1, 10);
    buf.push_i64(Op::Put, CHUNK_SIZE + 2, 20);
    buf.push_i64(Op::Put, 3, 30);

    assert_eq!(buf.chunks(), vec![0, 1]);

    // Chunk 0 yields both of its sections, in append order.
    let mut seen = Vec::new();
    let mut r = buf.reader(0);
    while r.next() {
        seen.push(r.offset());
    }
    assert_eq!(seen, vec![1, 3]);

    let mut r = buf.reader(1);
    assert!(r.next());
    assert_eq!(r.offset(), CHUNK_SIZE + 2);
    assert_eq!(r.i64_value(), 20);
    assert!(!r.next());

    // Seeking retargets the same reader at another chunk.
    r.seek(0);
    let mut seen = Vec::new();
    while r.next() {
        seen.push(r.i64_value());
    }
    assert_eq!(seen, vec![10, 30]);
}

#[test]
fn test_extract_keeps_only_target_chunk() {
    let mut buf = Buffer::new("x");
    buf.push_i64(Op::Put, 1, 10);
    buf.push_i64(Op::Put, CHUNK_SIZE + 2, 20);
    buf.push_i64(Op::Put, 3, 30);

    let mut only0 = buf.extract(0).unwrap();
    assert_eq!(only0.column(), "x");
    let mut seen = Vec::new();
    let mut r = only0.reader(0);
    while r.next() {
        seen.push((r.offset(), r.i64_value()));
    }
    assert_eq!(seen, vec![(1, 10), (3, 30)]);

    assert!(buf.extract(7).is_none());
}

#[test]
fn test_string_payload_and_var_swap() {
    let mut buf = Buffer::new("name");
    buf.push_str(Op::Put, 4, "short");
    buf.push_str(Op::Put, 5, "after");

    let mut r = buf.reader(0);
    assert!(r.next());
    assert_eq!(r.str_value(), "short");
    r.swap_str("a considerably longer merged value");
    assert_eq!(r.str_value(), "a considerably longer merged value");

    // The record after the splice still decodes.
    assert!(r.next());
    assert_eq!(r.offset(), 5);
    assert_eq!(r.str_value(), "after");
    assert!(!r.next());

    // Rewind sees the swapped value.
    r.rewind();
    assert!(r.next());
    assert_eq!(r.str_value(), "a considerably longer merged value");
}

#[test]
fn test_fixed_width_swap_feeds_second_pass() {
    let mut buf = Buffer::new("balance");
    buf.push_f64(Op::Merge, 9, 60.0);

    let mut r = buf.reader(0);
    assert!(r.next());
    assert_eq!(r.f64_value(), 60.0);
    r.swap_f64(110.0);

    // The record is now PUT(final): downstream consumers replay it as a
    // plain position-addressed write.
    r.rewind();
    assert!(r.next());
    assert_eq!(r.op(), Op::Put);
    assert_eq!(r.f64_value(), 110.0);
    assert_eq!(r.float(), 110.0);
}

#[test]
fn test_accessor_widths() {
    let mut buf = Buffer::new("n");
    buf.push_i16(Op::Put, 0, -7);
    buf.push_u16(Op::Put, 1, 7);
    buf.push_f32(Op::Put, 2, 1.5);
    buf.push_empty(Op::PutTrue, 3);

    let mut r = buf.reader(0);
    assert!(r.next());
    assert_eq!(r.int(), -7);
    assert!(r.next());
    assert_eq!(r.uint(), 7);
    assert!(r.next());
    assert_eq!(r.float(), 1.5);
    assert!(r.next());
    assert!(r.boolean());
    assert_eq!(r.index(), 3);
}

#[test]
fn test_corrupt_tag_stops_iteration() {
    let mut buf = Buffer::new("x");
    buf.push_i64(Op::Put, 1, 10);
    // An op nibble of 0 is not a valid operation.
    buf.data_mut().push(0x0F);

    let mut r = buf.reader(0);
    assert!(r.next());
    assert!(!r.next());
    assert!(!r.next());
}

#[test]
fn test_truncated_payload_stops_iteration() {
    let mut buf = Buffer::new("x");
    buf.push_i64(Op::Put, 1, 10);
    let cut = buf.len() - 3;
    buf.data_mut().truncate(cut);

    let mut r = buf.reader(0);
    assert!(!r.next());
}

#[test]
fn test_frame_round_trip() {
    let mut buf = Buffer::new("name");
    buf.push_str(Op::Put, 12, "Merlin");
    let bytes = buf.to_frame_bytes();

    let mut back = Buffer::from_frame_bytes(&bytes).unwrap();
    assert_eq!(back.column(), "name");
    let mut r = back.reader(0);
    assert!(r.next());
    assert_eq!(r.offset(), 12);
    assert_eq!(r.str_value(), "Merlin");

    assert!(Buffer::from_frame_bytes(&[]).is_err());
    assert!(Buffer::from_frame_bytes(&[200, b'a']).is_err());
}

#[test]
fn test_pool_reuses_buffers() {
    let pool = BufferPool::new();
    let mut a = pool.acquire("a");
    a.push_i64(Op::Put, 0, 1);
    pool.release(a);

    let b = pool.acquire("b");
    assert_eq!(b.column(), "b");
    assert!(b.is_empty());
}

mod properties {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn prop_reader_yields_writes_in_order(
            ops in proptest::collection::vec((0u32..200_000, any::<i64>()), 1..100)
        ) {
            let mut buf = Buffer::new("p");
            for (idx, v) in &ops {
                buf.push_i64(Op::Put, *idx, *v);
            }
            let mut seen = Vec::new();
            for chunk in buf.chunks() {
                let mut r = buf.reader(chunk);
                while r.next() {
                    seen.push((r.offset(), r.i64_value()));
                }
            }
            // Per-chunk iteration groups by chunk but preserves append order
            // within a chunk.
            let mut grouped: Vec<(u32, i64)> = Vec::new();
            for chunk in buf.chunks() {
                for (idx, v) in &ops {
                    if idx >> 14 == chunk {
                        grouped.push((*idx, *v));
                    }
                }
            }
            prop_assert_eq!(seen, grouped);
        }
    }
}
