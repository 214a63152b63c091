extern crate tempo;

use std::cell::RefCell;
use std::rc::Rc;

use tempo::pipe::{self, Flushed, ReadExactly, ReadNow};
use tempo::prelude::*;

fn kernel<F: FnOnce()>(f: F) {
    let clock = ManualTimeSource::new();
    tempo::setup_with_time_source(Params::default(), clock.oracle());
    f();
    tempo::discard();
}

fn settle() {
    for _ in 0..4 {
        tempo::run_cycle().unwrap();
    }
}

#[test]
fn pushback_releases_once_capacity_frees_up() {
    kernel(|| {
        let (writer, reader) = pipe::new(2);

        let first = writer.write('a').unwrap();
        let second = writer.write('b').unwrap();
        let third = writer.write('c').unwrap();

        // Two values fit; the third write overflows and must wait.
        assert!(first.is_determined());
        assert!(second.is_determined());
        assert!(!third.is_determined());

        assert_eq!(reader.read_now(), ReadNow::Value('a'));
        assert!(third.is_determined(), "reading 'a' released the writer");
    });
}

#[test]
fn values_arrive_in_producer_order() {
    kernel(|| {
        let (writer, reader) = pipe::new(8);
        for v in 0..5u32 {
            writer.write_without_pushback(v).unwrap();
        }
        writer.close();

        let drained = reader.read_all();
        settle();
        assert_eq!(drained.peek(), Some(vec![0, 1, 2, 3, 4]));
    });
}

#[test]
fn concurrent_readers_partition_in_arrival_order() {
    kernel(|| {
        let (writer, reader) = pipe::new(8);

        let first = reader.read();
        let second = reader.clone().read();
        let third = reader.read();

        writer.write_without_pushback(10u32).unwrap();
        writer.write_without_pushback(20).unwrap();
        settle();

        assert_eq!(first.peek(), Some(Some(10)));
        assert_eq!(second.peek(), Some(Some(20)));
        assert!(!third.is_determined());

        writer.write_without_pushback(30).unwrap();
        settle();
        assert_eq!(third.peek(), Some(Some(30)));
    });
}

#[test]
fn close_drains_then_reports_eof() {
    kernel(|| {
        let (writer, reader) = pipe::new(4);
        writer.write_without_pushback(1u32).unwrap();
        writer.close();

        assert!(match writer.write(2) {
            Err(pipe::Error::Closed) => true,
            _ => false,
        });

        let first = reader.read();
        let eof = reader.read();
        settle();
        assert_eq!(first.peek(), Some(Some(1)));
        assert_eq!(eof.peek(), Some(None));
        assert_eq!(reader.read_now(), ReadNow::Eof);
    });
}

#[test]
fn closing_the_read_end_drops_the_buffer_and_signals_writers() {
    kernel(|| {
        let (writer, reader) = pipe::new(1);
        writer.write_without_pushback(1u32).unwrap();
        writer.write_without_pushback(2).unwrap();
        let flush = writer.downstream_flushed();
        let blocked = writer.write(3).unwrap();

        reader.close();
        settle();

        assert_eq!(flush.peek(), Some(Flushed::ReaderClosed));
        assert!(blocked.is_determined(), "pushback released on close");
        assert!(match writer.write(4) {
            Err(pipe::Error::Closed) => true,
            _ => false,
        });
        assert_eq!(writer.len(), 0, "buffered values were dropped");
    });
}

#[test]
fn read_exactly_demands_are_met_or_cut_short() {
    kernel(|| {
        let (writer, reader) = pipe::new(8);
        let exact = reader.read_exactly(2);
        let fewer = reader.read_exactly(3);

        for v in 0..3u32 {
            writer.write_without_pushback(v).unwrap();
        }
        writer.close();
        settle();

        assert_eq!(exact.peek(), Some(ReadExactly::Exactly(vec![0, 1])));
        assert_eq!(fewer.peek(), Some(ReadExactly::Fewer(vec![2])));

        let starved = reader.read_exactly(1);
        settle();
        assert_eq!(starved.peek(), Some(ReadExactly::Eof));
    });
}

#[test]
fn flushes_resolve_once_consumed() {
    kernel(|| {
        let (writer, reader) = pipe::new(8);
        writer.write_without_pushback(1u32).unwrap();
        writer.write_without_pushback(2).unwrap();

        let flushed = writer.downstream_flushed();
        assert!(!flushed.is_determined());

        assert_eq!(reader.read_now(), ReadNow::Value(1));
        assert!(!flushed.is_determined());
        assert_eq!(reader.read_now(), ReadNow::Value(2));
        settle();
        assert_eq!(flushed.peek(), Some(Flushed::Complete));

        // An idle pipe is flushed by definition.
        assert_eq!(writer.upstream_flushed().peek(), Some(Flushed::Complete));
    });
}

#[test]
fn every_value_written_is_read_exactly_once() {
    kernel(|| {
        let (writer, reader) = pipe::new(4);
        let seen = Rc::new(RefCell::new(Vec::new()));

        // A cooperative producer chained on pushback, and a consumer
        // draining as values arrive.
        fn produce(writer: pipe::Writer<u32>, next: u32) {
            if next == 12 {
                writer.close();
                return;
            }
            let chain = writer.clone();
            writer
                .write(next)
                .unwrap()
                .upon(move |_| produce(chain, next + 1));
        }
        produce(writer, 0);

        fn consume(reader: pipe::Reader<u32>, seen: Rc<RefCell<Vec<u32>>>) {
            let chain = reader.clone();
            reader.read().upon(move |value| {
                if let Some(v) = value {
                    seen.borrow_mut().push(v);
                    consume(chain, seen);
                }
            });
        }
        consume(reader, seen.clone());

        for _ in 0..64 {
            tempo::run_cycle().unwrap();
        }
        assert_eq!(*seen.borrow(), (0..12).collect::<Vec<u32>>());
    });
}

#[test]
fn read_now_does_not_jump_a_waiting_reader() {
    kernel(|| {
        let (writer, reader) = pipe::new(4);
        let waiting = reader.read();

        writer.write_without_pushback(1u32).unwrap();
        assert_eq!(reader.read_now(), ReadNow::NothingAvailable);

        settle();
        assert_eq!(waiting.peek(), Some(Some(1)));
    });
}
