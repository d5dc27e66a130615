//! Property-based tests for byte streams through pipes and forwarders
//!
//! Bytes come out in the order they went in, whatever chunking the writer
//! used and whatever read size the reader picks.

use std::io::{Read, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use jobpipe_plumbing::{ForwardOptions, Pipe, SharedBuffer, Tee};
use parking_lot::Mutex;
use proptest::prelude::*;

/// Write `data` split at `cuts` from a separate thread, closing afterwards
fn write_in_pieces(
    mut writer: impl Write + Send + 'static,
    data: Vec<u8>,
    cuts: Vec<usize>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut start = 0;
        let mut bounds: Vec<usize> = cuts.into_iter().map(|c| c % (data.len() + 1)).collect();
        bounds.sort_unstable();
        for end in bounds.into_iter().chain(std::iter::once(data.len())) {
            if end > start {
                writer.write_all(&data[start..end]).unwrap();
                start = end;
            }
        }
    })
}

fn read_with_size(mut reader: impl Read, size: usize) -> Vec<u8> {
    let mut out = Vec::new();
    let mut buf = vec![0u8; size];
    loop {
        let n = reader.read(&mut buf).unwrap();
        if n == 0 {
            break;
        }
        out.extend_from_slice(&buf[..n]);
    }
    // EOF stays EOF
    assert_eq!(reader.read(&mut buf).unwrap(), 0);
    out
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_pipe_reassembles_any_chunking(
        data in proptest::collection::vec(any::<u8>(), 0..16_384),
        cuts in proptest::collection::vec(any::<usize>(), 0..8),
        read_size in 1usize..5000,
    ) {
        let pipe = Pipe::new().unwrap();
        let writer = write_in_pieces(pipe.side_in, data.clone(), cuts);
        let received = read_with_size(pipe.side_out, read_size);
        writer.join().unwrap();
        prop_assert_eq!(received, data);
    }

    #[test]
    fn prop_tee_observer_matches_output(
        data in proptest::collection::vec(any::<u8>(), 0..16_384),
        cuts in proptest::collection::vec(any::<usize>(), 0..8),
        chunk_size in 1usize..8192,
    ) {
        let upstream = Pipe::new().unwrap();
        let downstream = Pipe::new().unwrap();
        let observed = SharedBuffer::new();
        let eof_calls = Arc::new(AtomicUsize::new(0));
        // Length observed at the moment the eof callback ran
        let observed_at_eof = Arc::new(Mutex::new(None));

        let observer = observed.clone();
        let calls = Arc::clone(&eof_calls);
        let snapshot = Arc::clone(&observed_at_eof);
        let watcher = observed.clone();
        let tee = Tee::builder(upstream.side_out, downstream.side_in)
            .observer(move |chunk| observer.append(chunk))
            .on_eof(move |end| {
                assert!(end.is_eof());
                calls.fetch_add(1, Ordering::SeqCst);
                *snapshot.lock() = Some(watcher.len());
            })
            .options(ForwardOptions::new().chunk_size(chunk_size))
            .spawn()
            .unwrap();

        let writer = write_in_pieces(upstream.side_in, data.clone(), cuts);
        let received = read_with_size(downstream.side_out, 4096);
        writer.join().unwrap();
        tee.join().unwrap();

        prop_assert_eq!(&received, &data);
        prop_assert_eq!(observed.contents(), data.clone());
        prop_assert_eq!(eof_calls.load(Ordering::SeqCst), 1);
        prop_assert_eq!(*observed_at_eof.lock(), Some(data.len()));
    }
}
