//! Failure propagation: a transport error on one rank's receive must raise
//! a communication error on every rank of the peer group, never on just
//! the rank that observed it.

use halosync::attribute::{Attribute, Attributes};
use halosync::gather::CopyGatherScatter;
use halosync::interface::{Interface, RemoteIndex, RemoteIndexMap};
use halosync::transport::{LocalTransport, Transport};
use halosync::{BufferedEngine, DatatypeEngine, SyncError};

fn run_ranks<R: Send>(size: usize, per_rank: impl Fn(LocalTransport) -> R + Sync) -> Vec<R> {
    let transports = LocalTransport::connected(size);
    std::thread::scope(|scope| {
        let handles: Vec<_> = transports
            .into_iter()
            .map(|transport| scope.spawn(|| per_rank(transport)))
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("rank thread panicked"))
            .collect()
    })
}

#[test]
fn buffered_receive_failure_raises_on_every_rank() {
    let results = run_ranks(2, |mut transport| {
        let rank = transport.rank();
        let mut interface = Interface::new();
        let mut v;
        if rank == 0 {
            interface.insert(1, vec![0, 1], vec![0, 1]);
            v = vec![1.0f64, 2.0];
        } else {
            interface.insert(0, vec![0, 1], vec![0, 1]);
            v = vec![3.0f64, 4.0];
            transport.inject_receive_failure();
        }
        let mut engine = BufferedEngine::new(transport);
        engine.build::<Vec<f64>>(&interface).unwrap();
        engine.forward_in_place::<CopyGatherScatter, Vec<f64>>(&mut v)
    });
    // No rank may return normally: the failing rank reports locally, the
    // healthy one learns about it through the closing min-reduction.
    for result in results {
        assert!(matches!(result, Err(SyncError::Communication)));
    }
}

#[test]
fn datatype_receive_failure_raises_on_every_rank() {
    let results = run_ranks(2, |mut transport| {
        let rank = transport.rank();
        let mut remote = RemoteIndexMap::new();
        let peer = 1 - rank;
        remote.insert(peer, vec![RemoteIndex::new(0, Attribute::Owner)]);
        let mut send = vec![rank as f64];
        let mut recv = vec![0.0f64];
        if rank == 1 {
            transport.inject_receive_failure();
        }
        let flags = Attributes::of(&[Attribute::Owner]);
        let mut engine = DatatypeEngine::new(transport);
        engine
            .build(&remote, &flags, &mut send, &flags, &mut recv)
            .unwrap();
        engine.forward()
    });
    for result in results {
        assert!(matches!(result, Err(SyncError::Communication)));
    }
}

#[test]
fn transfer_after_a_failed_one_still_works() {
    let results = run_ranks(2, |mut transport| {
        let rank = transport.rank();
        let mut interface = Interface::new();
        let mut v;
        if rank == 0 {
            interface.insert(1, vec![0], vec![]);
            v = vec![5.5f64];
        } else {
            interface.insert(0, vec![], vec![0]);
            v = vec![0.0f64];
            transport.inject_receive_failure();
        }
        let mut engine = BufferedEngine::new(transport);
        engine.build::<Vec<f64>>(&interface).unwrap();
        let first = engine.forward_in_place::<CopyGatherScatter, Vec<f64>>(&mut v);
        assert!(matches!(first, Err(SyncError::Communication)));
        // The failed session drained all of its operations, so the engine
        // is immediately usable again.
        engine
            .forward_in_place::<CopyGatherScatter, Vec<f64>>(&mut v)
            .unwrap();
        v
    });
    assert_eq!(results[1], vec![5.5]);
}
