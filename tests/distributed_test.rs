//! Multi-process synchronization tests over real MPI.
//!
//! These tests require MPI and the `distributed` feature flag.
//! Run with: mpirun -n 2 cargo test --features distributed --test distributed_test
//!
//! Without MPI installed, these tests are excluded from the default build.

#![cfg(feature = "distributed")]

use halosync::attribute::AllAttributes;
use halosync::gather::CopyGatherScatter;
use halosync::interface::{Interface, RemoteIndexMap};
use halosync::transport::{MpiTransport, Transport, TypeBlock};
use halosync::{BufferedEngine, DatatypeEngine};

#[test]
fn world_transport_degenerate_single_rank() {
    // Run as a single MPI rank to verify both engines work over the MPI
    // backend in the degenerate single-process case. MPI may only be
    // initialized once per process, so everything lives in one test.
    let _universe = mpi::initialize().expect("MPI init failed");
    buffered_single_rank_smoke();
    datatype_single_rank_smoke();
}

fn buffered_single_rank_smoke() {
    let mut transport = MpiTransport::world();
    assert_eq!(transport.size(), 1);
    assert_eq!(transport.rank(), 0);
    assert_eq!(transport.all_reduce_min(3).expect("reduce failed"), 3);

    let interface = Interface::new();
    let mut engine = BufferedEngine::new(transport);
    engine.build::<Vec<f64>>(&interface).expect("build failed");

    let mut v = vec![1.0f64, 2.0, 3.0];
    engine
        .forward_in_place::<CopyGatherScatter, Vec<f64>>(&mut v)
        .expect("forward failed");
    assert_eq!(v, vec![1.0, 2.0, 3.0]);
}

fn datatype_single_rank_smoke() {
    let mut transport = MpiTransport::world();

    // Commit and release a hindexed descriptor directly; a single rank has
    // no peers, so the engine below never reaches this path.
    let ty = transport.commit_type(vec![
        TypeBlock {
            len: 8,
            displacement: 0,
        },
        TypeBlock {
            len: 16,
            displacement: 24,
        },
    ]);
    transport.free_type(ty);

    let remote = RemoteIndexMap::new();
    let mut send = vec![1.0f64, 2.0, 3.0];
    let mut recv = vec![0.0f64; 3];
    let mut engine = DatatypeEngine::new(transport);
    engine
        .build(&remote, &AllAttributes, &mut send, &AllAttributes, &mut recv)
        .expect("build failed");
    engine.forward().expect("forward failed");
    engine.backward().expect("backward failed");
    drop(engine);
    assert_eq!(send, vec![1.0, 2.0, 3.0]);
    assert_eq!(recv, vec![0.0, 0.0, 0.0]);
}
