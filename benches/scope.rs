//! Scope lifecycle benchmarks.

use criterion::{Criterion, criterion_group, criterion_main};
use std::sync::Arc;
use symm_mem::capability::{CommVersion, RuntimeVersion};
use symm_mem::comm::{CommGroup, PointToPointComm};
use symm_mem::config::SymmMemConfig;
use symm_mem::error::Result;
use symm_mem::memory::{self, DeviceAllocator, HostAllocator};
use symm_mem::registry::SymmetricMemory;
use symm_mem::runtime::{DeviceId, DeviceRuntime, GraphPoolId, StreamHandle};
use symm_mem::scope::ScopeOptions;

struct NullComm;

impl PointToPointComm for NullComm {
    fn version(&self) -> CommVersion {
        CommVersion::from_code(22703)
    }

    fn register_comm_window_raw(&self, _address: usize, _size: usize) -> Result<()> {
        Ok(())
    }
}

struct Group {
    world_size: usize,
}

impl CommGroup for Group {
    fn world_size(&self) -> usize {
        self.world_size
    }

    fn group_name(&self) -> &str {
        "bench"
    }

    fn comm(&self) -> Option<&dyn PointToPointComm> {
        Some(&NullComm)
    }
}

struct Runtime;

impl DeviceRuntime for Runtime {
    fn current_device(&self) -> DeviceId {
        0
    }

    fn current_stream(&self) -> StreamHandle {
        StreamHandle::from_raw(0x10)
    }

    fn is_current_stream_capturing(&self) -> bool {
        false
    }

    fn version(&self) -> RuntimeVersion {
        RuntimeVersion::new(2, 8, 0)
    }

    fn end_allocate_current_stream_to_pool(&self, _: DeviceId, _: GraphPoolId) {}
    fn begin_allocate_to_pool(&self, _: DeviceId, _: GraphPoolId) {}
    fn end_allocate_to_pool(&self, _: DeviceId, _: GraphPoolId) {}
    fn begin_allocate_current_thread_to_pool(&self, _: DeviceId, _: GraphPoolId) {}
}

fn host_symm() -> SymmetricMemory {
    let config = SymmMemConfig {
        enable_symm_mem: true,
        ..Default::default()
    };
    SymmetricMemory::new(&config, || -> Result<Arc<dyn DeviceAllocator>> {
        Ok(Arc::new(HostAllocator::new()))
    })
}

fn bench_scope_lifecycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("scope_lifecycle");
    let symm = host_symm();
    let runtime = Runtime;

    let single = Group { world_size: 1 };
    group.bench_function("disabled", |b| {
        b.iter(|| {
            symm.with_symmetric_memory(&single, &runtime, ScopeOptions::default(), |_| ())
                .expect("disabled scope")
        });
    });

    let peers = Group { world_size: 8 };
    group.bench_function("active_no_new_segments", |b| {
        b.iter(|| {
            symm.with_symmetric_memory(&peers, &runtime, ScopeOptions::default(), |_| {
                let buf = memory::allocate(4096, 0, runtime.current_stream()).expect("routed");
                std::hint::black_box(buf);
            })
            .expect("active scope")
        });
    });

    group.finish();
}

criterion_group!(benches, bench_scope_lifecycle);
criterion_main!(benches);
