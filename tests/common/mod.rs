//! Test doubles shared by the integration tests.

#![allow(dead_code)]

use parking_lot::Mutex;
use std::cell::{Cell, RefCell};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use symm_mem::capability::{CommVersion, RuntimeVersion};
use symm_mem::comm::{CommGroup, PointToPointComm};
use symm_mem::config::SymmMemConfig;
use symm_mem::error::{Error, Result};
use symm_mem::memory::{DeviceAllocator, HostAllocator};
use symm_mem::registry::SymmetricMemory;
use symm_mem::runtime::{DeviceId, DeviceRuntime, GraphPoolId, StreamHandle};

/// Communicator that records every window registration.
pub struct RecordingComm {
    version: CommVersion,
    registrations: RefCell<Vec<(usize, usize)>>,
    reject: Cell<bool>,
}

impl RecordingComm {
    pub fn new(code: u32) -> Self {
        Self {
            version: CommVersion::from_code(code),
            registrations: RefCell::new(Vec::new()),
            reject: Cell::new(false),
        }
    }

    /// Make every later registration fail.
    pub fn reject_all(&self) {
        self.reject.set(true);
    }

    pub fn registrations(&self) -> Vec<(usize, usize)> {
        self.registrations.borrow().clone()
    }
}

impl PointToPointComm for RecordingComm {
    fn version(&self) -> CommVersion {
        self.version
    }

    fn register_comm_window_raw(&self, address: usize, size: usize) -> Result<()> {
        if self.reject.get() {
            return Err(Error::Registration {
                address,
                size,
                reason: "rejected by test communicator".into(),
            });
        }
        self.registrations.borrow_mut().push((address, size));
        Ok(())
    }
}

/// Group with a configurable size and optional communicator.
pub struct TestGroup {
    world_size: usize,
    comm: Option<RecordingComm>,
}

impl TestGroup {
    pub fn new(world_size: usize, comm_code: u32) -> Self {
        Self {
            world_size,
            comm: Some(RecordingComm::new(comm_code)),
        }
    }

    pub fn without_comm(world_size: usize) -> Self {
        Self {
            world_size,
            comm: None,
        }
    }

    pub fn recorder(&self) -> &RecordingComm {
        self.comm.as_ref().expect("group has a communicator")
    }
}

impl CommGroup for TestGroup {
    fn world_size(&self) -> usize {
        self.world_size
    }

    fn group_name(&self) -> &str {
        "tp"
    }

    fn comm(&self) -> Option<&dyn PointToPointComm> {
        self.comm.as_ref().map(|c| c as &dyn PointToPointComm)
    }
}

/// Device runtime double recording capture-pool calls by name.
pub struct FakeRuntime {
    version: RuntimeVersion,
    stream: Cell<StreamHandle>,
    capturing: Cell<bool>,
    calls: RefCell<Vec<(&'static str, GraphPoolId)>>,
}

impl FakeRuntime {
    pub fn new(version: &str) -> Self {
        Self {
            version: RuntimeVersion::parse(version).expect("valid version"),
            stream: Cell::new(StreamHandle::from_raw(0x7f00)),
            capturing: Cell::new(false),
            calls: RefCell::new(Vec::new()),
        }
    }

    pub fn on_default_stream(self) -> Self {
        self.stream.set(StreamHandle::DEFAULT);
        self
    }

    pub fn capturing(self) -> Self {
        self.capturing.set(true);
        self
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.borrow().iter().map(|(name, _)| *name).collect()
    }

    fn record(&self, name: &'static str, pool: GraphPoolId) {
        self.calls.borrow_mut().push((name, pool));
    }
}

impl DeviceRuntime for FakeRuntime {
    fn current_device(&self) -> DeviceId {
        0
    }

    fn current_stream(&self) -> StreamHandle {
        self.stream.get()
    }

    fn is_current_stream_capturing(&self) -> bool {
        self.capturing.get()
    }

    fn version(&self) -> RuntimeVersion {
        self.version
    }

    fn end_allocate_current_stream_to_pool(&self, _device: DeviceId, pool: GraphPoolId) {
        self.record("end_allocate_current_stream_to_pool", pool);
    }

    fn begin_allocate_to_pool(&self, _device: DeviceId, pool: GraphPoolId) {
        self.record("begin_allocate_to_pool", pool);
    }

    fn end_allocate_to_pool(&self, _device: DeviceId, pool: GraphPoolId) {
        self.record("end_allocate_to_pool", pool);
    }

    fn begin_allocate_current_thread_to_pool(&self, _device: DeviceId, pool: GraphPoolId) {
        self.record("begin_allocate_current_thread_to_pool", pool);
    }
}

/// A context backed by host memory, counting allocator loads.
pub fn host_symm(enabled: bool) -> (SymmetricMemory, Arc<AtomicUsize>) {
    let loads = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&loads);
    let config = SymmMemConfig {
        enable_symm_mem: enabled,
        ..Default::default()
    };
    let symm = SymmetricMemory::new(&config, move || -> Result<Arc<dyn DeviceAllocator>> {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(HostAllocator::new()))
    });
    (symm, loads)
}

/// Thread-safe communicator; clones share one registration log.
#[derive(Clone, Default)]
pub struct SharedComm {
    registrations: Arc<Mutex<Vec<(usize, usize)>>>,
}

impl SharedComm {
    pub fn registrations(&self) -> Vec<(usize, usize)> {
        self.registrations.lock().clone()
    }
}

impl PointToPointComm for SharedComm {
    fn version(&self) -> CommVersion {
        CommVersion::from_code(22703)
    }

    fn register_comm_window_raw(&self, address: usize, size: usize) -> Result<()> {
        self.registrations.lock().push((address, size));
        Ok(())
    }
}

/// Group over a [`SharedComm`], one per thread.
pub struct SharedGroup {
    world_size: usize,
    comm: SharedComm,
}

impl SharedGroup {
    pub fn new(world_size: usize, comm: SharedComm) -> Self {
        Self { world_size, comm }
    }
}

impl CommGroup for SharedGroup {
    fn world_size(&self) -> usize {
        self.world_size
    }

    fn group_name(&self) -> &str {
        "tp"
    }

    fn comm(&self) -> Option<&dyn PointToPointComm> {
        Some(&self.comm)
    }
}
