//! Bounded-capacity resources with a FIFO wait queue.
//!
//! A `Resource` hands out at most `capacity` units at a time. Requests that
//! cannot be served wait in arrival order; when a unit comes back the head of
//! the queue gets it and, if its process is suspended on it, is resumed at
//! the current time.
//!
//! A `Request` is the scoped guard for one unit: dropping it gives the unit
//! back, or takes the request out of the queue if it was never granted. That
//! covers every way a holder can go away: finishing, failing, returning early
//! or being cancelled.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use tracing::{debug, warn};

use crate::environment::{Core, Environment};
use crate::error::DesError;
use crate::process::{ProcessId, ProcessState, Suspension, Wake};
use crate::time::SimTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceId(usize);

impl ResourceId {
    #[inline]
    pub fn raw(self) -> usize {
        self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(u64);

impl RequestId {
    #[inline]
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Q{}", self.0)
    }
}

/// Snapshot of a resource's occupancy and running totals.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ResourceStats {
    pub capacity: usize,
    pub in_use: usize,
    pub queue_len: usize,
    pub requests: u64,
    pub grants: u64,
    pub releases: u64,
    /// Requests that left the queue without ever being granted.
    pub withdrawals: u64,
    /// Sum over grants of the time spent queued.
    pub total_wait: f64,
    pub peak_queue_len: usize,
}

impl ResourceStats {
    pub fn is_at_capacity(&self) -> bool {
        self.in_use >= self.capacity
    }

    pub fn has_queue(&self) -> bool {
        self.queue_len > 0
    }

    pub fn utilization(&self) -> f64 {
        if self.capacity == 0 {
            0.0
        } else {
            self.in_use as f64 / self.capacity as f64
        }
    }

    pub fn mean_wait(&self) -> f64 {
        if self.grants == 0 {
            0.0
        } else {
            self.total_wait / self.grants as f64
        }
    }
}

#[derive(Debug)]
pub(crate) struct ResourceState {
    capacity: usize,
    in_use: usize,
    queue: VecDeque<RequestId>,
    stats: ResourceStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestStatus {
    Pending,
    Granted,
}

#[derive(Debug)]
pub(crate) struct RequestRecord {
    resource: ResourceId,
    pub(crate) owner: ProcessId,
    requested_at: SimTime,
    status: RequestStatus,
}

impl RequestRecord {
    pub(crate) fn is_granted(&self) -> bool {
        self.status == RequestStatus::Granted
    }
}

impl Core {
    fn add_resource(&mut self, capacity: usize) -> ResourceId {
        let id = ResourceId(self.resources.len());
        self.resources.push(ResourceState {
            capacity,
            in_use: 0,
            queue: VecDeque::new(),
            stats: ResourceStats::default(),
        });
        id
    }

    fn open_request(&mut self, resource: ResourceId, owner: ProcessId) -> RequestId {
        let request = RequestId(self.next_request);
        self.next_request += 1;
        let now = self.now;

        let state = &mut self.resources[resource.0];
        state.stats.requests += 1;
        let status = if state.in_use < state.capacity {
            state.in_use += 1;
            state.stats.grants += 1;
            RequestStatus::Granted
        } else {
            state.queue.push_back(request);
            state.stats.peak_queue_len = state.stats.peak_queue_len.max(state.queue.len());
            RequestStatus::Pending
        };
        debug!(%resource, %request, %owner, ?status, in_use = state.in_use, "request opened");

        self.requests.insert(
            request,
            RequestRecord {
                resource,
                owner,
                requested_at: now,
                status,
            },
        );
        request
    }

    fn release_request(&mut self, request: RequestId, resource: ResourceId) -> Result<(), DesError> {
        match self.requests.get(&request) {
            Some(record) if record.resource == resource && record.is_granted() => {}
            _ => return Err(DesError::ReleaseOfUnownedRequest { request, resource }),
        }
        self.requests.remove(&request);
        self.return_unit(resource);
        Ok(())
    }

    /// Close a request from its guard: a granted unit goes back, a pending
    /// entry leaves the queue.
    fn settle_request(&mut self, request: RequestId) {
        let Some(record) = self.requests.remove(&request) else {
            return;
        };
        match record.status {
            RequestStatus::Granted => self.return_unit(record.resource),
            RequestStatus::Pending => {
                let state = &mut self.resources[record.resource.0];
                state.queue.retain(|queued| *queued != request);
                state.stats.withdrawals += 1;
                debug!(resource = %record.resource, %request, "request withdrawn");
            }
        }
    }

    fn return_unit(&mut self, resource: ResourceId) {
        let state = &mut self.resources[resource.0];
        debug_assert!(state.in_use > 0, "released more units than were granted");
        state.in_use -= 1;
        state.stats.releases += 1;
        self.grant_waiters(resource);
    }

    /// Hand free units to the head of the queue, oldest first.
    fn grant_waiters(&mut self, resource: ResourceId) {
        let now = self.now;
        loop {
            let state = &mut self.resources[resource.0];
            if state.in_use >= state.capacity {
                break;
            }
            let Some(request) = state.queue.pop_front() else {
                break;
            };
            let Some(record) = self.requests.get_mut(&request) else {
                continue;
            };
            state.in_use += 1;
            state.stats.grants += 1;
            state.stats.total_wait += now.since(record.requested_at);
            record.status = RequestStatus::Granted;
            let owner = record.owner;
            debug!(%resource, %request, %owner, %now, "request granted");

            let waiting = ProcessState::Suspended(Suspension::Acquire(request));
            if self.states.get(&owner) == Some(&waiting) {
                self.wake_at(now, owner, Wake::Granted(request));
            }
        }
    }

    fn resource_stats(&self, resource: ResourceId) -> ResourceStats {
        let state = &self.resources[resource.0];
        ResourceStats {
            capacity: state.capacity,
            in_use: state.in_use,
            queue_len: state.queue.len(),
            ..state.stats
        }
    }
}

/// Handle to a resource living in one environment. Cheap to clone.
#[derive(Clone)]
pub struct Resource {
    core: Rc<RefCell<Core>>,
    id: ResourceId,
}

impl Resource {
    pub fn new(env: &Environment, capacity: usize) -> Result<Resource, DesError> {
        if capacity == 0 {
            return Err(DesError::InvalidCapacity { capacity });
        }
        let core = Rc::clone(env.core());
        let id = core.borrow_mut().add_resource(capacity);
        debug!(resource = %id, capacity, "resource created");
        Ok(Resource { core, id })
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub(crate) fn open(&self, core: &Rc<RefCell<Core>>, owner: ProcessId) -> Result<Request, DesError> {
        if !Rc::ptr_eq(&self.core, core) {
            return Err(DesError::ForeignResource(self.id));
        }
        let id = self.core.borrow_mut().open_request(self.id, owner);
        Ok(Request {
            core: Rc::clone(&self.core),
            id,
            resource: self.id,
            released: false,
        })
    }

    /// Give back the unit held by `request`.
    pub fn release(&self, request: &mut Request) -> Result<(), DesError> {
        if request.resource != self.id || !Rc::ptr_eq(&self.core, &request.core) {
            return Err(DesError::ReleaseOfUnownedRequest {
                request: request.id,
                resource: self.id,
            });
        }
        request.release()
    }

    pub fn capacity(&self) -> usize {
        self.stats().capacity
    }

    pub fn in_use(&self) -> usize {
        self.stats().in_use
    }

    pub fn queue_len(&self) -> usize {
        self.stats().queue_len
    }

    pub fn stats(&self) -> ResourceStats {
        self.core.borrow().resource_stats(self.id)
    }
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("id", &self.id)
            .field("stats", &self.stats())
            .finish()
    }
}

/// One held or pending unit of a resource. Released exactly once: either
/// explicitly or when dropped.
pub struct Request {
    core: Rc<RefCell<Core>>,
    id: RequestId,
    resource: ResourceId,
    released: bool,
}

impl Request {
    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn resource(&self) -> ResourceId {
        self.resource
    }

    pub fn is_granted(&self) -> bool {
        !self.released
            && self
                .core
                .borrow()
                .requests
                .get(&self.id)
                .is_some_and(RequestRecord::is_granted)
    }

    /// Give the unit back now instead of at drop.
    pub fn release(&mut self) -> Result<(), DesError> {
        if self.released {
            return Err(DesError::DoubleRelease { request: self.id });
        }
        self.core.borrow_mut().release_request(self.id, self.resource)?;
        self.released = true;
        Ok(())
    }
}

impl Drop for Request {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        match self.core.try_borrow_mut() {
            Ok(mut core) => core.settle_request(self.id),
            Err(_) => warn!(request = %self.id, "request dropped while the kernel was borrowed"),
        }
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("id", &self.id)
            .field("resource", &self.resource)
            .field("released", &self.released)
            .finish()
    }
}
