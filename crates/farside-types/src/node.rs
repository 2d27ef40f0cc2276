//! Node handles.

/// Handle into the master's remote registry. The registry owns every
/// remote; neighbor slots and focus state refer to them by index, so
/// the neighbor graph may contain cycles without ownership trouble.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RemoteId(pub usize);

/// A resolved reference to a node in the topology.
///
/// Configuration refers to nodes by name; topology resolution replaces
/// every name with one of these before the event loop starts, so an
/// unresolved reference cannot survive into the running system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Node {
    Master,
    Remote(RemoteId),
}
