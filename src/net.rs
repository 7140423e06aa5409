//! Connectivity signals consumed by the offline queue.

// crates.io
use tokio::sync::watch;
// self
use crate::_prelude::*;

/// Device network state as reported by the host platform.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Connectivity {
	/// A network path is available.
	#[default]
	Connected,
	/// No network path is available.
	Disconnected,
}
impl Connectivity {
	/// Returns `true` for [`Connectivity::Connected`].
	pub const fn is_connected(self) -> bool {
		matches!(self, Self::Connected)
	}
}

/// Source of connectivity transitions.
///
/// Platform integrations publish into a `watch` channel; the pipeline subscribes and replays the
/// offline queue every time the state becomes [`Connectivity::Connected`].
pub trait ConnectivityMonitor
where
	Self: Send + Sync,
{
	/// Returns a receiver that observes the current state and every later change.
	fn subscribe(&self) -> watch::Receiver<Connectivity>;
}

/// Ready-made [`ConnectivityMonitor`] fed by whoever owns the platform callback.
#[derive(Clone, Debug)]
pub struct ConnectivityHandle(Arc<watch::Sender<Connectivity>>);
impl ConnectivityHandle {
	/// Creates a handle starting in `initial`.
	pub fn new(initial: Connectivity) -> Self {
		Self(Arc::new(watch::Sender::new(initial)))
	}

	/// Publishes a new state; subscribers only wake when the state actually changes.
	pub fn set(&self, state: Connectivity) {
		self.0.send_if_modified(|current| {
			if *current == state {
				return false;
			}

			*current = state;

			true
		});
	}

	/// Returns the last published state.
	pub fn current(&self) -> Connectivity {
		*self.0.borrow()
	}
}
impl Default for ConnectivityHandle {
	fn default() -> Self {
		Self::new(Connectivity::Connected)
	}
}
impl ConnectivityMonitor for ConnectivityHandle {
	fn subscribe(&self) -> watch::Receiver<Connectivity> {
		self.0.subscribe()
	}
}
