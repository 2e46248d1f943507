//! Rollback journal used by the Ingest-HTTP write path.
//!
//! Each successful write step pushes a compensating future onto the journal;
//! on failure the caller unwinds the journal in reverse.
use futures::future::BoxFuture;

type Compensation<'a> = BoxFuture<'a, ()>;

/// An ordered stack of compensating actions. Push one after each successful
/// step that needs undoing if a later step fails; call [`Journal::unwind`] on
/// error.
#[derive(Default)]
pub struct Journal<'a> {
	actions: Vec<Compensation<'a>>,
}

impl<'a> Journal<'a> {
	pub fn new() -> Self {
		Self { actions: Vec::new() }
	}

	pub fn push(&mut self, action: Compensation<'a>) {
		self.actions.push(action);
	}

	/// Runs every compensating action in reverse order (most recent first).
	pub async fn unwind(mut self) {
		while let Some(action) = self.actions.pop() {
			action.await;
		}
	}

	/// Discards the journal without running any compensation: used on the
	/// success path.
	pub fn discard(mut self) {
		self.actions.clear();
	}
}
