//! Revocation handles returned by every registration.

type Action = Box<dyn FnOnce() + Send>;

/// Undoes one or more registrations when [`run`](Destructor::run) is called.
///
/// Dropping a `Destructor` without running it leaves the registrations in
/// place. Combined destructors run their parts in reverse order.
#[must_use = "dropping a Destructor keeps the registration alive forever"]
#[derive(Default)]
pub struct Destructor {
    actions: Vec<Action>,
}

impl Destructor {
    pub fn new(action: impl FnOnce() + Send + 'static) -> Self {
        Self {
            actions: vec![Box::new(action)],
        }
    }

    /// A destructor that does nothing.
    pub fn noop() -> Self {
        Self::default()
    }

    pub fn combine(parts: impl IntoIterator<Item = Destructor>) -> Self {
        let mut combined = Self::default();
        for part in parts {
            combined.push(part);
        }
        combined
    }

    pub fn push(&mut self, other: Destructor) {
        self.actions.extend(other.actions);
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn run(self) {
        for action in self.actions.into_iter().rev() {
            action();
        }
    }
}

impl std::fmt::Debug for Destructor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Destructor")
            .field("actions", &self.actions.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn combined_runs_in_reverse() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let part = |n: u32| {
            let log = Arc::clone(&log);
            Destructor::new(move || log.lock().unwrap().push(n))
        };
        let d = Destructor::combine([part(1), part(2), Destructor::noop(), part(3)]);
        assert_eq!(d.len(), 3);
        d.run();
        assert_eq!(*log.lock().unwrap(), vec![3, 2, 1]);
    }
}
